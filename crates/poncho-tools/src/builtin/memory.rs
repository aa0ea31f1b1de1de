// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Memory tools: `memory_main_get`, `memory_main_update`,
//! `conversation_recall`. Registered only when a memory store is
//! configured, so the storage backend is an injected trait rather than a
//! concrete dependency — `poncho-tools` stays ignorant of where memory or
//! conversation history actually lives (redis, local file, ...).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::gating::ApprovalPolicy;
use crate::tool::{Tool, ToolCall, ToolOutput};

/// Backing store for the agent's persistent scratch memory. A single
/// namespace ("main") of key/value text.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn update(&self, key: &str, value: &str) -> anyhow::Result<()>;
}

/// Backing search over past conversation turns, used by `conversation_recall`.
#[async_trait]
pub trait ConversationRecall: Send + Sync {
    async fn recall(&self, query: &str, limit: usize) -> anyhow::Result<Vec<String>>;
}

pub struct MemoryGetTool {
    store: Arc<dyn MemoryStore>,
}

impl MemoryGetTool {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for MemoryGetTool {
    fn name(&self) -> &str {
        "memory_main_get"
    }

    fn description(&self) -> &str {
        "Reads a value previously stored with memory_main_update, by key."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "key": { "type": "string" } },
            "required": ["key"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let key = match call.args.get("key").and_then(|v| v.as_str()) {
            Some(k) => k,
            None => return ToolOutput::err(&call.id, "missing required parameter 'key'"),
        };
        match self.store.get(key).await {
            Ok(Some(value)) => ToolOutput::ok(&call.id, value),
            Ok(None) => ToolOutput::ok(&call.id, "(no value stored for this key)"),
            Err(e) => ToolOutput::err(&call.id, format!("memory read failed: {e}")),
        }
    }
}

pub struct MemoryUpdateTool {
    store: Arc<dyn MemoryStore>,
}

impl MemoryUpdateTool {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for MemoryUpdateTool {
    fn name(&self) -> &str {
        "memory_main_update"
    }

    fn description(&self) -> &str {
        "Stores a value under a key for later retrieval with memory_main_get."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key": { "type": "string" },
                "value": { "type": "string" }
            },
            "required": ["key", "value"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let key = match call.args.get("key").and_then(|v| v.as_str()) {
            Some(k) => k,
            None => return ToolOutput::err(&call.id, "missing required parameter 'key'"),
        };
        let value = match call.args.get("value").and_then(|v| v.as_str()) {
            Some(v) => v,
            None => return ToolOutput::err(&call.id, "missing required parameter 'value'"),
        };
        match self.store.update(key, value).await {
            Ok(()) => ToolOutput::ok(&call.id, "stored"),
            Err(e) => ToolOutput::err(&call.id, format!("memory write failed: {e}")),
        }
    }
}

pub struct ConversationRecallTool {
    recall: Arc<dyn ConversationRecall>,
}

impl ConversationRecallTool {
    pub fn new(recall: Arc<dyn ConversationRecall>) -> Self {
        Self { recall }
    }
}

#[async_trait]
impl Tool for ConversationRecallTool {
    fn name(&self) -> &str {
        "conversation_recall"
    }

    fn description(&self) -> &str {
        "Searches prior conversation turns for content relevant to a query."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "limit": { "type": "integer", "description": "Maximum number of matches (default 5)" }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let query = match call.args.get("query").and_then(|v| v.as_str()) {
            Some(q) => q,
            None => return ToolOutput::err(&call.id, "missing required parameter 'query'"),
        };
        let limit = call.args.get("limit").and_then(|v| v.as_u64()).unwrap_or(5) as usize;
        match self.recall.recall(query, limit).await {
            Ok(matches) if matches.is_empty() => ToolOutput::ok(&call.id, "(no matching turns found)"),
            Ok(matches) => ToolOutput::ok(&call.id, matches.join("\n---\n")),
            Err(e) => ToolOutput::err(&call.id, format!("recall failed: {e}")),
        }
    }
}
