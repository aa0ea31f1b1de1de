// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Deterministic providers for development and tests. Neither touches a
//! network; both speak the full contract (chunks, then one materialized
//! final completion).

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;
use serde_json::Value;

use crate::provider::{ModelProvider, ResponseStream};
use crate::types::{Completion, CompletionRequest, ResponseEvent, Role, ToolCallRequest, Usage};
use crate::ModelError;

/// Echoes the last user message back as `MOCK: <text>`.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model_name(&self) -> &str {
        "mock-small"
    }

    async fn stream(&self, req: CompletionRequest) -> Result<ResponseStream, ModelError> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.prompt_text())
            .unwrap_or_else(|| "[no input]".to_string());
        let text = format!("MOCK: {reply}");

        let events = vec![
            Ok(ResponseEvent::Chunk(text.clone())),
            Ok(ResponseEvent::Final(Completion {
                text,
                tool_calls: Vec::new(),
                usage: Usage { input: 10, output: 10 },
                raw: None,
            })),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// One scripted model turn: the chunks to stream, the tool calls of the
/// final completion, and its usage numbers.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTurn {
    pub chunks: Vec<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Usage,
}

impl ScriptedTurn {
    /// A plain text reply.
    pub fn text(reply: impl Into<String>) -> Self {
        Self {
            chunks: vec![reply.into()],
            tool_calls: Vec::new(),
            usage: Usage { input: 7, output: 3 },
        }
    }

    /// A turn that requests exactly one tool call and streams no text.
    pub fn tool(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            chunks: Vec::new(),
            tool_calls: vec![ToolCallRequest { id: id.into(), name: name.into(), arguments }],
            usage: Usage { input: 5, output: 2 },
        }
    }
}

/// Plays back a queue of [`ScriptedTurn`]s, one per `stream` call. Exact
/// event sequences — including tool calls — without network access. The
/// last request is retained so tests can inspect what was actually sent.
pub struct ScriptedMockProvider {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    pub last_request: Mutex<Option<CompletionRequest>>,
}

impl ScriptedMockProvider {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self { turns: Mutex::new(turns.into()), last_request: Mutex::new(None) }
    }
}

#[async_trait]
impl ModelProvider for ScriptedMockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model_name(&self) -> &str {
        "mock-large"
    }

    async fn stream(&self, req: CompletionRequest) -> Result<ResponseStream, ModelError> {
        *self.last_request.lock().unwrap() = Some(req);
        // An exhausted script answers with a sentinel text turn rather than
        // erroring, so a test that miscounts turns fails on an assertion
        // instead of a transport error.
        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ScriptedTurn::text("[no more scripted turns]"));

        let text: String = turn.chunks.concat();
        let mut events: Vec<Result<ResponseEvent, ModelError>> =
            turn.chunks.into_iter().map(|c| Ok(ResponseEvent::Chunk(c))).collect();
        events.push(Ok(ResponseEvent::Final(Completion {
            text,
            tool_calls: turn.tool_calls,
            usage: turn.usage,
            raw: None,
        })));
        Ok(Box::pin(stream::iter(events)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
