// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use poncho_model::Message;

/// A persisted conversation: the full message history plus the
/// bookkeeping an owner-scoped listing needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub owner_id: String,
    pub title: Option<String>,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(owner_id: impl Into<String>, title: Option<String>) -> Self {
        let now = Utc::now();
        Self { id: Uuid::new_v4().to_string(), owner_id: owner_id.into(), title, messages: Vec::new(), created_at: now, updated_at: now }
    }

    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            title: self.title.clone(),
            updated_at: self.updated_at,
        }
    }
}

/// Lightweight entry carried in `index.json` / listing responses:
/// avoids loading every conversation body just to render a list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub owner_id: String,
    pub title: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Schema-versioned index file: `{schemaVersion, conversations}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationIndex {
    #[serde(rename = "schemaVersion")]
    pub schema_version: String,
    pub conversations: Vec<ConversationSummary>,
}

impl Default for ConversationIndex {
    fn default() -> Self {
        Self { schema_version: "v1".to_string(), conversations: Vec::new() }
    }
}

/// A run's working message state, persisted so a stalled/restarted process
/// can recover an in-flight run; TTL-bounded rather than kept forever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub conversation_id: String,
    pub messages: Vec<Message>,
    pub updated_at: DateTime<Utc>,
}
