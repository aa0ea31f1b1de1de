// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! In-memory backend: a `HashMap` behind a lock. Used for tests and
//! ephemeral embedding where nothing needs to survive the process.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::store::{ConversationStore, RunStore, StoreError, StoreResult};
use crate::types::{Conversation, ConversationSummary, RunState};

#[derive(Default)]
pub struct MemoryConversationStore {
    conversations: Mutex<HashMap<String, Conversation>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn list(&self, owner_id: &str) -> StoreResult<Vec<ConversationSummary>> {
        let mut out: Vec<ConversationSummary> = self
            .conversations
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.owner_id == owner_id)
            .map(|c| c.summary())
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }

    async fn get(&self, id: &str) -> StoreResult<Conversation> {
        self.conversations
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn create(&self, owner_id: &str, title: Option<String>) -> StoreResult<Conversation> {
        let conversation = Conversation::new(owner_id, title);
        self.conversations.lock().unwrap().insert(conversation.id.clone(), conversation.clone());
        Ok(conversation)
    }

    async fn update(&self, mut conversation: Conversation) -> StoreResult<()> {
        conversation.updated_at = Utc::now();
        self.conversations.lock().unwrap().insert(conversation.id.clone(), conversation);
        Ok(())
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        self.conversations.lock().unwrap().remove(id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryRunStore {
    runs: Mutex<HashMap<String, RunState>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn get(&self, run_id: &str) -> StoreResult<Option<RunState>> {
        Ok(self.runs.lock().unwrap().get(run_id).cloned())
    }

    async fn set(&self, state: RunState) -> StoreResult<()> {
        self.runs.lock().unwrap().insert(state.run_id.clone(), state);
        Ok(())
    }

    async fn delete(&self, run_id: &str) -> StoreResult<()> {
        self.runs.lock().unwrap().remove(run_id);
        Ok(())
    }
}
