// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The two store abstractions: conversation history and transient
//! run state, each pluggable behind a backend. Only `memory` and `local`
//! ship here; `redis` / `upstash-rest` / `dynamodb` are the same traits
//! wired up by an external collaborator.

use async_trait::async_trait;

use crate::types::{Conversation, ConversationSummary, RunState};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("conversation not found: {0}")]
    NotFound(String),
    #[error("storage io error: {0}")]
    Io(String),
    #[error("storage serialization error: {0}")]
    Serialization(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn list(&self, owner_id: &str) -> StoreResult<Vec<ConversationSummary>>;
    async fn get(&self, id: &str) -> StoreResult<Conversation>;
    async fn create(&self, owner_id: &str, title: Option<String>) -> StoreResult<Conversation>;
    async fn update(&self, conversation: Conversation) -> StoreResult<()>;
    async fn delete(&self, id: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn get(&self, run_id: &str) -> StoreResult<Option<RunState>>;
    async fn set(&self, state: RunState) -> StoreResult<()>;
    async fn delete(&self, run_id: &str) -> StoreResult<()>;
}
