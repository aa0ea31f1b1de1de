// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The process's single shared state: the orchestrator's frozen inputs (one
//! agent manifest, one tool gate, one model provider), the conversation/run
//! stores, the SSE broker, and the auth state. One `AppState` is shared
//! behind an `Arc` across every handler.

use std::sync::Arc;

use poncho_config::AgentManifest;
use poncho_core::{ApprovalArbiter, Orchestrator, RunConfig};
use poncho_store::{ConversationStore, RunStore};

use crate::broker::Broker;
use crate::http::auth::AuthState;

/// Binary content behind an upload key. The
/// blob backend itself is an external collaborator per scope; this trait
/// pins only the shape the route needs.
#[async_trait::async_trait]
pub trait UploadStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<(String, Vec<u8>)>;
}

/// Outcome of running a named cron task.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CronRunResult {
    #[serde(rename = "conversationId")]
    pub conversation_id: String,
    pub response: String,
    pub steps: u32,
    pub status: String,
    pub continuation: Option<bool>,
}

/// Resolves and runs a named cron task. The task-string resolution
/// and scheduling itself are external-collaborator concerns; this trait is
/// satisfied by the orchestrator once a task string has been produced.
#[async_trait::async_trait]
pub trait CronTaskRunner: Send + Sync {
    async fn run(&self, job_name: &str, continue_conversation_id: Option<String>) -> anyhow::Result<CronRunResult>;
}

pub struct AppState {
    pub manifest: AgentManifest,
    pub system_prompt: String,
    pub orchestrator: Arc<Orchestrator>,
    pub run_config: RunConfig,
    pub conversations: Arc<dyn ConversationStore>,
    pub runs: Arc<dyn RunStore>,
    pub broker: Arc<Broker>,
    pub auth: AuthState,
    pub approvals: Arc<ApprovalArbiter>,
    pub uploads: Option<Arc<dyn UploadStore>>,
    pub cron: Option<Arc<dyn CronTaskRunner>>,
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            manifest: self.manifest.clone(),
            system_prompt: self.system_prompt.clone(),
            orchestrator: self.orchestrator.clone(),
            run_config: self.run_config.clone(),
            conversations: self.conversations.clone(),
            runs: self.runs.clone(),
            broker: self.broker.clone(),
            auth: self.auth.clone(),
            approvals: self.approvals.clone(),
            uploads: self.uploads.clone(),
            cron: self.cron.clone(),
        }
    }
}

impl crate::http::auth::AsAuthState for AppState {
    fn auth_state(&self) -> &AuthState {
        &self.auth
    }
}

impl crate::http::auth::AsAuthState for Arc<AppState> {
    fn auth_state(&self) -> &AuthState {
        &self.auth
    }
}
