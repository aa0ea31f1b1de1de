// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The synchronous agent-call seam the bridge drives. Kept as a trait,
//! distinct from [`poncho_client::AgentClient`] directly, so the bridge's own
//! tests can exercise chunking/indicator/error-posting logic without an HTTP
//! server.

#[async_trait::async_trait]
pub trait AgentRunner: Send + Sync {
    async fn send_message(&self, conversation_id: &str, text: &str) -> anyhow::Result<String>;
}

#[async_trait::async_trait]
impl AgentRunner for poncho_client::AgentClient {
    async fn send_message(&self, conversation_id: &str, text: &str) -> anyhow::Result<String> {
        let result = poncho_client::AgentClient::send_message(self, conversation_id, text).await?;
        Ok(result.text)
    }
}
