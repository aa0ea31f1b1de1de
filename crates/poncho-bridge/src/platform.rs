// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The trait a concrete messaging adapter (Slack, Telegram, ...) implements.
//! Adapters themselves are external collaborators; only this
//! interface is in scope.

/// One inbound message from a messaging platform.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub platform: String,
    pub channel_id: String,
    pub thread_id: String,
    pub text: String,
}

#[async_trait::async_trait]
pub trait MessagingPlatform: Send + Sync {
    /// Applied for the duration of a run (e.g. an eyes-on reaction).
    async fn post_processing_indicator(&self, channel_id: &str, thread_id: &str) -> anyhow::Result<()>;

    async fn clear_processing_indicator(&self, channel_id: &str, thread_id: &str) -> anyhow::Result<()>;

    /// `chunks` are already split to the platform's message-size limit.
    async fn post_reply_chunks(&self, channel_id: &str, thread_id: &str, chunks: &[String]) -> anyhow::Result<()>;

    async fn post_error(&self, channel_id: &str, thread_id: &str, message: &str) -> anyhow::Result<()>;
}
