// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The driver that ties a [`MessagingPlatform`] to an [`AgentRunner`]:
//! derive the conversation id, raise a processing indicator, call the
//! runner, chunk and post the reply, and clear the indicator — posting a
//! short error message instead if the call fails.

use crate::chunking::{chunk_reply, conversation_id};
use crate::platform::{IncomingMessage, MessagingPlatform};
use crate::runner::AgentRunner;

/// Platform message-size cap applied to outgoing reply chunks. Chosen to sit
/// comfortably under common chat-platform limits; a specific adapter can
/// chunk more tightly itself if its own limit is smaller.
const DEFAULT_CHUNK_LEN: usize = 3500;

pub async fn handle_incoming(
    platform: &dyn MessagingPlatform,
    runner: &dyn AgentRunner,
    incoming: IncomingMessage,
) -> anyhow::Result<()> {
    let conv_id = conversation_id(&incoming.platform, &incoming.channel_id, &incoming.thread_id);

    platform.post_processing_indicator(&incoming.channel_id, &incoming.thread_id).await?;

    let outcome = runner.send_message(&conv_id, &incoming.text).await;

    platform.clear_processing_indicator(&incoming.channel_id, &incoming.thread_id).await?;

    match outcome {
        Ok(text) => {
            let chunks = chunk_reply(&text, DEFAULT_CHUNK_LEN);
            if !chunks.is_empty() {
                platform.post_reply_chunks(&incoming.channel_id, &incoming.thread_id, &chunks).await?;
            }
            Ok(())
        }
        Err(e) => {
            tracing::warn!(conversation_id = %conv_id, error = %e, "agent run failed for incoming message");
            platform.post_error(&incoming.channel_id, &incoming.thread_id, &format!("Sorry, something went wrong: {e}")).await?;
            Ok(())
        }
    }
}
