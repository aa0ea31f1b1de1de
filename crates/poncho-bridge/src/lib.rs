// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod bridge;
mod chunking;
mod platform;
mod runner;

pub use bridge::handle_incoming;
pub use chunking::{chunk_reply, conversation_id};
pub use platform::{IncomingMessage, MessagingPlatform};
pub use runner::AgentRunner;
