// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod client;
mod events;
mod sse;

pub use client::{AgentClient, ClientError, ClientResult, RunResult};
pub use events::{ClientEvent, Usage};
pub use sse::parse_sse_stream;
