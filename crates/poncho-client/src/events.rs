// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Client-side mirror of the server's SSE event vocabulary. Kept
//! independent of `poncho-core`'s `RunEvent` — the client only ever sees the
//! wire JSON, never the server's in-process type.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct Usage {
    pub input: u32,
    pub output: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "run:started")]
    RunStarted {
        #[serde(rename = "runId")]
        run_id: String,
    },
    #[serde(rename = "run:completed")]
    RunCompleted { text: String, continuation: bool, #[serde(rename = "maxSteps")] max_steps: Option<u32> },
    #[serde(rename = "run:error")]
    RunError { code: String, message: String },
    #[serde(rename = "run:cancelled")]
    RunCancelled {},
    #[serde(rename = "step:started")]
    StepStarted { step: u32 },
    #[serde(rename = "step:completed")]
    StepCompleted { step: u32, #[serde(rename = "durationMs")] duration_ms: u64 },
    #[serde(rename = "model:chunk")]
    ModelChunk { text: String },
    #[serde(rename = "model:response")]
    ModelResponse { usage: Usage },
    #[serde(rename = "tool:started")]
    ToolStarted { #[serde(rename = "callId")] call_id: String, tool: String, input: Value },
    #[serde(rename = "tool:completed")]
    ToolCompleted {
        #[serde(rename = "callId")]
        call_id: String,
        tool: String,
        output: String,
        #[serde(rename = "durationMs")]
        duration_ms: u64,
    },
    #[serde(rename = "tool:error")]
    ToolError { #[serde(rename = "callId")] call_id: String, tool: String, error: String, recoverable: bool },
    #[serde(rename = "tool:approval:required")]
    ToolApprovalRequired {
        #[serde(rename = "approvalId")]
        approval_id: String,
        #[serde(rename = "callId")]
        call_id: String,
        tool: String,
        input: Value,
    },
    #[serde(rename = "tool:approval:granted")]
    ToolApprovalGranted { #[serde(rename = "approvalId")] approval_id: String },
    #[serde(rename = "tool:approval:denied")]
    ToolApprovalDenied { #[serde(rename = "approvalId")] approval_id: String, reason: String },
    /// Catch-all for vocabulary additions the client hasn't been updated for
    /// yet (e.g. the advisory `tool:faux_suspected` event) — never fails the
    /// stream over an unrecognized type.
    #[serde(other)]
    Unknown,
}

impl ClientEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ClientEvent::RunCompleted { .. } | ClientEvent::RunError { .. } | ClientEvent::RunCancelled {})
    }
}
