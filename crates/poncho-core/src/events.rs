// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The run orchestrator's event vocabulary. Every variant maps 1:1 onto an
//! SSE frame: `kind()` gives the `event:` line, `payload()` gives the JSON
//! `data:` line (the event's non-type fields only).

use serde::Serialize;
use serde_json::{json, Value};

use poncho_model::Usage;

#[derive(Debug, Clone)]
pub enum RunEvent {
    RunStarted { run_id: String },
    RunCompleted { text: String, continuation: bool, max_steps: Option<u32> },
    RunError { code: String, message: String },
    RunCancelled,
    StepStarted { step: u32 },
    StepCompleted { step: u32, duration_ms: u64 },
    ModelChunk { text: String },
    ModelResponse { usage: Usage },
    ToolStarted { call_id: String, tool: String, input: Value },
    ToolCompleted { call_id: String, tool: String, output: String, duration_ms: u64 },
    ToolError { call_id: String, tool: String, error: String, recoverable: bool },
    ToolApprovalRequired { approval_id: String, call_id: String, tool: String, input: Value },
    ToolApprovalGranted { approval_id: String },
    ToolApprovalDenied { approval_id: String, reason: String },
    /// Advisory heuristic: the model's text described a tool
    /// invocation but no real tool events occurred this step. Never gates
    /// anything, purely observability.
    FauxToolSuspected { step: u32, excerpt: String },
}

impl RunEvent {
    /// The SSE `event:` line.
    pub fn kind(&self) -> &'static str {
        match self {
            RunEvent::RunStarted { .. } => "run:started",
            RunEvent::RunCompleted { .. } => "run:completed",
            RunEvent::RunError { .. } => "run:error",
            RunEvent::RunCancelled => "run:cancelled",
            RunEvent::StepStarted { .. } => "step:started",
            RunEvent::StepCompleted { .. } => "step:completed",
            RunEvent::ModelChunk { .. } => "model:chunk",
            RunEvent::ModelResponse { .. } => "model:response",
            RunEvent::ToolStarted { .. } => "tool:started",
            RunEvent::ToolCompleted { .. } => "tool:completed",
            RunEvent::ToolError { .. } => "tool:error",
            RunEvent::ToolApprovalRequired { .. } => "tool:approval:required",
            RunEvent::ToolApprovalGranted { .. } => "tool:approval:granted",
            RunEvent::ToolApprovalDenied { .. } => "tool:approval:denied",
            RunEvent::FauxToolSuspected { .. } => "tool:faux_suspected",
        }
    }

    /// Whether this event ends the run; SSE handlers close the stream on
    /// the terminal event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::RunCompleted { .. } | RunEvent::RunError { .. } | RunEvent::RunCancelled)
    }

    /// The JSON `data:` payload — every field except the type tag.
    pub fn payload(&self) -> Value {
        match self {
            RunEvent::RunStarted { run_id } => json!({ "runId": run_id }),
            RunEvent::RunCompleted { text, continuation, max_steps } => {
                json!({ "text": text, "continuation": continuation, "maxSteps": max_steps })
            }
            RunEvent::RunError { code, message } => json!({ "code": code, "message": message }),
            RunEvent::RunCancelled => json!({}),
            RunEvent::StepStarted { step } => json!({ "step": step }),
            RunEvent::StepCompleted { step, duration_ms } => {
                json!({ "step": step, "durationMs": duration_ms })
            }
            RunEvent::ModelChunk { text } => json!({ "text": text }),
            RunEvent::ModelResponse { usage } => json!({
                "usage": { "input": usage.input, "output": usage.output }
            }),
            RunEvent::ToolStarted { call_id, tool, input } => {
                json!({ "callId": call_id, "tool": tool, "input": input })
            }
            RunEvent::ToolCompleted { call_id, tool, output, duration_ms } => {
                json!({ "callId": call_id, "tool": tool, "output": output, "durationMs": duration_ms })
            }
            RunEvent::ToolError { call_id, tool, error, recoverable } => {
                json!({ "callId": call_id, "tool": tool, "error": error, "recoverable": recoverable })
            }
            RunEvent::ToolApprovalRequired { approval_id, call_id, tool, input } => {
                json!({ "approvalId": approval_id, "callId": call_id, "tool": tool, "input": input })
            }
            RunEvent::ToolApprovalGranted { approval_id } => json!({ "approvalId": approval_id }),
            RunEvent::ToolApprovalDenied { approval_id, reason } => {
                json!({ "approvalId": approval_id, "reason": reason })
            }
            RunEvent::FauxToolSuspected { step, excerpt } => json!({ "step": step, "excerpt": excerpt }),
        }
    }

    /// The full `{type, ...fields}` envelope, for callers that persist events
    /// (replay buffer) rather than framing them as SSE directly.
    pub fn to_json(&self) -> Value {
        let mut obj = match self.payload() {
            Value::Object(m) => m,
            other => {
                let mut m = serde_json::Map::new();
                m.insert("value".into(), other);
                m
            }
        };
        obj.insert("type".into(), Value::String(self.kind().into()));
        Value::Object(obj)
    }
}

impl Serialize for RunEvent {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_dotted_vocabulary() {
        assert_eq!(RunEvent::RunStarted { run_id: "r1".into() }.kind(), "run:started");
        assert_eq!(
            RunEvent::ToolApprovalRequired {
                approval_id: "a1".into(),
                call_id: "c1".into(),
                tool: "write_file".into(),
                input: json!({}),
            }
            .kind(),
            "tool:approval:required"
        );
    }

    #[test]
    fn terminal_events_are_flagged() {
        assert!(RunEvent::RunCancelled.is_terminal());
        assert!(RunEvent::RunError { code: "e".into(), message: "m".into() }.is_terminal());
        assert!(!RunEvent::StepStarted { step: 1 }.is_terminal());
    }

    #[test]
    fn to_json_embeds_type_alongside_fields() {
        let ev = RunEvent::StepStarted { step: 3 };
        let v = ev.to_json();
        assert_eq!(v["type"], "step:started");
        assert_eq!(v["step"], 3);
    }

    #[test]
    fn run_completed_payload_carries_continuation_fields() {
        let ev = RunEvent::RunCompleted { text: "done".into(), continuation: true, max_steps: Some(10) };
        let v = ev.payload();
        assert_eq!(v["continuation"], true);
        assert_eq!(v["maxSteps"], 10);
    }
}
