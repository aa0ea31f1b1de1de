// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The run orchestrator: drives one run's model↔tool step loop and
//! reports progress through a channel of [`RunEvent`]s.
//!
//! Tool calls within a step run strictly one at a time, in the order the
//! model returned them. Dispatching them concurrently would let tool side
//! effects overlap (two writes to the same file, an approval racing a
//! cancellation) and would break the total event ordering that replay
//! subscribers rely on.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};

use poncho_model::{
    Completion, CompletionRequest, Message, ModelError, ModelProvider, ResponseEvent,
};
use poncho_tools::{ApprovalPolicy, ToolCall, ToolGate, ToolOutput, ToolRegistry};

use crate::approval::{ApprovalArbiter, ApprovalOutcome};
use crate::compact::{build_compaction_prompt, emergency_compact, smart_truncate};
use crate::events::RunEvent;
use crate::session::Session;

/// Tunables for one orchestrator, independent of any single run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Hard ceiling on step count (`AgentManifest.limits.max_steps`).
    pub max_steps: u32,
    /// Per-manifest approval wait before a pending request times out.
    pub approval_timeout: Option<Duration>,
    /// Token cap applied to a single tool result via `smart_truncate`.
    pub tool_result_token_cap: usize,
    /// Fraction of the context window at which compaction kicks in.
    pub compaction_threshold: f32,
    /// Non-system messages kept verbatim by `emergency_compact`.
    pub emergency_keep_recent: usize,
    /// Context window, in approximate tokens, a run's session is sized to.
    pub context_window_tokens: usize,
    /// Sampling temperature forwarded to the model, from the manifest.
    pub temperature: Option<f32>,
    /// Output-token ceiling forwarded to the model, from the manifest.
    pub max_output_tokens: Option<u32>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_steps: 10,
            approval_timeout: Some(Duration::from_secs(300)),
            tool_result_token_cap: 4_000,
            compaction_threshold: 0.85,
            emergency_keep_recent: 6,
            context_window_tokens: 128_000,
            temperature: None,
            max_output_tokens: None,
        }
    }
}

/// The outcome of a finished run, mirrored into the final `RunEvent`.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed { text: String, continuation: bool, max_steps: Option<u32> },
    Cancelled,
    Error { code: String, message: String },
}

pub struct Orchestrator {
    model: Arc<dyn ModelProvider>,
    tools: Arc<ToolRegistry>,
    gate: ToolGate,
    config: RunConfig,
}

/// Polls a cancellation signal without consuming it. Cheap check at every
/// suspension point: before the model call, between streamed chunks, before
/// each tool invocation.
fn is_cancelled(cancel: &mut oneshot::Receiver<()>) -> bool {
    match cancel.try_recv() {
        Ok(()) => true,
        Err(oneshot::error::TryRecvError::Empty) => false,
        Err(oneshot::error::TryRecvError::Closed) => true,
    }
}

fn model_error_code(err: &ModelError) -> &'static str {
    match err {
        ModelError::ModelNotFound(_) => "model_not_found",
        _ => "model_error",
    }
}

impl Orchestrator {
    pub fn new(model: Arc<dyn ModelProvider>, tools: Arc<ToolRegistry>, gate: ToolGate, config: RunConfig) -> Self {
        Self { model, tools, gate, config }
    }

    /// Run the step loop to completion, cancellation, or a model error.
    ///
    /// `system_prompt` is assumed already rendered by the caller — prompt
    /// assembly is an external concern, not this crate's job. Approvals
    /// raised mid-run are denied on every exit path so a cancelled or
    /// errored run never leaves a dangling wait behind.
    pub async fn run(
        &self,
        run_id: String,
        session: &mut Session,
        system_prompt: &str,
        tx: mpsc::Sender<RunEvent>,
        approvals: Arc<ApprovalArbiter>,
        mut cancel: oneshot::Receiver<()>,
    ) -> RunOutcome {
        let _ = tx.send(RunEvent::RunStarted { run_id: run_id.clone() }).await;

        let mut step: u32 = 0;

        loop {
            step += 1;
            let _ = tx.send(RunEvent::StepStarted { step }).await;
            let step_started_at = Instant::now();

            if step > self.config.max_steps {
                approvals.deny_all_pending().await;
                let _ = tx
                    .send(RunEvent::RunCompleted {
                        text: String::new(),
                        continuation: true,
                        max_steps: Some(self.config.max_steps),
                    })
                    .await;
                return RunOutcome::Completed {
                    text: String::new(),
                    continuation: true,
                    max_steps: Some(self.config.max_steps),
                };
            }

            if is_cancelled(&mut cancel) {
                return self.cancel_run(&approvals, &tx).await;
            }

            self.maybe_compact(session);

            let req = CompletionRequest {
                system: Some(system_prompt.to_string()),
                messages: session.messages.clone(),
                tools: self
                    .tools
                    .schemas_for(&self.gate)
                    .into_iter()
                    .map(to_model_schema)
                    .collect(),
                model: None,
                temperature: self.config.temperature,
                max_tokens: self.config.max_output_tokens,
            };

            let stream = match self.model.stream(req).await {
                Ok(s) => s,
                Err(e) => return self.fail_run(&approvals, &tx, &e).await,
            };
            tokio::pin!(stream);

            let mut completion: Option<Completion> = None;
            while let Some(event) = stream.next().await {
                if is_cancelled(&mut cancel) {
                    return self.cancel_run(&approvals, &tx).await;
                }
                match event {
                    Ok(ResponseEvent::Chunk(text)) => {
                        let _ = tx.send(RunEvent::ModelChunk { text }).await;
                    }
                    Ok(ResponseEvent::Final(c)) => {
                        let _ = tx.send(RunEvent::ModelResponse { usage: c.usage }).await;
                        session.add_usage(c.usage);
                        completion = Some(c);
                    }
                    Err(e) => return self.fail_run(&approvals, &tx, &e).await,
                }
            }
            let Some(completion) = completion else {
                let err = ModelError::Transport("stream ended without a final completion".into());
                return self.fail_run(&approvals, &tx, &err).await;
            };

            if completion.tool_calls.is_empty() {
                let text = completion.text;
                if looks_like_a_faux_tool_call(&text) {
                    let _ = tx
                        .send(RunEvent::FauxToolSuspected { step, excerpt: excerpt(&text, 200) })
                        .await;
                }
                if !text.is_empty() {
                    session.push_assistant_reply(text.clone(), step);
                }
                approvals.deny_all_pending().await;
                let _ = tx
                    .send(RunEvent::StepCompleted { step, duration_ms: step_started_at.elapsed().as_millis() as u64 })
                    .await;
                let _ = tx
                    .send(RunEvent::RunCompleted { text: text.clone(), continuation: false, max_steps: None })
                    .await;
                return RunOutcome::Completed { text, continuation: false, max_steps: None };
            }

            // The model sees its own requests on the next turn.
            for request in &completion.tool_calls {
                session.push(Message::tool_call(&request.id, &request.name, request.arguments.clone()));
            }

            for request in &completion.tool_calls {
                if is_cancelled(&mut cancel) {
                    return self.cancel_run(&approvals, &tx).await;
                }

                let call = ToolCall {
                    id: request.id.clone(),
                    name: request.name.clone(),
                    args: request.arguments.clone(),
                };
                let Some(output) = self.run_one_tool(&call, &approvals, &mut cancel, &tx).await else {
                    return self.cancel_run(&approvals, &tx).await;
                };

                session.note_activity(if output.is_error {
                    format!("{}: error: {}", call.name, excerpt(&output.content, 120))
                } else {
                    format!("{}: ok", call.name)
                });

                let truncated = smart_truncate(
                    &output.content,
                    self.tools.get(&call.name).map(|t| t.output_category()).unwrap_or_default(),
                    self.config.tool_result_token_cap,
                );
                session.push(Message::tool_result(call.id.clone(), truncated));
            }

            let _ = tx
                .send(RunEvent::StepCompleted { step, duration_ms: step_started_at.elapsed().as_millis() as u64 })
                .await;
        }
    }

    async fn run_one_tool(
        &self,
        call: &ToolCall,
        approvals: &Arc<ApprovalArbiter>,
        cancel: &mut oneshot::Receiver<()>,
        tx: &mpsc::Sender<RunEvent>,
    ) -> Option<ToolOutput> {
        let Some(tool) = self.tools.get(&call.name) else {
            tracing::warn!(event = "tool.not_found", tool = %call.name, "model requested an unknown tool");
            let _ = tx
                .send(RunEvent::ToolError {
                    call_id: call.id.clone(),
                    tool: call.name.clone(),
                    error: format!("tool not found: {}", call.name),
                    recoverable: true,
                })
                .await;
            return Some(ToolOutput::err(&call.id, format!("tool not found: {}", call.name)));
        };

        let policy = self.gate.effective_policy(&call.name, tool.default_policy());
        match policy {
            ApprovalPolicy::Deny => {
                let _ = tx
                    .send(RunEvent::ToolError {
                        call_id: call.id.clone(),
                        tool: call.name.clone(),
                        error: "tool call denied by policy".into(),
                        recoverable: true,
                    })
                    .await;
                return Some(ToolOutput::err(&call.id, "tool call denied by policy"));
            }
            ApprovalPolicy::Ask => {
                if is_cancelled(cancel) {
                    return None;
                }
                let (approval_id, decision_rx) = approvals.begin(&call.name, &call.args).await;
                let _ = tx
                    .send(RunEvent::ToolApprovalRequired {
                        approval_id: approval_id.clone(),
                        call_id: call.id.clone(),
                        tool: call.name.clone(),
                        input: call.args.clone(),
                    })
                    .await;
                // Cancellation mid-wait counts as a deny; without the race a
                // cancelled run would sit here until the approval timeout.
                let outcome = tokio::select! {
                    outcome = approvals.wait(&approval_id, decision_rx, self.config.approval_timeout) => outcome,
                    _ = &mut *cancel => return None,
                };
                match outcome {
                    ApprovalOutcome::Granted => {
                        let _ = tx.send(RunEvent::ToolApprovalGranted { approval_id }).await;
                    }
                    ApprovalOutcome::Denied => {
                        tracing::warn!(event = "approval.denied", tool = %call.name, "gated tool call denied");
                        let _ = tx
                            .send(RunEvent::ToolApprovalDenied { approval_id, reason: "denied".into() })
                            .await;
                        let _ = tx
                            .send(RunEvent::ToolError {
                                call_id: call.id.clone(),
                                tool: call.name.clone(),
                                error: "tool call not approved".into(),
                                recoverable: false,
                            })
                            .await;
                        return Some(ToolOutput::err(&call.id, "tool call not approved"));
                    }
                    ApprovalOutcome::TimedOut => {
                        tracing::warn!(event = "approval.timeout", tool = %call.name, "gated tool call timed out waiting for approval");
                        let _ = tx
                            .send(RunEvent::ToolApprovalDenied { approval_id, reason: "timed out".into() })
                            .await;
                        let _ = tx
                            .send(RunEvent::ToolError {
                                call_id: call.id.clone(),
                                tool: call.name.clone(),
                                error: "tool call not approved: approval timed out".into(),
                                recoverable: false,
                            })
                            .await;
                        return Some(ToolOutput::err(&call.id, "tool call not approved: approval timed out"));
                    }
                }
            }
            ApprovalPolicy::Auto => {}
        }

        if is_cancelled(cancel) {
            return None;
        }

        let _ = tx
            .send(RunEvent::ToolStarted { call_id: call.id.clone(), tool: call.name.clone(), input: call.args.clone() })
            .await;
        let started = Instant::now();
        // The cancellation signal interrupts a tool that is still running;
        // its side effects up to that point are the tool's own problem, but
        // the run stops without waiting for it.
        let output = tokio::select! {
            out = self.tools.execute(call) => out,
            _ = &mut *cancel => return None,
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        if output.is_error {
            let _ = tx
                .send(RunEvent::ToolError {
                    call_id: call.id.clone(),
                    tool: call.name.clone(),
                    error: output.content.clone(),
                    recoverable: true,
                })
                .await;
        } else {
            let _ = tx
                .send(RunEvent::ToolCompleted {
                    call_id: call.id.clone(),
                    tool: call.name.clone(),
                    output: output.content.clone(),
                    duration_ms,
                })
                .await;
        }
        Some(output)
    }

    async fn cancel_run(&self, approvals: &Arc<ApprovalArbiter>, tx: &mpsc::Sender<RunEvent>) -> RunOutcome {
        tracing::info!(event = "run.cancelled", "run cancelled at a suspension point");
        approvals.deny_all_pending().await;
        let _ = tx.send(RunEvent::RunCancelled).await;
        RunOutcome::Cancelled
    }

    async fn fail_run(
        &self,
        approvals: &Arc<ApprovalArbiter>,
        tx: &mpsc::Sender<RunEvent>,
        err: &ModelError,
    ) -> RunOutcome {
        tracing::error!(event = "model.error", error = %err, "model call failed");
        approvals.deny_all_pending().await;
        let code = model_error_code(err);
        let _ = tx
            .send(RunEvent::RunError { code: code.into(), message: err.to_string() })
            .await;
        RunOutcome::Error { code: code.into(), message: err.to_string() }
    }

    fn maybe_compact(&self, session: &mut Session) {
        if !session.is_near_limit(self.config.compaction_threshold) {
            return;
        }
        let mut scratch = session.messages.clone();
        build_compaction_prompt(&mut scratch, None);
        // Compaction prompt itself would overflow: fall back to the
        // deterministic emergency path instead of calling the model with an
        // oversized summarisation request.
        let summary_would_overflow = scratch.iter().map(|m| m.approx_tokens()).sum::<usize>()
            > session.context_window().saturating_sub(session.context_window() / 10);
        if summary_would_overflow {
            emergency_compact(&mut session.messages, None, self.config.emergency_keep_recent);
            session.recalculate_tokens();
        }
        // The common (non-emergency) path only prepares the compaction
        // request; splicing a real model-generated summary into history is
        // driven by callers that can afford an extra model turn outside the
        // step budget.
    }
}

fn to_model_schema(s: poncho_tools::ToolSchema) -> poncho_model::ToolSchema {
    poncho_model::ToolSchema { name: s.name, description: s.description, parameters: s.parameters }
}

fn excerpt(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        text.to_string()
    } else {
        format!("{}...", &text[..max_chars])
    }
}

/// Advisory-only heuristic: the model described invoking a tool in prose
/// (no structured tool call came back) — never gates anything, purely
/// surfaced for observability so a confused model is visible in the UI.
fn looks_like_a_faux_tool_call(text: &str) -> bool {
    let lower = text.to_lowercase();
    const MARKERS: &[&str] = &["i will call", "i'll call", "calling the", "invoking the", "```tool_call"];
    MARKERS.iter().any(|m| lower.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use poncho_config::{AgentManifest, Environment, Limits, ModelSelection, PolicyConfig};
    use poncho_model::{ScriptedMockProvider, ScriptedTurn};
    use poncho_tools::{Tool, ToolSource};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct CountingTool {
        calls: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            "count"
        }
        fn description(&self) -> &str {
            "counts"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn default_policy(&self) -> ApprovalPolicy {
            ApprovalPolicy::Auto
        }
        async fn execute(&self, call: &ToolCall) -> ToolOutput {
            self.calls.store(true, Ordering::SeqCst);
            ToolOutput::ok(&call.id, "counted")
        }
    }

    fn permissive_manifest() -> AgentManifest {
        AgentManifest {
            name: "agent".into(),
            id: None,
            description: None,
            model: ModelSelection::default(),
            limits: Limits::default(),
            allowed_tools: vec![],
            approval_required: vec![],
            cron: HashMap::new(),
        }
    }

    fn orchestrator_with(
        turns: Vec<ScriptedTurn>,
        registry: ToolRegistry,
        config: RunConfig,
        manifest: &AgentManifest,
    ) -> Orchestrator {
        let provider = Arc::new(ScriptedMockProvider::new(turns));
        let gate = ToolGate::new(manifest, &PolicyConfig::default(), Environment::Development);
        Orchestrator::new(provider, Arc::new(registry), gate, config)
    }

    async fn drive(orch: &Orchestrator, session: &mut Session) -> (RunOutcome, Vec<String>) {
        let (tx, mut rx) = mpsc::channel(64);
        let approvals = Arc::new(ApprovalArbiter::without_decision_fn());
        let (_cancel_tx, cancel_rx) = oneshot::channel();
        let outcome = orch.run("r1".into(), session, "system", tx, approvals, cancel_rx).await;
        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(ev.kind().to_string());
        }
        (outcome, kinds)
    }

    #[tokio::test]
    async fn run_completes_on_first_textual_turn() {
        let orch = orchestrator_with(
            vec![ScriptedTurn::text("hello")],
            ToolRegistry::new(),
            RunConfig::default(),
            &permissive_manifest(),
        );
        let mut session = Session::new(100_000);
        let (outcome, kinds) = drive(&orch, &mut session).await;

        match outcome {
            RunOutcome::Completed { text, continuation, .. } => {
                assert_eq!(text, "hello");
                assert!(!continuation);
            }
            other => panic!("expected Completed, got {other:?}"),
        }
        assert!(kinds.contains(&"run:started".to_string()));
        assert!(kinds.contains(&"step:completed".to_string()));
        assert!(kinds.contains(&"run:completed".to_string()));
        assert_eq!(session.messages.last().unwrap().as_text(), Some("hello"));
    }

    #[tokio::test]
    async fn run_executes_tool_call_then_completes_with_activity_recorded() {
        let called = Arc::new(AtomicBool::new(false));
        let mut registry = ToolRegistry::new();
        registry.register(CountingTool { calls: called.clone() }, ToolSource::BuiltIn);
        let orch = orchestrator_with(
            vec![ScriptedTurn::tool("c1", "count", json!({})), ScriptedTurn::text("done")],
            registry,
            RunConfig::default(),
            &permissive_manifest(),
        );
        let mut session = Session::new(100_000);
        let (outcome, _) = drive(&orch, &mut session).await;

        assert!(called.load(Ordering::SeqCst));
        match outcome {
            RunOutcome::Completed { text, .. } => assert_eq!(text, "done"),
            other => panic!("expected Completed, got {other:?}"),
        }
        // Tool activity lands in the assistant reply's sections.
        let reply = session.messages.last().unwrap();
        assert_eq!(reply.meta.sections, vec!["count: ok".to_string()]);
    }

    #[tokio::test]
    async fn run_accumulates_usage_across_steps() {
        let mut registry = ToolRegistry::new();
        registry.register(CountingTool { calls: Arc::new(AtomicBool::new(false)) }, ToolSource::BuiltIn);
        let orch = orchestrator_with(
            vec![ScriptedTurn::tool("c1", "count", json!({})), ScriptedTurn::text("done")],
            registry,
            RunConfig::default(),
            &permissive_manifest(),
        );
        let mut session = Session::new(100_000);
        let _ = drive(&orch, &mut session).await;
        // One tool turn (5/2) plus one text turn (7/3).
        assert_eq!(session.usage.input, 12);
        assert_eq!(session.usage.output, 5);
    }

    #[tokio::test]
    async fn run_denies_disallowed_tool_without_executing_it() {
        let called = Arc::new(AtomicBool::new(false));
        let mut registry = ToolRegistry::new();
        registry.register(CountingTool { calls: called.clone() }, ToolSource::BuiltIn);
        let mut manifest = permissive_manifest();
        manifest.allowed_tools = vec!["other_tool".into()];
        let orch = orchestrator_with(
            vec![ScriptedTurn::tool("c1", "count", json!({})), ScriptedTurn::text("done")],
            registry,
            RunConfig::default(),
            &manifest,
        );
        let mut session = Session::new(100_000);
        let _ = drive(&orch, &mut session).await;
        assert!(!called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn run_stops_with_continuation_when_step_budget_exhausted() {
        let mut registry = ToolRegistry::new();
        registry.register(CountingTool { calls: Arc::new(AtomicBool::new(false)) }, ToolSource::BuiltIn);
        let turns = (0..5).map(|_| ScriptedTurn::tool("c1", "count", json!({}))).collect();
        let config = RunConfig { max_steps: 2, ..RunConfig::default() };
        let orch = orchestrator_with(turns, registry, config, &permissive_manifest());

        let mut session = Session::new(100_000);
        let (outcome, _) = drive(&orch, &mut session).await;
        match outcome {
            RunOutcome::Completed { continuation, max_steps, .. } => {
                assert!(continuation);
                assert_eq!(max_steps, Some(2));
            }
            other => panic!("expected Completed with continuation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn run_cancelled_before_first_model_call_returns_cancelled() {
        let orch = orchestrator_with(
            vec![],
            ToolRegistry::new(),
            RunConfig::default(),
            &permissive_manifest(),
        );
        let mut session = Session::new(100_000);
        let (tx, _rx) = mpsc::channel(32);
        let approvals = Arc::new(ApprovalArbiter::without_decision_fn());
        let (cancel_tx, cancel_rx) = oneshot::channel();
        cancel_tx.send(()).unwrap();

        let outcome = orch.run("r1".into(), &mut session, "system", tx, approvals, cancel_rx).await;
        assert!(matches!(outcome, RunOutcome::Cancelled));
        assert!(session.messages.is_empty());
    }

    #[tokio::test]
    async fn tool_turn_appends_call_record_then_result() {
        let mut registry = ToolRegistry::new();
        registry.register(CountingTool { calls: Arc::new(AtomicBool::new(false)) }, ToolSource::BuiltIn);
        let orch = orchestrator_with(
            vec![ScriptedTurn::tool("c1", "count", json!({})), ScriptedTurn::text("done")],
            registry,
            RunConfig::default(),
            &permissive_manifest(),
        );
        let mut session = Session::new(100_000);
        let _ = drive(&orch, &mut session).await;

        use poncho_model::MessageContent;
        let kinds: Vec<&'static str> = session
            .messages
            .iter()
            .map(|m| match &m.content {
                MessageContent::Text(_) => "text",
                MessageContent::Parts(_) => "parts",
                MessageContent::ToolCall(_) => "tool_call",
                MessageContent::ToolResult(_) => "tool_result",
            })
            .collect();
        assert_eq!(kinds, vec!["tool_call", "tool_result", "text"]);
    }

    #[test]
    fn model_error_codes_distinguish_unknown_models() {
        assert_eq!(model_error_code(&ModelError::ModelNotFound("x".into())), "model_not_found");
        assert_eq!(model_error_code(&ModelError::Transport("t".into())), "model_error");
    }

    #[test]
    fn faux_tool_heuristic_flags_prose_describing_a_call() {
        assert!(looks_like_a_faux_tool_call("I will call the read_file tool now."));
        assert!(!looks_like_a_faux_tool_call("Here is the answer you asked for."));
    }
}
