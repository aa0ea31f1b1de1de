// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Per-run approval arbiter: a table mapping approval-id → pending
//! entry, resolved by one of three independent paths — an external HTTP
//! POST (`resolve`), an in-process decision function supplied by an
//! embedder, or cancellation (`deny_all_pending`), which the orchestrator
//! calls on every abort so no pending approval outlives its run.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use uuid::Uuid;

/// How a pending approval was ultimately resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Granted,
    Denied,
    /// Distinguished from an explicit deny so logs/transcripts can tell a
    /// human "no" apart from a lapsed timeout.
    TimedOut,
}

/// An embedder-supplied function that decides a gated tool call without a
/// human in the loop (e.g. an allowlist check against an external system).
/// Returns `true` to grant.
pub type DecisionFn =
    Arc<dyn Fn(&str, &Value) -> Pin<Box<dyn Future<Output = bool> + Send>> + Send + Sync>;

struct PendingApproval {
    tool: String,
    input: Value,
    resolver: oneshot::Sender<ApprovalOutcome>,
}

/// Read-only snapshot of a pending approval, for surfaces that want to list
/// what's outstanding (e.g. a future `/api/approvals` listing endpoint).
#[derive(Debug, Clone)]
pub struct PendingApprovalInfo {
    pub id: String,
    pub tool: String,
    pub input: Value,
}

pub struct ApprovalArbiter {
    decision_fn: Option<DecisionFn>,
    pending: Mutex<HashMap<String, PendingApproval>>,
}

impl ApprovalArbiter {
    pub fn new(decision_fn: Option<DecisionFn>) -> Self {
        Self { decision_fn, pending: Mutex::new(HashMap::new()) }
    }

    /// No embedder decision function; every gated call waits on an external
    /// resolver (HTTP POST) or the run's cancellation.
    pub fn without_decision_fn() -> Self {
        Self::new(None)
    }

    /// Register a pending approval. Returns the approval id plus the
    /// receiver to hand to [`Self::wait`]. Split from the wait itself so the
    /// caller can announce the id (`tool:approval:required`) before blocking
    /// on it — an external resolver can't answer a request it never saw.
    pub async fn begin(&self, tool: &str, input: &Value) -> (String, oneshot::Receiver<ApprovalOutcome>) {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        {
            let mut table = self.pending.lock().await;
            table.insert(
                id.clone(),
                PendingApproval { tool: tool.to_string(), input: input.clone(), resolver: tx },
            );
        }

        if let Some(decide) = &self.decision_fn {
            let approved = decide(tool, input).await;
            self.resolve(&id, approved).await;
        }

        (id, rx)
    }

    /// Await a pending approval's resolution, racing an optional timeout.
    pub async fn wait(
        &self,
        id: &str,
        rx: oneshot::Receiver<ApprovalOutcome>,
        timeout: Option<Duration>,
    ) -> ApprovalOutcome {
        match timeout {
            Some(d) => match tokio::time::timeout(d, rx).await {
                Ok(Ok(outcome)) => outcome,
                // Sender dropped without sending: treat like an explicit deny.
                Ok(Err(_)) => ApprovalOutcome::Denied,
                Err(_) => {
                    self.pending.lock().await.remove(id);
                    ApprovalOutcome::TimedOut
                }
            },
            None => rx.await.unwrap_or(ApprovalOutcome::Denied),
        }
    }

    /// Convenience composition of [`Self::begin`] and [`Self::wait`] for
    /// callers that don't need to announce the id in between.
    pub async fn request(&self, tool: &str, input: &Value, timeout: Option<Duration>) -> (String, ApprovalOutcome) {
        let (id, rx) = self.begin(tool, input).await;
        let outcome = self.wait(&id, rx, timeout).await;
        (id, outcome)
    }

    /// External resolution path (HTTP POST `/api/approvals/{id}`). Returns
    /// `false` when the id is unknown (already resolved, or never existed).
    pub async fn resolve(&self, id: &str, approved: bool) -> bool {
        let resolver = self.pending.lock().await.remove(id);
        match resolver {
            Some(entry) => {
                let _ = entry
                    .resolver
                    .send(if approved { ApprovalOutcome::Granted } else { ApprovalOutcome::Denied });
                true
            }
            None => false,
        }
    }

    /// Cancellation path: every still-pending approval resolves as
    /// denied so in-flight `request` calls return instead of hanging forever
    /// on an abandoned run.
    pub async fn deny_all_pending(&self) {
        let mut table = self.pending.lock().await;
        for (_, entry) in table.drain() {
            let _ = entry.resolver.send(ApprovalOutcome::Denied);
        }
    }

    pub async fn list_pending(&self) -> Vec<PendingApprovalInfo> {
        self.pending
            .lock()
            .await
            .iter()
            .map(|(id, e)| PendingApprovalInfo { id: id.clone(), tool: e.tool.clone(), input: e.input.clone() })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn resolve_grants_a_pending_request() {
        let arbiter = Arc::new(ApprovalArbiter::without_decision_fn());
        let a2 = arbiter.clone();
        let handle = tokio::spawn(async move { a2.request("write_file", &json!({"path": "x"}), None).await });

        // Wait until the request has registered itself before resolving.
        loop {
            if !arbiter.list_pending().await.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let id = arbiter.list_pending().await[0].id.clone();
        assert!(arbiter.resolve(&id, true).await);

        let (_, outcome) = handle.await.unwrap();
        assert_eq!(outcome, ApprovalOutcome::Granted);
    }

    #[tokio::test]
    async fn resolve_denies_a_pending_request() {
        let arbiter = Arc::new(ApprovalArbiter::without_decision_fn());
        let a2 = arbiter.clone();
        let handle = tokio::spawn(async move { a2.request("delete_file", &json!({}), None).await });
        loop {
            if !arbiter.list_pending().await.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let id = arbiter.list_pending().await[0].id.clone();
        arbiter.resolve(&id, false).await;
        let (_, outcome) = handle.await.unwrap();
        assert_eq!(outcome, ApprovalOutcome::Denied);
    }

    #[tokio::test]
    async fn resolve_unknown_id_returns_false() {
        let arbiter = ApprovalArbiter::without_decision_fn();
        assert!(!arbiter.resolve("nonexistent", true).await);
    }

    #[tokio::test]
    async fn timeout_resolves_as_timed_out_not_denied() {
        let arbiter = ApprovalArbiter::without_decision_fn();
        let (_, outcome) =
            arbiter.request("slow_tool", &json!({}), Some(Duration::from_millis(20))).await;
        assert_eq!(outcome, ApprovalOutcome::TimedOut);
        assert!(arbiter.list_pending().await.is_empty());
    }

    #[tokio::test]
    async fn deny_all_pending_resolves_every_outstanding_request() {
        let arbiter = Arc::new(ApprovalArbiter::without_decision_fn());
        let a2 = arbiter.clone();
        let a3 = arbiter.clone();
        let h1 = tokio::spawn(async move { a2.request("tool_a", &json!({}), None).await });
        let h2 = tokio::spawn(async move { a3.request("tool_b", &json!({}), None).await });
        loop {
            if arbiter.list_pending().await.len() == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        arbiter.deny_all_pending().await;
        let (_, o1) = h1.await.unwrap();
        let (_, o2) = h2.await.unwrap();
        assert_eq!(o1, ApprovalOutcome::Denied);
        assert_eq!(o2, ApprovalOutcome::Denied);
    }

    #[tokio::test]
    async fn decision_fn_resolves_without_external_call() {
        let decide: DecisionFn = Arc::new(|tool, _input| {
            let tool = tool.to_string();
            Box::pin(async move { tool == "read_file" })
        });
        let arbiter = ApprovalArbiter::new(Some(decide));
        let (_, outcome) = arbiter.request("read_file", &json!({}), None).await;
        assert_eq!(outcome, ApprovalOutcome::Granted);

        let (_, outcome) = arbiter.request("write_file", &json!({}), None).await;
        assert_eq!(outcome, ApprovalOutcome::Denied);
    }
}
