// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! End-to-end tests over the real HTTP surface: a router bound to an
//! ephemeral port, a scripted model provider, and the `poncho-client`
//! library as the consumer.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::{json, Value};

use poncho_client::{AgentClient, ClientEvent};
use poncho_config::{AgentManifest, Environment, Limits, ModelSelection, PolicyConfig};
use poncho_core::{ApprovalArbiter, Orchestrator, RunConfig};
use poncho_model::{ModelProvider, ScriptedMockProvider, ScriptedTurn};
use poncho_server::{AppState, AuthState, Broker, StoredToken};
use poncho_store::{MemoryConversationStore, MemoryRunStore};
use poncho_tools::{ApprovalPolicy, Tool, ToolCall, ToolGate, ToolOutput, ToolRegistry, ToolSource};

const TOKEN: &str = "integration-test-token";

struct EchoTool;

#[async_trait::async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "echoes its input back"
    }
    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": { "value": { "type": "string" } } })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let value = call.args.get("value").and_then(Value::as_str).unwrap_or_default();
        ToolOutput::ok(&call.id, json!({ "echoed": value }).to_string())
    }
}

struct GatedTool;

#[async_trait::async_trait]
impl Tool for GatedTool {
    fn name(&self) -> &str {
        "dangerous-delete"
    }
    fn description(&self) -> &str {
        "deletes things; requires approval"
    }
    fn parameters_schema(&self) -> Value {
        json!({ "type": "object" })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        ToolOutput::ok(&call.id, "deleted")
    }
}

struct SlowTool;

#[async_trait::async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }
    fn description(&self) -> &str {
        "takes a long time"
    }
    fn parameters_schema(&self) -> Value {
        json!({ "type": "object" })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        tokio::time::sleep(Duration::from_secs(5)).await;
        ToolOutput::ok(&call.id, "finally done")
    }
}

fn manifest(max_steps: u32) -> AgentManifest {
    AgentManifest {
        name: "hello".into(),
        id: Some("test".into()),
        description: None,
        model: ModelSelection::default(),
        limits: Limits { max_steps, timeout: None },
        allowed_tools: vec![],
        approval_required: vec![],
        cron: HashMap::new(),
    }
}

fn tool_call_turn(name: &str, args: Value) -> ScriptedTurn {
    ScriptedTurn::tool("c1", name, args)
}

fn text_turn(text: &str) -> ScriptedTurn {
    ScriptedTurn::text(text)
}

struct TestServer {
    addr: SocketAddr,
}

impl TestServer {
    fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn client(&self) -> AgentClient {
        AgentClient::new(self.base_url()).with_bearer(TOKEN)
    }

    fn http(&self) -> reqwest::Client {
        reqwest::Client::new()
    }

    async fn create_conversation(&self) -> String {
        let resp = self
            .http()
            .post(format!("{}/api/conversations", self.base_url()))
            .bearer_auth(TOKEN)
            .json(&json!({}))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());
        let body: Value = resp.json().await.unwrap();
        body["conversation"]["id"].as_str().unwrap().to_string()
    }

    async fn conversation_messages(&self, id: &str) -> Vec<Value> {
        let resp = self
            .http()
            .get(format!("{}/api/conversations/{id}", self.base_url()))
            .bearer_auth(TOKEN)
            .send()
            .await
            .unwrap();
        let body: Value = resp.json().await.unwrap();
        body["messages"].as_array().cloned().unwrap_or_default()
    }
}

async fn spawn_server(
    turns: Vec<ScriptedTurn>,
    tools: Vec<Box<dyn Tool>>,
    max_steps: u32,
    approval_timeout: Duration,
) -> TestServer {
    let provider: Arc<dyn ModelProvider> = Arc::new(ScriptedMockProvider::new(turns));
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register_arc(Arc::from(tool), ToolSource::BuiltIn);
    }

    let manifest = manifest(max_steps);
    let gate = ToolGate::new(&manifest, &PolicyConfig::default(), Environment::Development);
    let run_config = RunConfig {
        max_steps,
        approval_timeout: Some(approval_timeout),
        ..RunConfig::default()
    };
    let orchestrator = Arc::new(Orchestrator::new(provider, Arc::new(registry), gate, run_config.clone()));

    let state = Arc::new(AppState {
        manifest,
        system_prompt: "You are a test agent.".into(),
        orchestrator,
        run_config,
        conversations: Arc::new(MemoryConversationStore::new()),
        runs: Arc::new(MemoryRunStore::new()),
        broker: Arc::new(Broker::new()),
        auth: AuthState::new(Some(StoredToken::from_plaintext(TOKEN)), None),
        approvals: Arc::new(ApprovalArbiter::without_decision_fn()),
        uploads: None,
        cron: None,
    });

    let (addr, server) = poncho_server::bind("127.0.0.1:0".parse().unwrap(), state).await.unwrap();
    tokio::spawn(server);
    TestServer { addr }
}

fn kind(event: &ClientEvent) -> &'static str {
    match event {
        ClientEvent::RunStarted { .. } => "run:started",
        ClientEvent::RunCompleted { .. } => "run:completed",
        ClientEvent::RunError { .. } => "run:error",
        ClientEvent::RunCancelled {} => "run:cancelled",
        ClientEvent::StepStarted { .. } => "step:started",
        ClientEvent::StepCompleted { .. } => "step:completed",
        ClientEvent::ModelChunk { .. } => "model:chunk",
        ClientEvent::ModelResponse { .. } => "model:response",
        ClientEvent::ToolStarted { .. } => "tool:started",
        ClientEvent::ToolCompleted { .. } => "tool:completed",
        ClientEvent::ToolError { .. } => "tool:error",
        ClientEvent::ToolApprovalRequired { .. } => "tool:approval:required",
        ClientEvent::ToolApprovalGranted { .. } => "tool:approval:granted",
        ClientEvent::ToolApprovalDenied { .. } => "tool:approval:denied",
        ClientEvent::Unknown => "unknown",
    }
}

async fn collect_events(server: &TestServer, conversation_id: &str, text: &str) -> Vec<ClientEvent> {
    let client = server.client();
    let stream = client.stream(conversation_id, text).await.unwrap();
    let mut stream = Box::pin(stream);
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event.unwrap());
    }
    events
}

/// Polls until the persisted conversation reaches `len` messages; the
/// orchestrator's persist task runs concurrently with the SSE close.
async fn await_message_count(server: &TestServer, id: &str, len: usize) -> Vec<Value> {
    for _ in 0..100 {
        let messages = server.conversation_messages(id).await;
        if messages.len() >= len {
            return messages;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("conversation {id} never reached {len} messages");
}

#[tokio::test]
async fn single_turn_completion_streams_ordered_events_and_persists_history() {
    let server = spawn_server(vec![text_turn("hello")], vec![], 10, Duration::from_secs(1)).await;
    let id = server.create_conversation().await;

    let events = collect_events(&server, &id, "say hi").await;
    let kinds: Vec<_> = events.iter().map(kind).collect();
    assert_eq!(
        kinds,
        vec!["run:started", "step:started", "model:chunk", "model:response", "step:completed", "run:completed"]
    );
    match events.last().unwrap() {
        ClientEvent::RunCompleted { text, continuation, .. } => {
            assert_eq!(text, "hello");
            assert!(!continuation);
        }
        other => panic!("expected run:completed, got {other:?}"),
    }

    let messages = await_message_count(&server, &id, 2).await;
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[1]["role"], "assistant");
}

#[tokio::test]
async fn tool_loop_executes_tool_then_completes() {
    let scripts = vec![tool_call_turn("echo", json!({"value": "hi"})), text_turn("done")];
    let server = spawn_server(scripts, vec![Box::new(EchoTool)], 10, Duration::from_secs(1)).await;
    let id = server.create_conversation().await;

    let events = collect_events(&server, &id, "echo hi").await;
    let kinds: Vec<_> = events.iter().map(kind).collect();
    assert!(kinds.contains(&"tool:started"));
    assert!(kinds.contains(&"tool:completed"));
    assert_eq!(kinds.iter().filter(|k| **k == "step:started").count(), 2);

    let completed = events.iter().find_map(|e| match e {
        ClientEvent::ToolCompleted { tool, output, .. } => Some((tool.clone(), output.clone())),
        _ => None,
    });
    let (tool, output) = completed.expect("tool:completed event");
    assert_eq!(tool, "echo");
    assert!(output.contains("\"echoed\":\"hi\""));

    match events.last().unwrap() {
        ClientEvent::RunCompleted { text, .. } => assert_eq!(text, "done"),
        other => panic!("expected run:completed, got {other:?}"),
    }
}

#[tokio::test]
async fn gated_tool_with_no_resolver_is_denied_and_run_still_completes() {
    let scripts = vec![tool_call_turn("dangerous-delete", json!({})), text_turn("I did not delete anything.")];
    let server = spawn_server(scripts, vec![Box::new(GatedTool)], 10, Duration::from_millis(100)).await;
    let id = server.create_conversation().await;

    let events = collect_events(&server, &id, "delete everything").await;
    let kinds: Vec<_> = events.iter().map(kind).collect();

    let required_at = kinds.iter().position(|k| *k == "tool:approval:required").expect("approval required");
    let denied_at = kinds.iter().position(|k| *k == "tool:approval:denied").expect("approval denied");
    assert!(required_at < denied_at);
    assert!(!kinds.contains(&"tool:started"), "denied tool must not start");
    assert!(!kinds.contains(&"tool:approval:granted"));
    assert!(kinds.contains(&"tool:error"), "denial synthesizes a tool:error");
    assert_eq!(*kinds.last().unwrap(), "run:completed");

    let messages = await_message_count(&server, &id, 2).await;
    let last = messages.last().unwrap();
    assert_eq!(last["role"], "assistant");
}

#[tokio::test]
async fn approval_granted_via_http_lets_the_tool_run() {
    let scripts = vec![tool_call_turn("dangerous-delete", json!({})), text_turn("deleted as approved")];
    let server = spawn_server(scripts, vec![Box::new(GatedTool)], 10, Duration::from_secs(5)).await;
    let id = server.create_conversation().await;

    let client = server.client();
    let stream = client.stream(&id, "delete it").await.unwrap();
    let mut stream = Box::pin(stream);

    let mut kinds_seen = Vec::new();
    while let Some(event) = stream.next().await {
        let event = event.unwrap();
        if let ClientEvent::ToolApprovalRequired { approval_id, .. } = &event {
            let resp = server
                .http()
                .post(format!("{}/api/approvals/{approval_id}", server.base_url()))
                .bearer_auth(TOKEN)
                .json(&json!({ "approved": true }))
                .send()
                .await
                .unwrap();
            assert!(resp.status().is_success());
        }
        kinds_seen.push(kind(&event).to_string());
    }

    assert!(kinds_seen.contains(&"tool:approval:granted".to_string()));
    assert!(kinds_seen.contains(&"tool:completed".to_string()));
    assert_eq!(kinds_seen.last().unwrap(), "run:completed");
}

#[tokio::test]
async fn stop_cancels_an_in_flight_run_and_leaves_history_untouched() {
    let scripts = vec![tool_call_turn("slow", json!({})), text_turn("never reached")];
    let server = spawn_server(scripts, vec![Box::new(SlowTool)], 10, Duration::from_secs(1)).await;
    let id = server.create_conversation().await;

    let client = server.client();
    let stream = client.stream(&id, "take your time").await.unwrap();
    let collector = tokio::spawn(async move {
        let mut stream = Box::pin(stream);
        let mut kinds_seen = Vec::new();
        while let Some(event) = stream.next().await {
            kinds_seen.push(kind(&event.unwrap()).to_string());
        }
        kinds_seen
    });

    // Wait until the slow tool has started before stopping.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let resp = server
        .http()
        .post(format!("{}/api/conversations/{id}/stop", server.base_url()))
        .bearer_auth(TOKEN)
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(body["stopped"], true);

    let kinds_seen = collector.await.unwrap();
    assert_eq!(kinds_seen.last().unwrap(), "run:cancelled");

    // A cancelled run must not persist even the user message.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(server.conversation_messages(&id).await.is_empty());
}

#[tokio::test]
async fn second_send_during_live_run_is_rejected_with_conflict() {
    let scripts = vec![tool_call_turn("slow", json!({})), text_turn("done")];
    let server = spawn_server(scripts, vec![Box::new(SlowTool)], 10, Duration::from_secs(1)).await;
    let id = server.create_conversation().await;

    let client = server.client();
    let stream = client.stream(&id, "first").await.unwrap();
    let _drain = tokio::spawn(async move {
        let mut stream = Box::pin(stream);
        while stream.next().await.is_some() {}
    });
    tokio::time::sleep(Duration::from_millis(300)).await;

    let resp = server
        .http()
        .post(format!("{}/api/conversations/{id}/messages", server.base_url()))
        .bearer_auth(TOKEN)
        .json(&json!({ "message": "second" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::CONFLICT);
}

#[tokio::test]
async fn continuation_is_followed_transparently_by_the_client() {
    let scripts = vec![
        tool_call_turn("echo", json!({"value": "1"})),
        tool_call_turn("echo", json!({"value": "2"})),
        text_turn("done"),
    ];
    let server = spawn_server(scripts, vec![Box::new(EchoTool)], 2, Duration::from_secs(1)).await;
    let id = server.create_conversation().await;

    let result = server.client().send_message(&id, "keep going").await.unwrap();
    assert_eq!(result.text, "done");
    assert_eq!(result.steps, 3, "two tool steps plus the final text step");
    assert!(result.input_tokens > 0);
}

#[tokio::test]
async fn events_endpoint_replays_the_exact_live_sequence() {
    let server = spawn_server(vec![text_turn("hello")], vec![], 10, Duration::from_secs(1)).await;
    let id = server.create_conversation().await;

    let live = collect_events(&server, &id, "say hi").await;
    let live_kinds: Vec<_> = live.iter().map(kind).collect();

    // Within the replay grace window the finished run is still attachable.
    let resp = server
        .http()
        .get(format!("{}/api/conversations/{id}/events", server.base_url()))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let replayed: Vec<_> = poncho_client::parse_sse_stream(resp.bytes_stream()).collect().await;
    let replay_kinds: Vec<_> = replayed.iter().map(|e| kind(e.as_ref().unwrap())).collect();

    assert_eq!(replay_kinds, live_kinds);
}

#[tokio::test]
async fn events_endpoint_without_a_run_closes_with_stream_end() {
    let server = spawn_server(vec![], vec![], 10, Duration::from_secs(1)).await;
    let id = server.create_conversation().await;

    let resp = server
        .http()
        .get(format!("{}/api/conversations/{id}/events", server.base_url()))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    let body = resp.text().await.unwrap();
    assert!(body.contains("event: stream:end"));
}

#[tokio::test]
async fn requests_without_credentials_are_unauthorized_but_health_is_open() {
    let server = spawn_server(vec![], vec![], 10, Duration::from_secs(1)).await;

    let resp = server.http().get(format!("{}/api/conversations", server.base_url())).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);

    let resp = server.http().get(format!("{}/health", server.base_url())).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn unknown_conversation_returns_not_found_envelope() {
    let server = spawn_server(vec![], vec![], 10, Duration::from_secs(1)).await;

    let resp = server
        .http()
        .get(format!("{}/api/conversations/nonexistent", server.base_url()))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "not_found");
    assert!(body["message"].as_str().is_some());
}

#[tokio::test]
async fn conversation_crud_round_trip() {
    let server = spawn_server(vec![], vec![], 10, Duration::from_secs(1)).await;
    let id = server.create_conversation().await;

    let resp = server
        .http()
        .patch(format!("{}/api/conversations/{id}", server.base_url()))
        .bearer_auth(TOKEN)
        .json(&json!({ "title": "renamed" }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["title"], "renamed");

    let listed = server
        .http()
        .get(format!("{}/api/conversations", server.base_url()))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap();
    assert!(listed["conversations"].as_array().unwrap().iter().any(|c| c["id"] == json!(id.clone())));

    let resp = server
        .http()
        .delete(format!("{}/api/conversations/{id}", server.base_url()))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    let resp = server
        .http()
        .get(format!("{}/api/conversations/{id}", server.base_url()))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
}
