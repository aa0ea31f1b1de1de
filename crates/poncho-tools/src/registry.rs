// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::gating::ToolGate;
use crate::tool::{Tool, ToolCall, ToolOutput};

/// Where a registered tool's implementation lives (the source precedence
/// order collapsed into a tag for introspection and logging). The
/// registry itself stores every tool behind the same `Arc<dyn Tool>`
/// regardless of source, so calling code never branches on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolSource {
    /// `list_directory` / `read_file` / `write_file`.
    BuiltIn,
    /// `memory_main_get` / `memory_main_update` / `conversation_recall`.
    Memory,
    /// The four progressive-disclosure skill tools, or a local skill's own
    /// declared tools.
    Skill,
    /// A tool proxied from a remote tool server, namespaced `<server>/<tool>`.
    Remote,
}

/// Decoupled mirror of a tool's advertised schema, independent of any
/// particular model provider's wire format.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

struct Entry {
    tool: Arc<dyn Tool>,
    source: ToolSource,
}

/// Central tool registry: a name-keyed map of `Arc<dyn Tool>`, populated by
/// merging the five tool sources in precedence order — later sources
/// overwrite earlier ones on a name collision, so registering built-ins
/// first and remote tools last gives remote tools the final say over a name.
pub struct ToolRegistry {
    tools: HashMap<String, Entry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    /// Register a tool under its own `name()`, overwriting any existing
    /// registration with the same name. This is the merge-precedence
    /// mechanism: call in source order (built-in, memory, skill, remote).
    pub fn register(&mut self, tool: impl Tool + 'static, source: ToolSource) {
        let name = tool.name().to_string();
        self.tools.insert(name, Entry { tool: Arc::new(tool), source });
    }

    /// Register an already-boxed tool (used by the remote client, which
    /// builds one `RemoteTool` wrapper per namespaced tool dynamically).
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>, source: ToolSource) {
        let name = tool.name().to_string();
        self.tools.insert(name, Entry { tool, source });
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|e| e.tool.clone())
    }

    pub fn source_of(&self, name: &str) -> Option<ToolSource> {
        self.tools.get(name).map(|e| e.source)
    }

    /// All schemas, sorted by name for deterministic prompt construction.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut out: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|e| ToolSchema {
                name: e.tool.name().to_string(),
                description: e.tool.description().to_string(),
                parameters: e.tool.parameters_schema(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Schemas visible under `gate` — i.e. the tool list actually exposed to
    /// the model for a given agent/environment.
    pub fn schemas_for(&self, gate: &ToolGate) -> Vec<ToolSchema> {
        let mut out: Vec<ToolSchema> = self
            .tools
            .values()
            .filter(|e| gate.is_tool_allowed(e.tool.name()))
            .map(|e| ToolSchema {
                name: e.tool.name().to_string(),
                description: e.tool.description().to_string(),
                parameters: e.tool.parameters_schema(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Execute a tool call. An unknown tool name synthesizes a recoverable
    /// `tool:error` output rather than panicking or propagating an error —
    /// the step loop keeps running.
    pub async fn execute(&self, call: &ToolCall) -> ToolOutput {
        match self.tools.get(&call.name) {
            Some(entry) => entry.tool.execute(call).await,
            None => ToolOutput::err(&call.id, format!("unknown tool: {}", call.name)),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::gating::ApprovalPolicy;

    struct EchoTool(&'static str);

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "echoes input"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn default_policy(&self) -> ApprovalPolicy {
            ApprovalPolicy::Auto
        }
        async fn execute(&self, call: &ToolCall) -> ToolOutput {
            ToolOutput::ok(&call.id, format!("echo:{}", call.args))
        }
    }

    fn call(name: &str) -> ToolCall {
        ToolCall { id: "c1".into(), name: name.into(), args: json!({"x": 1}) }
    }

    #[test]
    fn register_and_get() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool("echo"), ToolSource::BuiltIn);
        assert!(reg.get("echo").is_some());
        assert!(reg.get("missing").is_none());
    }

    #[test]
    fn registering_same_name_twice_overwrites() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool("echo"), ToolSource::BuiltIn);
        reg.register(EchoTool("echo"), ToolSource::Remote);
        assert_eq!(reg.source_of("echo"), Some(ToolSource::Remote));
        assert_eq!(reg.names().len(), 1);
    }

    #[tokio::test]
    async fn execute_known_tool() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool("echo"), ToolSource::BuiltIn);
        let out = reg.execute(&call("echo")).await;
        assert!(!out.is_error);
        assert!(out.content.contains("echo:"));
    }

    #[tokio::test]
    async fn execute_unknown_tool_synthesizes_recoverable_error() {
        let reg = ToolRegistry::new();
        let out = reg.execute(&call("nope")).await;
        assert!(out.is_error);
        assert!(out.content.contains("unknown tool: nope"));
    }

    #[test]
    fn schemas_sorted_by_name() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool("zzz"), ToolSource::BuiltIn);
        reg.register(EchoTool("aaa"), ToolSource::BuiltIn);
        let schemas = reg.schemas();
        assert_eq!(schemas[0].name, "aaa");
        assert_eq!(schemas[1].name, "zzz");
    }

    #[test]
    fn names_sorted() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool("b"), ToolSource::BuiltIn);
        reg.register(EchoTool("a"), ToolSource::BuiltIn);
        assert_eq!(reg.names(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn schemas_for_gate_filters_disallowed_tools() {
        use poncho_config::{AgentManifest, Environment, Limits, ModelSelection, PolicyConfig};
        use std::collections::HashMap as Map;

        let mut reg = ToolRegistry::new();
        reg.register(EchoTool("read_file"), ToolSource::BuiltIn);
        reg.register(EchoTool("write_file"), ToolSource::BuiltIn);

        let manifest = AgentManifest {
            name: "agent".into(),
            id: None,
            description: None,
            model: ModelSelection::default(),
            limits: Limits::default(),
            allowed_tools: vec!["read_file".into()],
            approval_required: vec![],
            cron: Map::new(),
        };
        let gate = ToolGate::new(&manifest, &PolicyConfig::default(), Environment::Development);
        let schemas = reg.schemas_for(&gate);
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].name, "read_file");
    }

    #[test]
    fn empty_registry_has_no_names() {
        let reg = ToolRegistry::new();
        assert!(reg.names().is_empty());
    }
}
