// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Wraps a single tool exposed by a remote tool server
//! behind the local `Tool` trait, namespaced as `<server>/<tool>`.
//!
//! `poncho-tools` does not know how to speak to a remote server itself —
//! that is the remote tool-server client's job (a separate crate, to avoid
//! this crate depending on an HTTP client stack it otherwise has no use
//! for). Instead this module defines the seam: `RemoteToolClient` is
//! whatever the client crate implements, and `RemoteTool` is the adapter
//! the registry stores.

use async_trait::async_trait;
use serde_json::Value;

use crate::gating::ApprovalPolicy;
use crate::tool::{Tool, ToolCall, ToolOutput};

/// A single live connection to a remote tool server, capable of invoking one
/// of its advertised tools by its *unqualified* (server-local) name.
#[async_trait]
pub trait RemoteToolClient: Send + Sync {
    /// Invokes `tool` (the name as advertised by the server's own
    /// `tools/list`, without the `<server>/` prefix) with `args`.
    async fn call(&self, tool: &str, args: Value) -> anyhow::Result<ToolOutput>;
}

/// Adapts one remote tool into the local `Tool` trait. `name` is the
/// already-namespaced `<server>/<tool>` form used for registry lookups and
/// gating; `remote_name` is the bare name sent over the wire.
pub struct RemoteTool {
    name: String,
    remote_name: String,
    description: String,
    parameters: Value,
    client: std::sync::Arc<dyn RemoteToolClient>,
}

impl RemoteTool {
    pub fn new(
        server: &str,
        remote_name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        client: std::sync::Arc<dyn RemoteToolClient>,
    ) -> Self {
        let remote_name = remote_name.into();
        Self { name: format!("{server}/{remote_name}"), remote_name, description: description.into(), parameters, client }
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.parameters.clone()
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        match self.client.call(&self.remote_name, call.args.clone()).await {
            Ok(mut output) => {
                output.call_id = call.id.clone();
                output
            }
            Err(e) => ToolOutput::err(&call.id, format!("remote tool call failed: {e}")),
        }
    }
}
