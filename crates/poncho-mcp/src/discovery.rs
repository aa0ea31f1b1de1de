// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Connects to every configured remote server, lists its tools, and wraps
//! each into a namespaced [`poncho_tools::RemoteTool`] ready for
//! registration.

use std::collections::HashMap;
use std::sync::Arc;

use poncho_config::RemoteServerConfig;
use poncho_tools::RemoteTool;
use tracing::warn;

use crate::client::{McpClient, McpClientError};

/// One server's discovery outcome: the live client (kept around so
/// `poncho-core` can tear it down on shutdown) plus the `Tool`-ready
/// wrappers for everything it advertised.
pub struct DiscoveredServer {
    pub client: Arc<McpClient>,
    pub tools: Vec<Arc<RemoteTool>>,
}

/// Connects to and discovers every server in `servers`. A server that fails
/// to connect (missing token, auth failure, transport error) is logged and
/// skipped — one broken remote server must not prevent the others, or the
/// built-in/skill tools, from being usable.
pub async fn discover_all(servers: &HashMap<String, RemoteServerConfig>) -> HashMap<String, DiscoveredServer> {
    let mut out = HashMap::new();
    for (name, cfg) in servers {
        match discover_one(name, cfg).await {
            Ok(discovered) => {
                out.insert(name.clone(), discovered);
            }
            Err(e) => warn!(server = name, error = %e, "remote tool server unavailable"),
        }
    }
    out
}

async fn discover_one(name: &str, cfg: &RemoteServerConfig) -> Result<DiscoveredServer, McpClientError> {
    let client = Arc::new(McpClient::connect(name, cfg)?);
    client.initialize().await?;
    let infos = client.list_tools().await?;

    let tools = infos
        .into_iter()
        .map(|info| {
            Arc::new(RemoteTool::new(name, info.name, info.description, info.input_schema, client.clone()))
        })
        .collect();

    Ok(DiscoveredServer { client, tools })
}
