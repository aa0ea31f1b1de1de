// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Streamable-HTTP JSON-RPC client for a single remote tool server.
//!
//! Each request is a plain POST; the streamable-HTTP transport means the
//! server may reply `202 Accepted` with no body, a single JSON response, or
//! an SSE stream of JSON-RPC frames. A session id returned from
//! `initialize` is attached to every subsequent request until the client is
//! torn down with a best-effort `DELETE`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use poncho_config::RemoteServerConfig;
use poncho_tools::{RemoteToolClient, ToolOutput};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::protocol::{CallToolResult, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RemoteToolInfo, ToolsListResult, PROTOCOL_VERSION};

const SESSION_HEADER: &str = "Mcp-Session-Id";

#[derive(Debug, thiserror::Error)]
pub enum McpClientError {
    #[error("auth.token_missing: environment variable {0} is not set")]
    TokenMissing(String),
    #[error("auth-failed")]
    AuthFailed,
    #[error("permission-denied: {0}")]
    PermissionDenied(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
}

/// A connected (or connectable) remote tool server. `auth_failed` is sticky
/// for the client's lifetime: once a 401 is observed, every later call fails
/// fast without another round trip, until the process restarts with fresh
/// credentials.
#[derive(Debug)]
pub struct McpClient {
    server_name: String,
    base_url: String,
    http: reqwest::Client,
    bearer: Option<String>,
    session_id: Mutex<Option<String>>,
    auth_failed: AtomicBool,
}

impl McpClient {
    /// Resolves the bearer token (if configured) and builds an HTTP client
    /// with the server's configured timeout. Does not perform any network
    /// I/O — call [`McpClient::initialize`] next.
    pub fn connect(server_name: &str, cfg: &RemoteServerConfig) -> Result<Self, McpClientError> {
        let bearer = match &cfg.bearer_env {
            Some(var) => match std::env::var(var) {
                Ok(token) => Some(token),
                Err(_) => {
                    warn!(server = server_name, var, "auth.token_missing");
                    return Err(McpClientError::TokenMissing(var.clone()));
                }
            },
            None => None,
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| McpClientError::Transport(e.to_string()))?;

        Ok(Self {
            server_name: server_name.to_string(),
            base_url: cfg.url.clone(),
            http,
            bearer,
            session_id: Mutex::new(None),
            auth_failed: AtomicBool::new(false),
        })
    }

    /// Posts `initialize`, captures the session id, then sends
    /// `notifications/initialized`. Must be called once before any other
    /// request.
    pub async fn initialize(&self) -> Result<(), McpClientError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": "poncho", "version": env!("CARGO_PKG_VERSION") },
        });
        let (_, headers) = self.post_raw(JsonRpcRequest::new(Value::from(1), "initialize", Some(params))).await?;
        if let Some(session) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
            *self.session_id.lock().unwrap() = Some(session.to_string());
        }
        self.notify("notifications/initialized", None).await?;
        debug!(server = self.server_name, "mcp session initialized");
        Ok(())
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpClientError> {
        let body = serde_json::to_string(&JsonRpcNotification::new(method, params))
            .map_err(|e| McpClientError::Transport(e.to_string()))?;
        let mut req = self.http.post(&self.base_url).header("Content-Type", "application/json").body(body);
        req = self.with_auth(req);
        let resp = req.send().await.map_err(|e| McpClientError::Transport(e.to_string()))?;
        self.check_status(resp.status())?;
        Ok(())
    }

    fn with_auth(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.bearer {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        if let Some(session) = self.session_id.lock().unwrap().clone() {
            req = req.header(SESSION_HEADER, session);
        }
        req
    }

    fn check_status(&self, status: StatusCode) -> Result<(), McpClientError> {
        match status {
            StatusCode::UNAUTHORIZED => {
                self.auth_failed.store(true, Ordering::SeqCst);
                Err(McpClientError::AuthFailed)
            }
            StatusCode::FORBIDDEN => Err(McpClientError::PermissionDenied(self.server_name.clone())),
            s if s.is_success() => Ok(()),
            s => Err(McpClientError::Transport(format!("HTTP {s}"))),
        }
    }

    /// Sends one JSON-RPC request, returning its raw body plus response
    /// headers (used to capture the session id during `initialize`).
    async fn post_raw(&self, request: JsonRpcRequest) -> Result<(String, reqwest::header::HeaderMap), McpClientError> {
        if self.auth_failed.load(Ordering::SeqCst) {
            return Err(McpClientError::AuthFailed);
        }

        let body = serde_json::to_string(&request).map_err(|e| McpClientError::Transport(e.to_string()))?;
        let mut req = self
            .http
            .post(&self.base_url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .body(body);
        req = self.with_auth(req);

        let resp = req.send().await.map_err(|e| McpClientError::Transport(e.to_string()))?;
        let status = resp.status();
        self.check_status(status)?;
        let headers = resp.headers().clone();
        let text = resp.text().await.map_err(|e| McpClientError::Transport(e.to_string()))?;
        Ok((text, headers))
    }

    /// Sends a request and parses its JSON-RPC response, accepting either a
    /// bare JSON body or one or more SSE frames (the last one wins).
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpClientError> {
        let id = Value::from(Uuid::new_v4().to_string());
        let (body, _headers) = self.post_raw(JsonRpcRequest::new(id, method, params)).await?;

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        let response: JsonRpcResponse = if body.trim_start().starts_with('{') {
            serde_json::from_str(&body).map_err(|e| McpClientError::Transport(format!("invalid JSON-RPC response: {e}")))?
        } else {
            crate::protocol::parse_sse_responses(&body)
                .into_iter()
                .last()
                .ok_or_else(|| McpClientError::Transport("no JSON-RPC response in SSE stream".into()))?
        };

        if let Some(err) = response.error {
            return Err(McpClientError::Rpc { code: err.code, message: err.message });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    pub async fn list_tools(&self) -> Result<Vec<RemoteToolInfo>, McpClientError> {
        let result = self.request("tools/list", None).await?;
        let parsed: ToolsListResult =
            serde_json::from_value(result).map_err(|e| McpClientError::Transport(format!("malformed tools/list result: {e}")))?;
        Ok(parsed.tools)
    }

    /// Best-effort teardown: `DELETE` carrying the session id, swallowing
    /// failures — a server that has already dropped the session is fine.
    pub async fn shutdown(&self) {
        let Some(session) = self.session_id.lock().unwrap().clone() else { return };
        let mut req = self.http.delete(&self.base_url).header(SESSION_HEADER, session);
        if let Some(token) = &self.bearer {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        if let Err(e) = req.send().await {
            debug!(server = self.server_name, error = %e, "mcp session teardown failed (ignored)");
        }
    }
}

#[async_trait]
impl RemoteToolClient for McpClient {
    async fn call(&self, tool: &str, args: Value) -> anyhow::Result<ToolOutput> {
        let params = json!({ "name": tool, "arguments": args });
        let result = self.request("tools/call", Some(params)).await?;
        let parsed: CallToolResult =
            serde_json::from_value(result).map_err(|e| anyhow::anyhow!("malformed tools/call result: {e}"))?;
        let text = parsed.text();
        Ok(if parsed.is_error { ToolOutput::err("placeholder", text) } else { ToolOutput::ok("placeholder", text) })
    }
}
