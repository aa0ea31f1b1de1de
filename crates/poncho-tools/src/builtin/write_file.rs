// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use async_trait::async_trait;
use poncho_config::{Environment, FilesystemToolsConfig};
use serde_json::{json, Value};
use tracing::debug;

use crate::builtin::path_guard::resolve_within;
use crate::gating::ApprovalPolicy;
use crate::tool::{Tool, ToolCall, ToolOutput};

/// Whether `write_file` is enabled for `env` under `cfg`:
/// disabled in production unless explicitly re-enabled.
pub fn write_enabled(cfg: &FilesystemToolsConfig, env: Environment) -> bool {
    match env {
        Environment::Production => cfg.write_enabled_in_production,
        _ => cfg.write_enabled_outside_production,
    }
}

/// `write_file`: writes a file constrained to `working_dir`.
///
/// Construction fails closed: when `enabled` is `false` every call returns a
/// non-recoverable-looking but still `tool:error` output rather than the
/// tool being absent from the registry, so the model gets an explanatory
/// message instead of "unknown tool".
pub struct WriteFileTool {
    working_dir: PathBuf,
    enabled: bool,
}

impl WriteFileTool {
    pub fn new(working_dir: PathBuf, enabled: bool) -> Self {
        Self { working_dir, enabled }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Writes a file within the working directory, overwriting any existing content \
         unless append=true. Creates parent directories automatically. Disabled by \
         default in production environments."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, relative to the working directory"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write to the file"
                },
                "append": {
                    "type": "boolean",
                    "description": "If true, append to existing content instead of overwriting (default false)"
                }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        if !self.enabled {
            return ToolOutput::err(&call.id, "write_file is disabled in this environment");
        }

        let path = match call.args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolOutput::err(&call.id, "missing required parameter 'path'"),
        };
        let content = match call.args.get("content").and_then(|v| v.as_str()) {
            Some(c) => c,
            None => return ToolOutput::err(&call.id, "missing required parameter 'content'"),
        };
        let append = call.args.get("append").and_then(|v| v.as_bool()).unwrap_or(false);

        debug!(path, append, "write_file tool");

        let resolved = match resolve_within(&self.working_dir, path) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e),
        };

        if let Some(parent) = resolved.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolOutput::err(&call.id, format!("failed to create parent directory: {e}"));
            }
        }

        if append {
            use tokio::io::AsyncWriteExt;
            match tokio::fs::OpenOptions::new().append(true).create(true).open(&resolved).await {
                Ok(mut f) => {
                    let result = f.write_all(content.as_bytes()).await;
                    let _ = f.flush().await;
                    match result {
                        Ok(_) => ToolOutput::ok(&call.id, format!("appended {} bytes to {path}", content.len())),
                        Err(e) => ToolOutput::err(&call.id, format!("write error: {e}")),
                    }
                }
                Err(e) => ToolOutput::err(&call.id, format!("open error: {e}")),
            }
        } else {
            match tokio::fs::write(&resolved, content).await {
                Ok(_) => ToolOutput::ok(&call.id, format!("wrote {} bytes to {path}", content.len())),
                Err(e) => ToolOutput::err(&call.id, format!("write error: {e}")),
            }
        }
    }
}
