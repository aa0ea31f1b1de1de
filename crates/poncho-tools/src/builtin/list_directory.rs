// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::builtin::path_guard::resolve_within;
use crate::gating::ApprovalPolicy;
use crate::tool::{Tool, ToolCall, ToolOutput};

/// `list_directory`: lists a directory constrained to `working_dir`.
pub struct ListDirectoryTool {
    working_dir: PathBuf,
}

impl ListDirectoryTool {
    pub fn new(working_dir: PathBuf) -> Self {
        Self { working_dir }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "Lists directory contents within the working directory. depth: default 2, max 5. \
         limit: 100 entries by default. Excludes .git/ and other VCS directories. \
         Directories have a trailing /."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the directory, relative to the working directory"
                },
                "depth": {
                    "type": "integer",
                    "description": "Maximum recursion depth (default 2, max 5)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of entries to return (default 100)"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let path = match call.args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolOutput::err(&call.id, "missing required parameter 'path'"),
        };
        let depth = call.args.get("depth").and_then(|v| v.as_u64()).unwrap_or(2).min(5) as usize;
        let limit = call.args.get("limit").and_then(|v| v.as_u64()).unwrap_or(100) as usize;

        debug!(path, depth, limit, "list_directory tool");

        let resolved = match resolve_within(&self.working_dir, path) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e),
        };

        match tokio::fs::metadata(&resolved).await {
            Ok(m) if m.is_dir() => {}
            Ok(_) => return ToolOutput::err(&call.id, format!("not a directory: {path}")),
            Err(e) => return ToolOutput::err(&call.id, format!("cannot access {path}: {e}")),
        }

        let mut entries: Vec<String> = Vec::new();
        let mut truncated = false;
        collect_entries(&resolved, &resolved, 0, depth, limit, &mut entries, &mut truncated).await;

        if entries.is_empty() {
            return ToolOutput::ok(&call.id, "(empty directory)");
        }

        let mut output = entries.join("\n");
        if truncated {
            output.push_str(&format!("\n...[output truncated at {limit} entries]"));
        }
        ToolOutput::ok(&call.id, output)
    }
}

static EXCLUDED_DIRS: &[&str] = &[".git", "target", "node_modules", ".svn", "__pycache__"];

fn is_excluded(name: &str) -> bool {
    EXCLUDED_DIRS.contains(&name)
}

fn relative_path(base: &std::path::Path, full: &std::path::Path) -> String {
    full.strip_prefix(base).unwrap_or(full).to_string_lossy().into_owned()
}

#[async_recursion::async_recursion]
async fn collect_entries(
    base: &std::path::Path,
    dir: &std::path::Path,
    current_depth: usize,
    max_depth: usize,
    limit: usize,
    entries: &mut Vec<String>,
    truncated: &mut bool,
) {
    if entries.len() >= limit {
        *truncated = true;
        return;
    }

    let mut rd = match tokio::fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(_) => return,
    };

    let mut children: Vec<(String, bool)> = Vec::new();
    while let Ok(Some(entry)) = rd.next_entry().await {
        let name = entry.file_name().to_string_lossy().to_string();
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        children.push((name, is_dir));
    }
    children.sort_by(|(a, a_dir), (b, b_dir)| b_dir.cmp(a_dir).then(a.cmp(b)));

    for (name, is_dir) in children {
        if entries.len() >= limit {
            *truncated = true;
            return;
        }
        let full_path = dir.join(&name);
        let rel = relative_path(base, &full_path);
        if is_dir {
            entries.push(format!("{rel}/"));
            if current_depth < max_depth && !is_excluded(&name) {
                collect_entries(base, &full_path, current_depth + 1, max_depth, limit, entries, truncated).await;
            }
        } else {
            entries.push(rel);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tool::{Tool, ToolCall};

    fn tmp_root() -> PathBuf {
        use std::sync::atomic::{AtomicU32, Ordering};
        static CTR: AtomicU32 = AtomicU32::new(0);
        let n = CTR.fetch_add(1, Ordering::Relaxed);
        let root = std::env::temp_dir().join(format!("poncho_list_dir_{}_{n}", std::process::id()));
        std::fs::create_dir_all(&root).unwrap();
        root
    }

    fn call(args: Value) -> ToolCall {
        ToolCall { id: "l1".into(), name: "list_directory".into(), args }
    }

    #[tokio::test]
    async fn lists_directory_contents() {
        let root = tmp_root();
        std::fs::create_dir_all(root.join("subdir")).unwrap();
        std::fs::write(root.join("file.txt"), "x").unwrap();
        let t = ListDirectoryTool::new(root.clone());
        let out = t.execute(&call(json!({"path": "."}))).await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("subdir/"));
        assert!(out.content.contains("file.txt"));
        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn depth_zero_shows_only_immediate_children() {
        let root = tmp_root();
        std::fs::create_dir_all(root.join("subdir/nested")).unwrap();
        std::fs::write(root.join("top.txt"), "x").unwrap();
        std::fs::write(root.join("subdir/inner.txt"), "x").unwrap();
        let t = ListDirectoryTool::new(root.clone());
        let out = t.execute(&call(json!({"path": ".", "depth": 0}))).await;
        assert!(out.content.contains("top.txt"));
        assert!(out.content.contains("subdir/"));
        assert!(!out.content.contains("inner.txt"));
        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn path_escaping_root_is_rejected() {
        let root = tmp_root();
        let t = ListDirectoryTool::new(root.clone());
        let out = t.execute(&call(json!({"path": "../../etc"}))).await;
        assert!(out.is_error);
        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn nonexistent_dir_is_error() {
        let root = tmp_root();
        let t = ListDirectoryTool::new(root.clone());
        let out = t.execute(&call(json!({"path": "no_such_dir"}))).await;
        assert!(out.is_error);
        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn missing_path_param_is_error() {
        let root = tmp_root();
        let t = ListDirectoryTool::new(root.clone());
        let out = t.execute(&call(json!({}))).await;
        assert!(out.is_error);
        std::fs::remove_dir_all(&root).ok();
    }
}
