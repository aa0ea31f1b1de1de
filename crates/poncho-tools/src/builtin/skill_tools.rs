// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The four progressive-disclosure skill tools: `activate_skill`,
//! `read_skill_resource`, `list_skill_scripts`, `run_skill_script`.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::builtin::path_guard::resolve_within;
use crate::gating::ApprovalPolicy;
use crate::skills::{read_skill_body, SkillCatalog};
use crate::tool::{Tool, ToolCall, ToolOutput};

static SCRIPT_EXTENSIONS: &[&str] = &["js", "mjs", "cjs", "ts", "mts", "cts"];

fn missing_skill_error(call_id: &str, skill: &str) -> ToolOutput {
    ToolOutput::err(call_id, format!("unknown skill: {skill}"))
}

/// `activate_skill(name)`: returns the full body of the named `SKILL.md`.
pub struct ActivateSkillTool {
    catalog: Arc<SkillCatalog>,
}

impl ActivateSkillTool {
    pub fn new(catalog: Arc<SkillCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Tool for ActivateSkillTool {
    fn name(&self) -> &str {
        "activate_skill"
    }

    fn description(&self) -> &str {
        "Activates a skill by name, returning its full instructions. Call this before \
         using any skill-specific resource or script."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Skill name, as advertised in the system prompt" }
            },
            "required": ["name"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let name = match call.args.get("name").and_then(|v| v.as_str()) {
            Some(n) => n,
            None => return ToolOutput::err(&call.id, "missing required parameter 'name'"),
        };
        let skill = match self.catalog.get(name) {
            Some(s) => s,
            None => return missing_skill_error(&call.id, name),
        };
        match read_skill_body(skill) {
            Ok(body) => ToolOutput::ok(&call.id, body),
            Err(e) => ToolOutput::err(&call.id, format!("failed to read skill body: {e}")),
        }
    }
}

/// `read_skill_resource(skill, path)`: contents of a path inside the skill
/// directory, strictly contained within that directory's root.
pub struct ReadSkillResourceTool {
    catalog: Arc<SkillCatalog>,
}

impl ReadSkillResourceTool {
    pub fn new(catalog: Arc<SkillCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Tool for ReadSkillResourceTool {
    fn name(&self) -> &str {
        "read_skill_resource"
    }

    fn description(&self) -> &str {
        "Reads a file bundled with an activated skill, given a path relative to the \
         skill's own directory."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "skill": { "type": "string" },
                "path": { "type": "string", "description": "Path relative to the skill directory" }
            },
            "required": ["skill", "path"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let skill_name = match call.args.get("skill").and_then(|v| v.as_str()) {
            Some(s) => s,
            None => return ToolOutput::err(&call.id, "missing required parameter 'skill'"),
        };
        let path = match call.args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolOutput::err(&call.id, "missing required parameter 'path'"),
        };
        let skill = match self.catalog.get(skill_name) {
            Some(s) => s,
            None => return missing_skill_error(&call.id, skill_name),
        };

        let resolved = match resolve_within(&skill.dir, path) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        match tokio::fs::read_to_string(&resolved).await {
            Ok(contents) => ToolOutput::ok(&call.id, contents),
            Err(e) => ToolOutput::err(&call.id, format!("read error: {e}")),
        }
    }
}

/// `list_skill_scripts(skill)`: relative paths under `scripts/` with a
/// recognized script extension.
pub struct ListSkillScriptsTool {
    catalog: Arc<SkillCatalog>,
}

impl ListSkillScriptsTool {
    pub fn new(catalog: Arc<SkillCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Tool for ListSkillScriptsTool {
    fn name(&self) -> &str {
        "list_skill_scripts"
    }

    fn description(&self) -> &str {
        "Lists the runnable scripts bundled with an activated skill's scripts/ directory."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "skill": { "type": "string" } },
            "required": ["skill"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let skill_name = match call.args.get("skill").and_then(|v| v.as_str()) {
            Some(s) => s,
            None => return ToolOutput::err(&call.id, "missing required parameter 'skill'"),
        };
        let skill = match self.catalog.get(skill_name) {
            Some(s) => s,
            None => return missing_skill_error(&call.id, skill_name),
        };

        let scripts_dir = skill.scripts_dir();
        let mut scripts = Vec::new();
        collect_scripts(&scripts_dir, &scripts_dir, &mut scripts).await;
        scripts.sort();

        if scripts.is_empty() {
            ToolOutput::ok(&call.id, "(no scripts)")
        } else {
            ToolOutput::ok(&call.id, scripts.join("\n"))
        }
    }
}

#[async_recursion::async_recursion]
async fn collect_scripts(base: &std::path::Path, dir: &std::path::Path, out: &mut Vec<String>) {
    let Ok(mut rd) = tokio::fs::read_dir(dir).await else { return };
    while let Ok(Some(entry)) = rd.next_entry().await {
        let path = entry.path();
        if path.is_dir() {
            collect_scripts(base, &path, out).await;
            continue;
        }
        let ext_matches = path.extension().and_then(|e| e.to_str()).map(|e| SCRIPT_EXTENSIONS.contains(&e)).unwrap_or(false);
        if ext_matches {
            let rel = path.strip_prefix(base).unwrap_or(&path).to_string_lossy().into_owned();
            out.push(rel);
        }
    }
}

/// `run_skill_script(skill, script, input)`: shells out to a node-compatible
/// runtime, passing `(input, context)` as JSON on stdin and treating stdout
/// as the JSON return value.
pub struct RunSkillScriptTool {
    catalog: Arc<SkillCatalog>,
    runtime: String,
}

impl RunSkillScriptTool {
    pub fn new(catalog: Arc<SkillCatalog>) -> Self {
        Self { catalog, runtime: "node".to_string() }
    }

    /// Overrides the external runtime binary (defaults to `node`); used in
    /// tests to point at a stub interpreter.
    pub fn with_runtime(catalog: Arc<SkillCatalog>, runtime: impl Into<String>) -> Self {
        Self { catalog, runtime: runtime.into() }
    }
}

#[async_trait]
impl Tool for RunSkillScriptTool {
    fn name(&self) -> &str {
        "run_skill_script"
    }

    fn description(&self) -> &str {
        "Runs a script bundled with an activated skill's scripts/ directory, passing \
         input as JSON and returning its JSON output."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "skill": { "type": "string" },
                "script": { "type": "string", "description": "Path relative to the skill's scripts/ directory" },
                "input": { "description": "Arbitrary JSON value passed to the script" }
            },
            "required": ["skill", "script"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let skill_name = match call.args.get("skill").and_then(|v| v.as_str()) {
            Some(s) => s,
            None => return ToolOutput::err(&call.id, "missing required parameter 'skill'"),
        };
        let script = match call.args.get("script").and_then(|v| v.as_str()) {
            Some(s) => s,
            None => return ToolOutput::err(&call.id, "missing required parameter 'script'"),
        };
        let input = call.args.get("input").cloned().unwrap_or(Value::Null);

        let skill = match self.catalog.get(skill_name) {
            Some(s) => s,
            None => return missing_skill_error(&call.id, skill_name),
        };

        let scripts_dir = skill.scripts_dir();
        let resolved = match resolve_within(&scripts_dir, script) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        if !resolved.is_file() {
            return ToolOutput::err(&call.id, format!("no such script: {script}"));
        }

        let context = json!({
            "skill": skill.name,
            "skillDir": skill.dir,
            "scriptPath": resolved,
        });
        let payload = json!([input, context]).to_string();

        debug!(skill = skill.name, script, runtime = self.runtime, "run_skill_script tool");

        let mut child = match Command::new(&self.runtime)
            .arg(&resolved)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(&call.id, format!("failed to launch {}: {e}", self.runtime)),
        };

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                return ToolOutput::err(&call.id, format!("failed to write script input: {e}"));
            }
        }

        let output = match child.wait_with_output().await {
            Ok(o) => o,
            Err(e) => return ToolOutput::err(&call.id, format!("script execution failed: {e}")),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return ToolOutput::err(&call.id, format!("script exited with {}: {stderr}", output.status));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        match serde_json::from_str::<Value>(&stdout) {
            Ok(v) => ToolOutput::ok(&call.id, v.to_string()),
            Err(_) => ToolOutput::ok(&call.id, stdout),
        }
    }
}
