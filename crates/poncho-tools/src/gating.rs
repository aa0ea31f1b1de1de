// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Tool-name pattern matching and the manifest/policy approval gate.
//!
//! Two independent lists feed into whether a given tool call is allowed and
//! whether it requires human approval:
//!
//! - The agent manifest's `allowed-tools` / `approval-required` lists,
//!   scoped to a single agent.
//! - The process-wide `tool_policy` allow/deny lists, with optional
//!   `byEnvironment` overrides that substitute the base list wholesale.
//!
//! Both lists share the same pattern grammar: a bare name matches a literal
//! tool (`read_file`), `mcp:<server>/<tool>` or `mcp:<server>/*` matches a
//! namespaced remote tool, and `./<skill>/scripts/<path>` or `./<skill>/*`
//! matches a skill script invoked through `run_skill_script`.

use poncho_config::{AgentManifest, Environment, PolicyConfig};

/// How a tool call is handled before it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalPolicy {
    /// Runs immediately, no human in the loop.
    Auto,
    /// Blocks on an approval decision before running; an unanswered or
    /// denied request synthesizes a tool error instead of executing.
    Ask,
    /// Never runs; always synthesizes a denial.
    Deny,
}

/// The tail of a pattern after its namespace prefix: either an exact literal
/// or the `*` wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Tail {
    Exact(String),
    Wildcard,
}

impl Tail {
    fn matches(&self, candidate: &str) -> bool {
        match self {
            Tail::Exact(s) => s == candidate,
            Tail::Wildcard => true,
        }
    }
}

/// A parsed `allowed-tools` / `approval-required` / policy-list entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolPattern {
    /// `mcp:<server>/<tool>` or `mcp:<server>/*`.
    Remote { server: String, tool: Tail },
    /// `./<skill>/scripts/<path>` or `./<skill>/*`.
    Script { skill: String, path: Tail },
    /// A bare tool name, matched literally against a registered tool's name
    /// (built-in, memory, local-skill, or the namespaced `server/tool` form).
    Plain(String),
}

impl ToolPattern {
    /// Parse a single pattern string. Never fails: an unrecognized shape
    /// falls back to a literal [`ToolPattern::Plain`] match, which simply
    /// never matches anything meaningful rather than rejecting the manifest.
    pub fn parse(raw: &str) -> ToolPattern {
        if let Some(rest) = raw.strip_prefix("mcp:") {
            if let Some((server, tool)) = rest.split_once('/') {
                if !server.is_empty() && !tool.is_empty() && !tool.contains('/') {
                    let tail = if tool == "*" {
                        Tail::Wildcard
                    } else {
                        Tail::Exact(tool.to_string())
                    };
                    return ToolPattern::Remote { server: server.to_string(), tool: tail };
                }
            }
            return ToolPattern::Plain(raw.to_string());
        }

        if let Some(rest) = raw.strip_prefix("./") {
            if let Some(skill) = rest.strip_suffix("/*") {
                if !skill.is_empty() && !skill.contains('/') {
                    return ToolPattern::Script { skill: skill.to_string(), path: Tail::Wildcard };
                }
            }
            if let Some((skill, path)) = rest.split_once("/scripts/") {
                if !skill.is_empty() && !skill.contains('/') && is_safe_relative(path) {
                    return ToolPattern::Script {
                        skill: skill.to_string(),
                        path: Tail::Exact(normalize_path(path)),
                    };
                }
            }
            return ToolPattern::Plain(raw.to_string());
        }

        ToolPattern::Plain(raw.to_string())
    }

    /// Match against a registered tool's name: a bare built-in/memory/skill
    /// name, or the namespaced `<server>/<tool>` form used for remote tools.
    pub fn matches_name(&self, name: &str) -> bool {
        match self {
            ToolPattern::Plain(p) => p == name,
            ToolPattern::Remote { server, tool } => {
                match name.split_once('/') {
                    Some((s, t)) => s == server && tool.matches(t),
                    None => false,
                }
            }
            ToolPattern::Script { .. } => false,
        }
    }

    /// Match a specific skill script invocation (`run_skill_script` args).
    pub fn matches_script(&self, skill: &str, path: &str) -> bool {
        match self {
            ToolPattern::Script { skill: s, path: p } => {
                s == skill && p.matches(&normalize_path(path))
            }
            _ => false,
        }
    }
}

/// Rejects paths that try to escape the skill directory via `..` or an
/// absolute prefix. Mirrors the check `run_skill_script` itself performs
/// before loading a script.
fn is_safe_relative(path: &str) -> bool {
    if path.is_empty() || path.starts_with('/') {
        return false;
    }
    !std::path::Path::new(path)
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
}

fn normalize_path(path: &str) -> String {
    path.trim_start_matches("./").to_string()
}

/// Combines a manifest's `allowed-tools`/`approval-required` lists with the
/// process-wide policy allow/deny lists into a single yes/no/ask gate.
pub struct ToolGate {
    allowed: Vec<ToolPattern>,
    approval: Vec<ToolPattern>,
    policy_allow: Vec<ToolPattern>,
    policy_deny: Vec<ToolPattern>,
}

impl ToolGate {
    pub fn new(manifest: &AgentManifest, policy: &PolicyConfig, env: Environment) -> Self {
        let (policy_allow, policy_deny) = policy.effective(env);
        Self {
            allowed: manifest.allowed_tools.iter().map(|s| ToolPattern::parse(s)).collect(),
            approval: manifest.approval_required.iter().map(|s| ToolPattern::parse(s)).collect(),
            policy_allow: policy_allow.iter().map(|s| ToolPattern::parse(s)).collect(),
            policy_deny: policy_deny.iter().map(|s| ToolPattern::parse(s)).collect(),
        }
    }

    /// A gate that allows everything and requires no approvals — used when no
    /// manifest/policy is configured (e.g. library embedders that manage
    /// gating themselves).
    pub fn permissive() -> Self {
        Self { allowed: Vec::new(), approval: Vec::new(), policy_allow: Vec::new(), policy_deny: Vec::new() }
    }

    /// Whether a registered tool (by name) is visible to the model at all.
    pub fn is_tool_allowed(&self, name: &str) -> bool {
        let manifest_ok = self.allowed.is_empty() || self.allowed.iter().any(|p| p.matches_name(name));
        if !manifest_ok {
            return false;
        }
        let policy_allow_ok =
            self.policy_allow.is_empty() || self.policy_allow.iter().any(|p| p.matches_name(name));
        if !policy_allow_ok {
            return false;
        }
        !self.policy_deny.iter().any(|p| p.matches_name(name))
    }

    /// Whether a registered tool's own default policy is overridden to
    /// require approval by the manifest's `approval-required` list.
    pub fn requires_approval(&self, name: &str) -> bool {
        self.approval.iter().any(|p| p.matches_name(name))
    }

    /// Whether a specific skill script (invoked through `run_skill_script`)
    /// is allowed to run at all.
    pub fn is_script_allowed(&self, skill: &str, path: &str) -> bool {
        let script_allow_patterns: Vec<&ToolPattern> =
            self.allowed.iter().filter(|p| matches!(p, ToolPattern::Script { .. })).collect();
        script_allow_patterns.is_empty()
            || script_allow_patterns.iter().any(|p| p.matches_script(skill, path))
    }

    /// Whether a specific skill script requires approval.
    pub fn script_requires_approval(&self, skill: &str, path: &str) -> bool {
        self.approval.iter().any(|p| p.matches_script(skill, path))
    }

    /// Resolve the effective policy for a tool call, combining the tool's own
    /// default with manifest/policy overrides. Deny always wins; an explicit
    /// approval requirement upgrades `Auto` to `Ask`.
    pub fn effective_policy(&self, name: &str, default: ApprovalPolicy) -> ApprovalPolicy {
        if !self.is_tool_allowed(name) {
            return ApprovalPolicy::Deny;
        }
        if self.requires_approval(name) {
            return ApprovalPolicy::Ask;
        }
        default
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
