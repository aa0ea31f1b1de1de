// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_max_steps() -> u32 {
    10
}

fn default_approval_timeout_secs() -> u64 {
    300
}

fn default_remote_timeout_secs() -> u64 {
    10
}

fn default_auth_token_env() -> String {
    "PONCHO_AUTH_TOKEN".to_string()
}

fn default_bind_addr() -> String {
    "127.0.0.1:4170".to_string()
}

/// The typed shape of an `AGENT.md` header. Parsing the on-disk
/// YAML-header-plus-Mustache-body container is an external collaborator's
/// job; this struct is what that collaborator is expected to hand the core
/// once the header has been extracted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentManifest {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub model: ModelSelection,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default, rename = "allowed-tools")]
    pub allowed_tools: Vec<String>,
    #[serde(default, rename = "approval-required")]
    pub approval_required: Vec<String>,
    #[serde(default)]
    pub cron: HashMap<String, CronJob>,
}

impl AgentManifest {
    /// Validate the rule that every non-`./`-prefixed approval entry must
    /// also appear in allowed-tools.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("agent manifest: name must not be empty");
        }
        for pattern in &self.approval_required {
            let is_script_pattern = pattern.starts_with("./");
            if !is_script_pattern && !self.allowed_tools.iter().any(|a| a == pattern) {
                anyhow::bail!(
                    "agent manifest: approval-required pattern {pattern:?} must also appear in allowed-tools"
                );
            }
        }
        Ok(())
    }

    /// Stable identity used to derive the on-disk storage directory.
    pub fn identity(&self) -> AgentIdentity {
        AgentIdentity {
            name: self.name.clone(),
            id: self.id.clone().unwrap_or_else(|| slug(&self.name)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelSelection {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default, rename = "maxTokens")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default = "default_max_steps", rename = "maxSteps")]
    pub max_steps: u32,
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    pub schedule: String,
    pub task: String,
    #[serde(default)]
    pub timezone: Option<String>,
}

/// Stable `{name, id}` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub name: String,
    pub id: String,
}

impl AgentIdentity {
    /// `<slug(name)>--<slug(id)>`, the per-agent storage directory name.
    pub fn storage_dir_name(&self) -> String {
        format!("{}--{}", slug(&self.name), slug(&self.id))
    }
}

/// Lowercase, hyphen-joined slug: non-alphanumerics collapse to a single `-`.
pub fn slug(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_sep = true; // suppress a leading separator
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('-');
            last_was_sep = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        out.push_str("agent");
    }
    out
}

/// Deployment environment, used for `byEnvironment.*` policy overrides
/// and for `write_file`'s production-disabled-by-default rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Development
    }
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

/// Pluggable store backend selection. Only `memory` and `local` ship
/// a concrete implementation; the others name the contract for an external
/// collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreBackend {
    Memory,
    Local,
    Redis,
    UpstashRest,
    Dynamodb,
}

impl Default for StoreBackend {
    fn default() -> Self {
        StoreBackend::Local
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Overrides the derived store root; mainly for tests.
    #[serde(default)]
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_auth_token_env")]
    pub token_env: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_env: default_auth_token_env(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

/// Connection details for a remote tool server (C3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteServerConfig {
    pub url: String,
    /// Name of the env var holding the bearer token. A missing env var marks
    /// the server unavailable; no discovery is attempted against it.
    #[serde(default)]
    pub bearer_env: Option<String>,
    #[serde(default = "default_remote_timeout_secs")]
    pub timeout_secs: u64,
}

/// Tool allow/deny policy, generalized over the base list plus
/// per-environment overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
    #[serde(default, rename = "byEnvironment")]
    pub by_environment: HashMap<Environment, PolicyOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyOverride {
    #[serde(default)]
    pub allow: Option<Vec<String>>,
    #[serde(default)]
    pub deny: Option<Vec<String>>,
}

impl PolicyConfig {
    /// The effective (allow, deny) pair for `env`, applying the environment
    /// override when present (entire allow/deny list substitution, not a merge).
    pub fn effective(&self, env: Environment) -> (&[String], &[String]) {
        if let Some(over) = self.by_environment.get(&env) {
            (
                over.allow.as_deref().unwrap_or(&self.allow),
                over.deny.as_deref().unwrap_or(&self.deny),
            )
        } else {
            (&self.allow, &self.deny)
        }
    }
}

/// Approval timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    #[serde(default = "default_approval_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_approval_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemToolsConfig {
    /// Working-directory root all filesystem tools are constrained to.
    pub working_dir: PathBuf,
    /// `write_file` is disabled in production unless explicitly re-enabled.
    #[serde(default = "default_true")]
    pub write_enabled_outside_production: bool,
    #[serde(default)]
    pub write_enabled_in_production: bool,
}

impl Default for FilesystemToolsConfig {
    fn default() -> Self {
        Self {
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            write_enabled_outside_production: true,
            write_enabled_in_production: false,
        }
    }
}

/// Skill directory search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillsConfig {
    #[serde(default = "default_skill_dirs")]
    pub directories: Vec<PathBuf>,
}

fn default_skill_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("skills")]
}

impl Default for SkillsConfig {
    fn default() -> Self {
        Self {
            directories: default_skill_dirs(),
        }
    }
}

/// Top-level process configuration, assembled by the loader from env vars,
/// an optional on-disk YAML file, and defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub fs: FilesystemToolsConfig,
    #[serde(default)]
    pub skills: SkillsConfig,
    #[serde(default)]
    pub tool_policy: PolicyConfig,
    #[serde(default)]
    pub remote_servers: HashMap<String, RemoteServerConfig>,
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_lowercases_and_collapses_separators() {
        assert_eq!(slug("My Agent!!"), "my-agent");
        assert_eq!(slug("already-slug"), "already-slug");
        assert_eq!(slug(""), "agent");
    }

    #[test]
    fn storage_dir_name_joins_name_and_id_slugs() {
        let id = AgentIdentity {
            name: "Hello World".to_string(),
            id: "abc-123".to_string(),
        };
        assert_eq!(id.storage_dir_name(), "hello-world--abc-123");
    }

    #[test]
    fn manifest_validate_rejects_empty_name() {
        let m = AgentManifest {
            name: "  ".to_string(),
            id: None,
            description: None,
            model: ModelSelection::default(),
            limits: Limits::default(),
            allowed_tools: vec![],
            approval_required: vec![],
            cron: HashMap::new(),
        };
        assert!(m.validate().is_err());
    }

    #[test]
    fn manifest_validate_requires_approval_patterns_to_be_allowed() {
        let mut m = AgentManifest {
            name: "agent".to_string(),
            id: None,
            description: None,
            model: ModelSelection::default(),
            limits: Limits::default(),
            allowed_tools: vec!["mcp:remote/tool".to_string()],
            approval_required: vec!["mcp:remote/other".to_string()],
            cron: HashMap::new(),
        };
        assert!(m.validate().is_err());
        m.approval_required = vec!["mcp:remote/tool".to_string()];
        assert!(m.validate().is_ok());
        m.approval_required = vec!["./skill/scripts/run.js".to_string()];
        assert!(m.validate().is_ok());
    }

    #[test]
    fn policy_config_effective_falls_back_without_override() {
        let cfg = PolicyConfig {
            allow: vec!["read_file".to_string()],
            deny: vec![],
            by_environment: HashMap::new(),
        };
        let (allow, deny) = cfg.effective(Environment::Production);
        assert_eq!(allow, &["read_file".to_string()]);
        assert!(deny.is_empty());
    }

    #[test]
    fn policy_config_effective_applies_environment_override() {
        let mut by_env = HashMap::new();
        by_env.insert(
            Environment::Production,
            PolicyOverride {
                allow: Some(vec!["read_file".to_string()]),
                deny: None,
            },
        );
        let cfg = PolicyConfig {
            allow: vec!["read_file".to_string(), "write_file".to_string()],
            deny: vec![],
            by_environment: by_env,
        };
        let (allow, _) = cfg.effective(Environment::Production);
        assert_eq!(allow, &["read_file".to_string()]);
        let (allow_dev, _) = cfg.effective(Environment::Development);
        assert_eq!(allow_dev.len(), 2);
    }

    #[test]
    fn config_default_uses_local_backend() {
        let cfg = Config::default();
        assert_eq!(cfg.store.backend, StoreBackend::Local);
        assert_eq!(cfg.auth.token_env, "PONCHO_AUTH_TOKEN");
    }
}
