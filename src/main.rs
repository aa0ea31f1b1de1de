// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use poncho_config::{AgentManifest, Config, StoreBackend};
use poncho_core::{ApprovalArbiter, Orchestrator, RunConfig, RunOutcome, Session};
use poncho_model::{Message, ModelProvider};
use poncho_server::{AppState, AuthState, Broker, CronRunResult, CronTaskRunner, StoredToken};
use poncho_store::{
    ConversationStore, LocalConversationStore, LocalRunStore, MemoryConversationStore,
    MemoryRunStore, RunStore,
};
use poncho_tools::{
    ActivateSkillTool, ListDirectoryTool, ListSkillScriptsTool, ReadFileTool,
    ReadSkillResourceTool, RunSkillScriptTool, SkillCatalog, ToolGate, ToolRegistry, ToolSource,
    WriteFileTool,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging();

    match cli.command {
        Some(Commands::ShowConfig) => {
            let config = poncho_config::load(cli.config.as_deref())?;
            println!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
        Some(Commands::Serve { manifest, bind, store_backend, store_root }) => {
            let config = resolve_config(cli.config.as_deref(), bind, store_backend, store_root)?;
            serve(config, manifest.as_deref()).await
        }
        None => {
            let config = resolve_config(cli.config.as_deref(), None, None, None)?;
            serve(config, None).await
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry().with(filter).with(fmt::layer().with_target(true)).init();
}

/// Merge the layered config files with the CLI/env overrides
/// (flag > env > file > default; clap resolves flag-vs-env itself).
fn resolve_config(
    config_path: Option<&Path>,
    bind: Option<String>,
    store_backend: Option<String>,
    store_root: Option<PathBuf>,
) -> anyhow::Result<Config> {
    let mut config = poncho_config::load(config_path)?;
    if let Some(bind) = bind {
        config.server.bind_addr = bind;
    }
    if let Some(backend) = store_backend {
        config.store.backend = match backend.as_str() {
            "memory" => StoreBackend::Memory,
            "local" => StoreBackend::Local,
            other => anyhow::bail!("unsupported store backend override {other:?} (memory | local)"),
        };
    }
    if let Some(root) = store_root {
        config.store.root = Some(root);
    }
    Ok(config)
}

async fn serve(config: Config, manifest_path: Option<&Path>) -> anyhow::Result<()> {
    let (manifest, body) = match manifest_path {
        Some(path) => load_manifest(path)?,
        None => (default_manifest(), String::new()),
    };
    manifest.validate().context("validating agent manifest")?;
    let identity = manifest.identity();

    let skills = Arc::new(SkillCatalog::new(&config.skills.directories));
    let system_prompt = assemble_system_prompt(&manifest, &body, &config, &skills);

    let provider: Arc<dyn ModelProvider> =
        Arc::from(poncho_model::build_provider(&manifest.model).context("building model provider")?);

    let mut registry = ToolRegistry::new();
    register_builtin_tools(&mut registry, &config, &skills);

    let discovered = poncho_mcp::discover_all(&config.remote_servers).await;
    let mut remote_clients = Vec::new();
    for (name, server) in &discovered {
        tracing::info!(server = %name, tools = server.tools.len(), "remote tool server connected");
        for tool in &server.tools {
            registry.register_arc(tool.clone(), ToolSource::Remote);
        }
        remote_clients.push(server.client.clone());
    }

    let gate = ToolGate::new(&manifest, &config.tool_policy, config.environment);
    let run_config = RunConfig {
        max_steps: manifest.limits.max_steps,
        approval_timeout: Some(std::time::Duration::from_secs(config.approval.timeout_secs)),
        context_window_tokens: provider.context_window().map(|n| n as usize).unwrap_or(128_000),
        temperature: manifest.model.temperature,
        max_output_tokens: manifest.model.max_tokens,
        ..RunConfig::default()
    };
    let orchestrator =
        Arc::new(Orchestrator::new(provider, Arc::new(registry), gate, run_config.clone()));

    let (conversations, runs) = build_stores(&config, &identity)?;
    let approvals = Arc::new(ApprovalArbiter::without_decision_fn());
    let broker = Arc::new(Broker::new());

    let api_token = std::env::var(&config.auth.token_env).ok().map(|t| StoredToken::from_plaintext(&t));
    if api_token.is_none() {
        tracing::warn!(
            env_var = %config.auth.token_env,
            "no API token configured; bearer authentication is disabled"
        );
    }
    let login_passphrase =
        std::env::var("PONCHO_LOGIN_PASSPHRASE").ok().map(|p| StoredToken::from_plaintext(&p));
    let auth = AuthState::new(api_token, login_passphrase);

    let cron_runner: Arc<dyn CronTaskRunner> = Arc::new(ManifestCronRunner {
        manifest: manifest.clone(),
        orchestrator: orchestrator.clone(),
        conversations: conversations.clone(),
        approvals: approvals.clone(),
        run_config: run_config.clone(),
        system_prompt: system_prompt.clone(),
    });

    let state = Arc::new(AppState {
        manifest,
        system_prompt,
        orchestrator,
        run_config,
        conversations,
        runs,
        broker,
        auth,
        approvals,
        uploads: None,
        cron: Some(cron_runner),
    });

    let addr = config
        .server
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address {:?}", config.server.bind_addr))?;

    tokio::select! {
        result = poncho_server::serve(addr, state) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            for client in &remote_clients {
                client.shutdown().await;
            }
            Ok(())
        }
    }
}

fn build_stores(
    config: &Config,
    identity: &poncho_config::AgentIdentity,
) -> anyhow::Result<(Arc<dyn ConversationStore>, Arc<dyn RunStore>)> {
    match config.store.backend {
        StoreBackend::Memory => {
            Ok((Arc::new(MemoryConversationStore::new()), Arc::new(MemoryRunStore::new())))
        }
        StoreBackend::Local => {
            let root = poncho_config::store_root(config.store.root.as_deref());
            let agent_dir = poncho_config::agent_store_dir(&root, identity);
            let conversations = LocalConversationStore::new(agent_dir.join("conversations"))
                .context("opening conversation store")?;
            let runs = LocalRunStore::new(agent_dir.join("runs"), chrono::Duration::hours(24))
                .context("opening run-state store")?;
            Ok((Arc::new(conversations), Arc::new(runs)))
        }
        other => anyhow::bail!(
            "store backend {other:?} has no bundled implementation; wire one in via the library API"
        ),
    }
}

fn register_builtin_tools(registry: &mut ToolRegistry, config: &Config, skills: &Arc<SkillCatalog>) {
    let working_dir = config.fs.working_dir.clone();
    registry.register(ListDirectoryTool::new(working_dir.clone()), ToolSource::BuiltIn);
    registry.register(ReadFileTool::new(working_dir.clone()), ToolSource::BuiltIn);
    let write_enabled = poncho_tools::write_enabled(&config.fs, config.environment);
    registry.register(WriteFileTool::new(working_dir, write_enabled), ToolSource::BuiltIn);

    registry.register(ActivateSkillTool::new(skills.clone()), ToolSource::Skill);
    registry.register(ReadSkillResourceTool::new(skills.clone()), ToolSource::Skill);
    registry.register(ListSkillScriptsTool::new(skills.clone()), ToolSource::Skill);
    registry.register(RunSkillScriptTool::new(skills.clone()), ToolSource::Skill);
}

/// Split an `AGENT.md`-style file into its YAML header and body. The body is
/// a prompt template; only the small placeholder set below is substituted.
fn load_manifest(path: &Path) -> anyhow::Result<(AgentManifest, String)> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading manifest {}", path.display()))?;
    let (header, body) = split_frontmatter(&text)
        .with_context(|| format!("manifest {} has no YAML frontmatter header", path.display()))?;
    let manifest: AgentManifest = serde_yaml::from_str(header)
        .with_context(|| format!("parsing manifest header in {}", path.display()))?;
    Ok((manifest, body.to_string()))
}

fn split_frontmatter(text: &str) -> Option<(&str, &str)> {
    let rest = text.strip_prefix("---")?;
    let rest = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n"))?;
    let end = rest.find("\n---")?;
    let header = &rest[..end];
    let after = &rest[end + 4..];
    let body = after.strip_prefix('\n').or_else(|| after.strip_prefix("\r\n")).unwrap_or(after);
    Some((header, body))
}

fn default_manifest() -> AgentManifest {
    AgentManifest {
        name: "poncho".to_string(),
        id: None,
        description: Some("general-purpose agent".to_string()),
        model: Default::default(),
        limits: Default::default(),
        allowed_tools: Vec::new(),
        approval_required: Vec::new(),
        cron: Default::default(),
    }
}

fn assemble_system_prompt(
    manifest: &AgentManifest,
    body: &str,
    config: &Config,
    skills: &SkillCatalog,
) -> String {
    let rendered = if body.trim().is_empty() {
        format!("You are {}, an agent that completes tasks using the available tools.", manifest.name)
    } else {
        body.replace("{{name}}", &manifest.name)
            .replace("{{description}}", manifest.description.as_deref().unwrap_or_default())
            .replace("{{runtime.environment}}", config.environment.as_str())
            .replace("{{runtime.workingDir}}", &config.fs.working_dir.display().to_string())
    };

    let skill_block = skills.prompt_block();
    if skill_block.is_empty() {
        rendered
    } else {
        format!("{rendered}\n\n{skill_block}")
    }
}

/// Runs a manifest-declared cron task as one synchronous agent run. The
/// scheduler that decides *when* to fire lives outside the process; this
/// runner only resolves the job name and drives the conversation.
struct ManifestCronRunner {
    manifest: AgentManifest,
    orchestrator: Arc<Orchestrator>,
    conversations: Arc<dyn ConversationStore>,
    approvals: Arc<ApprovalArbiter>,
    run_config: RunConfig,
    system_prompt: String,
}

#[async_trait::async_trait]
impl CronTaskRunner for ManifestCronRunner {
    async fn run(
        &self,
        job_name: &str,
        continue_conversation_id: Option<String>,
    ) -> anyhow::Result<CronRunResult> {
        let job = self
            .manifest
            .cron
            .get(job_name)
            .with_context(|| format!("no cron job named {job_name:?} in the agent manifest"))?;

        let mut conversation = match &continue_conversation_id {
            Some(id) => self.conversations.get(id).await?,
            None => self.conversations.create("cron", Some(format!("cron: {job_name}"))).await?,
        };
        conversation.messages.push(Message::user(job.task.clone()));

        let mut session = Session::new(self.run_config.context_window_tokens);
        session.replace_messages(conversation.messages.clone());

        // Cron runs have no SSE subscriber; events are drained, keeping only
        // the step count for the response envelope.
        let (tx, mut rx) = tokio::sync::mpsc::channel(256);
        let drain = tokio::spawn(async move {
            let mut steps: u32 = 0;
            while let Some(event) = rx.recv().await {
                if matches!(event, poncho_core::RunEvent::StepCompleted { .. }) {
                    steps += 1;
                }
            }
            steps
        });
        let (_cancel_tx, cancel_rx) = tokio::sync::oneshot::channel();

        let run_id = uuid::Uuid::new_v4().to_string();
        let outcome = self
            .orchestrator
            .run(run_id, &mut session, &self.system_prompt, tx, self.approvals.clone(), cancel_rx)
            .await;
        let steps = drain.await.unwrap_or(0);
        match outcome {
            RunOutcome::Completed { text, continuation, .. } => {
                conversation.messages = session.messages;
                conversation.updated_at = chrono::Utc::now();
                let conversation_id = conversation.id.clone();
                self.conversations.update(conversation).await?;
                Ok(CronRunResult {
                    conversation_id,
                    response: text,
                    steps,
                    status: "completed".to_string(),
                    continuation: continuation.then_some(true),
                })
            }
            RunOutcome::Cancelled => Ok(CronRunResult {
                conversation_id: conversation.id,
                response: String::new(),
                steps,
                status: "cancelled".to_string(),
                continuation: None,
            }),
            RunOutcome::Error { code, message } => {
                anyhow::bail!("cron run failed ({code}): {message}")
            }
        }
    }
}
