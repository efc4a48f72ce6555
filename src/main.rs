//! VClient 命令行入口
//!
//! - `vclient run --profile <file>`：执行 Profile（同时在后台托管本机协调 API，供对端轮询）
//! - `vclient serve`：只运行协调 API

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use vclient::components::ComponentRegistry;
use vclient::config::{load_config, AppConfig};
use vclient::coordination::server;
use vclient::core::{RunContextBuilder, ShutdownManager};
use vclient::orchestrator::{ActionFailurePolicy, Orchestrator, RunOptions};
use vclient::profile::{load_profile, split_list, Parameters, ProfileTiming, RoleLayout};
use vclient::state::{FileStateStore, StateStore};

/// VClient - multi-role benchmark orchestration
#[derive(Parser)]
#[command(name = "vclient")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to config/default.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a profile
    Run {
        /// Profile document (JSON)
        #[arg(long)]
        profile: PathBuf,
        /// Role layout document (JSON); omit for a single-machine run
        #[arg(long)]
        layout: Option<PathBuf>,
        /// Name of this agent in the layout (defaults to [agent].name / host name)
        #[arg(long)]
        agent_name: Option<String>,
        /// Role override (defaults to the layout role of this agent)
        #[arg(long)]
        role: Option<String>,
        /// once | forever | iterations=N | duration=<span>[,deterministic[*]]
        #[arg(long, default_value = "once")]
        timing: String,
        /// Scenario filter, e.g. "read,write" or "-setup"
        #[arg(long)]
        scenarios: Option<String>,
        /// Stop after the dependency phase
        #[arg(long)]
        dependencies_only: bool,
        /// Abort the run on the first action failure
        #[arg(long)]
        fail_fast: bool,
        /// Profile parameter override, key=value (repeatable)
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Host the coordination API only
    Serve {
        /// Listen port (defaults to [api].port)
        #[arg(long)]
        port: Option<u16>,
    },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("'{raw}' is not in key=value form"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("'{raw}' has an empty key"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

fn api_addr(config: &AppConfig, port: Option<u16>) -> anyhow::Result<SocketAddr> {
    let raw = format!("{}:{}", config.api.bind_addr, port.unwrap_or(config.api.port));
    raw.parse()
        .with_context(|| format!("invalid coordination API address '{raw}'"))
}

async fn api_store(config: &AppConfig) -> anyhow::Result<Arc<dyn StateStore>> {
    let store = FileStateStore::open(config.agent.state_dir.join("api"))
        .await
        .context("Failed to open coordination state directory")?;
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.clone()).unwrap_or_else(|e| {
        eprintln!("Config load failed ({e}), using defaults");
        AppConfig::default()
    });
    vclient::observability::init(&config.logging);

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    match cli.command {
        Commands::Serve { port } => {
            let addr = api_addr(&config, port)?;
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind {addr}"))?;
            server::serve(listener, api_store(&config).await?, shutdown.token())
                .await
                .context("Coordination API failed")?;
        }
        Commands::Run {
            profile,
            layout,
            agent_name,
            role,
            timing,
            scenarios,
            dependencies_only,
            fail_fast,
            params,
        } => {
            let overrides: Parameters = params
                .into_iter()
                .fold(Parameters::new(), |p, (k, v)| p.with(&k, v));
            let profile = load_profile(&profile, &overrides)
                .await
                .context("Failed to load profile")?;
            let timing: ProfileTiming = timing.parse().context("Invalid --timing")?;

            let mut config = config;
            if agent_name.is_some() {
                config.agent.name = agent_name;
            }
            let mut options = RunOptions::from_config(&config.execution)
                .with_scenarios(scenarios.as_deref().map(split_list).unwrap_or_default());
            if fail_fast {
                options = options.with_failure_policy(ActionFailurePolicy::FailFast);
            }

            let api_ct = shutdown.token().child_token();
            let (bound, api_task) = server::spawn(
                api_addr(&config, None)?,
                api_store(&config).await?,
                api_ct.clone(),
            )
            .await
            .context("Failed to start coordination API")?;
            tracing::debug!(addr = %bound, "local coordination API started");

            let mut builder = RunContextBuilder::new(config.clone());
            if let Some(path) = layout {
                let layout = RoleLayout::load(&path, &config.agent.resolved_name())
                    .await
                    .with_context(|| format!("Failed to load layout '{}'", path.display()))?;
                builder = builder.with_layout(layout);
            }
            if let Some(role) = &role {
                builder = builder.with_role(role.clone());
            }
            let ctx = builder.build().await.context("Failed to build run context")?;

            let outcome = Orchestrator::new(ctx, ComponentRegistry::with_builtins(), options)
                .run(&profile, role.as_deref(), timing, dependencies_only, &shutdown.token())
                .await;

            api_ct.cancel();
            if let Err(e) = api_task.await {
                tracing::warn!("coordination API task ended abnormally: {}", e);
            }

            let result = outcome.context("Run aborted")?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if result.cancelled {
                let reason = shutdown
                    .reason()
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "cancelled".to_string());
                anyhow::bail!("run stopped early: {reason}");
            }
            if !result.succeeded() {
                anyhow::bail!("run finished with {} failure(s)", result.failures.len());
            }
        }
    }

    Ok(())
}
