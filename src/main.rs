#![allow(missing_docs)]

//! Vigil runtime binary.
//!
//! Thin wiring only: builds the tool registry, clients, and observer,
//! then feeds observations into the pipeline. The chat gateway is an
//! external collaborator; `run` reads line-delimited observation JSON
//! from stdin and prints outbound messages to stdout.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use vigil::config::Config;
use vigil::llm::HttpLlmProvider;
use vigil::memory::{MemoryApi, MemoryClient};
use vigil::metrics::{MetricsSink, TracingMetrics};
use vigil::pipeline::executor::Executor;
use vigil::pipeline::intent::IntentEngine;
use vigil::pipeline::planner::Planner;
use vigil::pipeline::reflector::Reflector;
use vigil::pipeline::retriever::Retriever;
use vigil::pipeline::Observer;
use vigil::skills::SkillGraph;
use vigil::tools::builtin::{
    register_builtins, BuiltinDeps, GuildInfo, OutboundMessage, ReminderRequest,
};
use vigil::tools::{ToolError, ToolRegistry};
use vigil::types::Observation;

/// Channel buffer for outbound messages and reminders.
const CHANNEL_BUFFER_SIZE: usize = 100;

/// Interval between skill decay sweeps while running.
const DECAY_INTERVAL_SECS: u64 = 6 * 60 * 60;

#[derive(Parser)]
#[command(name = "vigil", about = "Autonomous agent runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process observations from stdin (one JSON object per line).
    Run {
        /// Directory for rotated JSON logs.
        #[arg(long, default_value = "logs")]
        logs_dir: PathBuf,
    },
    /// Run one skill decay sweep and exit.
    Decay,
}

/// The binary has no gateway attached; guild introspection is refused.
struct NoGateway;

#[async_trait::async_trait]
impl GuildInfo for NoGateway {
    async fn member_count(&self, _guild_id: &str) -> Result<u64, ToolError> {
        Err(ToolError::ExecutionFailed(
            "guild gateway not connected".to_owned(),
        ))
    }

    async fn moderation_stats(
        &self,
        _guild_id: &str,
        _window_hours: u64,
    ) -> Result<serde_json::Value, ToolError> {
        Err(ToolError::ExecutionFailed(
            "guild gateway not connected".to_owned(),
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Run { logs_dir } => {
            let _guard = vigil::logging::init_production(&logs_dir)?;
            run().await
        }
        Command::Decay => {
            vigil::logging::init_cli();
            decay().await
        }
    }
}

async fn run() -> Result<()> {
    let config = Config::load().context("failed to load configuration")?;
    info!("vigil starting");

    let memory: Arc<dyn MemoryApi> = Arc::new(
        MemoryClient::new(&config.memory.base_url, config.memory_timeout())
            .context("failed to build memory client")?,
    );
    let llm = Arc::new(
        HttpLlmProvider::new(
            &config.llm.base_url,
            &config.llm.model,
            &config.llm.api_key,
            config.llm_timeout(),
        )
        .context("failed to build llm provider")?,
    );
    let metrics: Arc<dyn MetricsSink> = Arc::new(TracingMetrics);

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundMessage>(CHANNEL_BUFFER_SIZE);
    let (reminder_tx, mut reminder_rx) = mpsc::channel::<ReminderRequest>(CHANNEL_BUFFER_SIZE);

    let mut registry = ToolRegistry::new(metrics.clone());
    register_builtins(
        &mut registry,
        BuiltinDeps {
            outbound_tx,
            reminder_tx,
            memory: memory.clone(),
            guild_info: Arc::new(NoGateway),
            max_message_len: config.agent.max_message_len,
            reminder_offset: config.reminder_offset(),
        },
    );
    let registry = Arc::new(registry);
    info!(tools = registry.count(), "tool registry initialised");

    let skills = Arc::new(SkillGraph::new(memory.clone(), config.skills.clone()));

    let observer = Observer::new(
        Retriever::new(memory.clone()),
        IntentEngine::new(skills.clone()),
        Planner::new(
            llm,
            memory.clone(),
            registry.definitions(),
            config.agent.clone(),
        ),
        Executor::new(registry.clone(), config.agent.content_suffixes.clone()),
        Reflector::new(memory),
        skills.clone(),
        metrics,
    );

    // Drain outbound messages to stdout (the gateway's stand-in).
    tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            println!("[{}] {}", message.channel_id, message.content);
        }
    });
    tokio::spawn(async move {
        while let Some(reminder) = reminder_rx.recv().await {
            info!(
                reminder = %reminder.reminder_id,
                user = %reminder.user_id,
                deliver_at = %reminder.deliver_at,
                "reminder scheduled"
            );
        }
    });

    // Periodic skill decay while the runtime is up.
    let decay_skills = skills.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(DECAY_INTERVAL_SECS));
        ticker.tick().await; // first tick is immediate; skip it
        loop {
            ticker.tick().await;
            let patched = decay_skills.decay_sweep().await;
            info!(patched, "skill decay sweep complete");
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Observation>(trimmed) {
            Ok(observation) => {
                let report = observer.observe(observation).await;
                info!(
                    success = report.execution.success,
                    steps = report.plan.steps.len(),
                    reflected = report.reflected,
                    "observation processed"
                );
            }
            Err(e) => {
                error!(error = %e, "invalid observation JSON, skipping");
            }
        }
    }

    warn!("stdin closed, shutting down");
    Ok(())
}

async fn decay() -> Result<()> {
    let config = Config::load().context("failed to load configuration")?;
    let memory: Arc<dyn MemoryApi> = Arc::new(
        MemoryClient::new(&config.memory.base_url, config.memory_timeout())
            .context("failed to build memory client")?,
    );
    let skills = SkillGraph::new(memory, config.skills.clone());

    let patched = skills.decay_sweep().await;
    info!(patched, "skill decay sweep complete");
    Ok(())
}
