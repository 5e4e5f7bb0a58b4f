//! fractal-snowflake: a self-contained deployment in one process.
//!
//! Starts an in-process server with its heartbeat monitor, submits tasks
//! (from a JSON file and/or generated echo tasks), runs one queue manager
//! until every task is finished, then prints a JSON summary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use tokio::sync::Notify;
use tracing::{info, warn};

use fractal_compute::{build_queue_adapter, ManagerRunner, ProgramRegistry, QueueManager};
use fractal_core::{load_dotenv, AdapterKind, FractalConfig, TaskSpec};
use fractal_queue::{FractalServer, HeartbeatMonitor, LocalClient};

// ── CLI ─────────────────────────────────────────────────────────────

/// Run a server, heartbeat monitor, and queue manager in one process.
#[derive(Parser, Debug)]
#[command(name = "fractal-snowflake", version, about)]
struct Cli {
    /// Path to a TOML config file. Defaults plus FRACTAL_* env vars if omitted.
    #[arg(long, env = "FRACTAL_CONFIG")]
    config: Option<PathBuf>,

    /// Queue adapter: `pool` or `runtime`.
    #[arg(long)]
    adapter: Option<String>,

    /// Adapter worker count (0 = available parallelism).
    #[arg(long)]
    workers: Option<usize>,

    /// Only claim tasks with this tag.
    #[arg(long)]
    queue_tag: Option<String>,

    /// JSON file holding an array of task specs to submit.
    #[arg(long)]
    tasks: Option<PathBuf>,

    /// Also submit this many generated echo tasks.
    #[arg(long, default_value_t = 0)]
    demo: usize,

    /// Manager update interval in milliseconds.
    #[arg(long)]
    update_frequency_ms: Option<u64>,
}

fn load_config(cli: &Cli) -> anyhow::Result<FractalConfig> {
    let mut config = match &cli.config {
        Some(path) => FractalConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => FractalConfig::from_env()?,
    };

    if let Some(adapter) = &cli.adapter {
        config.manager.adapter = adapter.parse::<AdapterKind>()?;
    }
    if let Some(workers) = cli.workers {
        config.manager.workers = workers;
    }
    if let Some(tag) = &cli.queue_tag {
        config.manager.queue_tag = Some(tag.clone());
    }
    if let Some(ms) = cli.update_frequency_ms {
        config.manager.update_frequency_ms = ms;
    }
    config.validate()?;
    Ok(config)
}

fn load_tasks(cli: &Cli) -> anyhow::Result<Vec<TaskSpec>> {
    let mut specs = match &cli.tasks {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading tasks from {}", path.display()))?;
            serde_json::from_str::<Vec<TaskSpec>>(&raw)
                .with_context(|| format!("parsing tasks from {}", path.display()))?
        }
        None => Vec::new(),
    };
    specs.extend((0..cli.demo).map(|i| TaskSpec::new("echo", json!({ "demo": i }))));
    Ok(specs)
}

// ── Main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    config.log_summary();

    let server = Arc::new(FractalServer::new(config.server.clone()));
    let specs = load_tasks(&cli)?;
    if specs.is_empty() {
        warn!("no tasks to run; pass --tasks or --demo");
    }
    let submitted = server.submit_tasks(specs).len();

    let monitor_shutdown = Arc::new(Notify::new());
    let monitor = HeartbeatMonitor::new(Arc::clone(&server)).spawn(Arc::clone(&monitor_shutdown));

    let client = Arc::new(LocalClient::new(Arc::clone(&server)));
    let programs = Arc::new(ProgramRegistry::with_builtins());
    let adapter = build_queue_adapter(&config.manager, programs)?;
    let manager = QueueManager::new(client, adapter, config.manager.clone())?;

    // Stop the manager once nothing is left to do.
    let manager_shutdown = Arc::new(Notify::new());
    let watcher = {
        let server = Arc::clone(&server);
        let shutdown = Arc::clone(&manager_shutdown);
        let poll = config.manager.update_frequency().min(Duration::from_millis(250));
        tokio::spawn(async move {
            while server.task_counts().outstanding() > 0 {
                tokio::time::sleep(poll).await;
            }
            info!("all tasks finished");
            shutdown.notify_one();
        })
    };

    let summary = ManagerRunner::run(
        manager,
        config.manager.update_frequency(),
        Arc::clone(&manager_shutdown),
    )
    .await?;

    watcher.abort();
    monitor_shutdown.notify_one();
    let sweeps = monitor.await.context("heartbeat monitor task failed")?;

    let report = json!({
        "submitted": submitted,
        "tasks": server.task_counts(),
        "run": summary,
        "managers": server.list_managers(None),
        "heartbeat_sweeps": sweeps,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
