mod api;
mod config;
mod daemon;
mod error;
mod monitoring;
mod queue;
mod resolver;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use api::ApiClient;
use config::Config;
use daemon::Daemon;
use daemon::pidfile::{PidFile, process_alive};
use monitoring::checker::CheckerSet;
use monitoring::scheduler::Scheduler;
use queue::{EventKind, EventQueue};
use resolver::ConfigResolver;

#[derive(Parser)]
#[command(name = "vigil-agent", about = "Health-check monitoring agent", version)]
struct Cli {
    /// Path to the agent config file (default: ~/.config/vigil/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitoring daemon in the foreground.
    Daemon,
    /// Probe every enabled target once and print the outcomes.
    Check,
    /// Show daemon liveness and queue statistics.
    Status,
    /// Send an event to the control plane, queueing it locally on failure.
    Report {
        #[arg(value_enum)]
        kind: EventKind,
        /// JSON payload.
        payload: String,
    },
    /// Inspect the offline event queue.
    #[command(subcommand)]
    Queue(QueueCommand),
}

#[derive(Subcommand)]
enum QueueCommand {
    /// Print queue statistics.
    Stats,
    /// List pending events.
    List {
        #[arg(long, value_enum)]
        kind: Option<EventKind>,
    },
}

fn build_scheduler(config: &Config) -> anyhow::Result<Arc<Scheduler>> {
    let resolver = ConfigResolver::new(config.clone());
    let checkers = CheckerSet::new().context("failed to build HTTP client")?;
    Ok(Arc::new(Scheduler::new(Arc::new(resolver), Arc::new(checkers))))
}

async fn run_daemon(config: Config) -> anyhow::Result<i32> {
    let scheduler = build_scheduler(&config)?;
    let daemon = Daemon::new(&config, scheduler)?;
    let started = daemon.run().await?;
    if started {
        Ok(0)
    } else {
        eprintln!("vigil-agent is already running");
        Ok(1)
    }
}

async fn run_check(config: Config) -> anyhow::Result<i32> {
    let scheduler = build_scheduler(&config)?;
    let events = scheduler.run_once().await;
    if events.is_empty() {
        println!("no enabled targets");
        return Ok(0);
    }

    let mut failures = 0;
    for event in &events {
        let state = if event.result.success { "ok" } else { "FAIL" };
        let detail = match (&event.result.response_time_ms, &event.result.error_message) {
            (_, Some(error)) => error.clone(),
            (Some(ms), None) => format!("{ms}ms"),
            (None, None) => String::new(),
        };
        println!(
            "{state:>4}  {} [{}]  {detail}",
            event.target.key(),
            event.target.spec.kind()
        );
        if !event.result.success {
            failures += 1;
        }
    }
    Ok(if failures > 0 { 1 } else { 0 })
}

fn run_status(config: &Config) -> anyhow::Result<i32> {
    let pid_file = PidFile::new(config.daemon.pid_file.clone());
    match pid_file.read()? {
        Some(pid) if process_alive(pid) => println!("daemon: running (pid {pid})"),
        Some(pid) => println!("daemon: not running (stale pid {pid})"),
        None => println!("daemon: not running"),
    }

    let queue = EventQueue::new(config.queue.path.clone(), config.queue.max_events);
    let stats = queue.stats()?;
    println!(
        "queue: {} pending (agent {}, cron {}, runtime {})",
        stats.total, stats.agent, stats.cron, stats.runtime
    );
    if let Some(oldest) = stats.oldest_event_at {
        println!("oldest queued event: {oldest}");
    }
    Ok(0)
}

/// Deliver an event now if possible; fall back to the durable queue so the
/// command succeeds even while the control plane is unreachable.
async fn run_report(config: &Config, kind: EventKind, raw_payload: &str) -> anyhow::Result<i32> {
    let payload: serde_json::Value =
        serde_json::from_str(raw_payload).context("payload is not valid JSON")?;

    let timeout_ms = resolver::parse_duration_ms(&config.api.timeout);
    let timeout = Duration::from_millis(if timeout_ms == 0 { 10_000 } else { timeout_ms });
    let client = ApiClient::new(config.api.base_url.clone(), config.api.token.clone(), timeout)
        .context("failed to build HTTP client")?;

    let path = format!("api/events/{kind}");
    if client.post(&path, &payload).await {
        println!("delivered");
        return Ok(0);
    }

    let queue = EventQueue::new(config.queue.path.clone(), config.queue.max_events);
    let event = queue.enqueue(kind, payload)?;
    println!("control plane unreachable, queued as {}", event.id);
    Ok(0)
}

fn run_queue(config: &Config, command: &QueueCommand) -> anyhow::Result<i32> {
    let queue = EventQueue::new(config.queue.path.clone(), config.queue.max_events);
    match command {
        QueueCommand::Stats => {
            let stats = queue.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        QueueCommand::List { kind } => {
            for event in queue.pending(*kind)? {
                println!(
                    "{}  {}  {}  retries={}  {}",
                    event.id, event.kind, event.created_at, event.retry_count, event.payload
                );
            }
        }
    }
    Ok(0)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logger::init();
    let cli = Cli::parse();
    let config = Config::from_config(cli.config.as_ref()).context("failed to load config")?;

    let code = match cli.command {
        Commands::Daemon => run_daemon(config).await?,
        Commands::Check => run_check(config).await?,
        Commands::Status => run_status(&config)?,
        Commands::Report { kind, payload } => run_report(&config, kind, &payload).await?,
        Commands::Queue(command) => run_queue(&config, &command)?,
    };
    std::process::exit(code);
}
