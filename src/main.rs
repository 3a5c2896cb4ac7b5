#![forbid(unsafe_code)]

//! `agent-warden` — supervises a rate-limited CLI agent in tmux.
//!
//! Bootstraps configuration and logging, then either runs the monitor
//! loop or services one of the read-only/queue-management subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use agent_warden::classifier::Classifier;
use agent_warden::config::GlobalConfig;
use agent_warden::models::task::TaskStatus;
use agent_warden::persistence::store::CheckpointStore;
use agent_warden::queue::engine::{RetryPolicy, TaskQueue};
use agent_warden::session::controller::SessionController;
use agent_warden::session::tmux::TmuxMultiplexer;
use agent_warden::status;
use agent_warden::supervisor::monitor::{Monitor, MonitorOutcome, MonitorSettings};
use agent_warden::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-warden", about = "Rate-limit-aware agent supervisor", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the supervisor loop until the queue drains.
    Run,
    /// Print a summary of queue, wait, and lock state.
    Status,
    /// Print every task record.
    List,
    /// Enqueue a new task payload.
    Add {
        /// Instruction text passed to the agent.
        payload: String,
    },
    /// Requeue a failed or timed-out task.
    Retry {
        /// Identifier of the task to retry.
        id: String,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = GlobalConfig::load_from_path(&args.config)?;

    match args.command {
        Command::Run => run_supervisor(config).await,
        Command::Status => print_status(&config),
        Command::List => print_list(&config),
        Command::Add { payload } => {
            let queue = open_queue(&config)?;
            let task = queue.enqueue(&payload)?;
            println!("enqueued {}", task.id);
            Ok(())
        }
        Command::Retry { id } => {
            let queue = open_queue(&config)?;
            let task = queue.retry(&id)?;
            println!("requeued {} (attempt {})", task.id, task.attempt_count);
            Ok(())
        }
    }
}

async fn run_supervisor(config: GlobalConfig) -> Result<()> {
    if !TmuxMultiplexer::available().await {
        return Err(AppError::Session("tmux is not available on PATH".into()));
    }

    let queue = open_queue(&config)?;
    let store = CheckpointStore::open(&config.state_dir)?;
    let classifier = Classifier::new(config.default_backoff(), config.backoff.utc_offset_minutes)?;
    let session = SessionController::new(
        TmuxMultiplexer::new(),
        config.session.name.clone(),
        config.session.agent_command.clone(),
    );
    let settings = MonitorSettings {
        poll_interval: config.poll_interval(),
        completion_marker: config.monitor.completion_marker.clone(),
        task_timeout: config.task_timeout(),
        max_restarts: config.monitor.max_restarts,
        heartbeat_interval: config.lock_staleness() / 3,
    };

    let cancel = CancellationToken::new();
    let signal_ct = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_ct.cancel();
        }
    });

    let monitor = Monitor::new(queue, session, classifier, store, settings, cancel);
    match monitor.run().await {
        Ok(MonitorOutcome::QueueDrained) => {
            info!("all tasks processed");
            Ok(())
        }
        Ok(MonitorOutcome::Cancelled) => {
            info!("supervisor stopped");
            Ok(())
        }
        Err(err) => {
            error!(%err, "supervisor aborted");
            Err(err)
        }
    }
}

fn open_queue(config: &GlobalConfig) -> Result<TaskQueue> {
    TaskQueue::open(
        &config.state_dir,
        RetryPolicy {
            max_attempts: config.queue.max_attempts,
        },
        config.lock_staleness(),
    )
}

fn print_status(config: &GlobalConfig) -> Result<()> {
    let snap = status::snapshot(&config.state_dir)?;
    println!(
        "tasks: {} pending / {} running / {} completed / {} failed / {} timeout",
        snap.count(TaskStatus::Pending),
        snap.count(TaskStatus::Running),
        snap.count(TaskStatus::Completed),
        snap.count(TaskStatus::Failed),
        snap.count(TaskStatus::Timeout),
    );
    match &snap.running {
        Some(task) => println!("running: {} (attempt {})", task.id, task.attempt_count),
        None => println!("running: none"),
    }
    match &snap.wait {
        Some(wait) => println!(
            "waiting until {} ({:?}: {})",
            wait.resume_at, wait.pattern_kind, wait.raw_text
        ),
        None => println!("waiting: no"),
    }
    if let Some(session) = &snap.session {
        println!(
            "session: {} ({} consecutive restarts)",
            session.session_name, session.restart_count
        );
    }
    match &snap.lock {
        Some(lock) => println!(
            "lock: held by pid {} (heartbeat {})",
            lock.pid, lock.heartbeat_at
        ),
        None => println!("lock: free"),
    }
    Ok(())
}

fn print_list(config: &GlobalConfig) -> Result<()> {
    let snap = status::snapshot(&config.state_dir)?;
    if snap.tasks.is_empty() {
        println!("queue is empty");
        return Ok(());
    }
    for task in &snap.tasks {
        let error = task
            .last_error
            .as_deref()
            .map(|e| format!(" — {e}"))
            .unwrap_or_default();
        println!(
            "{}  {:>9?}  attempts={}  {}{}",
            task.id,
            task.status,
            task.attempt_count,
            truncate(&task.payload, 60),
            error
        );
    }
    Ok(())
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_owned()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}…")
    }
}

fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter);
    let result = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))
}
