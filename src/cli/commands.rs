//! CLI command definitions for tickpipe.

use std::path::PathBuf;
use std::time::Duration;

use clap::builder::FalseyValueParser;
use clap::Parser;
use serde::Serialize;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::queue::{FileQueue, QueueSelector, QueueStatus};
use crate::scheduler::{
    ticker::list_pipeline_dirs, RunOutcome, Scheduler, SchedulerConfig, DEBUG_TICK_INTERVAL,
    DEFAULT_TICK_INTERVAL,
};

/// Default base directory.
const DEFAULT_BASE_DIR: &str = "queuebase";

/// Periodic batch dispatcher for JSONL file queues.
#[derive(Parser, Debug)]
#[command(name = "tickpipe")]
#[command(about = "Drain JSONL file queues through templated HTTP requests on a schedule")]
#[command(version)]
#[command(
    long_about = "tickpipe ticks once a minute. On every tick each pipeline directory under the base directory takes its quota of records from its queue files, renders them into HTTP requests, sends them and appends the rendered responses to its output log.\n\nExample usage:\n  tickpipe -d ./queuebase\n  tickpipe -d ./queuebase status"
)]
pub struct Cli {
    /// The subcommand to execute (defaults to `run`).
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Base directory holding one subdirectory per pipeline.
    #[arg(short = 'd', long = "dir", default_value = DEFAULT_BASE_DIR, global = true)]
    pub dir: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Debug mode: one-second ticks and debug logging.
    #[arg(long, env = "TICKPIPE_DEBUG", global = true, value_parser = FalseyValueParser::new())]
    pub debug: bool,

    /// Tick interval in seconds, overriding the default.
    #[arg(long, global = true)]
    pub tick_secs: Option<u64>,

    /// Start a run even if the previous run of the same pipeline is still in flight.
    #[arg(long, global = true)]
    pub allow_overlap: bool,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand, Debug, Clone)]
pub enum Commands {
    /// Tick until interrupted, then wait for in-flight runs.
    Run,

    /// Run a single tick, wait for its runs and exit.
    Once,

    /// Show every queue file of every pipeline as JSON.
    Status,

    /// Clear the recorded read error of a queue so it is selected again.
    ClearError {
        /// Pipeline directory name under the base directory.
        pipeline: String,
        /// Queue file name inside the pipeline directory.
        queue: String,
    },
}

impl Cli {
    fn scheduler_config(&self) -> SchedulerConfig {
        let tick_interval = match (self.tick_secs, self.debug) {
            (Some(secs), _) => Duration::from_secs(secs.max(1)),
            (None, true) => DEBUG_TICK_INTERVAL,
            (None, false) => DEFAULT_TICK_INTERVAL,
        };
        SchedulerConfig::new(&self.dir)
            .with_tick_interval(tick_interval)
            .with_allow_overlap(self.allow_overlap)
    }
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command.clone().unwrap_or(Commands::Run) {
        Commands::Run => run_scheduler(&cli).await,
        Commands::Once => run_once(&cli).await,
        Commands::Status => run_status(&cli),
        Commands::ClearError { pipeline, queue } => run_clear_error(&cli, &pipeline, &queue),
    }
}

async fn run_scheduler(cli: &Cli) -> anyhow::Result<()> {
    if !cli.dir.is_dir() {
        anyhow::bail!("Base directory '{}' does not exist", cli.dir.display());
    }

    let token = CancellationToken::new();
    tokio::spawn(cancel_on_signal(token.clone()));

    let completed = Scheduler::new(cli.scheduler_config()).run(token).await;
    info!(runs = completed, "Exiting");
    Ok(())
}

async fn run_once(cli: &Cli) -> anyhow::Result<()> {
    if !cli.dir.is_dir() {
        anyhow::bail!("Base directory '{}' does not exist", cli.dir.display());
    }

    let outcomes = Scheduler::new(cli.scheduler_config()).run_once().await;
    let failed = print_outcomes(&outcomes);
    if failed > 0 {
        anyhow::bail!("{} pipeline run(s) failed", failed);
    }
    Ok(())
}

fn print_outcomes(outcomes: &[RunOutcome]) -> usize {
    let mut failed = 0;
    for outcome in outcomes {
        let name = crate::pipeline::pipeline_name(&outcome.dir);
        match &outcome.result {
            Ok(summary) if summary.inactive => println!("{name}: inactive"),
            Ok(summary) => println!(
                "{name}: taken={} dispatched={} succeeded={} failed={} skipped={}",
                summary.taken, summary.dispatched, summary.succeeded, summary.failed, summary.skipped
            ),
            Err(e) => {
                failed += 1;
                println!("{name}: error: {e}");
            }
        }
    }
    failed
}

#[derive(Debug, Serialize)]
struct PipelineStatus {
    pipeline: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    queues: Vec<QueueStatus>,
}

fn run_status(cli: &Cli) -> anyhow::Result<()> {
    let mut statuses = Vec::new();
    for dir in list_pipeline_dirs(&cli.dir)? {
        let pipeline = crate::pipeline::pipeline_name(&dir);
        let status = match QueueSelector::new(&dir).status() {
            Ok(queues) => PipelineStatus {
                pipeline,
                error: None,
                queues,
            },
            Err(e) => PipelineStatus {
                pipeline,
                error: Some(e.to_string()),
                queues: Vec::new(),
            },
        };
        statuses.push(status);
    }

    println!("{}", serde_json::to_string_pretty(&statuses)?);
    Ok(())
}

fn run_clear_error(cli: &Cli, pipeline: &str, queue: &str) -> anyhow::Result<()> {
    let dir = cli.dir.join(pipeline);
    let mut file_queue = FileQueue::open(&dir, queue)?;

    match file_queue.last_error() {
        Some(last_error) => {
            let last_error = last_error.to_string();
            file_queue.clear_error()?;
            info!(pipeline, queue, last_error = %last_error, "Cleared queue error");
            println!("✓ Cleared error on {}/{}: {}", pipeline, queue, last_error);
        }
        None => println!("{}/{} has no recorded error", pipeline, queue),
    }
    Ok(())
}

/// Cancels `token` on Ctrl+C, or SIGTERM on Unix.
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
    token.cancel();
}
