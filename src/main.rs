//! tickpipe CLI entry point.
//!
//! Initializes logging and delegates to the CLI module for command handling.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments first to get log_level
    let cli = tickpipe::cli::parse_cli();

    // Priority: RUST_LOG env var > debug mode > --log-level CLI arg > default "info"
    let log_filter = if cli.debug {
        "debug".to_string()
    } else {
        cli.log_level.clone()
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)))
        .init();

    tickpipe::cli::run_with_cli(cli).await
}
