//! Command-line interface for tickpipe.
//!
//! Provides the periodic `run` loop (default), a single `once` tick, and the
//! operator commands `status` and `clear-error`.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
