//! Error types for tickpipe operations.
//!
//! Defines the error types for the major subsystems:
//! - File queues and their position sidecars
//! - Template compilation and rendering
//! - Pipeline configuration loading
//! - Pipeline runs

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading a file queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue file '{path}' is not accessible: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Queue '{path}' is in error state: {last_error}")]
    Poisoned { path: PathBuf, last_error: String },

    #[error("Read failed on '{path}' at offset {offset}: {source}")]
    Read {
        path: PathBuf,
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to persist position for '{path}': {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Queue file '{0}' not found")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur during template compilation or rendering.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Unterminated action starting at byte {0}")]
    UnterminatedAction(usize),

    #[error("Unterminated string literal in action at byte {0}")]
    UnterminatedString(usize),

    #[error("Invalid escape sequence '\\{escape}' at byte {pos}")]
    InvalidEscape { escape: char, pos: usize },

    #[error("Unexpected token '{token}' at byte {pos}")]
    UnexpectedToken { token: String, pos: usize },

    #[error("Empty action at byte {0}")]
    EmptyAction(usize),

    #[error("Function '{0}' not defined")]
    UnknownFunction(String),

    #[error("Wrong number of arguments for '{name}': expected {expected}, got {got}")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },

    #[error("Invalid argument for '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while parsing a JSONPath expression.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PathError {
    #[error("Empty path expression")]
    Empty,

    #[error("Unexpected character '{found}' at position {pos} in '{path}'")]
    Unexpected {
        path: String,
        pos: usize,
        found: char,
    },

    #[error("Unexpected end of path '{0}'")]
    UnexpectedEnd(String),

    #[error("Invalid number '{number}' in path '{path}'")]
    InvalidNumber { path: String, number: String },

    #[error("Slice step must not be zero in path '{0}'")]
    ZeroStep(String),
}

/// Errors that can occur while loading pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
}

/// Errors that end a pipeline run for the current tick.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Template '{name}' failed to compile: {source}")]
    Template {
        name: String,
        #[source]
        source: TemplateError,
    },

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Cannot open output log '{path}': {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] crate::dispatch::DispatchError),

    #[error("Run aborted: {0}")]
    Aborted(String),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
