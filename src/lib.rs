//! tickpipe: periodic batch dispatcher for JSONL file queues.
//!
//! Every tick, each pipeline directory takes a bounded number of records from
//! its crash-resumable queue files, renders each record into an HTTP request
//! through a JSONPath template, sends the requests on a bounded worker pool
//! and appends the rendered responses to an output log.

pub mod cli;
pub mod dispatch;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod scheduler;
pub mod template;

// Re-export commonly used error types
pub use error::{ConfigError, PathError, PipelineError, QueueError, TemplateError};
