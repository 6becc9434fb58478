//! Crash-resumable file queues.
//!
//! A pipeline directory holds any number of append-only JSONL files. Each one
//! is read through a [`FileQueue`], whose byte offset is persisted to a
//! sidecar by a [`PositionStore`] after every read attempt. The
//! [`QueueSelector`] decides which file to read next.
//!
//! ```text
//! pipeline/
//! ├── config.json
//! ├── 2024-01-01.jsonl        data, one JSON value per line
//! ├── 2024-01-01.jsonl.pos    {"offset":1024}
//! └── 2024-01-02.jsonl
//! ```
//!
//! Delivery is at-least-once: a crash between reading a batch and persisting
//! the new offset replays that batch on the next run.

pub mod file_queue;
pub mod position;
pub mod selector;

pub use file_queue::{FileQueue, RawRecord, QUEUE_SUFFIX};
pub use position::{Position, PositionStore, POSITION_SUFFIX};
pub use selector::{is_queue_file_name, QueueSelector, QueueStatus};
