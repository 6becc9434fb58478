//! Position sidecar persistence for file queues.
//!
//! Each queue file `<name>.jsonl` has a sidecar `<name>.jsonl.pos` holding the
//! byte offset of the next unread line and the last read error, if any.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Suffix appended to a queue file name to form its position file name.
pub const POSITION_SUFFIX: &str = ".pos";

/// Persisted read state of one queue file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    /// Byte offset of the next unread line.
    #[serde(alias = "Offset")]
    pub offset: u64,
    /// Error recorded by the last failed read. A queue carrying an error is
    /// never selected again until the error is cleared.
    #[serde(default, alias = "LastError", skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Position {
    /// Returns whether this position carries a read error.
    pub fn has_error(&self) -> bool {
        self.last_error.is_some()
    }
}

/// Loads and saves the [`Position`] of a single queue file.
#[derive(Debug, Clone)]
pub struct PositionStore {
    path: PathBuf,
}

impl PositionStore {
    /// Creates a store for the queue file at `data_path`.
    pub fn for_queue(data_path: &Path) -> Self {
        let mut path = data_path.as_os_str().to_owned();
        path.push(POSITION_SUFFIX);
        Self {
            path: PathBuf::from(path),
        }
    }

    /// Path of the sidecar file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the persisted position.
    ///
    /// Returns `Ok(None)` when no sidecar exists yet. An empty `lastError`
    /// string written by older tooling is normalised to no error.
    pub fn load(&self) -> Result<Option<Position>, QueueError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut position: Position = serde_json::from_slice(&data)?;
        if position.last_error.as_deref() == Some("") {
            position.last_error = None;
        }
        Ok(Some(position))
    }

    /// Persists `position`.
    ///
    /// The record is written to a temporary file and renamed over the sidecar
    /// so a crash mid-write never leaves a truncated position behind.
    pub fn save(&self, position: &Position) -> Result<(), QueueError> {
        let json = serde_json::to_vec(position)?;

        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let persist = |source| QueueError::Persist {
            path: self.path.clone(),
            source,
        };
        fs::write(&tmp, &json).map_err(persist)?;
        fs::rename(&tmp, &self.path).map_err(persist)?;
        Ok(())
    }
}
