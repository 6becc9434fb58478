//! Selection of the next readable queue file in a pipeline directory.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use super::file_queue::{FileQueue, QUEUE_SUFFIX};
use super::position::PositionStore;
use crate::error::QueueError;

/// Returns whether `name` follows the queue file naming convention.
pub fn is_queue_file_name(name: &str) -> bool {
    name.len() > QUEUE_SUFFIX.len() && name.ends_with(QUEUE_SUFFIX)
}

/// Snapshot of one queue file, for operators.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub name: String,
    pub offset: u64,
    pub size: u64,
    pub exhausted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Picks queue files from a pipeline directory in sorted name order.
#[derive(Debug, Clone)]
pub struct QueueSelector {
    dir: PathBuf,
}

impl QueueSelector {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Lists the names of regular files matching the queue naming convention,
    /// sorted by name. Position sidecars and directories are excluded.
    pub fn queue_names(&self) -> Result<Vec<String>, QueueError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !is_queue_file_name(&name) {
                continue;
            }
            // Follows symlinks so a linked queue file still counts.
            match fs::metadata(entry.path()) {
                Ok(meta) if meta.is_file() => names.push(name),
                _ => continue,
            }
        }
        names.sort();
        Ok(names)
    }

    /// Returns the first queue that is neither exhausted nor in error, or
    /// `None` when no data is available.
    ///
    /// Every call re-reads the directory and the position sidecars, so a queue
    /// drained or failed by a previous take is skipped.
    pub fn next_queue(&self) -> Result<Option<FileQueue>, QueueError> {
        self.next_queue_except(&HashSet::new())
    }

    /// Like [`next_queue`](Self::next_queue), but never offers a queue named
    /// in `skip`.
    pub fn next_queue_except(&self, skip: &HashSet<String>) -> Result<Option<FileQueue>, QueueError> {
        for name in self.queue_names()? {
            if skip.contains(&name) {
                continue;
            }
            let queue = match FileQueue::open(&self.dir, &name) {
                Ok(queue) => queue,
                Err(e) => {
                    debug!(queue = %name, error = %e, "Skip by open error");
                    continue;
                }
            };
            if let Some(last_error) = queue.last_error() {
                debug!(queue = %name, last_error, "Skip by last error");
                continue;
            }
            if queue.is_exhausted() {
                debug!(queue = %name, "Skip by EOF");
                continue;
            }
            return Ok(Some(queue));
        }
        Ok(None)
    }

    /// Reports the state of every queue file in the directory.
    ///
    /// Read-only: missing sidecars are reported at offset 0 without being
    /// created, and an unreadable sidecar is reported as the queue's error and
    /// left untouched.
    pub fn status(&self) -> Result<Vec<QueueStatus>, QueueError> {
        let mut statuses = Vec::new();
        for name in self.queue_names()? {
            let data_path = self.dir.join(&name);
            let size = fs::metadata(&data_path).map_or(0, |meta| meta.len());
            let (offset, last_error) = match PositionStore::for_queue(&data_path).load() {
                Ok(position) => {
                    let position = position.unwrap_or_default();
                    (position.offset, position.last_error)
                }
                Err(e) => (0, Some(format!("unreadable position file: {}", e))),
            };
            statuses.push(QueueStatus {
                offset,
                size,
                exhausted: size <= offset,
                last_error,
                name,
            });
        }
        Ok(statuses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::position::{Position, PositionStore};
    use tempfile::TempDir;

    #[test]
    fn test_is_queue_file_name() {
        assert!(is_queue_file_name("a.jsonl"));
        assert!(!is_queue_file_name(".jsonl"));
        assert!(!is_queue_file_name("a.jsonl.pos"));
        assert!(!is_queue_file_name("config.json"));
    }

    #[test]
    fn test_queue_names_sorted_and_filtered() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let dir = temp_dir.path();
        fs::write(dir.join("b.jsonl"), "1\n").expect("write");
        fs::write(dir.join("a.jsonl"), "1\n").expect("write");
        fs::write(dir.join("a.jsonl.pos"), r#"{"offset":0}"#).expect("write");
        fs::write(dir.join("config.json"), "{}").expect("write");
        fs::create_dir(dir.join("c.jsonl")).expect("mkdir");

        let selector = QueueSelector::new(dir);
        assert_eq!(
            selector.queue_names().expect("names"),
            vec!["a.jsonl".to_string(), "b.jsonl".to_string()]
        );
    }

    #[test]
    fn test_next_queue_skips_exhausted_and_errored() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let dir = temp_dir.path();
        fs::write(dir.join("a.jsonl"), "1\n").expect("write");
        fs::write(dir.join("b.jsonl"), "1\n").expect("write");
        fs::write(dir.join("c.jsonl"), "1\n").expect("write");

        PositionStore::for_queue(&dir.join("a.jsonl"))
            .save(&Position {
                offset: 2,
                last_error: None,
            })
            .expect("save");
        PositionStore::for_queue(&dir.join("b.jsonl"))
            .save(&Position {
                offset: 0,
                last_error: Some("bad sector".to_string()),
            })
            .expect("save");

        let selector = QueueSelector::new(dir);
        let queue = selector.next_queue().expect("select").expect("some queue");
        assert_eq!(queue.name(), "c.jsonl");
    }

    #[test]
    fn test_next_queue_none_when_drained() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let dir = temp_dir.path();
        fs::write(dir.join("a.jsonl"), "").expect("write");

        let selector = QueueSelector::new(dir);
        assert!(selector.next_queue().expect("select").is_none());
    }

    #[test]
    fn test_missing_dir_is_error() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let selector = QueueSelector::new(temp_dir.path().join("nope"));
        assert!(selector.next_queue().is_err());
    }

    #[test]
    fn test_status_reports_each_queue() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let dir = temp_dir.path();
        fs::write(dir.join("a.jsonl"), "1\n2\n").expect("write");

        let mut queue = FileQueue::open(dir, "a.jsonl").expect("open");
        queue.take(1).expect("take");

        let statuses = QueueSelector::new(dir).status().expect("status");
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].offset, 2);
        assert_eq!(statuses[0].size, 4);
        assert!(!statuses[0].exhausted);
        assert!(statuses[0].last_error.is_none());
    }

    #[test]
    fn test_status_leaves_sidecars_untouched() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let dir = temp_dir.path();
        fs::write(dir.join("a.jsonl"), "1\n2\n").expect("write");
        fs::write(dir.join("a.jsonl.pos"), "{garbage").expect("write");
        fs::write(dir.join("b.jsonl"), "1\n").expect("write");

        let statuses = QueueSelector::new(dir).status().expect("status");
        assert_eq!(statuses.len(), 2);

        assert_eq!(statuses[0].name, "a.jsonl");
        assert_eq!(statuses[0].offset, 0);
        assert!(statuses[0]
            .last_error
            .as_deref()
            .is_some_and(|e| e.starts_with("unreadable position file")));
        assert_eq!(
            fs::read_to_string(dir.join("a.jsonl.pos")).expect("read"),
            "{garbage"
        );

        assert_eq!(statuses[1].name, "b.jsonl");
        assert_eq!(statuses[1].offset, 0);
        assert!(statuses[1].last_error.is_none());
        assert!(!dir.join("b.jsonl.pos").exists());
    }

    #[test]
    fn test_next_queue_except_skips_named_queues() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let dir = temp_dir.path();
        fs::write(dir.join("a.jsonl"), "1\n").expect("write");
        fs::write(dir.join("b.jsonl"), "1\n").expect("write");

        let selector = QueueSelector::new(dir);
        let skip = HashSet::from(["a.jsonl".to_string()]);
        let queue = selector
            .next_queue_except(&skip)
            .expect("select")
            .expect("some queue");
        assert_eq!(queue.name(), "b.jsonl");

        let skip = HashSet::from(["a.jsonl".to_string(), "b.jsonl".to_string()]);
        assert!(selector.next_queue_except(&skip).expect("select").is_none());
    }
}
