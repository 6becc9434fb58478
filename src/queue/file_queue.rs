//! Crash-resumable reader over one append-only JSONL file.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, ErrorKind, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::position::{Position, PositionStore};
use crate::error::QueueError;

/// File name suffix that marks a file as a queue.
pub const QUEUE_SUFFIX: &str = ".jsonl";

/// One raw record: a single line with its newline bytes stripped.
pub type RawRecord = Vec<u8>;

/// A queue file together with its persisted read position.
///
/// The offset only ever moves forward and is written back to the sidecar after
/// every [`take`](FileQueue::take), whether the call succeeded or not. A crash
/// right after a take can therefore at most replay records from the last
/// persisted offset.
#[derive(Debug)]
pub struct FileQueue {
    name: String,
    data_path: PathBuf,
    store: PositionStore,
    position: Position,
}

impl FileQueue {
    /// Opens the queue file `name` inside `dir`.
    ///
    /// A missing sidecar is created with offset 0. An unreadable sidecar is
    /// replaced by a fresh one, which restarts the queue from the beginning.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::NotFound` if the data file does not exist and
    /// `QueueError::Unavailable` if it cannot be stat'ed for another reason.
    pub fn open(dir: &Path, name: impl Into<String>) -> Result<Self, QueueError> {
        let name = name.into();
        let data_path = dir.join(&name);

        fs::metadata(&data_path).map_err(|source| match source.kind() {
            ErrorKind::NotFound => QueueError::NotFound(data_path.display().to_string()),
            _ => QueueError::Unavailable {
                path: data_path.clone(),
                source,
            },
        })?;

        let store = PositionStore::for_queue(&data_path);
        let position = match store.load() {
            Ok(Some(position)) => position,
            Ok(None) => {
                debug!(path = %data_path.display(), "No position file, starting at 0");
                let position = Position::default();
                store.save(&position)?;
                position
            }
            Err(QueueError::Json(e)) => {
                warn!(
                    path = %store.path().display(),
                    error = %e,
                    "Unreadable position file, starting at 0"
                );
                let position = Position::default();
                store.save(&position)?;
                position
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            name,
            data_path,
            store,
            position,
        })
    }

    /// File name of the queue inside its directory.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full path of the data file.
    pub fn path(&self) -> &Path {
        &self.data_path
    }

    /// Current in-memory position.
    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn offset(&self) -> u64 {
        self.position.offset
    }

    pub fn last_error(&self) -> Option<&str> {
        self.position.last_error.as_deref()
    }

    /// Current size of the data file in bytes, or `None` if it vanished.
    pub fn size(&self) -> Option<u64> {
        fs::metadata(&self.data_path).ok().map(|m| m.len())
    }

    /// Returns true once every byte of the file has been consumed.
    ///
    /// A data file that disappeared counts as exhausted.
    pub fn is_exhausted(&self) -> bool {
        self.size()
            .map_or(true, |size| size <= self.position.offset)
    }

    /// Reads up to `n` non-empty records starting at the persisted offset.
    ///
    /// Empty lines are skipped and do not count towards `n`. A trailing line
    /// without a newline is returned as a record. Reaching end-of-file early is
    /// not an error; the shorter batch is returned.
    ///
    /// The new offset advances by every byte consumed, newline bytes and
    /// skipped empty lines included. It is persisted before returning.
    ///
    /// # Errors
    ///
    /// On an open, seek or read failure nothing is returned, the offset stays
    /// where it was and the failure is recorded as the queue's last error. A
    /// queue that already carries an error returns `QueueError::Poisoned`.
    pub fn take(&mut self, n: usize) -> Result<Vec<RawRecord>, QueueError> {
        let outcome = match &self.position.last_error {
            Some(last_error) => Err(QueueError::Poisoned {
                path: self.data_path.clone(),
                last_error: last_error.clone(),
            }),
            None => self.read_records(n),
        };

        let result = match outcome {
            Ok((records, consumed)) => {
                self.position.offset += consumed;
                debug!(
                    path = %self.data_path.display(),
                    taken = records.len(),
                    consumed,
                    offset = self.position.offset,
                    "Took records"
                );
                Ok(records)
            }
            Err(e) => {
                if !self.position.has_error() {
                    warn!(path = %self.data_path.display(), error = %e, "Queue read failed");
                    self.position.last_error = Some(e.to_string());
                }
                Err(e)
            }
        };

        if let Err(e) = self.store.save(&self.position) {
            warn!(error = %e, "Position not persisted; records may be replayed");
        }

        result
    }

    /// Clears a recorded read error so the queue becomes eligible again.
    pub fn clear_error(&mut self) -> Result<(), QueueError> {
        self.position.last_error = None;
        self.store.save(&self.position)
    }

    fn read_records(&self, n: usize) -> Result<(Vec<RawRecord>, u64), QueueError> {
        let offset = self.position.offset;
        let read_err = |source| QueueError::Read {
            path: self.data_path.clone(),
            offset,
            source,
        };

        let mut file = File::open(&self.data_path).map_err(read_err)?;
        file.seek(SeekFrom::Start(offset)).map_err(read_err)?;
        read_lines(&mut BufReader::new(file), n).map_err(read_err)
    }
}

/// Reads up to `n` non-empty lines and the number of bytes they span.
///
/// A failure part way through discards the lines already read, so the caller
/// never advances past a batch it did not hand out.
fn read_lines<R: BufRead>(reader: &mut R, n: usize) -> io::Result<(Vec<RawRecord>, u64)> {
    let mut records = Vec::new();
    let mut consumed = 0u64;
    let mut line = Vec::new();

    while records.len() < n {
        let read = reader.read_until(b'\n', &mut line)?;
        if read == 0 {
            debug!("Take reached EOF");
            break;
        }
        consumed += read as u64;

        if line.last() == Some(&b'\n') {
            line.pop();
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if line.is_empty() {
            continue;
        }
        records.push(std::mem::take(&mut line));
    }

    Ok((records, consumed))
}
