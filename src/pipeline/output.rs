//! Append-only output log of a pipeline.
//!
//! One JSON object per processed record:
//!
//! ```text
//! {"time":"2024-03-05T10:01:00+09:00","level":"info","msg":"ok","UniqueKey":"u-1","result":{...}}
//! {"time":"2024-03-05T10:01:00+09:00","level":"error","msg":"error","UniqueKey":"u-2","error":"..."}
//! ```

use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;
use serde_json::Value;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

#[derive(Debug, Serialize)]
struct OutputRecord<'a> {
    time: String,
    level: &'static str,
    msg: &'static str,
    #[serde(rename = "UniqueKey")]
    unique_key: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a Value>,
}

/// Output log opened in append mode for the duration of one run.
#[derive(Debug)]
pub struct OutputLog {
    path: PathBuf,
    file: File,
}

impl OutputLog {
    /// Opens `path` for appending, creating it and its parent directories.
    pub async fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a successful result.
    pub async fn write_result(&mut self, unique_key: &Value, result: &Value) -> io::Result<()> {
        self.append(&OutputRecord {
            time: Local::now().to_rfc3339(),
            level: "info",
            msg: "ok",
            unique_key,
            result: Some(result),
            error: None,
            data: None,
        })
        .await
    }

    /// Appends a failure. `data` carries the input record when the record
    /// itself could not be attributed.
    pub async fn write_error(
        &mut self,
        unique_key: &Value,
        error: &str,
        data: Option<&Value>,
    ) -> io::Result<()> {
        self.append(&OutputRecord {
            time: Local::now().to_rfc3339(),
            level: "error",
            msg: "error",
            unique_key,
            result: None,
            error: Some(error),
            data,
        })
        .await
    }

    async fn append(&mut self, record: &OutputRecord<'_>) -> io::Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.file.write_all(&line).await?;
        self.file.flush().await
    }
}
