//! Per-pipeline configuration.
//!
//! Every pipeline directory carries a `config.json`, re-read at the start of
//! each run:
//!
//! ```json
//! {
//!   "TakePerTick": 100,
//!   "ActiveTime": "* 9-20 * * *",
//!   "Workers": 4,
//!   "ReqTmplName": "req.tmpl",
//!   "ResTmplName": "res.tmpl",
//!   "UniqueKey": "$.id"
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dispatch::BodyType;
use crate::error::ConfigError;
use crate::queue::QUEUE_SUFFIX;

/// Name of the configuration file inside a pipeline directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Configuration for one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PipelineConfig {
    /// Records to take per tick, before correction.
    #[serde(default)]
    pub take_per_tick: u64,
    /// Multiplier applied to `take_per_tick`.
    #[serde(default = "default_correction")]
    pub correction: f64,
    /// Five-field cron expression; empty means never active.
    #[serde(default)]
    pub active_time: String,
    /// Concurrent requests; values below 1 are treated as 1.
    #[serde(default = "default_workers")]
    pub workers: i64,
    /// Request template file name, relative to the pipeline directory.
    #[serde(default)]
    pub req_tmpl_name: String,
    /// Response template file name, relative to the pipeline directory.
    #[serde(default)]
    pub res_tmpl_name: String,
    /// Forced response body interpretation.
    #[serde(default)]
    pub res_body_type: BodyType,
    /// Output log path, relative to the pipeline directory.
    #[serde(default = "default_output_path")]
    pub output_path: String,
    /// JSONPath of each record's unique key; empty means `null`.
    #[serde(default)]
    pub unique_key: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Stop the run on the first response rendering failure.
    #[serde(default)]
    pub abort_on_render_error: bool,
}

fn default_correction() -> f64 {
    1.0
}

fn default_workers() -> i64 {
    1
}

fn default_output_path() -> String {
    "output.log".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            take_per_tick: 0,
            correction: default_correction(),
            active_time: String::new(),
            workers: default_workers(),
            req_tmpl_name: String::new(),
            res_tmpl_name: String::new(),
            res_body_type: BodyType::None,
            output_path: default_output_path(),
            unique_key: String::new(),
            timeout_secs: default_timeout_secs(),
            abort_on_render_error: false,
        }
    }
}

impl PipelineConfig {
    /// Loads and validates `config.json` from a pipeline directory.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read, is not valid JSON,
    /// or fails validation.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(CONFIG_FILE_NAME);
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|source| ConfigError::Parse { path, source })?;
        config.validate()?;

        if config.workers < 1 {
            warn!(workers = config.workers, "Workers below 1, using 1");
        }
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingField` for an unnamed template and
    /// `ConfigError::InvalidValue` for out-of-range values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.req_tmpl_name.is_empty() {
            return Err(ConfigError::MissingField("ReqTmplName"));
        }

        if self.res_tmpl_name.is_empty() {
            return Err(ConfigError::MissingField("ResTmplName"));
        }

        if !self.correction.is_finite() || self.correction < 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "Correction",
                message: format!("must be a non-negative number, got {}", self.correction),
            });
        }

        if self.output_path.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "OutputPath",
                message: "cannot be empty".to_string(),
            });
        }

        if self.output_path.ends_with(QUEUE_SUFFIX) {
            return Err(ConfigError::InvalidValue {
                key: "OutputPath",
                message: format!("must not end with '{}'", QUEUE_SUFFIX),
            });
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TimeoutSecs",
                message: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// Records to take this tick: `floor(TakePerTick * Correction)`.
    pub fn quota(&self) -> u64 {
        (self.take_per_tick as f64 * self.correction).floor() as u64
    }

    pub fn worker_count(&self) -> usize {
        usize::try_from(self.workers.max(1)).unwrap_or(1)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn output_path_in(&self, dir: &Path) -> PathBuf {
        dir.join(&self.output_path)
    }

    /// Builder method to set the take quota.
    pub fn with_take_per_tick(mut self, take_per_tick: u64) -> Self {
        self.take_per_tick = take_per_tick;
        self
    }

    /// Builder method to set the active window expression.
    pub fn with_active_time(mut self, active_time: impl Into<String>) -> Self {
        self.active_time = active_time.into();
        self
    }

    /// Builder method to set the worker count.
    pub fn with_workers(mut self, workers: i64) -> Self {
        self.workers = workers;
        self
    }

    /// Builder method to set both template file names.
    pub fn with_templates(mut self, req: impl Into<String>, res: impl Into<String>) -> Self {
        self.req_tmpl_name = req.into();
        self.res_tmpl_name = res.into();
        self
    }

    /// Builder method to set the unique key path.
    pub fn with_unique_key(mut self, unique_key: impl Into<String>) -> Self {
        self.unique_key = unique_key.into();
        self
    }

    /// Builder method to set the forced response body type.
    pub fn with_res_body_type(mut self, body_type: BodyType) -> Self {
        self.res_body_type = body_type;
        self
    }

    /// Builder method to set the abort-on-render-error switch.
    pub fn with_abort_on_render_error(mut self, abort: bool) -> Self {
        self.abort_on_render_error = abort;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_with_defaults() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        fs::write(
            temp_dir.path().join(CONFIG_FILE_NAME),
            r#"{"ReqTmplName":"req.tmpl","ResTmplName":"res.tmpl"}"#,
        )
        .expect("write");

        let config = PipelineConfig::load(temp_dir.path()).expect("load");
        assert_eq!(config.take_per_tick, 0);
        assert_eq!(config.correction, 1.0);
        assert_eq!(config.workers, 1);
        assert_eq!(config.output_path, "output.log");
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.res_body_type, BodyType::None);
        assert!(!config.abort_on_render_error);
    }

    #[test]
    fn test_load_full() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        fs::write(
            temp_dir.path().join(CONFIG_FILE_NAME),
            r#"{
                "TakePerTick": 10,
                "Correction": 1.5,
                "ActiveTime": "* 9-20 * * *",
                "Workers": 4,
                "ReqTmplName": "req.tmpl",
                "ResTmplName": "res.tmpl",
                "ResBodyType": "TEXT",
                "OutputPath": "logs/out.log",
                "UniqueKey": "$.id",
                "TimeoutSecs": 5
            }"#,
        )
        .expect("write");

        let config = PipelineConfig::load(temp_dir.path()).expect("load");
        assert_eq!(config.quota(), 15);
        assert_eq!(config.worker_count(), 4);
        assert_eq!(config.res_body_type, BodyType::Text);
        assert_eq!(
            config.output_path_in(temp_dir.path()),
            temp_dir.path().join("logs/out.log")
        );
        assert_eq!(config.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_missing_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let result = PipelineConfig::load(temp_dir.path());
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_malformed_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        fs::write(temp_dir.path().join(CONFIG_FILE_NAME), "{").expect("write");
        let result = PipelineConfig::load(temp_dir.path());
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_validation() {
        let valid = PipelineConfig::default().with_templates("req", "res");
        assert!(valid.validate().is_ok());

        assert!(matches!(
            PipelineConfig::default().validate(),
            Err(ConfigError::MissingField("ReqTmplName"))
        ));

        let mut config = valid.clone();
        config.output_path = "done.jsonl".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key: "OutputPath", .. })
        ));

        let mut config = valid.clone();
        config.correction = -1.0;
        assert!(config.validate().is_err());

        let mut config = valid;
        config.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_worker_count_coerced() {
        assert_eq!(PipelineConfig::default().with_workers(0).worker_count(), 1);
        assert_eq!(PipelineConfig::default().with_workers(-3).worker_count(), 1);
        assert_eq!(PipelineConfig::default().with_workers(8).worker_count(), 8);
    }

    #[test]
    fn test_quota_correction() {
        let mut config = PipelineConfig::default().with_take_per_tick(10);
        assert_eq!(config.quota(), 10);
        config.correction = 0.25;
        assert_eq!(config.quota(), 2);
        config.correction = 0.0;
        assert_eq!(config.quota(), 0);
    }
}
