//! One run of a pipeline: take, render, dispatch, render, log.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::active_window::ActiveWindow;
use super::config::PipelineConfig;
use super::output::OutputLog;
use super::take::{take, TakenRecord};
use crate::dispatch::{Dispatcher, HttpExecutor, Req, ReqwestExecutor, WorkResult, WorkUnit};
use crate::error::{ConfigError, PipelineError};
use crate::queue::QueueSelector;
use crate::template::{JsonPath, Template};

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// The run ended early because the active window was closed.
    pub inactive: bool,
    /// Records read from the queues.
    pub taken: usize,
    /// Requests handed to the dispatcher.
    pub dispatched: usize,
    /// Records with a result entry.
    pub succeeded: usize,
    /// Dispatched records with an error entry.
    pub failed: usize,
    /// Records dropped before dispatch.
    pub skipped: usize,
}

/// A loaded pipeline directory.
///
/// Configuration and templates are read once by [`Pipeline::load`]; nothing
/// carries over between runs except the queue positions and the output log
/// on disk.
#[derive(Debug, Clone)]
pub struct Pipeline {
    dir: PathBuf,
    name: String,
    config: PipelineConfig,
    window: ActiveWindow,
    req_template: Template,
    res_template: Template,
    unique_key: Option<JsonPath>,
}

/// Loads the pipeline in `dir` and runs it once, inside a `pipeline_run`
/// span carrying a fresh run id.
///
/// # Errors
///
/// Returns `PipelineError` if the configuration or templates cannot be
/// loaded, or if the run is aborted.
pub async fn run_pipeline(dir: PathBuf) -> Result<RunSummary, PipelineError> {
    let name = pipeline_name(&dir);
    let span = info_span!("pipeline_run", pipeline = %name, run_id = %Uuid::new_v4());
    async move {
        let pipeline = Pipeline::load(&dir)?;
        pipeline.run().await
    }
    .instrument(span)
    .await
}

/// Display name of a pipeline directory.
pub fn pipeline_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string())
}

impl Pipeline {
    /// Reads `config.json` and both templates from `dir`.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Config` for unreadable or invalid files and
    /// `PipelineError::Template` when a template fails to compile.
    pub fn load(dir: &Path) -> Result<Self, PipelineError> {
        let config = PipelineConfig::load(dir)?;
        let req_template = load_template(dir, &config.req_tmpl_name)?;
        let res_template = load_template(dir, &config.res_tmpl_name)?;

        let unique_key = if config.unique_key.is_empty() {
            None
        } else {
            let path =
                JsonPath::parse(&config.unique_key).map_err(|e| ConfigError::InvalidValue {
                    key: "UniqueKey",
                    message: e.to_string(),
                })?;
            Some(path)
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            name: pipeline_name(dir),
            window: ActiveWindow::parse(&config.active_time),
            config,
            req_template,
            res_template,
            unique_key,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs once against live HTTP endpoints at the current local time.
    pub async fn run(&self) -> Result<RunSummary, PipelineError> {
        let executor = ReqwestExecutor::new(self.config.timeout())?;
        self.run_with(Arc::new(executor), Local::now()).await
    }

    /// Runs once with the given executor, evaluating the active window at
    /// `now`.
    ///
    /// Records that cannot be turned into a request are skipped with an
    /// error entry. Failed requests and responses that do not render are
    /// recorded as error entries. With `AbortOnRenderError` the first
    /// response rendering failure stops the run.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError` if the output log cannot be opened, the
    /// pipeline directory cannot be listed, or the run is aborted.
    pub async fn run_with(
        &self,
        executor: Arc<dyn HttpExecutor>,
        now: DateTime<Local>,
    ) -> Result<RunSummary, PipelineError> {
        let mut summary = RunSummary::default();

        if !self.window.is_active_at(&now) {
            debug!(active_time = %self.window.expr(), "Outside active window");
            summary.inactive = true;
            return Ok(summary);
        }

        let output_path = self.config.output_path_in(&self.dir);
        let mut output =
            OutputLog::open(&output_path)
                .await
                .map_err(|source| PipelineError::Output {
                    path: output_path.clone(),
                    source,
                })?;

        let selector = QueueSelector::new(&self.dir);
        let quota = self.config.quota();
        let records = tokio::task::spawn_blocking(move || take(&selector, quota)).await??;
        summary.taken = records.len();
        if records.is_empty() {
            debug!(quota, "No records to dispatch");
            return Ok(summary);
        }
        info!(taken = summary.taken, quota, "Took records");

        let mut dispatcher = Dispatcher::start(
            self.config.worker_count(),
            executor,
            self.config.res_body_type,
        );

        for (index, record) in records.into_iter().enumerate() {
            match self.prepare(index, record, &mut output).await {
                Some(unit) => {
                    dispatcher.submit(unit).await?;
                    summary.dispatched += 1;
                }
                None => summary.skipped += 1,
            }
        }
        dispatcher.finish();

        while let Some(result) = dispatcher.next_result().await {
            let WorkResult {
                index,
                unique_key,
                res,
            } = result;

            if res.is_err() {
                warn!(index, unique_key = %unique_key, url = %res.req.url, error = %res.err, "Request failed");
                append_error(&mut output, &unique_key, &res.err, None).await;
                summary.failed += 1;
                continue;
            }

            let rendered = serde_json::to_value(&res)
                .map_err(Into::into)
                .and_then(|context| self.res_template.render_json::<Value>(&context));

            match rendered {
                Ok(value) => {
                    if let Err(e) = output.write_result(&unique_key, &value).await {
                        error!(index, unique_key = %unique_key, error = %e, "Failed to write output");
                    }
                    summary.succeeded += 1;
                }
                Err(e) => {
                    let message = format!("render response: {}", e);
                    warn!(index, unique_key = %unique_key, status = res.status_code, error = %e, "Response render failed");
                    append_error(&mut output, &unique_key, &message, None).await;
                    summary.failed += 1;

                    if self.config.abort_on_render_error {
                        dispatcher.abort();
                        warn!(?summary, "Run aborted");
                        return Err(PipelineError::Aborted(format!(
                            "record {} (key {}): {}",
                            index, unique_key, message
                        )));
                    }
                }
            }
        }

        info!(
            taken = summary.taken,
            dispatched = summary.dispatched,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "Run finished"
        );
        Ok(summary)
    }

    /// Turns a taken record into a work unit, or records why it cannot be.
    async fn prepare(
        &self,
        index: usize,
        record: TakenRecord,
        output: &mut OutputLog,
    ) -> Option<WorkUnit> {
        let data: Value = match serde_json::from_slice(&record.raw) {
            Ok(data) => data,
            Err(e) => {
                warn!(queue = %record.queue, index, error = %e, "Malformed record");
                let raw = Value::String(String::from_utf8_lossy(&record.raw).into_owned());
                append_error(
                    output,
                    &Value::Null,
                    &format!("malformed record: {}", e),
                    Some(&raw),
                )
                .await;
                return None;
            }
        };

        let unique_key = match &self.unique_key {
            None => Value::Null,
            Some(path) => match path.resolve(&data) {
                // An indefinite path always yields an array; no matches means no key.
                Some(Value::Array(matches)) if matches.is_empty() && !path.is_definite() => {
                    warn!(queue = %record.queue, index, path = %path, "Unique key not found");
                    append_error(output, &Value::Null, "unique key not found", Some(&data)).await;
                    return None;
                }
                Some(key) => key,
                None => {
                    warn!(queue = %record.queue, index, path = %path, "Unique key not found");
                    append_error(output, &Value::Null, "unique key not found", Some(&data)).await;
                    return None;
                }
            },
        };

        match self.req_template.render_json::<Req>(&data) {
            Ok(req) => Some(WorkUnit {
                index,
                unique_key,
                req,
            }),
            Err(e) => {
                warn!(queue = %record.queue, index, unique_key = %unique_key, error = %e, "Request render failed");
                append_error(output, &unique_key, &format!("render request: {}", e), None).await;
                None
            }
        }
    }
}

fn load_template(dir: &Path, name: &str) -> Result<Template, PipelineError> {
    let path = dir.join(name);
    let source = fs::read_to_string(&path).map_err(|source| ConfigError::Read { path, source })?;
    Template::compile(name, &source).map_err(|source| PipelineError::Template {
        name: name.to_string(),
        source,
    })
}

async fn append_error(output: &mut OutputLog, unique_key: &Value, message: &str, data: Option<&Value>) {
    if let Err(e) = output.write_error(unique_key, message, data).await {
        error!(path = %output.path().display(), error = %e, "Failed to write output");
    }
}
