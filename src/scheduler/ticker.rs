//! Periodic launch of pipeline runs.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::pipeline::{pipeline_name, run_pipeline, RunSummary};

/// Tick interval in normal operation.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Tick interval in debug mode.
pub const DEBUG_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Runs the pipeline found in one directory.
#[async_trait]
pub trait PipelineRunner: Send + Sync {
    async fn run(&self, dir: PathBuf) -> Result<RunSummary, PipelineError>;
}

/// Loads and runs pipeline directories from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryRunner;

#[async_trait]
impl PipelineRunner for DirectoryRunner {
    async fn run(&self, dir: PathBuf) -> Result<RunSummary, PipelineError> {
        run_pipeline(dir).await
    }
}

/// Configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Directory holding one subdirectory per pipeline.
    pub base_dir: PathBuf,
    /// Time between ticks.
    pub tick_interval: Duration,
    /// Start a run even if the previous run of the same pipeline is still
    /// in flight.
    pub allow_overlap: bool,
}

impl SchedulerConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            allow_overlap: false,
        }
    }

    /// Sets the tick interval.
    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    /// Sets whether overlapping runs of one pipeline are allowed.
    pub fn with_allow_overlap(mut self, allow_overlap: bool) -> Self {
        self.allow_overlap = allow_overlap;
        self
    }
}

/// Outcome of one finished pipeline run.
#[derive(Debug)]
pub struct RunOutcome {
    pub dir: PathBuf,
    pub result: Result<RunSummary, PipelineError>,
}

/// Drives pipeline runs on a fixed tick.
pub struct Scheduler {
    config: SchedulerConfig,
    runner: Arc<dyn PipelineRunner>,
    runs: JoinSet<Result<RunSummary, PipelineError>>,
    in_flight: HashMap<Id, PathBuf>,
    // Runs collected by `tick` and not yet handed out.
    finished: Vec<RunOutcome>,
}

impl Scheduler {
    /// Creates a scheduler that runs pipelines from disk.
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_runner(config, Arc::new(DirectoryRunner))
    }

    /// Creates a scheduler with a custom runner.
    pub fn with_runner(config: SchedulerConfig, runner: Arc<dyn PipelineRunner>) -> Self {
        Self {
            config,
            runner,
            runs: JoinSet::new(),
            in_flight: HashMap::new(),
            finished: Vec::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Number of runs started and not yet collected.
    pub fn in_flight(&self) -> usize {
        self.runs.len()
    }

    /// Lists pipeline directories under the base directory, sorted by name.
    pub fn pipeline_dirs(&self) -> io::Result<Vec<PathBuf>> {
        list_pipeline_dirs(&self.config.base_dir)
    }

    /// Starts one run per pipeline directory.
    ///
    /// Runs that finished since the last tick are collected first and kept
    /// for [`take_finished`](Self::take_finished). A directory whose previous
    /// run is still in flight is skipped unless overlap is allowed. Returns
    /// the directories started.
    pub fn tick(&mut self) -> Vec<PathBuf> {
        while let Some(joined) = self.runs.try_join_next_with_id() {
            if let Some(outcome) = self.collect(joined) {
                self.finished.push(outcome);
            }
        }

        let dirs = match self.pipeline_dirs() {
            Ok(dirs) => dirs,
            Err(e) => {
                error!(base_dir = %self.config.base_dir.display(), error = %e, "Failed to list pipelines");
                return Vec::new();
            }
        };

        let mut started = Vec::new();
        for dir in dirs {
            if !self.config.allow_overlap && self.in_flight.values().any(|d| d == &dir) {
                info!(pipeline = %pipeline_name(&dir), "Previous run still in flight, skipping");
                continue;
            }

            let runner = Arc::clone(&self.runner);
            let task_dir = dir.clone();
            let handle = self.runs.spawn(async move { runner.run(task_dir).await });
            self.in_flight.insert(handle.id(), dir.clone());
            debug!(pipeline = %pipeline_name(&dir), "Run started");
            started.push(dir);
        }
        started
    }

    /// Ticks until `token` is cancelled, then waits for every in-flight run.
    /// Returns the number of runs completed.
    ///
    /// The first tick fires immediately. Runs are never cancelled; shutdown
    /// waits for them to finish on their own. Each outcome is logged as it is
    /// collected.
    pub async fn run(mut self, token: CancellationToken) -> usize {
        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut completed = 0;

        info!(
            base_dir = %self.config.base_dir.display(),
            interval = ?self.config.tick_interval,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                Some(joined) = self.runs.join_next_with_id(), if !self.runs.is_empty() => {
                    completed += usize::from(self.collect(joined).is_some());
                }
                _ = ticker.tick() => {
                    self.tick();
                    completed += self.take_finished().len();
                }
            }
        }

        info!(in_flight = self.runs.len(), "Shutdown requested, draining runs");
        completed += self.drain().await.len();
        info!(runs = completed, "Scheduler stopped");
        completed
    }

    /// Runs a single tick and waits for the runs it started.
    pub async fn run_once(mut self) -> Vec<RunOutcome> {
        self.tick();
        self.drain().await
    }

    /// Hands out the runs collected by [`tick`](Self::tick).
    pub fn take_finished(&mut self) -> Vec<RunOutcome> {
        std::mem::take(&mut self.finished)
    }

    /// Waits for every in-flight run. The result also holds runs collected by
    /// earlier ticks and not yet taken.
    pub async fn drain(&mut self) -> Vec<RunOutcome> {
        let mut outcomes = self.take_finished();
        while let Some(joined) = self.runs.join_next_with_id().await {
            outcomes.extend(self.collect(joined));
        }
        outcomes
    }

    fn collect(
        &mut self,
        joined: Result<(Id, Result<RunSummary, PipelineError>), JoinError>,
    ) -> Option<RunOutcome> {
        let (id, result) = match joined {
            Ok((id, result)) => (id, result),
            Err(e) => (e.id(), Err(PipelineError::Join(e))),
        };
        let dir = self.in_flight.remove(&id)?;
        let pipeline = pipeline_name(&dir);

        match &result {
            Ok(summary) if summary.inactive => debug!(pipeline = %pipeline, "Run skipped by active window"),
            Ok(summary) => info!(
                pipeline = %pipeline,
                taken = summary.taken,
                dispatched = summary.dispatched,
                succeeded = summary.succeeded,
                failed = summary.failed,
                skipped = summary.skipped,
                "Run completed"
            ),
            Err(e) => warn!(pipeline = %pipeline, error = %e, "Run failed"),
        }
        Some(RunOutcome { dir, result })
    }
}

/// Lists the directories directly under `base_dir`, sorted by path.
pub fn list_pipeline_dirs(base_dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(base_dir)? {
        let path = entry?.path();
        // Follows symlinks so a linked pipeline directory still counts.
        if fs::metadata(&path).is_ok_and(|meta| meta.is_dir()) {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records started runs and holds each one for a fixed delay.
    struct FakeRunner {
        delay: Duration,
        started: Mutex<Vec<PathBuf>>,
        finished: AtomicUsize,
    }

    impl FakeRunner {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                started: Mutex::new(Vec::new()),
                finished: AtomicUsize::new(0),
            })
        }

        fn started(&self) -> usize {
            self.started.lock().expect("lock").len()
        }
    }

    #[async_trait]
    impl PipelineRunner for FakeRunner {
        async fn run(&self, dir: PathBuf) -> Result<RunSummary, PipelineError> {
            self.started.lock().expect("lock").push(dir);
            tokio::time::sleep(self.delay).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(RunSummary::default())
        }
    }

    fn base_dir(names: &[&str]) -> TempDir {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        for name in names {
            fs::create_dir(temp_dir.path().join(name)).expect("mkdir");
        }
        fs::write(temp_dir.path().join("README"), "not a pipeline").expect("write");
        temp_dir
    }

    #[tokio::test]
    async fn test_tick_starts_one_run_per_directory() {
        let temp_dir = base_dir(&["b", "a"]);
        let runner = FakeRunner::new(Duration::ZERO);
        let mut scheduler =
            Scheduler::with_runner(SchedulerConfig::new(temp_dir.path()), runner.clone());

        let started = scheduler.tick();
        assert_eq!(
            started,
            vec![temp_dir.path().join("a"), temp_dir.path().join("b")]
        );

        let outcomes = scheduler.drain().await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.result.is_ok()));
        assert_eq!(runner.finished.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_overlapping_run_is_skipped() {
        let temp_dir = base_dir(&["a"]);
        let runner = FakeRunner::new(Duration::from_millis(200));
        let mut scheduler =
            Scheduler::with_runner(SchedulerConfig::new(temp_dir.path()), runner.clone());

        assert_eq!(scheduler.tick().len(), 1);
        assert!(scheduler.tick().is_empty());
        assert_eq!(scheduler.in_flight(), 1);

        scheduler.drain().await;
        assert_eq!(scheduler.tick().len(), 1);
        scheduler.drain().await;
        assert_eq!(runner.started(), 2);
    }

    #[tokio::test]
    async fn test_overlap_allowed() {
        let temp_dir = base_dir(&["a"]);
        let runner = FakeRunner::new(Duration::from_millis(200));
        let config = SchedulerConfig::new(temp_dir.path()).with_allow_overlap(true);
        let mut scheduler = Scheduler::with_runner(config, runner.clone());

        assert_eq!(scheduler.tick().len(), 1);
        assert_eq!(scheduler.tick().len(), 1);
        assert_eq!(scheduler.drain().await.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_base_dir_starts_nothing() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config = SchedulerConfig::new(temp_dir.path().join("missing"));
        let mut scheduler = Scheduler::with_runner(config, FakeRunner::new(Duration::ZERO));
        assert!(scheduler.tick().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_drains_in_flight_runs() {
        let temp_dir = base_dir(&["a", "b"]);
        let runner = FakeRunner::new(Duration::from_millis(150));
        let config =
            SchedulerConfig::new(temp_dir.path()).with_tick_interval(Duration::from_millis(20));
        let scheduler = Scheduler::with_runner(config, runner.clone());

        let token = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(token.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        let completed = handle.await.expect("scheduler task");

        let started = runner.started();
        assert!(started >= 2);
        assert_eq!(runner.finished.load(Ordering::SeqCst), started);
        assert_eq!(completed, started);
    }

    #[tokio::test]
    async fn test_runs_collected_by_tick_are_kept() {
        let temp_dir = base_dir(&["a"]);
        let runner = FakeRunner::new(Duration::ZERO);
        let mut scheduler =
            Scheduler::with_runner(SchedulerConfig::new(temp_dir.path()), runner.clone());

        assert_eq!(scheduler.tick().len(), 1);
        while runner.finished.load(Ordering::SeqCst) < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The second tick collects the first run before starting another.
        assert_eq!(scheduler.tick().len(), 1);
        let finished = scheduler.take_finished();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].dir, temp_dir.path().join("a"));
        assert!(finished[0].result.is_ok());
        assert!(scheduler.take_finished().is_empty());

        assert_eq!(scheduler.drain().await.len(), 1);
    }

    #[tokio::test]
    async fn test_drain_includes_runs_collected_by_tick() {
        let temp_dir = base_dir(&["a"]);
        let runner = FakeRunner::new(Duration::ZERO);
        let config = SchedulerConfig::new(temp_dir.path()).with_allow_overlap(true);
        let mut scheduler = Scheduler::with_runner(config, runner.clone());

        scheduler.tick();
        while runner.finished.load(Ordering::SeqCst) < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        scheduler.tick();

        assert_eq!(scheduler.drain().await.len(), 2);
    }

    #[tokio::test]
    async fn test_run_once() {
        let temp_dir = base_dir(&["a", "b", "c"]);
        let runner = FakeRunner::new(Duration::from_millis(10));
        let scheduler =
            Scheduler::with_runner(SchedulerConfig::new(temp_dir.path()), runner.clone());
        assert_eq!(scheduler.run_once().await.len(), 3);
        assert_eq!(runner.finished.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_directory_runner_reports_config_error() {
        let temp_dir = base_dir(&["broken"]);
        let scheduler = Scheduler::new(SchedulerConfig::new(temp_dir.path()));
        let outcomes = scheduler.run_once().await;
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0].result, Err(PipelineError::Config(_))));
    }
}
