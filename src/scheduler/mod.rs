//! Periodic scheduling of pipeline runs.
//!
//! ```text
//!                 tick (every minute, every second in debug mode)
//!                                 │
//!         ┌───────────────────────┼───────────────────────┐
//!         ▼                       ▼                       ▼
//!   queuebase/orders/      queuebase/users/        queuebase/audit/
//!    Pipeline run           Pipeline run            (previous run still
//!                                                    in flight, skipped)
//! ```
//!
//! Each run is an independent task. On shutdown the [`Scheduler`] stops
//! ticking and waits for the runs in flight; none are cancelled.
//!
//! # Example
//!
//! ```rust,ignore
//! use tickpipe::scheduler::{Scheduler, SchedulerConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let token = CancellationToken::new();
//! let scheduler = Scheduler::new(SchedulerConfig::new("queuebase"));
//! scheduler.run(token).await;
//! ```

pub mod ticker;

pub use ticker::{
    DirectoryRunner, PipelineRunner, RunOutcome, Scheduler, SchedulerConfig,
    DEBUG_TICK_INTERVAL, DEFAULT_TICK_INTERVAL,
};
