//! Pipelines: one directory of queue files, templates and an output log.
//!
//! # Layout
//!
//! ```text
//! queuebase/orders/
//! ├── config.json          PipelineConfig
//! ├── req.tmpl             record -> Req
//! ├── res.tmpl             Res -> result
//! ├── 0001.jsonl           queue files, drained in name order
//! ├── 0001.jsonl.pos
//! └── output.log           one JSON line per processed record
//! ```
//!
//! # Run flow
//!
//! 1. **Load**: `config.json` and both templates are read fresh
//! 2. **Window**: the run stops unless `ActiveTime` matches the current minute
//! 3. **Take**: up to the quota of records is read across the queue files
//! 4. **Render**: each record becomes a [`Req`](crate::dispatch::Req) through the request template
//! 5. **Dispatch**: requests run on `Workers` concurrent workers
//! 6. **Log**: each response is rendered through the response template and appended to the output log
//!
//! Reading a record advances the queue position whether or not the record is
//! processed successfully, so failures are never retried automatically.

pub mod active_window;
pub mod config;
pub mod output;
pub mod runner;
pub mod take;

pub use active_window::ActiveWindow;
pub use config::{PipelineConfig, CONFIG_FILE_NAME};
pub use output::OutputLog;
pub use runner::{pipeline_name, run_pipeline, Pipeline, RunSummary};
pub use take::{take, TakenRecord};
