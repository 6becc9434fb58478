//! Bounded worker pool for request dispatch.
//!
//! A fixed set of worker tasks pulls units from a shared channel. Submission
//! waits for a free slot once every worker is busy. Results are emitted in
//! completion order and carry the index and unique key of the record that
//! produced them.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::executor::HttpExecutor;
use super::request::{BodyType, Req};
use super::response::Res;

/// Errors that can occur in the dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The HTTP client could not be built.
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    /// The request names a method that is not a valid HTTP token.
    #[error("Invalid HTTP method '{0}'")]
    InvalidMethod(String),

    /// Submission after `finish` or `abort`.
    #[error("Dispatcher is closed")]
    Closed,
}

/// One request waiting for a worker.
#[derive(Debug, Clone)]
pub struct WorkUnit {
    /// Position of the record within the run's batch.
    pub index: usize,
    pub unique_key: Value,
    pub req: Req,
}

/// Outcome of one [`WorkUnit`].
#[derive(Debug, Clone)]
pub struct WorkResult {
    pub index: usize,
    pub unique_key: Value,
    pub res: Res,
}

type Queued = (WorkUnit, OwnedSemaphorePermit);

/// Runs requests on a fixed number of workers.
pub struct Dispatcher {
    num_workers: usize,
    slots: Arc<Semaphore>,
    work_tx: Option<mpsc::UnboundedSender<Queued>>,
    result_rx: mpsc::UnboundedReceiver<WorkResult>,
    worker_handles: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawns `num_workers` workers (at least one) on the current runtime.
    ///
    /// # Arguments
    ///
    /// * `num_workers` - Maximum number of requests in flight
    /// * `executor` - Performs the HTTP exchange
    /// * `forced` - Response body type override, [`BodyType::None`] to infer
    pub fn start(num_workers: usize, executor: Arc<dyn HttpExecutor>, forced: BodyType) -> Self {
        let num_workers = num_workers.max(1);
        let (work_tx, work_rx) = mpsc::unbounded_channel::<Queued>();
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        let work_rx = Arc::new(Mutex::new(work_rx));

        let worker_handles = (0..num_workers)
            .map(|i| {
                let worker = Worker {
                    id: i,
                    work_rx: Arc::clone(&work_rx),
                    result_tx: result_tx.clone(),
                    executor: Arc::clone(&executor),
                    forced,
                };
                tokio::spawn(worker.run())
            })
            .collect();

        debug!(num_workers, "Dispatcher started");

        Self {
            num_workers,
            slots: Arc::new(Semaphore::new(num_workers)),
            work_tx: Some(work_tx),
            result_rx,
            worker_handles,
        }
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Queues a unit, waiting while every worker is busy.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Closed` after [`finish`](Self::finish) or
    /// [`abort`](Self::abort).
    pub async fn submit(&self, unit: WorkUnit) -> Result<(), DispatchError> {
        let work_tx = self.work_tx.as_ref().ok_or(DispatchError::Closed)?;
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| DispatchError::Closed)?;
        work_tx
            .send((unit, permit))
            .map_err(|_| DispatchError::Closed)
    }

    /// Stops accepting work. Queued and running units still complete.
    pub fn finish(&mut self) {
        self.work_tx = None;
    }

    /// Returns the next completed result, or `None` once the pool has been
    /// finished and every submitted unit has been reported.
    pub async fn next_result(&mut self) -> Option<WorkResult> {
        self.result_rx.recv().await
    }

    /// Stops all workers immediately. Requests in flight are dropped.
    pub fn abort(&mut self) {
        self.work_tx = None;
        self.slots.close();
        for handle in self.worker_handles.drain(..) {
            handle.abort();
        }
        self.result_rx.close();
    }
}

struct Worker {
    id: usize,
    work_rx: Arc<Mutex<mpsc::UnboundedReceiver<Queued>>>,
    result_tx: mpsc::UnboundedSender<WorkResult>,
    executor: Arc<dyn HttpExecutor>,
    forced: BodyType,
}

impl Worker {
    async fn run(self) {
        loop {
            let next = self.work_rx.lock().await.recv().await;
            let Some((unit, permit)) = next else {
                break;
            };

            debug!(worker_id = self.id, index = unit.index, url = %unit.req.url, "Dispatching request");
            let res = self.executor.execute(unit.req, self.forced).await;
            drop(permit);

            let result = WorkResult {
                index: unit.index,
                unique_key: unit.unique_key,
                res,
            };
            if self.result_tx.send(result).is_err() {
                warn!(worker_id = self.id, "Result receiver dropped");
                break;
            }
        }
        debug!(worker_id = self.id, "Worker stopped");
    }
}
