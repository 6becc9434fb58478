//! Quota-bounded take across the queue files of one pipeline.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::error::QueueError;
use crate::queue::{QueueSelector, RawRecord};

/// A record together with the queue file it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TakenRecord {
    pub queue: String,
    pub raw: RawRecord,
}

/// Takes up to `want` records, draining queue files in selection order.
///
/// Each queue is asked only for the quota still remaining. A queue that
/// fails to read is recorded in error by [`FileQueue::take`] and skipped by
/// the selector from then on.
///
/// [`FileQueue::take`]: crate::queue::FileQueue::take
///
/// # Errors
///
/// Returns `QueueError` only if the pipeline directory cannot be listed.
pub fn take(selector: &QueueSelector, want: u64) -> Result<Vec<TakenRecord>, QueueError> {
    let mut remaining = want;
    let mut records = Vec::new();
    // Queues that yielded nothing this take. A queue whose position could not
    // be persisted would otherwise be offered again forever.
    let mut stalled = HashSet::new();

    while remaining > 0 {
        let Some(mut queue) = selector.next_queue_except(&stalled)? else {
            debug!("No more data");
            break;
        };
        let name = queue.name().to_string();
        let n = usize::try_from(remaining).unwrap_or(usize::MAX);

        let batch = match queue.take(n) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(queue = %name, error = %e, "Skipping queue");
                Vec::new()
            }
        };

        if batch.is_empty() {
            debug!(queue = %name, "Queue yielded nothing, trying the next one");
            stalled.insert(name);
            continue;
        }

        remaining = remaining.saturating_sub(batch.len() as u64);
        records.extend(batch.into_iter().map(|raw| TakenRecord {
            queue: name.clone(),
            raw,
        }));
    }

    Ok(records)
}
