//! Bounded queue between the update endpoint and the update handler.
//!
//! The endpoint answers 204 as soon as the update is enqueued; a
//! background drain task applies updates in arrival order, retrying
//! writer contention with backoff. A full queue is backpressure: the
//! endpoint answers 503 and the worker retries delivery.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::artifacts::ArtifactStore;
use crate::config::Settings;
use crate::models::WorkItemUpdate;
use crate::repository::Db;
use crate::services;

const MAX_APPLY_ATTEMPTS: u32 = 5;
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(100);

/// One enqueued worker report.
#[derive(Debug)]
pub struct QueuedUpdate {
    pub work_item_id: i32,
    pub update: WorkItemUpdate,
}

/// Sending half handed to the endpoint.
#[derive(Clone)]
pub struct UpdateQueue {
    tx: mpsc::Sender<QueuedUpdate>,
}

impl UpdateQueue {
    /// Enqueue without waiting. Returns false when the queue is full.
    pub fn try_enqueue(&self, work_item_id: i32, update: WorkItemUpdate) -> bool {
        self.tx
            .try_send(QueuedUpdate {
                work_item_id,
                update,
            })
            .is_ok()
    }
}

/// Drain task state.
pub struct UpdateWorker {
    rx: mpsc::Receiver<QueuedUpdate>,
    db: Db,
    store: Arc<dyn ArtifactStore>,
    settings: Arc<Settings>,
}

impl UpdateWorker {
    /// Apply queued updates until every sender is gone.
    pub async fn run(mut self) {
        while let Some(queued) = self.rx.recv().await {
            self.apply_with_retry(queued).await;
        }
        debug!("update queue drained and closed");
    }

    async fn apply_with_retry(&self, queued: QueuedUpdate) {
        let mut delay = INITIAL_RETRY_DELAY;
        for attempt in 1..=MAX_APPLY_ATTEMPTS {
            match services::process_update(
                &self.db,
                self.store.as_ref(),
                &self.settings,
                queued.work_item_id,
                queued.update.clone(),
            )
            .await
            {
                Ok(()) => return,
                Err(e) if e.is_busy() && attempt < MAX_APPLY_ATTEMPTS => {
                    debug!(
                        work_item_id = queued.work_item_id,
                        attempt, "update hit writer contention, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => {
                    // Workers retry on transport errors; internal failures
                    // are logged and dropped, never surfaced to them.
                    error!(
                        work_item_id = queued.work_item_id,
                        "failed to apply work item update: {e}"
                    );
                    return;
                }
            }
        }
    }
}

/// Build the queue and its drain task.
pub fn channel(
    db: Db,
    store: Arc<dyn ArtifactStore>,
    settings: Arc<Settings>,
    capacity: usize,
) -> (UpdateQueue, UpdateWorker) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        UpdateQueue { tx },
        UpdateWorker {
            rx,
            db,
            store,
            settings,
        },
    )
}
