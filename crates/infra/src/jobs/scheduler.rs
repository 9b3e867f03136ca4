//! Timer-driven publish loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, info};

use helpline_queue::JobQueue;

use super::publisher::{JobPublisher, PublishReport};
use super::selector::{DueJobSelector, DuePolicy};
use super::store::{JobStore, JobStoreError};
use crate::workers::{PeriodicWorker, WorkerHandle};

/// Runs the selector → publisher pipeline, one tick at a time.
///
/// Ticks never overlap: a tick requested while another is running (timer or
/// [`JobScheduler::tick`]) waits for it and then computes its own due set, by
/// which point the jobs just published are no longer due.
#[derive(Debug)]
pub struct JobScheduler<S, Q> {
    store: S,
    selector: DueJobSelector,
    publisher: JobPublisher<S, Q>,
    tick_lock: Mutex<()>,
}

impl<S, Q> JobScheduler<S, Q>
where
    S: JobStore + Clone + 'static,
    Q: JobQueue + 'static,
{
    pub fn new(store: S, queue: Q, policy: DuePolicy, concurrency: usize) -> Self {
        Self {
            publisher: JobPublisher::new(store.clone(), queue, concurrency),
            store,
            selector: DueJobSelector::new(policy),
            tick_lock: Mutex::new(()),
        }
    }

    /// Run one tick now, independently of the timer.
    pub async fn tick(&self) -> Result<PublishReport, JobStoreError> {
        let _guard = self.tick_lock.lock().await;

        let due = self.selector.select(&self.store, Utc::now()).await?;
        if due.is_empty() {
            return Ok(PublishReport::default());
        }

        let selected = due.len();
        let report = self.publisher.publish_due_jobs(due).await;
        info!(
            selected,
            published = report.published,
            failed = report.failed,
            skipped = report.skipped,
            "publish tick finished"
        );
        Ok(report)
    }

    /// Start ticking every `period` until the handle is stopped.
    pub fn start(self: Arc<Self>, period: Duration) -> WorkerHandle {
        let scheduler = self;
        PeriodicWorker::spawn("contact-job-publisher", period, move || {
            let scheduler = Arc::clone(&scheduler);
            async move {
                if let Err(err) = scheduler.tick().await {
                    error!(error = %err, "publish tick failed");
                }
            }
        })
    }
}
