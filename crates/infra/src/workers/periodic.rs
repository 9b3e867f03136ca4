use std::future::Future;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};

/// Handle to control and join a background loop.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Request graceful shutdown and wait for the loop to stop.
    ///
    /// A tick in progress runs to completion first.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            if let Err(err) = join.await {
                warn!(worker = self.name, error = %err, "worker task ended abnormally");
            }
        }
    }
}

/// Timer-driven loop running one tick at a time.
///
/// - First tick fires immediately
/// - A tick that overruns the period delays the next one (missed ticks are
///   skipped, never bunched up), so ticks of one loop never overlap
/// - Stops at the next tick boundary after [`WorkerHandle::stop`]
#[derive(Debug)]
pub struct PeriodicWorker;

impl PeriodicWorker {
    /// Spawn the loop on the current tokio runtime.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> WorkerHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let join = tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(worker = name, period_ms = period.as_millis() as u64, "worker started");

            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    _ = interval.tick() => tick().await,
                }
            }

            info!(worker = name, "worker stopped");
        });

        WorkerHandle {
            name,
            shutdown: Some(shutdown_tx),
            join: Some(join),
        }
    }
}
