//! Periodic Synchronization
//!
//! Runs the [`ReleaseSynchronizer`] once at start-up and then on a fixed
//! interval until shut down. Each run happens in its own task so a panic is
//! reported like any other fatal failure instead of ending the loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::engine::alert::{Alert, Alerter};
use crate::engine::release::{ReleaseSynchronizer, SyncStatus, SyncStatusBoard, UpstreamSource};

pub struct Scheduler<U> {
    synchronizer: Arc<ReleaseSynchronizer<U>>,
    status: Arc<SyncStatusBoard>,
    alerter: Alerter,
    interval: Duration,
}

impl<U: UpstreamSource + 'static> Scheduler<U> {
    pub fn new(
        synchronizer: Arc<ReleaseSynchronizer<U>>,
        status: Arc<SyncStatusBoard>,
        alerter: Alerter,
        interval: Duration,
    ) -> Self {
        Self {
            synchronizer,
            status,
            alerter,
            interval,
        }
    }

    /// Run one synchronization, record it and alert on fatal failures.
    pub async fn run_once(&self) -> SyncStatus {
        let started_at = self.status.start();
        let source = self.synchronizer.store().source().clone();

        let synchronizer = self.synchronizer.clone();
        let joined = tokio::spawn(async move { synchronizer.run().await }).await;

        let status = match joined {
            Ok(Ok(outcome)) => SyncStatus::from(&outcome),
            // Transient failures come back as Ok(Deferred), so anything here is fatal
            Ok(Err(e)) => {
                let subject = format!("Synchronization of {} failed", source);
                self.alerter.raise(Alert::new(subject, e.to_string())).await;
                SyncStatus::Failed { reason: e.to_string() }
            }
            Err(e) => {
                let reason = if e.is_panic() {
                    "synchronization task panicked".to_string()
                } else {
                    format!("synchronization task was cancelled: {}", e)
                };
                let subject = format!("Synchronization of {} crashed", source);
                self.alerter.raise(Alert::new(subject, reason.clone())).await;
                SyncStatus::Failed { reason }
            }
        };

        self.status.finish(started_at, status.clone());
        debug!("Synchronization finished: {:?}", status);
        status
    }

    /// Run immediately, then every interval until `shutdown` flips to true
    /// or its sender is dropped.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Synchronizing {} every {:?}", self.synchronizer.store().source(), self.interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Scheduler stopped");
                            break;
                        }
                    }
                }
            }
        })
    }
}
