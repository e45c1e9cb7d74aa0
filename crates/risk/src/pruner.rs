//! Background pruning of idle risk state

use crate::tracker::RiskTracker;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Running pruner task; aborted if dropped without [`shutdown`](Self::shutdown)
pub struct PrunerHandle {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl PrunerHandle {
    /// Stop the task and wait for it to finish
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Risk pruner task failed");
            }
        }
    }
}

impl Drop for PrunerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Run [`RiskTracker::prune`] every `interval` on the current runtime
pub fn spawn_pruner(tracker: Arc<RiskTracker>, interval: Duration) -> PrunerHandle {
    let (stop_tx, mut stop_rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = ticker.tick() => {
                    let stats = tracker.prune(Utc::now());
                    if stats.windows > 0 || stats.alerts > 0 {
                        tracing::debug!(
                            timestamps = stats.timestamps,
                            windows = stats.windows,
                            alerts = stats.alerts,
                            "Pruned risk state"
                        );
                    }
                }
            }
        }

        tracing::debug!("Risk pruner stopped");
    });

    PrunerHandle {
        stop: Some(stop_tx),
        task: Some(task),
    }
}
