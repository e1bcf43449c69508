use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::services::EdgeReconciler;

/// Shortest accepted sweep period; `tokio::time::interval` rejects zero.
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Periodically sweeps all users and repairs one-sided follow edges.
pub struct ReconciliationWorker {
    reconciler: EdgeReconciler,
    interval: Duration,
    batch_size: usize,
}

impl ReconciliationWorker {
    pub fn new(reconciler: EdgeReconciler, interval: Duration, batch_size: usize) -> Self {
        if interval < MIN_INTERVAL {
            warn!(
                requested_ms = interval.as_millis() as u64,
                "Reconcile interval too short, using minimum"
            );
        }
        Self {
            reconciler,
            interval: interval.max(MIN_INTERVAL),
            batch_size: batch_size.max(1),
        }
    }

    /// Spawn the sweep loop.
    ///
    /// Sending on (or dropping) the returned sender stops the loop after the
    /// sweep in progress, if any, has finished.
    pub fn spawn(self) -> (watch::Sender<()>, tokio::task::JoinHandle<()>) {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(());

        let handle = tokio::spawn(async move {
            info!(
                interval_ms = self.interval.as_millis() as u64,
                batch_size = self.batch_size,
                "Reconciliation worker started"
            );

            let mut timer = interval(self.interval);

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        info!("Reconciliation worker received shutdown signal");
                        break;
                    }
                    _ = timer.tick() => self.run_once().await,
                }
            }

            info!("Reconciliation worker stopped");
        });

        (shutdown_tx, handle)
    }

    async fn run_once(&self) {
        let start = Instant::now();
        match self.reconciler.sweep(self.batch_size).await {
            Ok(report) if report.errors.is_empty() => info!(
                users_scanned = report.users_scanned,
                repairs = report.repairs(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Reconciliation cycle complete"
            ),
            Ok(report) => warn!(
                users_scanned = report.users_scanned,
                repairs = report.repairs(),
                errors = report.errors.len(),
                first_error = %report.errors[0],
                "Reconciliation cycle finished with errors"
            ),
            Err(e) => error!(error = %e, "Reconciliation cycle failed"),
        }
    }
}
