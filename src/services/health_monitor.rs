//! Periodic model health checks driven from a background task.

use std::panic::AssertUnwindSafe;
use std::sync::Weak;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::services::model_registry::ModelRegistry;

/// Background task running periodic model health check cycles.
///
/// Each cycle probes every registered model, then the task sleeps for
/// `interval`. A cycle that panics is logged and followed by the shorter
/// `retry_interval`. The task holds only a weak reference to the registry
/// and ends on its own once the registry is dropped.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use maestro::services::{HealthMonitor, ModelRegistry};
///
/// # async fn example() {
/// let registry = Arc::new(ModelRegistry::with_default_catalog());
/// let monitor = HealthMonitor::spawn(
///     Arc::downgrade(&registry),
///     Duration::from_secs(300),
///     Duration::from_secs(60),
/// );
///
/// // Later: graceful shutdown
/// monitor.stop().await;
/// # }
/// ```
pub struct HealthMonitor {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl HealthMonitor {
    pub fn spawn(registry: Weak<ModelRegistry>, interval: Duration, retry_interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move {
            tracing::info!(
                interval_secs = interval.as_secs(),
                retry_interval_secs = retry_interval.as_secs(),
                "started model health monitoring"
            );

            loop {
                let Some(registry) = registry.upgrade() else {
                    tracing::debug!("model registry dropped, stopping health monitoring");
                    break;
                };

                let cycle = AssertUnwindSafe(registry.health_check_all()).catch_unwind();
                let pause = tokio::select! {
                    outcome = cycle => match outcome {
                        Ok(summary) => {
                            tracing::info!(
                                healthy = summary.healthy,
                                total = summary.total,
                                "model health check cycle complete"
                            );
                            interval
                        }
                        Err(_) => {
                            tracing::error!("model health check cycle panicked");
                            retry_interval
                        }
                    },
                    _ = shutdown_rx.recv() => break,
                };
                drop(registry);

                tokio::select! {
                    () = tokio::time::sleep(pause) => {}
                    _ = shutdown_rx.recv() => break,
                }
            }

            tracing::info!("model health monitoring stopped");
        });

        Self { shutdown_tx, handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal shutdown and wait for the task to exit.
    pub async fn stop(self) {
        // The task may already be gone, in which case nobody is listening.
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "health monitor task ended abnormally");
        }
    }
}
