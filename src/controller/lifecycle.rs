//! Shutdown coordination.

use crate::error::Result;
use crate::types::Event;
use std::sync::atomic::Ordering;

use super::PackagingController;

impl PackagingController {
    /// Gracefully shut down the controller
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new packages
    /// 2. Cancels every package still waiting in the queue
    /// 3. Waits for running packages to finish, bounded by `shutdown_timeout`
    /// 4. Emits [`Event::Shutdown`]
    ///
    /// Packages still running after the timeout keep their slots and finish
    /// (or observe a later cancel) on their own.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        // 1. Stop accepting new packages
        self.state.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new packages");

        // 2. Cancel queued packages
        let queued: Vec<_> = self.state.queue.lock().await.drain(..).collect();
        let canceled = queued.len();
        for item in queued {
            self.finish_unstarted(item, "Packaging canceled by shutdown");
        }
        tracing::info!(canceled, "Canceled queued packages");

        // 3. Wait for running packages with timeout
        let shutdown_timeout = self.config.scheduler.shutdown_timeout;
        match tokio::time::timeout(shutdown_timeout, self.wait_for_active_packages()).await {
            Ok(()) => {
                tracing::info!("All running packages completed");
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = shutdown_timeout.as_secs(),
                    "Timeout waiting for packages to complete, proceeding with shutdown"
                );
            }
        }

        // 4. Emit shutdown event
        let _ = self.event_tx.send(Event::Shutdown);
        tracing::info!("Shutdown complete");
        Ok(())
    }

    /// Wait until no package holds a slot
    async fn wait_for_active_packages(&self) {
        let max_total = self.config.scheduler.max_total_jobs;
        loop {
            let active = max_total.saturating_sub(self.state.total_limit.available_permits());
            if active == 0 {
                break;
            }
            tracing::debug!(active, "Waiting for running packages to complete");
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }
}
