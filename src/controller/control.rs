//! Cancellation and status lookups.

use crate::background::BackgroundInfo;
use crate::error::Result;
use crate::report::PackagedReport;
use crate::types::{BackgroundState, Event, PackageId};
use tracing::{debug, info, warn};

use super::{PackagingController, QueuedPackage};

impl PackagingController {
    /// Cancel a package
    ///
    /// Sets the cancel flag in the package status. A package still waiting in
    /// the queue is removed and never runs; a running package notices the flag
    /// before its next file and deletes its partial archive.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::StatusMissing`](crate::error::PackageError::StatusMissing)
    /// when the package is unknown or its status already expired.
    pub async fn cancel(&self, id: &PackageId) -> Result<()> {
        self.cacher_for(id).cancel()?;

        let removed = {
            let mut queue = self.state.queue.lock().await;
            queue
                .iter()
                .position(|item| item.packager.id() == id)
                .and_then(|pos| queue.remove(pos))
        };

        match removed {
            Some(item) => {
                info!(package_id = %id, "removed canceled package from queue");
                self.finish_unstarted(item, "Packaging canceled before it started");
            }
            None => debug!(package_id = %id, "cancel flag set"),
        }
        Ok(())
    }

    /// Resolve a package that will never run with a `Canceled` report
    pub(crate) fn finish_unstarted(&self, item: QueuedPackage, message: &str) {
        let cacher = item.packager.cacher();
        if let Err(e) = cacher.cancel() {
            debug!(package_id = %cacher.id(), error = %e, "status gone before cancel");
        }

        let mut report = item
            .packager
            .estimate()
            .clone_with_state(BackgroundState::Canceled);
        report.add_message(message);
        if let Err(e) = cacher.set_report(&report) {
            warn!(package_id = %cacher.id(), error = %e, "could not store canceled report");
        }

        let _ = self.event_tx.send(Event::Canceled {
            id: cacher.id().clone(),
        });
        let _ = item.done_tx.send(report);
    }

    /// Current report of a package as its requester should see it
    pub fn status(&self, id: &PackageId) -> Result<PackagedReport> {
        self.cacher_for(id).status()
    }

    /// Full status record of a package
    pub fn info(&self, id: &PackageId) -> Result<BackgroundInfo> {
        self.cacher_for(id).info()
    }

    /// Change the address notified when the package is done
    pub fn set_email(&self, id: &PackageId, email: impl Into<String>) -> Result<()> {
        self.cacher_for(id).set_email(email)
    }

    /// Whether a package is still waiting for a slot
    pub async fn is_queued(&self, id: &PackageId) -> bool {
        self.state
            .queue
            .lock()
            .await
            .iter()
            .any(|item| item.packager.id() == id)
    }
}
