//! Submission, dispatch and job execution.

use crate::background::BackgroundInfoCacher;
use crate::error::{Error, Result};
use crate::packager::Packager;
use crate::report::PackagedReport;
use crate::types::{BackgroundState, Event, Lane};
use crate::utils::format_size;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, oneshot};
use tracing::{debug, info, warn};

use super::{PackageHandle, PackageRequest, PackagingController, QueuedPackage};

/// Slots held by a running package, released when dropped
struct Permits {
    _large: Option<OwnedSemaphorePermit>,
    _total: OwnedSemaphorePermit,
}

impl PackagingController {
    /// Create a package from `request` and queue it
    pub async fn submit_request(&self, request: PackageRequest) -> Result<PackageHandle> {
        if !self.state.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        let packager = self.create_packager(request)?;
        self.submit(packager).await
    }

    /// Queue a package for background packaging
    ///
    /// Submissions are never rejected while the controller runs; the package
    /// starts as soon as a slot in its lane is free.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] after [`shutdown`](Self::shutdown).
    pub async fn submit(&self, packager: Packager) -> Result<PackageHandle> {
        if !self.state.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let id = packager.id().clone();
        let lane = self.lane_for(packager.estimated_bytes());
        let (done_tx, done_rx) = oneshot::channel();

        let queue_size = {
            let mut queue = self.state.queue.lock().await;
            queue.push_back(QueuedPackage {
                packager,
                lane,
                submitted_at: Instant::now(),
                done_tx,
            });
            queue.len()
        };
        self.counters
            .queue_high_water
            .fetch_max(queue_size, Ordering::Relaxed);

        debug!(package_id = %id, ?lane, queue_size, "package queued");
        let _ = self.event_tx.send(Event::Queued {
            id: id.clone(),
            lane,
            queue_size,
        });

        self.start_ready_jobs().await;

        Ok(PackageHandle {
            id,
            lane,
            done: done_rx,
        })
    }

    /// Start every queued package that has a free slot
    ///
    /// Scans the queue in submission order. A large package that cannot get a
    /// large slot stays queued without holding back the small packages behind
    /// it. Returns the number of packages started.
    pub(crate) async fn start_ready_jobs(&self) -> usize {
        let mut started = 0;
        {
            let mut queue = self.state.queue.lock().await;
            if queue.is_empty() {
                debug!("queue empty, no packages to start");
                return 0;
            }

            let mut idx = 0;
            while idx < queue.len() {
                if self.state.total_limit.available_permits() == 0 {
                    debug!("max packagers already running");
                    break;
                }

                let large = if queue[idx].lane == Lane::Large {
                    match self.state.large_limit.clone().try_acquire_owned() {
                        Ok(permit) => Some(permit),
                        Err(_) => {
                            idx += 1;
                            continue;
                        }
                    }
                } else {
                    None
                };
                let total = match self.state.total_limit.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => break,
                };

                if let Some(item) = queue.remove(idx) {
                    self.spawn_package(
                        item,
                        Permits {
                            _large: large,
                            _total: total,
                        },
                    );
                    started += 1;
                }
            }
        }

        info!(started, "new packagers started");
        self.log_status_report().await;
        started
    }

    fn spawn_package(&self, item: QueuedPackage, permits: Permits) {
        let controller = self.clone();
        tokio::spawn(async move {
            let QueuedPackage {
                packager,
                lane,
                submitted_at,
                done_tx,
            } = item;
            let waited = submitted_at.elapsed();
            let cacher = packager.cacher().clone();
            let one_file = packager.is_one_file();

            info!(package_id = %cacher.id(), ?lane, wait_ms = waited.as_millis() as u64, "package started");
            let _ = controller.event_tx.send(Event::Started {
                id: cacher.id().clone(),
                lane,
            });

            let started_at = Instant::now();
            let report = controller.run_packager(packager, &cacher).await;
            drop(permits);

            let report = controller.complete_package(
                &cacher,
                report,
                CompletionTiming {
                    waited,
                    zip_time: started_at.elapsed(),
                    immediate: false,
                    one_file,
                },
            );
            let _ = done_tx.send(report);

            controller.start_ready_jobs().await;
        });
    }

    /// Package right away on a blocking thread, outside the queue and its limits
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] after [`shutdown`](Self::shutdown).
    pub async fn package_immediately(&self, packager: Packager) -> Result<PackagedReport> {
        if !self.state.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let cacher = packager.cacher().clone();
        let lane = self.lane_for(packager.estimated_bytes());
        let one_file = packager.is_one_file();
        let _ = self.event_tx.send(Event::Started {
            id: cacher.id().clone(),
            lane,
        });

        let started_at = Instant::now();
        let report = self.run_packager(packager, &cacher).await;
        Ok(self.complete_package(
            &cacher,
            report,
            CompletionTiming {
                waited: Duration::ZERO,
                zip_time: started_at.elapsed(),
                immediate: true,
                one_file,
            },
        ))
    }

    /// Run `package_all` on a blocking thread; a panic becomes a failed report
    async fn run_packager(
        &self,
        mut packager: Packager,
        cacher: &BackgroundInfoCacher,
    ) -> PackagedReport {
        match tokio::task::spawn_blocking(move || packager.package_all()).await {
            Ok(report) => report,
            Err(e) => {
                let reason = panic_message(e);
                warn!(package_id = %cacher.id(), error = %reason, "packaging aborted unexpectedly");

                let mut report = match cacher.report() {
                    Ok(Some(report)) => report.clone_with_state(BackgroundState::Fail),
                    _ => PackagedReport::new(cacher.id().clone(), Vec::new(), 0, BackgroundState::Fail),
                };
                report.add_message(format!("Packaging aborted unexpectedly: {}", reason));

                if !cacher.is_canceled()
                    && let Err(e) = cacher.set_report(&report)
                {
                    warn!(package_id = %cacher.id(), error = %e, "could not store failed report");
                }
                report
            }
        }
    }

    /// Publish the outcome of a finished package
    fn complete_package(
        &self,
        cacher: &BackgroundInfoCacher,
        report: PackagedReport,
        timing: CompletionTiming,
    ) -> PackagedReport {
        let id = cacher.id().clone();
        let canceled = cacher.is_canceled();

        let report = if canceled {
            let mut report = cacher
                .status()
                .unwrap_or_else(|_| report.clone_with_state(BackgroundState::Canceled));
            report.state = BackgroundState::Canceled;
            report
        } else {
            report
        };

        let event = match report.state {
            BackgroundState::Success => Event::Completed {
                id: id.clone(),
                urls: report.urls(),
            },
            BackgroundState::Canceled => Event::Canceled { id: id.clone() },
            state => Event::Failed {
                id: id.clone(),
                error: report
                    .messages
                    .last()
                    .cloned()
                    .unwrap_or_else(|| format!("packaging ended in state {}", state)),
            },
        };
        let _ = self.event_tx.send(event);

        if !canceled
            && report.is_done()
            && let Some(notifier) = &self.notifier
        {
            match cacher.info() {
                Ok(info) if info.email.is_some() || info.event_target.is_some() => {
                    notifier.notify(&info, &report);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(package_id = %id, error = %e, "cannot notify, status unavailable");
                }
            }
        }

        self.counters.total_packaged.fetch_add(1, Ordering::Relaxed);
        if timing.immediate {
            self.counters.total_immediate.fetch_add(1, Ordering::Relaxed);
        }

        info!(
            package_id = %id,
            state = %report.state,
            zip_time_ms = timing.zip_time.as_millis() as u64,
            wait_time_ms = timing.waited.as_millis() as u64,
            size = %format_size(report.processed_bytes()),
            immediate = timing.immediate,
            "Packaging completed"
        );
        if timing.one_file {
            debug!(package_id = %id, "one file, not zipped");
        }

        report
    }
}

struct CompletionTiming {
    waited: Duration,
    zip_time: Duration,
    immediate: bool,
    one_file: bool,
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
