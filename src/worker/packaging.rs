//! Job entry point for zip packaging

use crate::controller::{PackageRequest, PackagingController};
use crate::error::{JobError, Result};
use crate::report::PackagedReport;
use crate::types::{BackgroundState, Event, PackageId};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use super::{Job, JobOutcome, JobPhase, JobResult, ProcessorRegistry, Worker, WorkerRequest};

/// Packages the file list of a request and publishes one result per zip
pub struct PackagingWorker {
    controller: PackagingController,
    processors: Arc<ProcessorRegistry>,
    job: Option<Arc<dyn Job>>,
    immediate: bool,
}

impl PackagingWorker {
    /// Create a worker that queues its packages on `controller`
    pub fn new(controller: PackagingController, processors: Arc<ProcessorRegistry>) -> Self {
        Self {
            controller,
            processors,
            job: None,
            immediate: false,
        }
    }

    /// Package right away instead of queueing
    pub fn with_immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    async fn run(&self, job: &Arc<dyn Job>, request: &WorkerRequest) -> Result<PackagedReport> {
        let processor = self.processors.get(&request.processor_id)?;
        let groups = processor.file_groups(request).await?;

        let package = PackageRequest {
            id: Some(PackageId::new(job.job_id())),
            groups,
            base_file_name: request.base_file_name.clone(),
            title: request.title.clone(),
            email: request.email.clone(),
            event_target: request.event_target.clone(),
            data_source: request.data_source.clone(),
        };

        let forwarder = spawn_progress_forwarder(&self.controller, job.clone());
        let result = if self.immediate {
            job.set_phase(JobPhase::Executing);
            match self.controller.create_packager(package) {
                Ok(packager) => self.controller.package_immediately(packager).await,
                Err(e) => Err(e),
            }
        } else {
            // before submitting: the forwarder moves the job to Executing
            job.set_phase(JobPhase::Queued);
            match self.controller.submit_request(package).await {
                Ok(handle) => handle.wait().await,
                Err(e) => Err(e),
            }
        };
        forwarder.abort();
        let _ = forwarder.await;
        result
    }
}

/// Mirror packaging events of the job's package into the job
fn spawn_progress_forwarder(
    controller: &PackagingController,
    job: Arc<dyn Job>,
) -> tokio::task::JoinHandle<()> {
    let mut events = controller.subscribe();
    let id = PackageId::new(job.job_id());
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(Event::Started { id: started, .. }) if started == id => {
                    job.set_phase(JobPhase::Executing);
                }
                Ok(Event::PackageProgress {
                    id: progressed,
                    percent,
                    processed_files,
                    ..
                }) if progressed == id => {
                    job.set_progress(
                        percent as u32,
                        Some(format!("{} files processed", processed_files)),
                    );
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!(package_id = %id, skipped, "progress forwarder lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[async_trait]
impl Worker for PackagingWorker {
    fn set_job(&mut self, job: Arc<dyn Job>) {
        self.job = Some(job);
    }

    async fn do_command(&self, request: &WorkerRequest) -> Result<JobOutcome> {
        let job = self.job.clone().ok_or(JobError::NoJob)?;

        let report = match self.run(&job, request).await {
            Ok(report) => report,
            Err(e) => {
                warn!(job_id = job.job_id(), error = %e, "packaging job failed");
                job.set_error(e.to_string());
                job.set_phase(JobPhase::Error);
                return Err(e);
            }
        };

        let outcome = match report.state {
            BackgroundState::Success => {
                let results: Vec<JobResult> = report
                    .bundles
                    .iter()
                    .filter_map(|bundle| {
                        bundle.url().map(|url| JobResult {
                            id: format!("part{}", bundle.package_idx() + 1),
                            href: url.to_string(),
                            size_bytes: Some(bundle.compressed_bytes()),
                        })
                    })
                    .collect();
                for result in &results {
                    job.add_result(result.clone());
                }
                let summary = success_summary(&report);
                job.set_progress(100, Some(summary.clone()));
                job.set_summary(summary.clone());
                job.set_phase(JobPhase::Completed);
                JobOutcome {
                    phase: JobPhase::Completed,
                    results,
                    summary: Some(summary),
                }
            }
            BackgroundState::Canceled => {
                job.set_phase(JobPhase::Aborted);
                JobOutcome {
                    phase: JobPhase::Aborted,
                    results: Vec::new(),
                    summary: report.messages.last().cloned(),
                }
            }
            state => {
                let message = if report.messages.is_empty() {
                    format!("Packaging ended in state {}", state)
                } else {
                    report.messages.join(" ")
                };
                job.set_error(message.clone());
                job.set_phase(JobPhase::Error);
                JobOutcome {
                    phase: JobPhase::Error,
                    results: Vec::new(),
                    summary: Some(message),
                }
            }
        };
        Ok(outcome)
    }
}

fn success_summary(report: &PackagedReport) -> String {
    let parts = report.part_count();
    let mut summary = format!(
        "{} files packaged in {} {}",
        report.processed_files(),
        parts,
        if parts == 1 { "part" } else { "parts" }
    );
    if !report.messages.is_empty() {
        summary.push_str(". ");
        summary.push_str(&report.messages.join(" "));
    }
    summary
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::Config;
    use crate::error::Error;
    use crate::worker::MemoryJob;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Job recording every phase it is moved to
    struct PhaseHistory {
        inner: MemoryJob,
        phases: Mutex<Vec<JobPhase>>,
    }

    impl Job for PhaseHistory {
        fn job_id(&self) -> &str {
            self.inner.job_id()
        }

        fn set_phase(&self, phase: JobPhase) {
            self.phases.lock().unwrap().push(phase);
            self.inner.set_phase(phase);
        }

        fn set_progress(&self, percent: u32, description: Option<String>) {
            self.inner.set_progress(percent, description);
        }

        fn add_result(&self, result: JobResult) {
            self.inner.add_result(result);
        }

        fn set_summary(&self, summary: String) {
            self.inner.set_summary(summary);
        }

        fn set_error(&self, message: String) {
            self.inner.set_error(message);
        }
    }

    fn setup(staging: &TempDir, sources: &TempDir) -> (PackagingWorker, Arc<MemoryJob>, WorkerRequest) {
        let mut config = Config::default();
        config.packaging.staging_dir = staging.path().to_path_buf();
        config.disk_space.enabled = false;
        let controller = PackagingController::new(config, Arc::new(MemoryCache::default())).unwrap();

        std::fs::write(sources.path().join("a.tbl"), b"| ra | dec |").unwrap();
        std::fs::write(sources.path().join("b.tbl"), b"| ra | dec | flux |").unwrap();
        let request = WorkerRequest {
            processor_id: "inline".into(),
            params: serde_json::json!({
                "groups": [{
                    "base_dir": sources.path(),
                    "files": [
                        {"locator": "a.tbl", "external_name": "a.tbl", "size_bytes": 12},
                        {"locator": "b.tbl", "external_name": "b.tbl", "size_bytes": 18},
                    ],
                }]
            }),
            base_file_name: "catalogs".into(),
            ..Default::default()
        };

        let job = Arc::new(MemoryJob::new("job-pack-1"));
        let mut worker = PackagingWorker::new(controller, Arc::new(ProcessorRegistry::with_inline()));
        worker.set_job(job.clone());
        (worker, job, request)
    }

    #[tokio::test]
    async fn test_packaging_job_completes_with_one_result_per_zip() {
        let (staging, sources) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let (worker, job, request) = setup(&staging, &sources);

        let outcome = worker.do_command(&request).await.unwrap();

        assert_eq!(outcome.phase, JobPhase::Completed);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].id, "part1");
        let status = job.snapshot();
        assert_eq!(status.phase, JobPhase::Completed);
        assert_eq!(status.progress, 100);
        assert_eq!(status.summary.as_deref(), Some("2 files packaged in 1 part"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_queued_job_phase_never_moves_backwards() {
        let (staging, sources) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let (worker, _, request) = setup(&staging, &sources);

        for round in 0..10 {
            let job = Arc::new(PhaseHistory {
                inner: MemoryJob::new(format!("job-phases-{}", round)),
                phases: Mutex::new(Vec::new()),
            });
            let mut worker =
                PackagingWorker::new(worker.controller.clone(), worker.processors.clone());
            worker.set_job(job.clone());

            let outcome = worker.do_command(&request).await.unwrap();
            assert_eq!(outcome.phase, JobPhase::Completed);

            let phases = job.phases.lock().unwrap().clone();
            assert_eq!(phases.first(), Some(&JobPhase::Queued), "{:?}", phases);
            assert_eq!(phases.last(), Some(&JobPhase::Completed), "{:?}", phases);
            assert!(
                phases[1..].iter().all(|p| *p != JobPhase::Queued),
                "phase went back to Queued: {:?}",
                phases
            );
        }
    }

    #[tokio::test]
    async fn test_immediate_packaging_job() {
        let (staging, sources) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let (worker, job, request) = setup(&staging, &sources);
        let worker = worker.with_immediate(true);

        let outcome = worker.do_command(&request).await.unwrap();
        assert_eq!(outcome.phase, JobPhase::Completed);
        assert_eq!(job.snapshot().results.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_processor_sets_error_phase() {
        let (staging, sources) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let (worker, job, mut request) = setup(&staging, &sources);
        request.processor_id = "heritage".into();

        let err = worker.do_command(&request).await.unwrap_err();

        assert!(matches!(err, Error::Job(JobError::NoProcessor { .. })));
        let status = job.snapshot();
        assert_eq!(status.phase, JobPhase::Error);
        assert!(status.error.unwrap().contains("heritage"));
    }

    #[tokio::test]
    async fn test_empty_file_list_is_error_phase() {
        let (staging, sources) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let (worker, job, mut request) = setup(&staging, &sources);
        request.params = serde_json::json!({"groups": []});

        assert!(worker.do_command(&request).await.is_err());
        assert_eq!(job.snapshot().phase, JobPhase::Error);
    }

    #[tokio::test]
    async fn test_worker_without_job_is_rejected() {
        let (staging, sources) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let (worker, _, request) = setup(&staging, &sources);
        let worker = PackagingWorker::new(worker.controller.clone(), worker.processors.clone());

        let err = worker.do_command(&request).await.unwrap_err();
        assert!(matches!(err, Error::Job(JobError::NoJob)));
    }
}
