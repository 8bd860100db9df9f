//! Job-facing entry points
//!
//! A [`Worker`] adapts an external job (progress, phase, published results) to
//! the packaging engine. The file list always comes from a
//! [`FileGroupsProcessor`] looked up in a [`ProcessorRegistry`]:
//! - [`PackagingWorker`] zips the files through the [`PackagingController`](crate::controller::PackagingController)
//! - [`DownloadScriptWorker`] writes curl/wget scripts or URL lists instead

mod job;
mod packaging;
mod processor;
mod script;

pub use job::{Job, JobPhase, JobResult, JobStatus, MemoryJob};
pub use packaging::PackagingWorker;
pub use processor::{FileGroupsProcessor, InlineFileGroups, ProcessorRegistry, WorkerRequest};
pub use script::{DirectoryWorkspace, DownloadScriptWorker, ScriptType, WorkspaceSink, build_script};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What a command produced
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    /// Final phase of the job
    pub phase: JobPhase,
    /// Published artifacts
    pub results: Vec<JobResult>,
    /// Human-readable outcome
    pub summary: Option<String>,
}

/// Runs one kind of command for a job
#[async_trait]
pub trait Worker: Send + Sync {
    /// Attach the job that receives progress and results
    fn set_job(&mut self, job: Arc<dyn Job>);

    /// Execute the command
    ///
    /// Job-level failures (no processor, empty package) move the job to
    /// [`JobPhase::Error`] and are returned as errors; packaging outcomes,
    /// including cancellation, are returned as [`JobOutcome`]s.
    async fn do_command(&self, request: &WorkerRequest) -> Result<JobOutcome>;
}
