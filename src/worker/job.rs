//! Job abstraction the workers report into

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

/// Execution phase of a job
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobPhase {
    /// Created, not submitted yet
    #[default]
    Pending,
    /// Waiting for a packaging slot
    Queued,
    /// Running
    Executing,
    /// Finished with results
    Completed,
    /// Finished with an error message
    Error,
    /// Canceled
    Aborted,
}

impl JobPhase {
    /// Whether the job has finished
    pub fn is_final(&self) -> bool {
        matches!(self, JobPhase::Completed | JobPhase::Error | JobPhase::Aborted)
    }
}

/// One artifact a job produced
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    /// Result id, unique within the job (e.g. "part1", "curl")
    pub id: String,
    /// Download URL
    pub href: String,
    /// Size of the artifact when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// Receives the progress and results of one command
///
/// Implementations use interior mutability: workers share the job with
/// background progress forwarders.
pub trait Job: Send + Sync {
    /// Job id (also used as package id)
    fn job_id(&self) -> &str;

    /// Move the job to `phase`
    fn set_phase(&self, phase: JobPhase);

    /// Report progress (0 to 100) with an optional description
    fn set_progress(&self, percent: u32, description: Option<String>);

    /// Publish an artifact
    fn add_result(&self, result: JobResult);

    /// Set the human-readable outcome
    fn set_summary(&self, summary: String);

    /// Record the error that ended the job
    fn set_error(&self, message: String);
}

/// Snapshot of a [`MemoryJob`]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    /// Job id
    pub job_id: String,
    /// Current phase
    pub phase: JobPhase,
    /// Progress percentage
    pub progress: u32,
    /// Progress description
    pub progress_desc: Option<String>,
    /// Published artifacts
    pub results: Vec<JobResult>,
    /// Outcome summary
    pub summary: Option<String>,
    /// Error message
    pub error: Option<String>,
}

/// In-memory [`Job`]
#[derive(Debug)]
pub struct MemoryJob {
    id: String,
    status: Mutex<JobStatus>,
}

impl MemoryJob {
    /// Create a pending job
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            status: Mutex::new(JobStatus {
                job_id: id.clone(),
                ..Default::default()
            }),
            id,
        }
    }

    /// Current state of the job
    pub fn snapshot(&self) -> JobStatus {
        self.status.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn update(&self, f: impl FnOnce(&mut JobStatus)) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut status);
    }
}

impl Job for MemoryJob {
    fn job_id(&self) -> &str {
        &self.id
    }

    fn set_phase(&self, phase: JobPhase) {
        self.update(|s| s.phase = phase);
    }

    fn set_progress(&self, percent: u32, description: Option<String>) {
        self.update(|s| {
            s.progress = percent.min(100);
            if description.is_some() {
                s.progress_desc = description;
            }
        });
    }

    fn add_result(&self, result: JobResult) {
        self.update(|s| s.results.push(result));
    }

    fn set_summary(&self, summary: String) {
        self.update(|s| s.summary = Some(summary));
    }

    fn set_error(&self, message: String) {
        self.update(|s| s.error = Some(message));
    }
}
