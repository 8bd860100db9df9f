//! Core types for zip-packager

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a packaging job
///
/// The id doubles as the cache key under which the job's [`BackgroundInfo`]
/// is stored and as the prefix of every staging file the job writes.
///
/// [`BackgroundInfo`]: crate::background::BackgroundInfo
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(pub String);

/// Per-process sequence used to keep generated ids unique within one millisecond
static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

impl PackageId {
    /// Create a PackageId from an existing string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh id of the form `pkg-<millis>-<seq>`
    pub fn generate() -> Self {
        let seq = NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self(format!(
            "pkg-{}-{}",
            chrono::Utc::now().timestamp_millis(),
            seq
        ))
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PackageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for PackageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for PackageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// State of a bundle or of a whole package
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundState {
    /// Not started yet
    #[default]
    Waiting,
    /// At least one file has been processed
    Working,
    /// Finished successfully (individual files may still have failed)
    Success,
    /// Finished with a fatal error
    Fail,
    /// Canceled by the requester
    Canceled,
}

impl BackgroundState {
    /// Terminal states accept no further mutation
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BackgroundState::Success | BackgroundState::Fail | BackgroundState::Canceled
        )
    }
}

impl std::fmt::Display for BackgroundState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BackgroundState::Waiting => "waiting",
            BackgroundState::Working => "working",
            BackgroundState::Success => "success",
            BackgroundState::Fail => "fail",
            BackgroundState::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// Scheduler lane a job is assigned to, based on its estimated size
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    /// Estimated total at or above the large-package threshold
    Large,
    /// Everything else
    Small,
}

/// Event emitted during the packaging lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Package accepted into the scheduler queue
    Queued {
        /// Package ID
        id: PackageId,
        /// Lane the package waits in
        lane: Lane,
        /// Number of packages waiting after this one was added
        queue_size: usize,
    },

    /// Package left the queue and started packaging
    Started {
        /// Package ID
        id: PackageId,
        /// Lane the package runs in
        lane: Lane,
    },

    /// Persisted progress update (byte-threshold gated)
    PackageProgress {
        /// Package ID
        id: PackageId,
        /// Index of the bundle being written
        package_idx: usize,
        /// Progress percentage over the whole package (0.0 to 100.0)
        percent: f32,
        /// Files processed so far in the whole package
        processed_files: usize,
        /// Bytes processed so far in the whole package
        processed_bytes: u64,
        /// Estimated total bytes of the package
        total_bytes: u64,
    },

    /// One bundle reached a terminal state
    BundleComplete {
        /// Package ID
        id: PackageId,
        /// Index of the finished bundle
        package_idx: usize,
        /// Final state of the bundle
        state: BackgroundState,
        /// Download URL of the produced archive (successful bundles only)
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },

    /// Whole package finished successfully
    Completed {
        /// Package ID
        id: PackageId,
        /// Download URLs, one per bundle
        urls: Vec<String>,
    },

    /// Whole package failed
    Failed {
        /// Package ID
        id: PackageId,
        /// Error message
        error: String,
    },

    /// Package was canceled (queued or running)
    Canceled {
        /// Package ID
        id: PackageId,
    },

    /// A completion webhook could not be delivered
    WebhookFailed {
        /// Webhook URL
        url: String,
        /// Error message
        error: String,
    },

    /// Controller shut down
    Shutdown,
}

/// Scheduler statistics
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QueueStats {
    /// Packages currently running
    pub active: usize,

    /// Large packages currently running
    pub active_large: usize,

    /// Packages waiting to start
    pub queued: usize,

    /// Large packages waiting to start
    pub queued_large: usize,

    /// Highest number of packages ever waiting at once
    pub queue_high_water: usize,

    /// Packages completed since start (queued and immediate)
    pub total_packaged: u64,

    /// Packages completed through immediate packaging
    pub total_immediate: u64,

    /// Longest time a still-queued package has been waiting, in milliseconds
    pub longest_wait_ms: u64,

    /// Configured limit of concurrent large packages
    pub max_large_jobs: usize,

    /// Configured limit of concurrent packages
    pub max_total_jobs: usize,

    /// Whether the controller accepts new submissions
    pub accepting_new: bool,
}
