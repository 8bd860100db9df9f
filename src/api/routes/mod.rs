//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`packages`] - Package submission, status and cancellation
//! - [`queue`] - Scheduler statistics
//! - [`jobs`] - Worker jobs (zip packaging and download scripts)
//! - [`system`] - Download, health, events, shutdown

use serde::{Deserialize, Serialize};

mod jobs;
mod packages;
mod queue;
mod system;

// Re-export all handlers so `routes::function_name` works
pub use jobs::*;
pub use packages::*;
pub use queue::*;
pub use system::*;

// ============================================================================
// Query/Request Types (shared across handlers)
// ============================================================================

/// Query parameters for GET /download
#[derive(Debug, Deserialize, Serialize)]
pub struct DownloadQuery {
    /// Path of the artifact relative to the staging directory
    pub file: String,
    /// File name offered to the client (defaults to the file's own name)
    #[serde(rename = "return")]
    pub return_name: Option<String>,
}

/// Query parameters for POST /jobs/package
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct PackagingJobQuery {
    /// Package right away instead of queueing (default: false)
    #[serde(default)]
    pub immediate: bool,
}
