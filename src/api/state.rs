//! Application state for the API server

use crate::controller::PackagingController;
use crate::worker::{MemoryJob, ProcessorRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared application state accessible to all route handlers
///
/// This struct is cloned for each request (cheap Arc clone).
#[derive(Clone)]
pub struct AppState {
    /// The packaging controller
    pub controller: Arc<PackagingController>,

    /// File-groups processors available to jobs
    pub processors: Arc<ProcessorRegistry>,

    /// Jobs started through the API, by job id
    pub jobs: Arc<RwLock<HashMap<String, Arc<MemoryJob>>>>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(controller: Arc<PackagingController>, processors: Arc<ProcessorRegistry>) -> Self {
        Self {
            controller,
            processors,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}
