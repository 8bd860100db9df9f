//! File list producers

use crate::error::{JobError, Result};
use crate::file_group::FileGroup;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::ScriptType;

/// Command parameters handed to a worker
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WorkerRequest {
    /// Id of the [`FileGroupsProcessor`] that produces the file list
    pub processor_id: String,

    /// Processor-specific parameters
    #[serde(default)]
    pub params: serde_json::Value,

    /// Base name of the produced files
    #[serde(default)]
    pub base_file_name: String,

    /// Human-readable title
    #[serde(default)]
    pub title: Option<String>,

    /// Address notified when the package is done
    #[serde(default)]
    pub email: Option<String>,

    /// Where completion events are routed
    #[serde(default)]
    pub event_target: Option<String>,

    /// Name of the data set the files come from
    #[serde(default)]
    pub data_source: Option<String>,

    /// Script flavors to produce (download-script jobs only)
    #[serde(default)]
    pub scripts: Vec<ScriptType>,

    /// Also save produced scripts to the workspace
    #[serde(default)]
    pub save_to_workspace: bool,
}

/// Produces the file groups for a request
#[async_trait]
pub trait FileGroupsProcessor: Send + Sync {
    /// File groups to package for `request`, in order
    async fn file_groups(&self, request: &WorkerRequest) -> Result<Vec<FileGroup>>;
}

/// Processor that reads the groups from `params.groups`
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineFileGroups;

#[async_trait]
impl FileGroupsProcessor for InlineFileGroups {
    async fn file_groups(&self, request: &WorkerRequest) -> Result<Vec<FileGroup>> {
        match request.params.get("groups") {
            Some(groups) => Ok(serde_json::from_value(groups.clone())?),
            None => Ok(Vec::new()),
        }
    }
}

/// Processors by id
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn FileGroupsProcessor>>,
}

impl ProcessorRegistry {
    /// Registry with [`InlineFileGroups`] registered as "inline"
    pub fn with_inline() -> Self {
        let mut registry = Self::default();
        registry.register("inline", Arc::new(InlineFileGroups));
        registry
    }

    /// Register `processor` under `id`, replacing any previous one
    pub fn register(&mut self, id: impl Into<String>, processor: Arc<dyn FileGroupsProcessor>) {
        self.processors.insert(id.into(), processor);
    }

    /// Processor for `id`
    ///
    /// # Errors
    ///
    /// Returns [`JobError::NoProcessor`] when nothing is registered under `id`.
    pub fn get(&self, id: &str) -> Result<Arc<dyn FileGroupsProcessor>> {
        self.processors.get(id).cloned().ok_or_else(|| {
            JobError::NoProcessor {
                request_id: id.to_string(),
            }
            .into()
        })
    }

    /// Ids of all registered processors
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.processors.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("processors", &self.ids())
            .finish()
    }
}
