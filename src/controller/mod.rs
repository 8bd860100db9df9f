//! Bounded two-lane packaging scheduler split into focused submodules.
//!
//! The `PackagingController` struct and its methods are organized by domain:
//! - [`scheduling`] - Submission, dispatch and job execution
//! - [`control`] - Cancellation and status lookups
//! - [`stats`] - Queue statistics and status reports
//! - [`lifecycle`] - Shutdown coordination

mod control;
mod lifecycle;
mod scheduling;
mod stats;


use crate::background::{BackgroundInfo, BackgroundInfoCacher};
use crate::cache::StatusCache;
use crate::config::Config;
use crate::error::{JobError, Result};
use crate::fetch::SourceFetcher;
use crate::file_group::FileGroup;
use crate::notify::{Notifier, WebhookNotifier};
use crate::packager::{DownloadUrlResolver, Packager, PackagerContext};
use crate::report::PackagedReport;
use crate::types::{Event, Lane, PackageId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize};
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore, broadcast, oneshot};

/// Everything needed to start a package
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PackageRequest {
    /// Package id; generated when absent
    #[serde(default)]
    pub id: Option<PackageId>,

    /// Files to package, in order
    pub groups: Vec<FileGroup>,

    /// Base name of the produced zip files
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
}

/// Handle to a submitted package
#[derive(Debug)]
pub struct PackageHandle {
    id: PackageId,
    lane: Lane,
    done: oneshot::Receiver<PackagedReport>,
}

impl PackageHandle {
    /// Package id
    pub fn id(&self) -> &PackageId {
        &self.id
    }

    /// Lane the package was assigned to
    pub fn lane(&self) -> Lane {
        self.lane
    }

    /// Wait for the final report
    pub async fn wait(self) -> Result<PackagedReport> {
        self.done.await.map_err(|_| {
            JobError::Aborted {
                job_id: self.id.to_string(),
                reason: "packaging task ended without a report".to_string(),
            }
            .into()
        })
    }
}

/// A package waiting for a free slot
pub(crate) struct QueuedPackage {
    pub(crate) packager: Packager,
    pub(crate) lane: Lane,
    pub(crate) submitted_at: Instant,
    pub(crate) done_tx: oneshot::Sender<PackagedReport>,
}

/// Queue and slot management
#[derive(Clone)]
pub(crate) struct SchedulerState {
    /// Waiting packages in submission order
    pub(crate) queue: Arc<Mutex<VecDeque<QueuedPackage>>>,
    /// Slots for large packages (max_large_jobs)
    pub(crate) large_limit: Arc<Semaphore>,
    /// Slots for all packages (max_total_jobs)
    pub(crate) total_limit: Arc<Semaphore>,
    /// Set to false during shutdown
    pub(crate) accepting_new: Arc<AtomicBool>,
}

/// Lifetime counters
#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) queue_high_water: AtomicUsize,
    pub(crate) total_packaged: AtomicU64,
    pub(crate) total_immediate: AtomicU64,
}

/// Runs packages with at most `max_large_jobs` large and `max_total_jobs`
/// packages at once (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct PackagingController {
    pub(crate) config: Arc<Config>,
    pub(crate) cache: Arc<dyn StatusCache>,
    pub(crate) ctx: PackagerContext,
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) notifier: Option<Arc<dyn Notifier>>,
    pub(crate) state: SchedulerState,
    pub(crate) counters: Arc<Counters>,
}

impl PackagingController {
    /// Create a controller
    ///
    /// Validates the configuration. When webhooks are configured, finished
    /// packages are reported to them.
    pub fn new(config: Config, cache: Arc<dyn StatusCache>) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let (event_tx, _rx) = broadcast::channel(1000);

        let notifier: Option<Arc<dyn Notifier>> = if config.notifications.webhooks.is_empty() {
            None
        } else {
            Some(Arc::new(WebhookNotifier::new(
                config.notifications.webhooks.clone(),
                event_tx.clone(),
            )))
        };

        let state = SchedulerState {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            large_limit: Arc::new(Semaphore::new(config.scheduler.max_large_jobs)),
            total_limit: Arc::new(Semaphore::new(config.scheduler.max_total_jobs)),
            accepting_new: Arc::new(AtomicBool::new(true)),
        };

        Ok(Self {
            ctx: PackagerContext::new(config.clone(), event_tx.clone()),
            config,
            cache,
            event_tx,
            notifier,
            state,
            counters: Arc::new(Counters::default()),
        })
    }

    /// Replace the source fetcher used by packages created from now on
    pub fn with_fetcher(mut self, fetcher: Arc<dyn SourceFetcher>) -> Self {
        self.ctx = self.ctx.with_fetcher(fetcher);
        self
    }

    /// Replace the download URL resolver used by packages created from now on
    pub fn with_url_resolver(mut self, resolver: Arc<dyn DownloadUrlResolver>) -> Self {
        self.ctx = self.ctx.with_url_resolver(resolver);
        self
    }

    /// Replace the completion notifier
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Subscribe to packaging events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Service configuration
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Status cache shared by all packages
    pub fn cache(&self) -> &Arc<dyn StatusCache> {
        &self.cache
    }

    /// Context handed to every packager
    pub fn context(&self) -> &PackagerContext {
        &self.ctx
    }

    /// Lane for a package of `estimated_bytes`
    pub fn lane_for(&self, estimated_bytes: u64) -> Lane {
        if estimated_bytes >= self.config.scheduler.large_package_bytes {
            Lane::Large
        } else {
            Lane::Small
        }
    }

    /// Store the status record of `request` and build its packager
    pub fn create_packager(&self, request: PackageRequest) -> Result<Packager> {
        let id = request.id.unwrap_or_else(PackageId::generate);
        let info = BackgroundInfo {
            report: None,
            canceled: false,
            email: request.email,
            base_file_name: request.base_file_name,
            title: request.title,
            event_target: request.event_target,
        };
        let cacher = BackgroundInfoCacher::create(
            self.cache.clone(),
            id,
            self.config.packaging.status_ttl,
            info,
        )?;
        Packager::new(cacher, request.groups, request.data_source, self.ctx.clone())
    }

    pub(crate) fn cacher_for(&self, id: &PackageId) -> BackgroundInfoCacher {
        BackgroundInfoCacher::attach(
            self.cache.clone(),
            id.clone(),
            self.config.packaging.status_ttl,
        )
    }
}
