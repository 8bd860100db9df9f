//! Shared package status object
//!
//! [`BackgroundInfo`] is the single status record of a package. It lives only
//! in the [`StatusCache`]; [`BackgroundInfoCacher`] is a handle that re-reads
//! it on every access and writes it back with read-modify-put, so the
//! packaging thread, the scheduler and API readers always see the same state.

use crate::cache::StatusCache;
use crate::error::{PackageError, Result};
use crate::report::PackagedReport;
use crate::types::{BackgroundState, PackageId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Status record of one package
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BackgroundInfo {
    /// Latest report, None until the estimate is computed
    #[serde(default)]
    pub report: Option<PackagedReport>,

    /// Set once the requester canceled the package
    #[serde(default)]
    pub canceled: bool,

    /// Address notified when the package is done
    #[serde(default)]
    pub email: Option<String>,

    /// Base name of the produced zip files
    pub base_file_name: String,

    /// Human-readable title of the package
    #[serde(default)]
    pub title: Option<String>,

    /// Where completion events are routed (e.g. a client channel id)
    #[serde(default)]
    pub event_target: Option<String>,
}

impl BackgroundInfo {
    /// Create a record with the given base filename and no report yet
    pub fn new(base_file_name: impl Into<String>) -> Self {
        Self {
            base_file_name: base_file_name.into(),
            ..Default::default()
        }
    }

    /// Set the title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the requester e-mail
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Set the event target
    pub fn with_event_target(mut self, target: impl Into<String>) -> Self {
        self.event_target = Some(target.into());
        self
    }
}

/// Cache-backed handle to a package's [`BackgroundInfo`]
///
/// Holds no copy of the record. Cancellation is stored under its own key so a
/// concurrent report write can never clear it.
#[derive(Clone)]
pub struct BackgroundInfoCacher {
    id: PackageId,
    cache: Arc<dyn StatusCache>,
    ttl: Duration,
}

impl std::fmt::Debug for BackgroundInfoCacher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundInfoCacher")
            .field("id", &self.id)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl BackgroundInfoCacher {
    /// Store a fresh record for `id` and return a handle to it
    pub fn create(
        cache: Arc<dyn StatusCache>,
        id: PackageId,
        ttl: Duration,
        info: BackgroundInfo,
    ) -> Result<Self> {
        let cacher = Self { id, cache, ttl };
        cacher.put(&info)?;
        Ok(cacher)
    }

    /// Handle to an existing record (the record itself may be missing)
    pub fn attach(cache: Arc<dyn StatusCache>, id: PackageId, ttl: Duration) -> Self {
        Self { id, cache, ttl }
    }

    /// Package id (also the cache key)
    pub fn id(&self) -> &PackageId {
        &self.id
    }

    fn cancel_key(&self) -> String {
        format!("{}:canceled", self.id)
    }

    fn put(&self, info: &BackgroundInfo) -> Result<()> {
        let json = serde_json::to_string(info)?;
        self.cache.put(self.id.as_str(), json, self.ttl);
        Ok(())
    }

    /// Whether a record exists for this package
    pub fn is_cached(&self) -> bool {
        self.cache.is_cached(self.id.as_str())
    }

    /// Read the current record
    pub fn info(&self) -> Result<BackgroundInfo> {
        let json = self
            .cache
            .get(self.id.as_str())
            .ok_or_else(|| PackageError::StatusMissing {
                package_id: self.id.to_string(),
            })?;
        let mut info: BackgroundInfo = serde_json::from_str(&json)?;
        info.canceled |= self.cache.is_cached(&self.cancel_key());
        Ok(info)
    }

    fn update(&self, f: impl FnOnce(&mut BackgroundInfo)) -> Result<()> {
        let mut info = self.info()?;
        f(&mut info);
        self.put(&info)
    }

    /// Whether the package was canceled
    ///
    /// A record that is no longer cached counts as canceled: nobody can
    /// observe the result any more.
    pub fn is_canceled(&self) -> bool {
        match self.info() {
            Ok(info) => info.canceled,
            Err(e) => {
                tracing::warn!(package_id = %self.id, error = %e, "status unavailable, treating package as canceled");
                true
            }
        }
    }

    /// Mark the package canceled
    pub fn cancel(&self) -> Result<()> {
        if !self.is_cached() {
            return Err(PackageError::StatusMissing {
                package_id: self.id.to_string(),
            }
            .into());
        }
        self.cache.put(&self.cancel_key(), "true".to_string(), self.ttl);
        self.update(|info| info.canceled = true)
    }

    /// Latest report, None while the estimate is pending
    pub fn report(&self) -> Result<Option<PackagedReport>> {
        Ok(self.info()?.report)
    }

    /// Replace the report
    pub fn set_report(&self, report: &PackagedReport) -> Result<()> {
        self.update(|info| info.report = Some(report.clone()))
    }

    /// Report as a requester should see it
    ///
    /// A canceled package always reads as `Canceled`; a package whose estimate
    /// is not stored yet reads as `Waiting`.
    pub fn status(&self) -> Result<PackagedReport> {
        let info = self.info()?;
        let report = info.report.unwrap_or_else(|| {
            PackagedReport::new(self.id.clone(), Vec::new(), 0, BackgroundState::Waiting)
        });
        if info.canceled && report.state != BackgroundState::Canceled {
            return Ok(report.clone_with_state(BackgroundState::Canceled));
        }
        Ok(report)
    }

    /// Requester e-mail, None once the package is canceled
    pub fn email(&self) -> Result<Option<String>> {
        let info = self.info()?;
        Ok(if info.canceled { None } else { info.email })
    }

    /// Change the requester e-mail (ignored for canceled packages)
    pub fn set_email(&self, email: impl Into<String>) -> Result<()> {
        let email = email.into();
        self.update(|info| {
            if !info.canceled {
                info.email = Some(email);
            }
        })
    }

    /// Base name of the produced zip files
    pub fn base_file_name(&self) -> Result<String> {
        Ok(self.info()?.base_file_name)
    }

    /// Title of the package
    pub fn title(&self) -> Result<Option<String>> {
        Ok(self.info()?.title)
    }

    /// Event target of the package
    pub fn event_target(&self) -> Result<Option<String>> {
        Ok(self.info()?.event_target)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::PackagedBundle;
    use crate::cache::MemoryCache;
    use crate::error::Error;

    fn setup() -> (Arc<dyn StatusCache>, BackgroundInfoCacher) {
        let cache: Arc<dyn StatusCache> = Arc::new(MemoryCache::default());
        let cacher = BackgroundInfoCacher::create(
            cache.clone(),
            PackageId::new("pkg-1"),
            Duration::from_secs(60),
            BackgroundInfo::new("wise-images").with_email("a@b.c"),
        )
        .unwrap();
        (cache, cacher)
    }

    #[test]
    fn test_every_handle_sees_the_same_record() {
        let (cache, writer) = setup();
        let reader = BackgroundInfoCacher::attach(cache, PackageId::new("pkg-1"), Duration::from_secs(60));

        let report = PackagedReport::new(
            PackageId::new("pkg-1"),
            vec![PackagedBundle::new(0, 0, 1, 10)],
            10,
            BackgroundState::Working,
        );
        writer.set_report(&report).unwrap();

        assert_eq!(reader.report().unwrap().unwrap(), report);
        assert_eq!(reader.base_file_name().unwrap(), "wise-images");
    }

    #[test]
    fn test_cancel_survives_a_stale_report_write() {
        let (cache, cacher) = setup();
        let stale = cacher.info().unwrap();

        cacher.cancel().unwrap();
        // a writer that read before the cancel puts its old copy back
        cache.put("pkg-1", serde_json::to_string(&stale).unwrap(), Duration::from_secs(60));

        assert!(cacher.is_canceled());
        assert_eq!(cacher.status().unwrap().state, BackgroundState::Canceled);
    }

    #[test]
    fn test_missing_record_counts_as_canceled() {
        let cache: Arc<dyn StatusCache> = Arc::new(MemoryCache::default());
        let cacher = BackgroundInfoCacher::attach(cache, PackageId::new("gone"), Duration::from_secs(60));
        assert!(cacher.is_canceled());
        assert!(matches!(
            cacher.info().unwrap_err(),
            Error::Package(PackageError::StatusMissing { .. })
        ));
        assert!(cacher.cancel().is_err());
    }

    #[test]
    fn test_status_without_report_is_waiting() {
        let (_, cacher) = setup();
        let status = cacher.status().unwrap();
        assert_eq!(status.state, BackgroundState::Waiting);
        assert_eq!(status.package_id, PackageId::new("pkg-1"));
    }

    #[test]
    fn test_email_hidden_and_frozen_after_cancel() {
        let (_, cacher) = setup();
        assert_eq!(cacher.email().unwrap().as_deref(), Some("a@b.c"));
        cacher.cancel().unwrap();
        cacher.set_email("other@b.c").unwrap();
        assert!(cacher.email().unwrap().is_none());
        assert_eq!(cacher.info().unwrap().email.as_deref(), Some("a@b.c"));
    }
}
