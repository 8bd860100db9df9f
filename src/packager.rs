//! Packages a whole file list
//!
//! A [`Packager`] owns the package's file groups and its report. On creation it
//! partitions the files into bundles and stores the estimate in the cache;
//! [`Packager::package_all`] then zips the bundles one after another, inserting
//! follow-up bundles when a zip fills up early. A package of exactly one file
//! is copied to the staging area as-is.

use crate::background::BackgroundInfoCacher;
use crate::bundle::PackagedBundle;
use crate::config::Config;
use crate::error::{Error, PackageError, Result};
use crate::fetch::SourceFetcher;
use crate::file_group::{FileGroup, FileInfo, flatten, total_files};
use crate::partition::partition;
use crate::report::PackagedReport;
use crate::types::{BackgroundState, Event, PackageId};
use crate::utils::{check_disk_space, hash4};
use crate::zip_handler::{ZipHandler, ZipSettings};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Builds the public URL of a staged file
pub trait DownloadUrlResolver: Send + Sync {
    /// URL under which `path` is served, offered to the client as `suggested_name`
    ///
    /// `None` when the resolver cannot serve `path`.
    fn url_for(&self, path: &Path, suggested_name: &str) -> Option<String>;
}

/// Resolves staged files to `<base_url>/download?file=<relative path>&return=<name>`
///
/// Only paths below the staging directory are served.
#[derive(Clone, Debug)]
pub struct StagingUrlResolver {
    base_url: String,
    staging_dir: PathBuf,
}

impl StagingUrlResolver {
    /// Create a resolver for files below `staging_dir`
    pub fn new(base_url: impl Into<String>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            staging_dir: staging_dir.into(),
        }
    }
}

impl DownloadUrlResolver for StagingUrlResolver {
    fn url_for(&self, path: &Path, suggested_name: &str) -> Option<String> {
        let relative = path.strip_prefix(&self.staging_dir).ok()?;
        if relative.as_os_str().is_empty() {
            return None;
        }
        Some(format!(
            "{}/download?file={}&return={}",
            self.base_url,
            urlencoding::encode(&relative.to_string_lossy()),
            urlencoding::encode(suggested_name)
        ))
    }
}

/// Services shared by every packager of one controller
#[derive(Clone)]
pub struct PackagerContext {
    /// Service configuration
    pub config: Arc<Config>,
    /// Source fetcher
    pub fetcher: Arc<dyn SourceFetcher>,
    /// Download URL resolver
    pub url_resolver: Arc<dyn DownloadUrlResolver>,
    /// Event channel
    pub events: broadcast::Sender<Event>,
}

impl PackagerContext {
    /// Create a context with the default HTTP fetcher and staging URL resolver
    pub fn new(config: Arc<Config>, events: broadcast::Sender<Event>) -> Self {
        let fetcher = Arc::new(crate::fetch::HttpFileFetcher::new(config.fetch.clone()));
        let url_resolver = Arc::new(StagingUrlResolver::new(
            config.packaging.base_url.clone(),
            config.staging_dir().clone(),
        ));
        Self {
            config,
            fetcher,
            url_resolver,
            events,
        }
    }

    /// Replace the source fetcher
    pub fn with_fetcher(mut self, fetcher: Arc<dyn SourceFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Replace the URL resolver
    pub fn with_url_resolver(mut self, resolver: Arc<dyn DownloadUrlResolver>) -> Self {
        self.url_resolver = resolver;
        self
    }
}

/// Name under which bundle `idx` of a package is offered for download
///
/// `<base>-<hash4>.zip` for the first bundle, `<base>-<hash4>_<idx>.zip` after that.
pub fn artifact_name(base_file_name: &str, package_id: &PackageId, idx: usize) -> String {
    let base = if base_file_name.is_empty() {
        "DownloadPackage"
    } else {
        base_file_name
    };
    let hash = hash4(package_id.as_str());
    if idx == 0 {
        format!("{}-{}.zip", base, hash)
    } else {
        format!("{}-{}_{}.zip", base, hash, idx)
    }
}

/// Staging path of bundle `idx` of a package
pub fn zip_file_path(staging_dir: &Path, package_id: &PackageId, idx: usize) -> PathBuf {
    staging_dir.join(format!("{}_{}.zip", package_id, idx))
}

/// Packages one file list into zip bundles
pub struct Packager {
    id: PackageId,
    groups: Vec<FileGroup>,
    cacher: BackgroundInfoCacher,
    ctx: PackagerContext,
    report: PackagedReport,
}

impl std::fmt::Debug for Packager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packager")
            .field("id", &self.id)
            .field("files", &total_files(&self.groups))
            .field("bundles", &self.report.part_count())
            .finish()
    }
}

impl Packager {
    /// Partition `groups` and store the initial estimate
    ///
    /// Fails with [`PackageError::EmptyPackage`] when there is nothing to package.
    pub fn new(
        cacher: BackgroundInfoCacher,
        groups: Vec<FileGroup>,
        data_source: Option<String>,
        ctx: PackagerContext,
    ) -> Result<Self> {
        let id = cacher.id().clone();
        if total_files(&groups) == 0 {
            return Err(PackageError::EmptyPackage {
                package_id: id.to_string(),
            }
            .into());
        }

        let parts = partition(&groups, ctx.config.packaging.max_bundle_bytes);
        for warning in &parts.warnings {
            debug!(package_id = %id, "{}", warning);
        }

        let estimate = estimate_bytes(&groups, ctx.config.packaging.default_remote_bytes);
        let report = PackagedReport::new(id.clone(), parts.bundles, estimate, BackgroundState::Waiting)
            .with_data_source(data_source);
        cacher.set_report(&report)?;

        debug!(
            package_id = %id,
            files = total_files(&groups),
            bundles = report.part_count(),
            estimated_bytes = estimate,
            "package estimated"
        );

        Ok(Self {
            id,
            groups,
            cacher,
            ctx,
            report,
        })
    }

    /// Package id
    pub fn id(&self) -> &PackageId {
        &self.id
    }

    /// Status handle of the package
    pub fn cacher(&self) -> &BackgroundInfoCacher {
        &self.cacher
    }

    /// Current report
    pub fn estimate(&self) -> &PackagedReport {
        &self.report
    }

    /// Estimated uncompressed bytes of the whole package
    pub fn estimated_bytes(&self) -> u64 {
        self.report.total_bytes
    }

    /// Whether the package is delivered as a single unzipped file
    pub fn is_one_file(&self) -> bool {
        self.ctx.config.packaging.single_file_passthrough
            && self.groups.len() == 1
            && self.groups[0].len() == 1
            && self.groups[0].files[0].has_access
    }

    fn staging_dir(&self) -> &Path {
        self.ctx.config.staging_dir()
    }

    /// Package everything and return the final report
    ///
    /// Bundles are zipped in order; the first bundle that does not succeed
    /// ends the run. The final report is written to the cache.
    pub fn package_all(&mut self) -> PackagedReport {
        let result = if self.is_one_file() {
            self.package_one_file()
        } else {
            self.report.state = BackgroundState::Working;
            let mut result = None;
            let mut idx = 0;
            while idx < self.report.part_count() {
                if self.cacher.is_canceled() {
                    let mut canceled = self.report.clone_with_state(BackgroundState::Canceled);
                    canceled.add_message("Packaging canceled");
                    result = Some(canceled);
                    break;
                }
                let element = self.package_element(idx);
                let succeeded = element.state == BackgroundState::Success;
                result = Some(element);
                if !succeeded {
                    break;
                }
                idx += 1;
            }
            result.unwrap_or_else(|| self.report.clone_with_state(BackgroundState::Fail))
        };

        if let Err(e) = self.cacher.set_report(&result) {
            warn!(package_id = %self.id, error = %e, "could not store final report");
        }
        info!(
            package_id = %self.id,
            state = %result.state,
            bundles = result.part_count(),
            "packaging finished"
        );
        self.report = result.clone();
        result
    }

    /// Zip bundle `idx` and return the report with that bundle's resulting state
    pub fn package_element(&mut self, idx: usize) -> PackagedReport {
        let total_bytes = match self.report.bundle(idx) {
            Some(bundle) => bundle.total_bytes(),
            None => {
                let mut report = self.report.clone_with_state(BackgroundState::Fail);
                report.add_message(format!("Bundle {} does not exist", idx + 1));
                return report;
            }
        };

        let zip_path = zip_file_path(self.staging_dir(), &self.id, idx);
        let base_file_name = self.cacher.base_file_name().unwrap_or_default();
        let staged = self.prepare_staging(total_bytes).and_then(|_| {
            self.staged_url(&zip_path, &artifact_name(&base_file_name, &self.id, idx))
        });
        let url = match staged {
            Ok(url) => url,
            Err(e) => {
                warn!(package_id = %self.id, bundle = idx, error = %e, "cannot stage bundle");
                if let Some(bundle) = self.report.bundle_mut(idx) {
                    let _ = bundle.fail();
                }
                self.report
                    .add_message(format!("Bundle {} could not be staged: {}", idx + 1, e));
                self.store_report();
                self.emit_bundle_complete(idx, BackgroundState::Fail, None);
                return self.report.clone_with_state(BackgroundState::Fail);
            }
        };
        let settings = ZipSettings {
            max_bundle_bytes: self.ctx.config.packaging.max_bundle_bytes,
            progress_persist_bytes: self.ctx.config.packaging.progress_persist_bytes,
        };

        let outcome = ZipHandler::new(
            zip_path,
            url,
            &self.groups,
            &self.cacher,
            self.ctx.fetcher.as_ref(),
            settings,
        )
        .with_part(idx + 1, self.report.part_count() > 1)
        .with_events(&self.ctx.events)
        .zip(&mut self.report, idx);

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(package_id = %self.id, bundle = idx, error = %e, "bundle could not be zipped");
                let mut report = self.report.clone_with_state(BackgroundState::Canceled);
                report.add_message("Packaging appears to be canceled");
                return report;
            }
        };

        let denied = outcome.summary.denied.len();
        let failed = outcome.summary.failed.len();
        if denied > 0 {
            self.report.add_message(format!("Access denied to {} files.", denied));
        }
        if failed > 0 {
            self.report.add_message(format!("Failed to package {} files.", failed));
        }
        if denied > 0 || failed > 0 {
            self.report
                .add_message(format!("See {} for details.", outcome.summary.readme_name));
        }
        if let Some(error) = &outcome.error {
            self.report.add_message(format!("Bundle {} failed: {}", idx + 1, error));
        }
        if let Some(mut follow_up) = outcome.follow_up {
            // the byte split of the finished bundle says nothing about the rest
            follow_up.set_estimate(
                self.range_estimate(follow_up.first_file_idx(), follow_up.num_files()),
            );
            debug!(
                package_id = %self.id,
                bundle = idx,
                follow_up_first_file = follow_up.first_file_idx(),
                follow_up_files = follow_up.num_files(),
                follow_up_bytes = follow_up.total_bytes(),
                "adding follow-up bundle"
            );
            self.report.insert_follow_up(follow_up);
        }

        self.store_report();
        let url = self
            .report
            .bundle(idx)
            .and_then(|b| b.url().map(str::to_string));
        self.emit_bundle_complete(idx, outcome.state, url);
        self.report.clone_with_state(outcome.state)
    }

    fn staged_url(&self, path: &Path, name: &str) -> Result<String> {
        self.ctx.url_resolver.url_for(path, name).ok_or_else(|| {
            Error::Other(format!("no download URL for {}", path.display()))
        })
    }

    fn range_estimate(&self, first: usize, num: usize) -> u64 {
        let default_remote_bytes = self.ctx.config.packaging.default_remote_bytes;
        flatten(&self.groups)
            .skip(first)
            .take(num)
            .map(|(_, f)| file_estimate(f, default_remote_bytes))
            .sum()
    }

    fn prepare_staging(&self, bundle_bytes: u64) -> Result<()> {
        std::fs::create_dir_all(self.staging_dir())?;
        check_disk_space(&self.ctx.config.disk_space, self.staging_dir(), bundle_bytes)
    }

    fn store_report(&self) {
        if let Err(e) = self.cacher.set_report(&self.report) {
            warn!(package_id = %self.id, error = %e, "could not store report");
        }
    }

    fn emit_bundle_complete(&self, idx: usize, state: BackgroundState, url: Option<String>) {
        let _ = self.ctx.events.send(Event::BundleComplete {
            id: self.id.clone(),
            package_idx: idx,
            state,
            url,
        });
    }

    /// Copy (or download) the package's only file into the staging area
    fn package_one_file(&mut self) -> PackagedReport {
        let file = self.groups[0].files[0].clone();
        self.store_report();

        match self.stage_one_file(&file) {
            Ok(bundle) => {
                let url = bundle.url().map(str::to_string);
                let report = PackagedReport::new(
                    self.id.clone(),
                    vec![bundle],
                    file.size_bytes,
                    BackgroundState::Success,
                )
                .with_data_source(self.report.data_source.clone());
                self.emit_bundle_complete(0, BackgroundState::Success, url);
                report
            }
            Err(e) => {
                warn!(package_id = %self.id, locator = %file.locator, error = %e, "single file could not be staged");
                let mut report = self.report.clone_with_state(BackgroundState::Canceled);
                if file.is_remote() {
                    report.add_message(format!("Could not download file to staging area: {}", e));
                } else {
                    report.add_message(format!("Could not copy file to staging area: {}", e));
                }
                report
            }
        }
    }

    fn stage_one_file(&self, file: &FileInfo) -> Result<PackagedBundle> {
        self.prepare_staging(file.size_bytes)?;
        let group = &self.groups[0];
        let mut source = self.ctx.fetcher.open(group, file)?;

        let name = match (&file.name_rule, &source.suggested_name) {
            (Some(rule), Some(suggested)) => rule.resolve(suggested),
            _ => file.external_name.clone(),
        };
        let target = self
            .staging_dir()
            .join(format!("{}_{}", self.id, name.replace(['/', '\\'], "_")));

        let copied = File::create(&target).and_then(|mut out| std::io::copy(&mut source.reader, &mut out));
        let bytes = match copied {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = std::fs::remove_file(&target);
                return Err(e.into());
            }
        };

        let url = match self.staged_url(&target, &name) {
            Ok(url) => url,
            Err(e) => {
                let _ = std::fs::remove_file(&target);
                return Err(e);
            }
        };
        let mut bundle = PackagedBundle::new(0, 0, 1, file.size_bytes);
        bundle.add_processed_bytes(1, bytes, bytes)?;
        bundle.set_compressed_bytes(bytes)?;
        bundle.finish(url)?;

        info!(package_id = %self.id, path = %target.display(), bytes, "single file staged");
        Ok(bundle)
    }
}

/// Estimated bytes of a package, counting unknown remote sizes as `default_remote_bytes`
pub fn estimate_bytes(groups: &[FileGroup], default_remote_bytes: u64) -> u64 {
    flatten(groups)
        .map(|(_, f)| file_estimate(f, default_remote_bytes))
        .sum()
}

fn file_estimate(file: &FileInfo, default_remote_bytes: u64) -> u64 {
    if file.size_bytes == 0 && file.is_remote() {
        default_remote_bytes
    } else {
        file.size_bytes
    }
}
