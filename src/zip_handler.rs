//! Streams one bundle's files into one zip archive
//!
//! The handler walks the bundle's range of the flattened file list, pulls each
//! source through a [`SourceFetcher`] and writes it as a deflated entry.
//! Problems with a single source never stop the bundle; they are recorded and
//! listed in the README entry. Only failures of the archive itself are fatal.

use crate::background::BackgroundInfoCacher;
use crate::bundle::PackagedBundle;
use crate::error::{Error, Result};
use crate::fetch::SourceFetcher;
use crate::file_group::{FileGroup, FileInfo, flatten};
use crate::report::PackagedReport;
use crate::types::{BackgroundState, Event};
use crate::utils::format_size;
use flate2::read::GzDecoder;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use zip::ZipWriter;
use zip::write::FileOptions;

const COPY_BUFFER_BYTES: usize = 64 * 1024;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
// entries at or above this size need zip64 headers
const LARGE_FILE_BYTES: u64 = u32::MAX as u64;

/// Size limits a handler works with
#[derive(Clone, Copy, Debug)]
pub struct ZipSettings {
    /// Realized uncompressed bytes after which the bundle stops taking files
    pub max_bundle_bytes: u64,
    /// Processed bytes between two persisted progress updates
    pub progress_persist_bytes: u64,
}

/// A file that could not be packaged
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailedEntry {
    /// External name of the file
    pub name: String,
    /// Why it was skipped
    pub reason: String,
}

/// What happened to the files of one bundle
#[derive(Clone, Debug, Default)]
pub struct ZipSummary {
    /// Name of the README entry
    pub readme_name: String,
    /// Files written to the archive
    pub succeeded: usize,
    /// Uncompressed bytes written to the archive
    pub succeeded_bytes: u64,
    /// Files skipped because the requester may not access them
    pub denied: Vec<String>,
    /// Files skipped because their source failed
    pub failed: Vec<FailedEntry>,
    /// Progress updates written to the cache while zipping
    pub persist_count: usize,
}

impl ZipSummary {
    fn readme(&self, first: usize, last: usize) -> String {
        let mut text = format!("Files {}-{}\n\n", first, last);
        text.push_str(&format!(
            "Successfully packaged {} files ({}).\n",
            self.succeeded,
            format_size(self.succeeded_bytes)
        ));
        if !self.denied.is_empty() {
            text.push_str(&format!("\nAccess denied to {} files:\n", self.denied.len()));
            for name in &self.denied {
                text.push_str(&format!("  {}\n", name));
            }
        }
        if !self.failed.is_empty() {
            text.push_str(&format!("\nFailed to package {} files:\n", self.failed.len()));
            for entry in &self.failed {
                text.push_str(&format!("  {}: {}\n", entry.name, entry.reason));
            }
        }
        text
    }
}

/// Result of zipping one bundle
#[derive(Debug)]
pub struct ZipOutcome {
    /// Final state of the bundle
    pub state: BackgroundState,
    /// Bundle for the files that did not fit after the realized-size split
    pub follow_up: Option<PackagedBundle>,
    /// Per-file accounting
    pub summary: ZipSummary,
    /// Cause of a fatal failure
    pub error: Option<String>,
}

/// Tracks the highest write position of the archive file
struct CountingWriter<W> {
    inner: W,
    position: u64,
    high_water: Arc<AtomicU64>,
}

impl<W> CountingWriter<W> {
    fn new(inner: W, high_water: Arc<AtomicU64>) -> Self {
        Self {
            inner,
            position: 0,
            high_water,
        }
    }

    fn advance_to(&mut self, position: u64) {
        self.position = position;
        self.high_water.fetch_max(position, Ordering::Relaxed);
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.advance_to(self.position + n as u64);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Seek> Seek for CountingWriter<W> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let position = self.inner.seek(pos)?;
        self.advance_to(position);
        Ok(position)
    }
}

type Archive = ZipWriter<CountingWriter<File>>;

enum EntryResult {
    Written(u64),
    Failed(String),
    Duplicate,
}

enum LoopEnd {
    Completed,
    Canceled,
}

/// Writes one bundle of a package to a zip file
pub struct ZipHandler<'a> {
    zip_path: PathBuf,
    url: String,
    part: usize,
    multi_part: bool,
    groups: &'a [FileGroup],
    cacher: &'a BackgroundInfoCacher,
    fetcher: &'a dyn SourceFetcher,
    events: Option<&'a broadcast::Sender<Event>>,
    settings: ZipSettings,
}

impl<'a> ZipHandler<'a> {
    /// Create a handler writing to `zip_path`; `url` is published on success
    pub fn new(
        zip_path: impl Into<PathBuf>,
        url: impl Into<String>,
        groups: &'a [FileGroup],
        cacher: &'a BackgroundInfoCacher,
        fetcher: &'a dyn SourceFetcher,
        settings: ZipSettings,
    ) -> Self {
        Self {
            zip_path: zip_path.into(),
            url: url.into(),
            part: 1,
            multi_part: false,
            groups,
            cacher,
            fetcher,
            events: None,
            settings,
        }
    }

    /// Mark the bundle as part `part` (1-based) of a package
    ///
    /// Multi-part packages name the README after the part. A bundle that
    /// splits off a follow-up while zipping counts as multi-part too.
    pub fn with_part(mut self, part: usize, multi_part: bool) -> Self {
        self.part = part;
        self.multi_part = multi_part;
        self
    }

    /// Emit progress events on `tx`
    pub fn with_events(mut self, tx: &'a broadcast::Sender<Event>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Path of the archive being written
    pub fn zip_path(&self) -> &Path {
        &self.zip_path
    }

    /// Zip the bundle at `bundle_idx` of `report`
    ///
    /// The bundle ends `Success` (possibly with a follow-up for files that no
    /// longer fit), `Canceled` or `Fail`. Only on success does the archive
    /// survive on disk. Errors are returned only when `bundle_idx` does not
    /// name a startable bundle.
    pub fn zip(self, report: &mut PackagedReport, bundle_idx: usize) -> Result<ZipOutcome> {
        let (first, num) = {
            let bundle = bundle_at(report, bundle_idx)?;
            if bundle.is_done() {
                return Err(crate::error::PackageError::IllegalState {
                    package_idx: bundle_idx,
                    operation: "zip".to_string(),
                    state: bundle.state(),
                }
                .into());
            }
            (bundle.first_file_idx(), bundle.num_files())
        };

        let mut summary = ZipSummary {
            readme_name: readme_name(self.part, self.multi_part),
            ..Default::default()
        };

        let high_water = Arc::new(AtomicU64::new(0));
        let mut zip = match File::create(&self.zip_path) {
            Ok(file) => ZipWriter::new(CountingWriter::new(file, high_water.clone())),
            Err(e) => {
                return self.fail(report, bundle_idx, summary, None, format!(
                    "cannot create {}: {}",
                    self.zip_path.display(),
                    e
                ));
            }
        };

        info!(
            package_id = %report.package_id,
            bundle = bundle_idx,
            first_file = first,
            num_files = num,
            path = %self.zip_path.display(),
            "zipping bundle"
        );

        let files: Vec<(&FileGroup, &FileInfo)> = flatten(self.groups).skip(first).take(num).collect();
        let end = match self.write_files(&mut zip, report, bundle_idx, &files, &mut summary, &high_water) {
            Ok(end) => end,
            Err(e) => return self.fail(report, bundle_idx, summary, Some(zip), e.to_string()),
        };

        let processed = bundle_at(report, bundle_idx)?.processed_files();
        if processed < num {
            summary.readme_name = readme_name(self.part, true);
        }
        let last = first + processed.max(1);
        if let Err(e) = self.close_archive(&mut zip, &summary, first + 1, last) {
            return self.fail(report, bundle_idx, summary, Some(zip), e.to_string());
        }
        drop(zip);

        match end {
            LoopEnd::Canceled => {
                self.remove_archive();
                bundle_at(report, bundle_idx)?.cancel()?;
                info!(package_id = %report.package_id, bundle = bundle_idx, "bundle canceled, archive removed");
                Ok(ZipOutcome {
                    state: BackgroundState::Canceled,
                    follow_up: None,
                    summary,
                    error: None,
                })
            }
            LoopEnd::Completed => {
                let bundle = bundle_at(report, bundle_idx)?;
                bundle.set_compressed_bytes(high_water.load(Ordering::Relaxed))?;
                let follow_up = bundle.finish(self.url.clone())?;
                info!(
                    package_id = %report.package_id,
                    bundle = bundle_idx,
                    succeeded = summary.succeeded,
                    denied = summary.denied.len(),
                    failed = summary.failed.len(),
                    follow_up = follow_up.is_some(),
                    "bundle complete"
                );
                Ok(ZipOutcome {
                    state: BackgroundState::Success,
                    follow_up,
                    summary,
                    error: None,
                })
            }
        }
    }

    fn write_files(
        &self,
        zip: &mut Archive,
        report: &mut PackagedReport,
        bundle_idx: usize,
        files: &[(&FileGroup, &FileInfo)],
        summary: &mut ZipSummary,
        high_water: &AtomicU64,
    ) -> Result<LoopEnd> {
        let mut names = HashSet::new();
        let mut bytes_since_persist = 0u64;

        for (offset, (group, file)) in files.iter().enumerate() {
            if self.cacher.is_canceled() {
                return Ok(LoopEnd::Canceled);
            }
            if offset > 0
                && bundle_at(report, bundle_idx)?.uncompressed_bytes() >= self.settings.max_bundle_bytes
            {
                debug!(
                    package_id = %report.package_id,
                    bundle = bundle_idx,
                    remaining = files.len() - offset,
                    "bundle reached size limit, deferring remaining files"
                );
                break;
            }

            let (processed, uncompressed) = if !file.has_access {
                summary.denied.push(file.external_name.clone());
                (file.size_bytes, 0)
            } else {
                match self.write_entry(zip, group, file, &mut names)? {
                    EntryResult::Written(bytes) => {
                        summary.succeeded += 1;
                        summary.succeeded_bytes += bytes;
                        (bytes, bytes)
                    }
                    EntryResult::Failed(reason) => {
                        warn!(
                            package_id = %report.package_id,
                            locator = %file.locator,
                            reason = %reason,
                            "skipping file"
                        );
                        summary.failed.push(FailedEntry {
                            name: file.external_name.clone(),
                            reason,
                        });
                        (file.size_bytes, 0)
                    }
                    EntryResult::Duplicate => {
                        warn!(
                            package_id = %report.package_id,
                            name = %file.external_name,
                            "duplicate entry name, skipping file"
                        );
                        summary.failed.push(FailedEntry {
                            name: file.external_name.clone(),
                            reason: "duplicate entry".to_string(),
                        });
                        (file.size_bytes, 0)
                    }
                }
            };

            let bundle = bundle_at(report, bundle_idx)?;
            bundle.add_processed_bytes(1, processed, uncompressed)?;
            bundle.set_compressed_bytes(high_water.load(Ordering::Relaxed))?;

            bytes_since_persist += processed;
            if bytes_since_persist > self.settings.progress_persist_bytes {
                bytes_since_persist = 0;
                self.persist_progress(report, bundle_idx, summary);
            }
        }

        Ok(LoopEnd::Completed)
    }

    fn write_entry(
        &self,
        zip: &mut Archive,
        group: &FileGroup,
        file: &FileInfo,
        names: &mut HashSet<String>,
    ) -> Result<EntryResult> {
        let source = match self.fetcher.open(group, file) {
            Ok(source) => source,
            Err(e) => return Ok(EntryResult::Failed(e.to_string())),
        };
        let mut buffered = BufReader::with_capacity(COPY_BUFFER_BYTES, source.reader);

        let gzipped = if file.is_gzip_name() {
            match buffered.fill_buf() {
                Ok(head) => head.starts_with(&GZIP_MAGIC),
                Err(e) => return Ok(EntryResult::Failed(e.to_string())),
            }
        } else {
            false
        };

        let mut name = file.external_name.trim_start_matches('/').to_string();
        if gzipped {
            name.truncate(name.len() - ".gz".len());
        }
        if name.is_empty() {
            return Ok(EntryResult::Failed("empty entry name".to_string()));
        }
        if names.contains(&name) {
            return Ok(EntryResult::Duplicate);
        }

        let mut reader: Box<dyn Read> = if gzipped {
            Box::new(GzDecoder::new(buffered))
        } else {
            Box::new(buffered)
        };

        // The entry is only started once the whole source has been read, so a
        // source failing mid-stream leaves nothing behind in the archive.
        let mut spool = tempfile::tempfile_in(self.spool_dir())?;
        let mut buf = vec![0u8; COPY_BUFFER_BYTES];
        let mut written = 0u64;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Ok(EntryResult::Failed(format!("read failed after {} bytes: {}", written, e)));
                }
            };
            spool.write_all(&buf[..n])?;
            written += n as u64;
        }
        spool.seek(SeekFrom::Start(0))?;

        let options = FileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .large_file(written >= LARGE_FILE_BYTES);
        zip.start_file(name.as_str(), options)?;
        std::io::copy(&mut spool, zip)?;
        names.insert(name);

        Ok(EntryResult::Written(written))
    }

    /// Directory for spooled entries, next to the archive
    fn spool_dir(&self) -> &Path {
        self.zip_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }

    fn close_archive(&self, zip: &mut Archive, summary: &ZipSummary, first: usize, last: usize) -> Result<()> {
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        zip.start_file(summary.readme_name.as_str(), options)?;
        zip.write_all(summary.readme(first, last).as_bytes())?;
        zip.set_comment(format!("Files {}-{}", first, last));
        zip.finish()?;
        Ok(())
    }

    fn persist_progress(&self, report: &PackagedReport, bundle_idx: usize, summary: &mut ZipSummary) {
        summary.persist_count += 1;
        if let Err(e) = self.cacher.set_report(report) {
            warn!(package_id = %report.package_id, error = %e, "could not persist progress");
        }
        if let Some(tx) = self.events {
            let _ = tx.send(Event::PackageProgress {
                id: report.package_id.clone(),
                package_idx: bundle_idx,
                percent: report.percent_complete(),
                processed_files: report.processed_files(),
                processed_bytes: report.processed_bytes(),
                total_bytes: report.total_bytes,
            });
        }
    }

    fn fail(
        &self,
        report: &mut PackagedReport,
        bundle_idx: usize,
        summary: ZipSummary,
        zip: Option<Archive>,
        reason: String,
    ) -> Result<ZipOutcome> {
        drop(zip);
        self.remove_archive();
        warn!(
            package_id = %report.package_id,
            bundle = bundle_idx,
            error = %reason,
            "bundle failed, archive removed"
        );
        bundle_at(report, bundle_idx)?.fail()?;
        Ok(ZipOutcome {
            state: BackgroundState::Fail,
            follow_up: None,
            summary,
            error: Some(reason),
        })
    }

    fn remove_archive(&self) {
        if let Err(e) = std::fs::remove_file(&self.zip_path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.zip_path.display(), error = %e, "could not remove archive");
        }
    }
}

/// README entry name: `README.txt` alone, `README-part<N>.txt` in a multi-part package
pub fn readme_name(part: usize, multi_part: bool) -> String {
    if multi_part || part > 1 {
        format!("README-part{}.txt", part)
    } else {
        "README.txt".to_string()
    }
}

fn bundle_at(report: &mut PackagedReport, idx: usize) -> Result<&mut PackagedBundle> {
    let package_id = report.package_id.clone();
    report
        .bundle_mut(idx)
        .ok_or_else(|| Error::NotFound(format!("bundle {} of package {}", idx, package_id)))
}
