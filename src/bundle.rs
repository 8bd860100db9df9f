//! One zip output unit and its state machine.
//!
//! A [`PackagedBundle`] covers the contiguous range
//! `[first_file_idx, first_file_idx + num_files)` of the flattened file list.
//! It moves `Waiting → Working → {Success | Fail | Canceled}`; once terminal
//! every mutation is rejected. When a bundle finishes having processed fewer
//! files than assigned, [`PackagedBundle::finish`] shrinks it and hands back a
//! follow-up bundle for the remainder.

use crate::error::{PackageError, Result};
use crate::types::BackgroundState;
use serde::{Deserialize, Serialize};

/// Accounting for one zip archive of a package
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagedBundle {
    package_idx: usize,
    first_file_idx: usize,
    num_files: usize,
    total_bytes: u64,
    processed_files: usize,
    processed_bytes: u64,
    uncompressed_bytes: u64,
    compressed_bytes: u64,
    state: BackgroundState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

impl PackagedBundle {
    /// Create a waiting bundle
    pub fn new(package_idx: usize, first_file_idx: usize, num_files: usize, total_bytes: u64) -> Self {
        Self {
            package_idx,
            first_file_idx,
            num_files,
            total_bytes,
            processed_files: 0,
            processed_bytes: 0,
            uncompressed_bytes: 0,
            compressed_bytes: 0,
            state: BackgroundState::Waiting,
            url: None,
        }
    }

    /// 0-based position of this bundle in the package
    pub fn package_idx(&self) -> usize {
        self.package_idx
    }

    /// Index of the first file (in the flattened list) this bundle covers
    pub fn first_file_idx(&self) -> usize {
        self.first_file_idx
    }

    /// Number of files this bundle covers
    pub fn num_files(&self) -> usize {
        self.num_files
    }

    /// One past the last file index this bundle covers
    pub fn end_file_idx(&self) -> usize {
        self.first_file_idx + self.num_files
    }

    /// Estimated uncompressed bytes of the covered files
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Files handled so far (packaged, denied or failed)
    pub fn processed_files(&self) -> usize {
        self.processed_files
    }

    /// Bytes accounted so far (denied files count with their estimate)
    pub fn processed_bytes(&self) -> u64 {
        self.processed_bytes
    }

    /// Bytes actually read into the archive
    pub fn uncompressed_bytes(&self) -> u64 {
        self.uncompressed_bytes
    }

    /// Bytes written to the archive file
    pub fn compressed_bytes(&self) -> u64 {
        self.compressed_bytes
    }

    /// Current state
    pub fn state(&self) -> BackgroundState {
        self.state
    }

    /// Download URL, set once the bundle succeeded
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Whether the bundle reached a terminal state
    pub fn is_done(&self) -> bool {
        self.state.is_terminal()
    }

    /// Progress of this bundle in percent, based on processed vs. estimated bytes
    pub fn percent_complete(&self) -> f32 {
        if self.state == BackgroundState::Success {
            return 100.0;
        }
        if self.total_bytes == 0 {
            if self.num_files == 0 {
                return 0.0;
            }
            return (self.processed_files as f32 / self.num_files as f32) * 100.0;
        }
        ((self.processed_bytes as f64 / self.total_bytes as f64) * 100.0).min(100.0) as f32
    }

    fn illegal(&self, operation: &str) -> PackageError {
        PackageError::IllegalState {
            package_idx: self.package_idx,
            operation: operation.to_string(),
            state: self.state,
        }
    }

    fn ensure_active(&self, operation: &str) -> Result<()> {
        if self.state.is_terminal() {
            return Err(self.illegal(operation).into());
        }
        Ok(())
    }

    /// Account for `files` more handled files
    ///
    /// `processed` feeds progress, `uncompressed` the realized archive input.
    /// The first call moves the bundle from `Waiting` to `Working`.
    pub fn add_processed_bytes(&mut self, files: usize, processed: u64, uncompressed: u64) -> Result<()> {
        self.ensure_active("add processed bytes")?;
        if self.processed_files + files > self.num_files {
            return Err(self.illegal("process more files than assigned").into());
        }
        self.processed_files += files;
        self.processed_bytes += processed;
        self.uncompressed_bytes += uncompressed;
        self.state = BackgroundState::Working;
        Ok(())
    }

    /// Record the current size of the archive on disk (never decreases)
    pub fn set_compressed_bytes(&mut self, bytes: u64) -> Result<()> {
        self.ensure_active("set compressed bytes")?;
        self.compressed_bytes = self.compressed_bytes.max(bytes);
        Ok(())
    }

    /// Mark the bundle successful and publish its URL
    ///
    /// When fewer files were processed than assigned, the bundle shrinks to
    /// the processed range and exactly one follow-up bundle is returned for
    /// the remainder. Finishing a terminal bundle is an error.
    pub fn finish(&mut self, url: impl Into<String>) -> Result<Option<PackagedBundle>> {
        self.ensure_active("finish")?;

        let mut follow_up = None;
        if self.processed_files < self.num_files {
            if self.processed_files == 0 {
                return Err(self.illegal("finish without processing any file").into());
            }
            let remaining_files = self.num_files - self.processed_files;
            let remaining_bytes = self.total_bytes.saturating_sub(self.processed_bytes);
            follow_up = Some(PackagedBundle::new(
                self.package_idx + 1,
                self.first_file_idx + self.processed_files,
                remaining_files,
                remaining_bytes,
            ));
            self.num_files = self.processed_files;
            self.total_bytes = self.processed_bytes;
        }

        self.url = Some(url.into());
        self.state = BackgroundState::Success;
        Ok(follow_up)
    }

    /// Mark the bundle failed
    pub fn fail(&mut self) -> Result<()> {
        self.ensure_active("fail")?;
        self.state = BackgroundState::Fail;
        Ok(())
    }

    /// Mark the bundle canceled
    pub fn cancel(&mut self) -> Result<()> {
        self.ensure_active("cancel")?;
        self.state = BackgroundState::Canceled;
        Ok(())
    }

    /// Shift the bundle one position later in the package
    pub(crate) fn renumber(&mut self, package_idx: usize) {
        self.package_idx = package_idx;
    }

    /// Replace the byte estimate of a bundle that has not started
    pub(crate) fn set_estimate(&mut self, total_bytes: u64) {
        if self.state == BackgroundState::Waiting {
            self.total_bytes = total_bytes;
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_new_bundle_is_waiting() {
        let b = PackagedBundle::new(0, 0, 3, 300);
        assert_eq!(b.state(), BackgroundState::Waiting);
        assert_eq!(b.end_file_idx(), 3);
        assert!(!b.is_done());
        assert_eq!(b.percent_complete(), 0.0);
    }

    #[test]
    fn test_first_bytes_move_to_working() {
        let mut b = PackagedBundle::new(0, 0, 3, 300);
        b.add_processed_bytes(1, 100, 100).unwrap();
        assert_eq!(b.state(), BackgroundState::Working);
        assert_eq!(b.processed_files(), 1);
        assert!((b.percent_complete() - 33.333).abs() < 0.01);
    }

    #[test]
    fn test_cannot_process_more_files_than_assigned() {
        let mut b = PackagedBundle::new(0, 0, 1, 10);
        b.add_processed_bytes(1, 10, 10).unwrap();
        assert!(b.add_processed_bytes(1, 10, 10).is_err());
        assert_eq!(b.processed_files(), 1);
    }

    #[test]
    fn test_finish_complete_bundle_has_no_follow_up() {
        let mut b = PackagedBundle::new(2, 10, 2, 200);
        b.add_processed_bytes(2, 200, 200).unwrap();
        let follow_up = b.finish("http://x/a.zip").unwrap();
        assert!(follow_up.is_none());
        assert_eq!(b.state(), BackgroundState::Success);
        assert_eq!(b.url(), Some("http://x/a.zip"));
        assert_eq!(b.percent_complete(), 100.0);
    }

    #[test]
    fn test_finish_partial_bundle_creates_exactly_one_follow_up() {
        let mut b = PackagedBundle::new(1, 4, 5, 500);
        b.add_processed_bytes(2, 260, 260).unwrap();
        let follow_up = b.finish("u").unwrap().unwrap();

        assert_eq!(follow_up.package_idx(), 2);
        assert_eq!(follow_up.first_file_idx(), 4 + 2);
        assert_eq!(follow_up.num_files(), 5 - 2);
        assert_eq!(follow_up.total_bytes(), 240);
        assert_eq!(follow_up.state(), BackgroundState::Waiting);

        // the finished bundle shrank to what it actually packaged
        assert_eq!(b.num_files(), 2);
        assert_eq!(b.total_bytes(), 260);
        assert_eq!(b.end_file_idx(), follow_up.first_file_idx());
    }

    #[test]
    fn test_finish_twice_is_an_error() {
        let mut b = PackagedBundle::new(0, 0, 1, 10);
        b.add_processed_bytes(1, 10, 10).unwrap();
        b.finish("u").unwrap();
        let err = b.finish("u").unwrap_err();
        assert!(matches!(
            err,
            Error::Package(PackageError::IllegalState {
                state: BackgroundState::Success,
                ..
            })
        ));
    }

    #[test]
    fn test_finish_without_progress_is_rejected() {
        let mut b = PackagedBundle::new(0, 0, 2, 10);
        assert!(b.finish("u").is_err());
        assert_eq!(b.state(), BackgroundState::Waiting);
    }

    #[test]
    fn test_terminal_bundle_rejects_all_mutation() {
        for terminal in [0, 1, 2] {
            let mut b = PackagedBundle::new(0, 0, 3, 300);
            b.add_processed_bytes(1, 100, 100).unwrap();
            match terminal {
                0 => b.fail().unwrap(),
                1 => b.cancel().unwrap(),
                _ => {
                    b.add_processed_bytes(2, 200, 200).unwrap();
                    b.finish("u").unwrap();
                }
            }
            let snapshot = b.clone();
            assert!(b.add_processed_bytes(0, 1, 1).is_err());
            assert!(b.set_compressed_bytes(999).is_err());
            assert!(b.fail().is_err());
            assert!(b.cancel().is_err());
            assert_eq!(b, snapshot);
        }
    }

    #[test]
    fn test_compressed_bytes_never_decrease() {
        let mut b = PackagedBundle::new(0, 0, 1, 10);
        b.set_compressed_bytes(50).unwrap();
        b.set_compressed_bytes(20).unwrap();
        assert_eq!(b.compressed_bytes(), 50);
    }

    #[test]
    fn test_zero_estimate_progress_uses_file_counts() {
        let mut b = PackagedBundle::new(0, 0, 4, 0);
        b.add_processed_bytes(1, 0, 1234).unwrap();
        assert_eq!(b.percent_complete(), 25.0);
    }
}
