//! Whole-package status snapshot
//!
//! A [`PackagedReport`] is what requesters poll: the ordered bundle list, the
//! package state and human-readable messages. It is stored (serialized) inside
//! the package's [`BackgroundInfo`](crate::background::BackgroundInfo).

use crate::bundle::PackagedBundle;
use crate::types::{BackgroundState, PackageId};
use serde::{Deserialize, Serialize};

/// Status of a whole package
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PackagedReport {
    /// Package this report describes
    pub package_id: PackageId,

    /// Bundles in package order; indices are contiguous from 0
    pub bundles: Vec<PackagedBundle>,

    /// Estimated uncompressed bytes of the whole package
    pub total_bytes: u64,

    /// Package state
    pub state: BackgroundState,

    /// Messages shown to the requester (denied/failed summaries, cancel reasons)
    #[serde(default)]
    pub messages: Vec<String>,

    /// Where the file list came from (e.g. a catalog or mission name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<String>,
}

impl PackagedReport {
    /// Create a report
    pub fn new(
        package_id: PackageId,
        bundles: Vec<PackagedBundle>,
        total_bytes: u64,
        state: BackgroundState,
    ) -> Self {
        Self {
            package_id,
            bundles,
            total_bytes,
            state,
            messages: Vec::new(),
            data_source: None,
        }
    }

    /// Report for a package whose status could not be produced at all
    pub fn failed(package_id: PackageId, message: impl Into<String>) -> Self {
        let mut report = Self::new(package_id, Vec::new(), 0, BackgroundState::Fail);
        report.add_message(message);
        report
    }

    /// Set the data source
    pub fn with_data_source(mut self, source: Option<String>) -> Self {
        self.data_source = source;
        self
    }

    /// Number of bundles
    pub fn part_count(&self) -> usize {
        self.bundles.len()
    }

    /// Bundle at `idx`
    pub fn bundle(&self, idx: usize) -> Option<&PackagedBundle> {
        self.bundles.get(idx)
    }

    /// Mutable bundle at `idx`
    pub fn bundle_mut(&mut self, idx: usize) -> Option<&mut PackagedBundle> {
        self.bundles.get_mut(idx)
    }

    /// Copy of this report with a different package state
    pub fn clone_with_state(&self, state: BackgroundState) -> Self {
        let mut report = self.clone();
        report.state = state;
        report
    }

    /// Append a message (identical messages are kept once)
    pub fn add_message(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.messages.contains(&message) {
            self.messages.push(message);
        }
    }

    /// Insert a follow-up bundle directly after its parent
    ///
    /// The follow-up carries the index it should occupy; every bundle at or
    /// after that position shifts one index later so indices stay contiguous.
    pub fn insert_follow_up(&mut self, follow_up: PackagedBundle) {
        let position = follow_up.package_idx().min(self.bundles.len());
        self.bundles.insert(position, follow_up);
        for (idx, bundle) in self.bundles.iter_mut().enumerate().skip(position + 1) {
            bundle.renumber(idx);
        }
    }

    /// Files processed across all bundles
    pub fn processed_files(&self) -> usize {
        self.bundles.iter().map(PackagedBundle::processed_files).sum()
    }

    /// Bytes processed across all bundles
    pub fn processed_bytes(&self) -> u64 {
        self.bundles.iter().map(PackagedBundle::processed_bytes).sum()
    }

    /// Progress of the whole package in percent
    pub fn percent_complete(&self) -> f32 {
        if self.state == BackgroundState::Success {
            return 100.0;
        }
        if self.bundles.is_empty() {
            return 0.0;
        }
        if self.total_bytes == 0 {
            let sum: f32 = self.bundles.iter().map(PackagedBundle::percent_complete).sum();
            return sum / self.bundles.len() as f32;
        }
        ((self.processed_bytes() as f64 / self.total_bytes as f64) * 100.0).min(100.0) as f32
    }

    /// Whether the package reached a terminal state
    pub fn is_done(&self) -> bool {
        self.state.is_terminal()
    }

    /// Download URLs of all successful bundles, in order
    pub fn urls(&self) -> Vec<String> {
        self.bundles
            .iter()
            .filter_map(|b| b.url().map(str::to_string))
            .collect()
    }
}
