//! Up-front partitioning of a package into bundles
//!
//! Works on the flattened file sequence. Boundaries are placed by *estimated*
//! size; the zip handler may later split a bundle again once real sizes are
//! known (see [`PackagedBundle::finish`]).

use crate::bundle::PackagedBundle;
use crate::file_group::FileGroup;
use serde::{Deserialize, Serialize};

/// A `package_together` group that could not be kept in one bundle
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionWarning {
    /// Position of the group in the input
    pub group_idx: usize,
    /// Estimated size of the group
    pub group_bytes: u64,
    /// The cap it exceeded
    pub max_bundle_bytes: u64,
}

impl std::fmt::Display for PartitionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "group {} ({} bytes) exceeds the bundle limit of {} bytes and was split",
            self.group_idx, self.group_bytes, self.max_bundle_bytes
        )
    }
}

/// Result of partitioning: bundles in order plus any best-effort splits
#[derive(Clone, Debug, Default)]
pub struct Partition {
    /// Bundles covering every file exactly once, contiguous and in order
    pub bundles: Vec<PackagedBundle>,
    /// Together-groups that had to be split
    pub warnings: Vec<PartitionWarning>,
}

struct Builder {
    bundles: Vec<PackagedBundle>,
    start: usize,
    count: usize,
    bytes: u64,
}

impl Builder {
    fn close(&mut self) {
        if self.count == 0 {
            return;
        }
        let idx = self.bundles.len();
        self.bundles
            .push(PackagedBundle::new(idx, self.start, self.count, self.bytes));
        self.start += self.count;
        self.count = 0;
        self.bytes = 0;
    }

    fn push(&mut self, size: u64) {
        self.count += 1;
        self.bytes = self.bytes.saturating_add(size);
    }
}

/// Split `groups` into bundles of at most `max_bundle_bytes` estimated bytes
///
/// - a file larger than the cap gets a bundle of its own
/// - a `package_together` group that fits alone never straddles a boundary
/// - a `package_together` group larger than the cap is split file by file
///   and reported in [`Partition::warnings`]
/// - files with an unknown (zero) size never force a boundary
pub fn partition(groups: &[FileGroup], max_bundle_bytes: u64) -> Partition {
    let mut builder = Builder {
        bundles: Vec::new(),
        start: 0,
        count: 0,
        bytes: 0,
    };
    let mut warnings = Vec::new();

    for (group_idx, group) in groups.iter().enumerate() {
        if group.is_empty() {
            continue;
        }
        let group_bytes = group.estimated_bytes();

        if group.package_together {
            if group_bytes <= max_bundle_bytes {
                if builder.bytes.saturating_add(group_bytes) > max_bundle_bytes {
                    builder.close();
                }
            } else {
                tracing::debug!(
                    group = group_idx,
                    group_bytes,
                    max_bundle_bytes,
                    "together-group exceeds bundle limit, splitting"
                );
                warnings.push(PartitionWarning {
                    group_idx,
                    group_bytes,
                    max_bundle_bytes,
                });
            }
        }

        for file in &group.files {
            let size = file.size_bytes;
            if builder.count > 0 && size > 0 && builder.bytes.saturating_add(size) > max_bundle_bytes
            {
                builder.close();
            }
            builder.push(size);
        }
    }
    builder.close();

    Partition {
        bundles: builder.bundles,
        warnings,
    }
}
