//! File model: what gets packaged and how files are grouped
//!
//! A package is an ordered list of [`FileGroup`]s. Packaging works on the
//! *flattened* sequence of files (group order, then file order within the
//! group); bundle ranges are indices into that flattened sequence.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// How to derive the external name of a remote file from the name the server suggests
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum FileNameRule {
    /// Use the suggested name unchanged
    Suggested,
    /// Prepend a fixed prefix to the suggested name
    Prefixed {
        /// Prefix to prepend
        prefix: String,
    },
}

impl FileNameRule {
    /// Apply the rule to a server-suggested filename
    pub fn resolve(&self, suggested: &str) -> String {
        let suggested = suggested.trim_start_matches('/');
        match self {
            FileNameRule::Suggested => suggested.to_string(),
            FileNameRule::Prefixed { prefix } => format!("{}{}", prefix, suggested),
        }
    }
}

/// One file to be packaged
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// URL (http/https) or local path, relative paths resolve against the group's base dir
    pub locator: String,

    /// Name of the entry inside the archive (may contain '/' for subdirectories)
    pub external_name: String,

    /// Estimated size in bytes, 0 when unknown
    #[serde(default)]
    pub size_bytes: u64,

    /// Whether the requester may receive this file
    #[serde(default = "default_true")]
    pub has_access: bool,

    /// Cookies sent with the request for remote files
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,

    /// Extra headers (e.g. Authorization) sent with the request for remote files
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Rename the file from the server's suggested name (single-file packages)
    #[serde(default)]
    pub name_rule: Option<FileNameRule>,
}

fn default_true() -> bool {
    true
}

impl FileInfo {
    /// Create an accessible file with the given locator, external name and size estimate
    pub fn new(locator: impl Into<String>, external_name: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            locator: locator.into(),
            external_name: external_name.into(),
            size_bytes,
            has_access: true,
            cookies: BTreeMap::new(),
            headers: BTreeMap::new(),
            name_rule: None,
        }
    }

    /// Mark the file as not accessible to the requester
    pub fn denied(mut self) -> Self {
        self.has_access = false;
        self
    }

    /// Add a cookie sent when fetching the file
    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    /// Whether the locator is an http(s) URL
    pub fn is_remote(&self) -> bool {
        url::Url::parse(&self.locator)
            .map(|u| matches!(u.scheme(), "http" | "https"))
            .unwrap_or(false)
    }

    /// Cookie header value, None when no cookies are set
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Whether the external name marks the source as gzip-compressed
    pub fn is_gzip_name(&self) -> bool {
        self.external_name.to_ascii_lowercase().ends_with(".gz")
    }
}

/// An ordered set of files sharing a base directory and a packaging constraint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileGroup {
    /// Files in packaging order
    pub files: Vec<FileInfo>,

    /// Directory relative local locators resolve against
    #[serde(default)]
    pub base_dir: Option<PathBuf>,

    /// Keep all files of the group in one bundle when the group fits
    #[serde(default)]
    pub package_together: bool,
}

impl FileGroup {
    /// Create a group without base directory or packaging constraint
    pub fn new(files: Vec<FileInfo>) -> Self {
        Self {
            files,
            base_dir: None,
            package_together: false,
        }
    }

    /// Set the base directory for relative local files
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Require the group to stay in one bundle when possible
    pub fn together(mut self) -> Self {
        self.package_together = true;
        self
    }

    /// Sum of the members' size estimates
    pub fn estimated_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size_bytes).sum()
    }

    /// Number of files in the group
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the group has no files
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Resolve a local locator against the base directory
    pub fn local_path(&self, file: &FileInfo) -> PathBuf {
        let path = Path::new(&file.locator);
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

/// Iterate the flattened file sequence as (group, file) pairs
pub fn flatten(groups: &[FileGroup]) -> impl Iterator<Item = (&FileGroup, &FileInfo)> {
    groups
        .iter()
        .flat_map(|group| group.files.iter().map(move |file| (group, file)))
}

/// Total number of files across all groups
pub fn total_files(groups: &[FileGroup]) -> usize {
    groups.iter().map(FileGroup::len).sum()
}

/// Total estimated bytes across all groups
pub fn total_estimated_bytes(groups: &[FileGroup]) -> u64 {
    groups.iter().map(FileGroup::estimated_bytes).sum()
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_detection() {
        assert!(FileInfo::new("https://irsa.example/data/a.fits", "a.fits", 0).is_remote());
        assert!(FileInfo::new("http://host/a", "a", 0).is_remote());
        assert!(!FileInfo::new("/data/a.fits", "a.fits", 0).is_remote());
        assert!(!FileInfo::new("rel/a.fits", "a.fits", 0).is_remote());
    }

    #[test]
    fn test_cookie_header_joins_sorted_pairs() {
        let f = FileInfo::new("http://h/a", "a", 0)
            .with_cookie("session", "abc")
            .with_cookie("auth", "xyz");
        assert_eq!(f.cookie_header().unwrap(), "auth=xyz; session=abc");
        assert!(FileInfo::new("http://h/a", "a", 0).cookie_header().is_none());
    }

    #[test]
    fn test_local_path_resolution() {
        let group = FileGroup::new(vec![]).with_base_dir("/archive");
        let rel = FileInfo::new("2mass/j.fits", "j.fits", 0);
        let abs = FileInfo::new("/other/k.fits", "k.fits", 0);
        assert_eq!(group.local_path(&rel), PathBuf::from("/archive/2mass/j.fits"));
        assert_eq!(group.local_path(&abs), PathBuf::from("/other/k.fits"));
    }

    #[test]
    fn test_flatten_preserves_order() {
        let groups = vec![
            FileGroup::new(vec![FileInfo::new("a", "a", 1), FileInfo::new("b", "b", 2)]),
            FileGroup::new(vec![]),
            FileGroup::new(vec![FileInfo::new("c", "c", 3)]),
        ];
        let names: Vec<_> = flatten(&groups).map(|(_, f)| f.locator.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(total_files(&groups), 3);
        assert_eq!(total_estimated_bytes(&groups), 6);
    }

    #[test]
    fn test_name_rules() {
        assert_eq!(FileNameRule::Suggested.resolve("/x.fits"), "x.fits");
        let rule = FileNameRule::Prefixed {
            prefix: "wise_".into(),
        };
        assert_eq!(rule.resolve("x.fits"), "wise_x.fits");
    }

    #[test]
    fn test_gzip_name_detection_is_case_insensitive() {
        assert!(FileInfo::new("a", "image.fits.GZ", 0).is_gzip_name());
        assert!(!FileInfo::new("a", "image.fits", 0).is_gzip_name());
    }

    #[test]
    fn test_deserialize_defaults_access_to_true() {
        let f: FileInfo =
            serde_json::from_str(r#"{"locator":"/a","external_name":"a"}"#).unwrap();
        assert!(f.has_access);
        assert_eq!(f.size_bytes, 0);
    }
}
