//! Opening package sources
//!
//! A [`SourceFetcher`] turns a [`FileInfo`] into a byte stream: remote
//! locators are fetched over HTTP(S), everything else is read from the local
//! filesystem relative to the group's base directory. Fetchers are blocking;
//! they run on the packaging thread.

use crate::config::FetchConfig;
use crate::error::{PackageError, Result};
use crate::file_group::{FileGroup, FileInfo};
use std::fs::File;
use std::io::Read;
use std::sync::OnceLock;

/// An opened source
pub struct FetchedSource {
    /// The content
    pub reader: Box<dyn Read + Send>,
    /// Name the source suggests for itself (Content-Disposition, URL path or file name)
    pub suggested_name: Option<String>,
    /// Size announced by the source, when known
    pub content_length: Option<u64>,
}

impl std::fmt::Debug for FetchedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedSource")
            .field("suggested_name", &self.suggested_name)
            .field("content_length", &self.content_length)
            .finish()
    }
}

/// Opens the content of a file for packaging
pub trait SourceFetcher: Send + Sync {
    /// Open `file`, which belongs to `group`
    ///
    /// Errors here are per-file: the caller records them and moves on.
    fn open(&self, group: &FileGroup, file: &FileInfo) -> Result<FetchedSource>;
}

/// [`SourceFetcher`] for http(s) URLs and local paths
///
/// The HTTP client is built on first use so that it is created on the
/// packaging thread rather than inside the async runtime.
pub struct HttpFileFetcher {
    config: FetchConfig,
    client: OnceLock<reqwest::blocking::Client>,
}

impl HttpFileFetcher {
    /// Create a fetcher with the given timeouts and user agent
    pub fn new(config: FetchConfig) -> Self {
        Self {
            config,
            client: OnceLock::new(),
        }
    }

    fn client(&self) -> Result<&reqwest::blocking::Client> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(self.config.connect_timeout)
            .timeout(self.config.read_timeout)
            .user_agent(self.config.user_agent.clone())
            .build()?;
        Ok(self.client.get_or_init(|| client))
    }

    fn open_remote(&self, file: &FileInfo) -> Result<FetchedSource> {
        let fetch_error = |reason: String| PackageError::Fetch {
            locator: file.locator.clone(),
            reason,
        };

        let mut request = self.client()?.get(&file.locator);
        if let Some(cookie) = file.cookie_header() {
            request = request.header(reqwest::header::COOKIE, cookie);
        }
        for (name, value) in &file.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().map_err(|e| fetch_error(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!("HTTP {}", status)).into());
        }

        let suggested_name =
            crate::utils::suggested_filename(response.headers(), response.url().as_str());
        let content_length = response.content_length();

        tracing::debug!(
            url = %file.locator,
            content_length = ?content_length,
            "opened remote source"
        );

        Ok(FetchedSource {
            reader: Box::new(response),
            suggested_name,
            content_length,
        })
    }

    fn open_local(&self, group: &FileGroup, file: &FileInfo) -> Result<FetchedSource> {
        let path = group.local_path(file);
        let handle = File::open(&path).map_err(|e| PackageError::Fetch {
            locator: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let content_length = handle.metadata().ok().map(|m| m.len());
        let suggested_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string);

        Ok(FetchedSource {
            reader: Box::new(handle),
            suggested_name,
            content_length,
        })
    }
}

impl SourceFetcher for HttpFileFetcher {
    fn open(&self, group: &FileGroup, file: &FileInfo) -> Result<FetchedSource> {
        if file.is_remote() {
            self.open_remote(file)
        } else {
            self.open_local(group, file)
        }
    }
}
