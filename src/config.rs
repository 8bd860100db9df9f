//! Configuration types for zip-packager

use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};

/// One mebibyte
pub const MEG: u64 = 1024 * 1024;

/// Packaging behavior (staging, bundle size, progress gating)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PackagingConfig {
    /// Directory where zip files and single-file copies are written (default: "./staging")
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Maximum estimated uncompressed bytes per zip bundle (default: 1 GiB)
    ///
    /// A single file larger than this still gets a bundle of its own.
    #[serde(default = "default_max_bundle_bytes")]
    pub max_bundle_bytes: u64,

    /// Bytes that must accumulate before progress is written back to the cache (default: 15 MiB)
    ///
    /// Bounds the number of cache writes and progress events regardless of
    /// how many (small) files a bundle contains.
    #[serde(default = "default_progress_persist_bytes")]
    pub progress_persist_bytes: u64,

    /// Size assumed for remote files of unknown size when estimating progress (default: 2 MiB)
    ///
    /// Only affects the report's total estimate; partitioning never uses it.
    #[serde(default = "default_remote_bytes")]
    pub default_remote_bytes: u64,

    /// Deliver a package consisting of exactly one file without zipping it (default: true)
    #[serde(default = "default_true")]
    pub single_file_passthrough: bool,

    /// How long package status stays in the cache (default: 3 days)
    #[serde(default = "default_status_ttl", with = "duration_serde")]
    pub status_ttl: Duration,

    /// Public base URL under which staged files are served (default: "http://127.0.0.1:6790")
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for PackagingConfig {
    fn default() -> Self {
        Self {
            staging_dir: default_staging_dir(),
            max_bundle_bytes: default_max_bundle_bytes(),
            progress_persist_bytes: default_progress_persist_bytes(),
            default_remote_bytes: default_remote_bytes(),
            single_file_passthrough: true,
            status_ttl: default_status_ttl(),
            base_url: default_base_url(),
        }
    }
}

/// Scheduler limits for the large and small lanes
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Estimated package size at which a package runs in the large lane (default: 750 MiB)
    #[serde(default = "default_large_package_bytes")]
    pub large_package_bytes: u64,

    /// Maximum concurrently running large packages (default: 3)
    #[serde(default = "default_max_large_jobs")]
    pub max_large_jobs: usize,

    /// Maximum concurrently running packages, large and small combined (default: 5)
    #[serde(default = "default_max_total_jobs")]
    pub max_total_jobs: usize,

    /// Queue length above which the queue is reported as long (default: 30)
    #[serde(default = "default_warning_queue_size")]
    pub warning_queue_size: usize,

    /// How long shutdown waits for running packages (default: 30 seconds)
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            large_package_bytes: default_large_package_bytes(),
            max_large_jobs: default_max_large_jobs(),
            max_total_jobs: default_max_total_jobs(),
            warning_queue_size: default_warning_queue_size(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// HTTP source fetching
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Connect timeout for remote sources (default: 30 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Whole-request timeout for remote sources (default: 300 seconds)
    #[serde(default = "default_read_timeout", with = "duration_serde")]
    pub read_timeout: Duration,

    /// User-Agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            read_timeout: default_read_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Disk space checking before a bundle is written
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiskSpaceConfig {
    /// Enable disk space checking (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Multiplier applied to the bundle's estimated size (default: 1.1)
    #[serde(default = "default_size_multiplier")]
    pub size_multiplier: f64,

    /// Space that must remain free after the bundle is written (default: 100 MiB)
    #[serde(default = "default_min_free_space")]
    pub min_free_space: u64,
}

impl Default for DiskSpaceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            size_multiplier: default_size_multiplier(),
            min_free_space: default_min_free_space(),
        }
    }
}

/// Webhook configuration for completion notifications
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// URL to POST to
    pub url: String,

    /// Optional Authorization header value
    #[serde(default)]
    pub auth_header: Option<String>,

    /// Request timeout (default: 30 seconds)
    #[serde(default = "default_webhook_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

/// Notification configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Webhooks notified when a package finishes
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,
}

/// Download-script output configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Directory scripts are additionally saved to (None = no workspace saving)
    #[serde(default)]
    pub workspace_dir: Option<PathBuf>,
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address to bind the API server to (default: 127.0.0.1:6790)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Enable CORS (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
        }
    }
}

/// Main configuration for the packaging service
///
/// Fields are organized into sub-configs:
/// - [`packaging`](PackagingConfig) - staging, bundle size, progress gating
/// - [`scheduler`](SchedulerConfig) - lane thresholds and concurrency limits
/// - [`fetch`](FetchConfig) - HTTP timeouts for remote sources
/// - [`disk_space`](DiskSpaceConfig) - staging free-space check
/// - [`notifications`](NotificationConfig) - completion webhooks
/// - [`scripts`](ScriptConfig) - download-script workspace
/// - [`api`](ApiConfig) - REST server
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Packaging behavior
    #[serde(default)]
    pub packaging: PackagingConfig,

    /// Scheduler limits
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Remote fetching
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Disk space checking
    #[serde(default)]
    pub disk_space: DiskSpaceConfig,

    /// Completion notifications
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Download-script output
    #[serde(default)]
    pub scripts: ScriptConfig,

    /// REST API
    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Staging directory
    pub fn staging_dir(&self) -> &PathBuf {
        &self.packaging.staging_dir
    }

    /// Check values that would make the scheduler or packager misbehave
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.scheduler.max_total_jobs == 0 {
            return Err(crate::error::Error::Config {
                message: "max_total_jobs must be at least 1".to_string(),
                key: Some("max_total_jobs".to_string()),
            });
        }
        if self.scheduler.max_large_jobs > self.scheduler.max_total_jobs {
            return Err(crate::error::Error::Config {
                message: format!(
                    "max_large_jobs ({}) cannot exceed max_total_jobs ({})",
                    self.scheduler.max_large_jobs, self.scheduler.max_total_jobs
                ),
                key: Some("max_large_jobs".to_string()),
            });
        }
        if self.packaging.max_bundle_bytes == 0 {
            return Err(crate::error::Error::Config {
                message: "max_bundle_bytes must be greater than zero".to_string(),
                key: Some("max_bundle_bytes".to_string()),
            });
        }
        Ok(())
    }
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("staging")
}

fn default_max_bundle_bytes() -> u64 {
    1024 * MEG
}

fn default_progress_persist_bytes() -> u64 {
    15 * MEG
}

fn default_remote_bytes() -> u64 {
    2 * MEG
}

fn default_status_ttl() -> Duration {
    Duration::from_secs(3 * 24 * 60 * 60)
}

fn default_base_url() -> String {
    "http://127.0.0.1:6790".to_string()
}

fn default_large_package_bytes() -> u64 {
    750 * MEG
}

fn default_max_large_jobs() -> usize {
    3
}

fn default_max_total_jobs() -> usize {
    5
}

fn default_warning_queue_size() -> usize {
    30
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_user_agent() -> String {
    format!("zip-packager/{}", env!("CARGO_PKG_VERSION"))
}

fn default_size_multiplier() -> f64 {
    1.1
}

fn default_min_free_space() -> u64 {
    100 * MEG
}

fn default_webhook_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6790))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".into()]
}

fn default_true() -> bool {
    true
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.packaging.progress_persist_bytes, 15 * MEG);
        assert_eq!(config.packaging.default_remote_bytes, 2 * MEG);
        assert_eq!(config.scheduler.large_package_bytes, 750 * MEG);
        assert_eq!(config.scheduler.max_large_jobs, 3);
        assert_eq!(config.scheduler.max_total_jobs, 5);
        assert_eq!(config.scheduler.warning_queue_size, 30);
        assert!(config.packaging.single_file_passthrough);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_json_deserializes_to_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.packaging.max_bundle_bytes, 1024 * MEG);
        assert_eq!(config.fetch.read_timeout, Duration::from_secs(300));
        assert_eq!(config.api.bind_address.port(), 6790);
    }

    #[test]
    fn test_partial_json_overrides_only_given_fields() {
        let json = r#"{
            "scheduler": { "max_large_jobs": 1, "shutdown_timeout": 5 },
            "packaging": { "max_bundle_bytes": 1000 }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.scheduler.max_large_jobs, 1);
        assert_eq!(config.scheduler.max_total_jobs, 5);
        assert_eq!(config.scheduler.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(config.packaging.max_bundle_bytes, 1000);
        assert_eq!(config.packaging.progress_persist_bytes, 15 * MEG);
    }

    #[test]
    fn test_validate_rejects_large_limit_above_total() {
        let mut config = Config::default();
        config.scheduler.max_large_jobs = 6;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, crate::error::Error::Config { key: Some(ref k), .. } if k == "max_large_jobs"));
    }

    #[test]
    fn test_validate_rejects_zero_bundle_size() {
        let mut config = Config::default();
        config.packaging.max_bundle_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_roundtrip_uses_seconds() {
        let config = Config::default();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["scheduler"]["shutdown_timeout"], 30);
        assert_eq!(json["packaging"]["status_ttl"], 3 * 24 * 60 * 60);
    }
}
