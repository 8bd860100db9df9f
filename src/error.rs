//! Error types for zip-packager
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error types (packaging, job, configuration)
//! - HTTP status code mapping for API integration
//! - Structured error responses with machine-readable error codes
//!
//! Per-file problems during packaging (a 404, an unreadable file, a denied
//! file) are *not* errors at this level: they are recorded in the bundle's
//! README and the report messages. Only bundle-fatal and job-fatal conditions
//! surface as [`Error`].

use crate::types::BackgroundState;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for zip-packager operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for zip-packager
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "staging_dir")
        key: Option<String>,
    },

    /// Packaging error (bundle state machine, empty package, fatal archive failure)
    #[error("packaging error: {0}")]
    Package(#[from] PackageError),

    /// Job-level error (no processor, aborted job)
    #[error("job error: {0}")]
    Job(#[from] JobError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// ZIP archive writing error
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Package or resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not accepting new packages
    #[error("shutdown in progress: not accepting new packages")]
    ShuttingDown,

    /// Insufficient disk space in the staging directory
    #[error("insufficient disk space: need {required} bytes, have {available} bytes")]
    InsufficientSpace {
        /// Number of bytes required for the operation
        required: u64,
        /// Number of bytes currently available on disk
        available: u64,
    },

    /// Failed to check disk space
    #[error("failed to check disk space: {0}")]
    DiskSpaceCheckFailed(String),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Packaging errors
#[derive(Debug, Error)]
pub enum PackageError {
    /// A bundle or report was asked to do something its state forbids
    #[error("bundle {package_idx} is {state}: cannot {operation}")]
    IllegalState {
        /// Index of the bundle
        package_idx: usize,
        /// The operation that was attempted (e.g., "finish", "add bytes")
        operation: String,
        /// The state that prevents the operation
        state: BackgroundState,
    },

    /// A package must contain at least one file
    #[error("package {package_id} contains no files")]
    EmptyPackage {
        /// The package that was empty
        package_id: String,
    },

    /// The package status is no longer in the cache (evicted or never created)
    #[error("status for package {package_id} is not cached")]
    StatusMissing {
        /// The package whose status is missing
        package_id: String,
    },

    /// Writing the archive itself failed; the bundle is aborted
    #[error("archive {archive} failed: {reason}")]
    ArchiveFailed {
        /// The zip file that was being written
        archive: PathBuf,
        /// The reason writing failed
        reason: String,
    },

    /// Fetching a single source file failed
    #[error("failed to fetch {locator}: {reason}")]
    Fetch {
        /// URL or path of the file
        locator: String,
        /// The reason fetching failed
        reason: String,
    },
}

/// Job-level errors raised at the worker boundary
#[derive(Debug, Error)]
pub enum JobError {
    /// No file-groups processor is registered for the request
    #[error("no processor registered for request '{request_id}'")]
    NoProcessor {
        /// The request id that could not be resolved
        request_id: String,
    },

    /// The job ended without producing a result
    #[error("job {job_id} aborted: {reason}")]
    Aborted {
        /// The job that aborted
        job_id: String,
        /// Why it aborted
        reason: String,
    },

    /// Worker used before a job was attached
    #[error("worker has no job attached")]
    NoJob,
}

/// API error response format
///
/// This structure is returned by API endpoints when an error occurs.
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "not_found",
///     "message": "not found: package pkg-1",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "validation_error")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - Client error (invalid input)
            Error::Config { .. } => 400,
            Error::Package(PackageError::EmptyPackage { .. }) => 400,

            // 404 Not Found
            Error::NotFound(_) => 404,
            Error::Package(PackageError::StatusMissing { .. }) => 404,
            Error::Job(JobError::NoProcessor { .. }) => 404,

            // 409 Conflict - state machine violations
            Error::Package(PackageError::IllegalState { .. }) => 409,

            // 422 Unprocessable Entity - Semantic errors
            Error::InsufficientSpace { .. } => 422,
            Error::Job(JobError::Aborted { .. }) => 422,
            Error::Job(JobError::NoJob) => 422,

            // 500 Internal Server Error - Server-side issues
            Error::Package(PackageError::ArchiveFailed { .. }) => 500,
            Error::Io(_) => 500,
            Error::Zip(_) => 500,
            Error::Serialization(_) => 500,
            Error::DiskSpaceCheckFailed(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Other(_) => 500,

            // 502 Bad Gateway - External service errors
            Error::Network(_) => 502,
            Error::Package(PackageError::Fetch { .. }) => 502,

            // 503 Service Unavailable
            Error::ShuttingDown => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Package(e) => match e {
                PackageError::IllegalState { .. } => "illegal_state",
                PackageError::EmptyPackage { .. } => "empty_package",
                PackageError::StatusMissing { .. } => "status_missing",
                PackageError::ArchiveFailed { .. } => "archive_failed",
                PackageError::Fetch { .. } => "fetch_failed",
            },
            Error::Job(e) => match e {
                JobError::NoProcessor { .. } => "no_processor",
                JobError::Aborted { .. } => "job_aborted",
                JobError::NoJob => "no_job",
            },
            Error::Io(_) => "io_error",
            Error::Zip(_) => "zip_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::NotFound(_) => "not_found",
            Error::ShuttingDown => "shutting_down",
            Error::InsufficientSpace { .. } => "insufficient_space",
            Error::DiskSpaceCheckFailed(_) => "disk_space_check_failed",
            Error::ApiServerError(_) => "api_server_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        // Add contextual details for specific error types
        let details = match &error {
            Error::Package(PackageError::IllegalState {
                package_idx,
                operation,
                state,
            }) => Some(serde_json::json!({
                "package_idx": package_idx,
                "operation": operation,
                "state": state,
            })),
            Error::Package(PackageError::StatusMissing { package_id })
            | Error::Package(PackageError::EmptyPackage { package_id }) => {
                Some(serde_json::json!({
                    "package_id": package_id,
                }))
            }
            Error::InsufficientSpace {
                required,
                available,
            } => Some(serde_json::json!({
                "required_bytes": required,
                "available_bytes": available,
            })),
            Error::Job(JobError::NoProcessor { request_id }) => Some(serde_json::json!({
                "request_id": request_id,
            })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
