//! # zip-packager
//!
//! Asynchronous file bundling: fetches remote (http/https) and local files
//! and streams them into size-capped ZIP archives, staged for download.
//!
//! ## Overview
//!
//! - A package is an ordered list of [`FileGroup`]s. It is split into
//!   bundles no larger than `max_bundle_bytes`, one zip each, in order.
//! - Every zip carries a README listing what was packaged, what failed and
//!   what the requester was not allowed to receive.
//! - Progress, the per-bundle results and the cancel flag live in a
//!   [`StatusCache`] so that any process sharing the cache can follow or
//!   cancel a package.
//! - The [`PackagingController`] runs packages with bounded concurrency,
//!   keeping large packages from starving small ones.
//! - Consumers subscribe to [`Event`]s, no polling required.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use zip_packager::{Config, FileGroup, FileInfo, MemoryCache, PackageRequest, PackagingController};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let controller = PackagingController::new(Config::default(), Arc::new(MemoryCache::default()))?;
//!
//!     let mut events = controller.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let handle = controller
//!         .submit_request(PackageRequest {
//!             groups: vec![FileGroup::new(vec![FileInfo::new(
//!                 "https://example.com/data/image.fits",
//!                 "image.fits",
//!                 0,
//!             )])],
//!             base_file_name: "images".to_string(),
//!             ..Default::default()
//!         })
//!         .await?;
//!
//!     let report = handle.wait().await?;
//!     println!("Download from: {:?}", report.urls());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Status records stored in the cache
pub mod background;
/// Per-bundle accounting
pub mod bundle;
/// Status cache abstraction
pub mod cache;
/// Configuration types
pub mod config;
/// Bounded concurrent scheduler (decomposed into focused submodules)
pub mod controller;
/// Error types
pub mod error;
/// Source fetching (http/https and local files)
pub mod fetch;
/// Files to package
pub mod file_group;
/// Completion notifications
pub mod notify;
/// Package execution
pub mod packager;
/// Bundle partitioning
pub mod partition;
/// Package reports
pub mod report;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;
/// Job-facing workers
pub mod worker;
/// Streaming zip writer
pub mod zip_handler;

// Re-export commonly used types
pub use background::{BackgroundInfo, BackgroundInfoCacher};
pub use bundle::PackagedBundle;
pub use cache::{MemoryCache, StatusCache};
pub use config::Config;
pub use controller::{PackageHandle, PackageRequest, PackagingController};
pub use error::{ApiError, Error, ErrorDetail, JobError, PackageError, Result, ToHttpStatus};
pub use fetch::{FetchedSource, HttpFileFetcher, SourceFetcher};
pub use file_group::{FileGroup, FileInfo, FileNameRule};
pub use notify::{Notifier, WebhookNotifier};
pub use packager::{DownloadUrlResolver, Packager, StagingUrlResolver};
pub use report::PackagedReport;
pub use types::{BackgroundState, Event, Lane, PackageId, QueueStats};
pub use worker::{
    DownloadScriptWorker, FileGroupsProcessor, Job, JobOutcome, JobPhase, MemoryJob,
    PackagingWorker, ProcessorRegistry, ScriptType, Worker, WorkerRequest,
};

/// Run the controller until a termination signal arrives, then shut it down.
///
/// - **Unix:** listens for SIGTERM and SIGINT, falling back to Ctrl+C if
///   signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use zip_packager::{Config, MemoryCache, PackagingController, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let controller = PackagingController::new(Config::default(), Arc::new(MemoryCache::default()))?;
///     run_with_shutdown(controller).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(controller: PackagingController) -> Result<()> {
    wait_for_signal().await;
    controller.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register signal handlers, using ctrl_c fallback");
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
