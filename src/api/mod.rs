//! REST API server module
//!
//! Exposes package submission, status, cancellation, queue statistics,
//! worker jobs, artifact download and a server-sent event stream.

use crate::controller::PackagingController;
use crate::error::Result;
use crate::worker::ProcessorRegistry;
use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod error_response;
pub mod routes;
pub mod state;

pub use state::AppState;

/// Create the API router with all route definitions
///
/// # Routes
///
/// ## Packages
/// - `POST /packages` - Queue a package
/// - `GET /packages/:id` - Package status report
/// - `DELETE /packages/:id` - Cancel a package
///
/// ## Queue
/// - `GET /queue/stats` - Scheduler statistics
/// - `GET /queue/status` - Human-readable status report
///
/// ## Jobs
/// - `POST /jobs/package` - Run a packaging job for a file-groups processor
/// - `POST /jobs/script` - Run a download-script job
/// - `GET /jobs/:id` - Job status
///
/// ## System
/// - `GET /download` - Serve a staged artifact (`?file=<path>&return=<name>`)
/// - `GET /health` - Health check
/// - `GET /events` - Server-sent events stream
/// - `POST /shutdown` - Graceful shutdown
pub fn create_router(controller: Arc<PackagingController>, processors: Arc<ProcessorRegistry>) -> Router {
    let config = controller.config().clone();
    let state = AppState::new(controller, processors);

    let router = Router::new()
        // Packages
        .route("/packages", post(routes::submit_package))
        .route(
            "/packages/:id",
            get(routes::get_package).delete(routes::cancel_package),
        )
        // Queue
        .route("/queue/stats", get(routes::queue_stats))
        .route("/queue/status", get(routes::queue_status))
        // Jobs
        .route("/jobs/package", post(routes::start_packaging_job))
        .route("/jobs/script", post(routes::start_script_job))
        .route("/jobs/:id", get(routes::get_job))
        // System
        .route("/download", get(routes::download_artifact))
        .route("/health", get(routes::health_check))
        .route("/events", get(routes::event_stream))
        .route("/shutdown", post(routes::shutdown))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.api.cors_enabled {
        router.layer(build_cors_layer(&config.api.cors_origins))
    } else {
        router
    }
}

/// Build a CORS layer based on configured origins
///
/// "*" (or an empty list) allows any origin.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Start the API server on the configured bind address
///
/// Runs until the server stops.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use zip_packager::{Config, MemoryCache, PackagingController, ProcessorRegistry};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let controller = PackagingController::new(Config::default(), Arc::new(MemoryCache::default()))?;
/// zip_packager::api::start_api_server(
///     Arc::new(controller),
///     Arc::new(ProcessorRegistry::with_inline()),
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server(
    controller: Arc<PackagingController>,
    processors: Arc<ProcessorRegistry>,
) -> Result<()> {
    let bind_address = controller.config().api.bind_address;

    tracing::info!(address = %bind_address, "Starting API server");

    let app = create_router(controller, processors);
    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(address = %bind_address, "API server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
