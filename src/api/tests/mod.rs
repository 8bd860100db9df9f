use super::*;
use crate::Config;
use crate::cache::MemoryCache;
use axum::body::Body;
use axum::http::Request;
use axum::http::StatusCode;
use axum::response::Response;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

mod jobs;
mod packages;

/// Staging and source directories for one test
struct TestDirs {
    staging: TempDir,
    sources: TempDir,
}

impl TestDirs {
    fn new() -> Self {
        let dirs = Self {
            staging: TempDir::new().unwrap(),
            sources: TempDir::new().unwrap(),
        };
        for (name, content) in [("a.fits", "alpha data"), ("b.fits", "beta data")] {
            std::fs::write(dirs.sources.path().join(name), content).unwrap();
        }
        dirs
    }
}

fn test_config(staging: &Path) -> Config {
    let mut config = Config::default();
    config.packaging.staging_dir = staging.to_path_buf();
    config.packaging.base_url = "http://packager.test".to_string();
    config.disk_space.enabled = false;
    config
}

/// Helper to create a test controller wrapped in Arc
fn create_test_controller(dirs: &TestDirs) -> Arc<PackagingController> {
    let controller = PackagingController::new(
        test_config(dirs.staging.path()),
        Arc::new(MemoryCache::default()),
    )
    .unwrap();
    Arc::new(controller)
}

fn create_test_app(dirs: &TestDirs) -> (Router, Arc<PackagingController>) {
    let controller = create_test_controller(dirs);
    let app = create_router(
        controller.clone(),
        Arc::new(ProcessorRegistry::with_inline()),
    );
    (app, controller)
}

/// Two local files from the sources directory as file groups JSON
fn groups_json(dirs: &TestDirs) -> serde_json::Value {
    serde_json::json!([{
        "base_dir": dirs.sources.path(),
        "files": [
            {"locator": "a.fits", "external_name": "a.fits", "size_bytes": 10},
            {"locator": "b.fits", "external_name": "b.fits", "size_bytes": 9}
        ]
    }])
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Poll `GET uri` until `done` accepts the JSON body
async fn poll_until(
    app: &Router,
    uri: &str,
    done: impl Fn(&serde_json::Value) -> bool,
) -> serde_json::Value {
    for _ in 0..100 {
        let response = app.clone().oneshot(empty_request("GET", uri)).await.unwrap();
        if response.status() == StatusCode::OK {
            let body = body_json(response).await;
            if done(&body) {
                return body;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("{} did not reach the expected state", uri);
}

#[tokio::test]
async fn test_api_server_spawns() {
    let dirs = TestDirs::new();
    let mut config = test_config(dirs.staging.path());
    // Port 0 = OS assigns a free port
    config.api.bind_address = "127.0.0.1:0".parse().unwrap();
    let controller =
        Arc::new(PackagingController::new(config, Arc::new(MemoryCache::default())).unwrap());

    let api_handle = tokio::spawn(start_api_server(
        controller,
        Arc::new(ProcessorRegistry::with_inline()),
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!api_handle.is_finished(), "server should still be running");
    api_handle.abort();
}

#[tokio::test]
async fn test_cors_enabled() {
    let dirs = TestDirs::new();
    let (app, _) = create_test_app(&dirs);

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers().contains_key("access-control-allow-origin"),
        "CORS header should be present when CORS is enabled"
    );
}

#[tokio::test]
async fn test_cors_disabled() {
    let dirs = TestDirs::new();
    let mut config = test_config(dirs.staging.path());
    config.api.cors_enabled = false;
    let controller =
        Arc::new(PackagingController::new(config, Arc::new(MemoryCache::default())).unwrap());
    let app = create_router(controller, Arc::new(ProcessorRegistry::with_inline()));

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(!response.headers().contains_key("access-control-allow-origin"));
}

#[test]
fn test_cors_layer_with_specific_origins() {
    // Invalid header values are skipped rather than rejected
    let _layer = build_cors_layer(&[
        "http://localhost:3000".to_string(),
        "not a valid\nheader".to_string(),
    ]);
}
