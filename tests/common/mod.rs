//! Common test utilities for zip-packager end-to-end tests

#![allow(dead_code)]

use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip_packager::{Config, Event, MemoryCache, PackagingController};

/// Default timeout when waiting for events
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Test configuration with the staging directory in `staging`
pub fn test_config(staging: &Path) -> Config {
    let mut config = Config::default();
    config.packaging.staging_dir = staging.to_path_buf();
    config.packaging.base_url = "http://packager.test".to_string();
    config.disk_space.enabled = false;
    config.fetch.connect_timeout = Duration::from_secs(5);
    config.fetch.read_timeout = Duration::from_secs(10);
    config
}

/// Create a controller with an in-memory status cache and its staging directory
pub fn create_test_controller(configure: impl FnOnce(&mut Config)) -> (PackagingController, TempDir) {
    let staging = TempDir::new().expect("Failed to create staging dir");
    let mut config = test_config(staging.path());
    configure(&mut config);
    let controller = PackagingController::new(config, Arc::new(MemoryCache::default()))
        .expect("Failed to create controller");
    (controller, staging)
}

/// Serve `body` at `route` on `server`, after `delay`
pub async fn serve_file(server: &MockServer, route: &str, body: &[u8], delay: Duration) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(body.to_vec())
                .set_delay(delay),
        )
        .mount(server)
        .await;
}

/// Names of all entries in the zip at `path`
pub fn zip_entry_names(path: &Path) -> Vec<String> {
    let file = std::fs::File::open(path).expect("zip should exist");
    let mut archive = zip::ZipArchive::new(file).expect("valid zip");
    (0..archive.len())
        .map(|i| archive.by_index(i).expect("entry").name().to_string())
        .collect()
}

/// Content of entry `name` in the zip at `path`
pub fn read_zip_entry(path: &Path, name: &str) -> String {
    let file = std::fs::File::open(path).expect("zip should exist");
    let mut archive = zip::ZipArchive::new(file).expect("valid zip");
    let mut entry = archive.by_name(name).expect("entry should exist");
    let mut content = String::new();
    entry.read_to_string(&mut content).expect("utf-8 entry");
    content
}

/// Wait for the first event accepted by `predicate`
pub async fn wait_for_event(
    events: &mut broadcast::Receiver<Event>,
    predicate: impl Fn(&Event) -> bool,
) -> Option<Event> {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}
