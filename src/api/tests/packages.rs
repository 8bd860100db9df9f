use super::*;
use serde_json::json;

#[tokio::test]
async fn test_submit_package_and_download_zip() {
    let dirs = TestDirs::new();
    let (app, _) = create_test_app(&dirs);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/packages",
            json!({"id": "api-1", "groups": groups_json(&dirs), "base_file_name": "irsa"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["id"], "api-1");
    assert_eq!(body["lane"], "small");

    let status = poll_until(&app, "/packages/api-1", |b| {
        b["report"]["state"] == "success"
    })
    .await;
    assert_eq!(status["queued"], false);
    let url = status["report"]["bundles"][0]["url"].as_str().unwrap();
    let path = url.strip_prefix("http://packager.test").unwrap();
    assert!(path.starts_with("/download?file="));

    let response = app.oneshot(empty_request("GET", path)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/zip");
    assert!(
        response.headers()["content-disposition"]
            .to_str()
            .unwrap()
            .contains("irsa")
    );

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes.to_vec())).unwrap();
    let mut names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    names.sort();
    assert!(names.contains(&"a.fits".to_string()));
    assert!(names.contains(&"b.fits".to_string()));
}

#[tokio::test]
async fn test_submit_empty_package_is_400() {
    let dirs = TestDirs::new();
    let (app, _) = create_test_app(&dirs);

    let response = app
        .oneshot(json_request("POST", "/packages", json!({"groups": []})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "empty_package");
}

#[tokio::test]
async fn test_get_unknown_package_is_404() {
    let dirs = TestDirs::new();
    let (app, _) = create_test_app(&dirs);

    let response = app
        .oneshot(empty_request("GET", "/packages/nope"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_unknown_package_is_404() {
    let dirs = TestDirs::new();
    let (app, _) = create_test_app(&dirs);

    let response = app
        .oneshot(empty_request("DELETE", "/packages/nope"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "status_missing");
}

#[tokio::test]
async fn test_cancel_finished_package_reports_canceled() {
    let dirs = TestDirs::new();
    let (app, _) = create_test_app(&dirs);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/packages",
            json!({"id": "api-2", "groups": groups_json(&dirs)}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    poll_until(&app, "/packages/api-2", |b| b["report"]["state"] == "success").await;

    let response = app
        .clone()
        .oneshot(empty_request("DELETE", "/packages/api-2"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(empty_request("GET", "/packages/api-2"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["report"]["state"], "canceled");
}

#[tokio::test]
async fn test_queue_stats_and_status() {
    let dirs = TestDirs::new();
    let (app, _) = create_test_app(&dirs);

    let response = app
        .clone()
        .oneshot(empty_request("GET", "/queue/stats"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let stats = body_json(response).await;
    assert_eq!(stats["active"], 0);
    assert_eq!(stats["queued"], 0);

    let response = app
        .oneshot(empty_request("GET", "/queue/status"))
        .await
        .unwrap();
    let status = body_json(response).await;
    assert_eq!(status["lines"], json!(["  - Not Active"]));
    assert_eq!(status["queue_long"], false);
}
