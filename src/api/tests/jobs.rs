use super::*;
use serde_json::json;

#[tokio::test]
async fn test_packaging_job_completes() {
    let dirs = TestDirs::new();
    let (app, _) = create_test_app(&dirs);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/jobs/package",
            json!({
                "processor_id": "inline",
                "params": {"groups": groups_json(&dirs)},
                "base_file_name": "irsa"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let job_id = body_json(response).await["job_id"]
        .as_str()
        .unwrap()
        .to_string();

    let uri = format!("/jobs/{}", job_id);
    let status = poll_until(&app, &uri, |b| b["phase"] == "COMPLETED").await;
    assert_eq!(status["progress"], 100);
    assert_eq!(status["results"].as_array().unwrap().len(), 1);
    assert_eq!(status["results"][0]["id"], "part1");

    // The job id doubles as the package id
    let response = app
        .oneshot(empty_request("GET", &format!("/packages/{}", job_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["report"]["state"], "success");
}

#[tokio::test]
async fn test_immediate_packaging_job_completes() {
    let dirs = TestDirs::new();
    let (app, controller) = create_test_app(&dirs);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/jobs/package?immediate=true",
            json!({"processor_id": "inline", "params": {"groups": groups_json(&dirs)}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let job_id = body_json(response).await["job_id"]
        .as_str()
        .unwrap()
        .to_string();

    poll_until(&app, &format!("/jobs/{}", job_id), |b| {
        b["phase"] == "COMPLETED"
    })
    .await;
    assert_eq!(controller.stats().await.total_immediate, 1);
}

#[tokio::test]
async fn test_script_job_publishes_script() {
    let dirs = TestDirs::new();
    let (app, _) = create_test_app(&dirs);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/jobs/script",
            json!({
                "processor_id": "inline",
                "params": {"groups": [{"files": [
                    {"locator": "https://archive.test/a.fits", "external_name": "a.fits", "size_bytes": 10},
                    {"locator": "https://archive.test/b.fits", "external_name": "b.fits", "size_bytes": 9}
                ]}]},
                "scripts": ["urls"]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let job_id = body_json(response).await["job_id"]
        .as_str()
        .unwrap()
        .to_string();

    let status = poll_until(&app, &format!("/jobs/{}", job_id), |b| {
        b["phase"] == "COMPLETED"
    })
    .await;
    let href = status["results"][0]["href"].as_str().unwrap();
    let path = href.strip_prefix("http://packager.test").unwrap();

    let response = app.oneshot(empty_request("GET", path)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "application/octet-stream"
    );
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let script = String::from_utf8(bytes.to_vec()).unwrap();
    assert_eq!(
        script.lines().collect::<Vec<_>>(),
        vec!["https://archive.test/a.fits", "https://archive.test/b.fits"]
    );
}

#[tokio::test]
async fn test_job_with_unknown_processor_is_404() {
    let dirs = TestDirs::new();
    let (app, _) = create_test_app(&dirs);

    let response = app
        .oneshot(json_request(
            "POST",
            "/jobs/package",
            json!({"processor_id": "nope"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "no_processor");
}

#[tokio::test]
async fn test_job_without_files_ends_in_error() {
    let dirs = TestDirs::new();
    let (app, _) = create_test_app(&dirs);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/jobs/package",
            json!({"processor_id": "inline", "params": {"groups": []}}),
        ))
        .await
        .unwrap();
    let job_id = body_json(response).await["job_id"]
        .as_str()
        .unwrap()
        .to_string();

    let status = poll_until(&app, &format!("/jobs/{}", job_id), |b| b["phase"] == "ERROR").await;
    assert!(status["error"].as_str().unwrap().contains("no files"));
}

#[tokio::test]
async fn test_get_unknown_job_is_404() {
    let dirs = TestDirs::new();
    let (app, _) = create_test_app(&dirs);

    let response = app.oneshot(empty_request("GET", "/jobs/nope")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
