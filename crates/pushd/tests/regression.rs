//! HTTP regression tests.
//!
//! Drives the full router the daemon serves: deployment management,
//! releases, update checks with caching and rollouts, status reports,
//! blob downloads and background diffing.

use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode};
use pushgrid_api::{ApiState, build_router};
use pushgrid_diff::PackageDiffer;
use pushgrid_ledger::{DiffWorker, Ledger};
use pushgrid_metrics::{MemoryCounterStore, MetricsManager};
use pushgrid_state::{BlobStore, FsBlobStore, StateStore};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tower::ServiceExt;

struct TestApp {
    router: Router,
    ledger: Ledger,
    _dir: tempfile::TempDir,
}

fn test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let blobs = FsBlobStore::new(dir.path().join("blobs"), "http://localhost:3000").unwrap();
    let ledger = Ledger::new(
        StateStore::open_in_memory().unwrap(),
        Arc::new(blobs.clone()),
        MetricsManager::new(Arc::new(MemoryCounterStore::new()), Duration::from_secs(60)),
    );
    let router = build_router(ApiState::new(ledger.clone()).with_downloads(blobs));
    TestApp {
        router,
        ledger,
        _dir: dir,
    }
}

fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (path, contents) in entries {
        writer
            .start_file(*path, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Bytes) {
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, body)
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let (status, body) = send(router, req).await;
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

async fn send_json(router: &Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    let (status, body) = send(router, req).await;
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

async fn create_deployment(router: &Router, name: &str) -> String {
    let (status, body) =
        send_json(router, "POST", "/api/v1/deployments", serde_json::json!({ "name": name })).await;
    assert_eq!(status, StatusCode::CREATED);
    body["data"]["key"].as_str().unwrap().to_string()
}

async fn release(router: &Router, name: &str, query: &str, package: Vec<u8>) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/deployments/{name}/release?{query}"))
        .body(Body::from(package))
        .unwrap();
    let (status, body) = send(router, req).await;
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

async fn update_check(router: &Router, query: &str) -> Value {
    let (status, body) = get(router, &format!("/updateCheck?{query}")).await;
    assert_eq!(status, StatusCode::OK, "update check failed: {body}");
    body["updateInfo"].clone()
}

#[tokio::test]
async fn health_reports_healthy() {
    let app = test_app();
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"Healthy");
}

#[tokio::test]
async fn release_then_update_check() {
    let app = test_app();
    let key = create_deployment(&app.router, "Production").await;

    let (status, v1) = release(
        &app.router,
        "Production",
        "appVersion=1.0.0",
        zip_of(&[("index.js", b"one")]),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(v1["data"]["label"], "v1");
    let v1_hash = v1["data"]["packageHash"].as_str().unwrap().to_string();

    let (status, v2) = release(
        &app.router,
        "Production",
        "appVersion=1.0.0&isMandatory=true&description=fixes",
        zip_of(&[("index.js", b"two")]),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let v2_hash = v2["data"]["packageHash"].as_str().unwrap().to_string();

    let info = update_check(
        &app.router,
        &format!("deploymentKey={key}&appVersion=1.0.0&packageHash={v1_hash}"),
    )
    .await;
    assert_eq!(info["isAvailable"], true);
    assert_eq!(info["label"], "v2");
    assert_eq!(info["isMandatory"], true);
    assert_eq!(info["description"], "fixes");
    assert_eq!(info["appVersion"], "1.0.0");

    let info = update_check(
        &app.router,
        &format!("deploymentKey={key}&appVersion=1.0.0&packageHash={v2_hash}"),
    )
    .await;
    assert_eq!(info["isAvailable"], false);
    assert_eq!(info["updateAppVersion"], false);

    let info = update_check(&app.router, &format!("deploymentKey={key}&appVersion=2.0.0")).await;
    assert_eq!(info["isAvailable"], false);
    assert_eq!(info["shouldRunBinaryVersion"], true);

    let info = update_check(&app.router, &format!("deploymentKey={key}&appVersion=0.5.0")).await;
    assert_eq!(info["updateAppVersion"], true);
    assert_eq!(info["appVersion"], "1.0.0");

    // Normalized versions are echoed back as sent.
    let info = update_check(&app.router, &format!("deploymentKey={key}&appVersion=1")).await;
    assert_eq!(info["isAvailable"], true);
    assert_eq!(info["appVersion"], "1");
}

#[tokio::test]
async fn update_check_rejects_bad_requests() {
    let app = test_app();
    create_deployment(&app.router, "Production").await;

    let (status, _) = get(&app.router, "/updateCheck?deploymentKey=short&appVersion=1.0.0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(
        &app.router,
        "/updateCheck?deploymentKey=unknown-key-0123456789&appVersion=1.0.0",
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = get(
        &app.router,
        "/updateCheck?deploymentKey=unknown-key-0123456789&appVersion=one",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn ledger_changes_invalidate_cached_checks() {
    let app = test_app();
    let key = create_deployment(&app.router, "Production").await;
    release(&app.router, "Production", "appVersion=1.0.0", b"first".to_vec()).await;

    let query = format!("deploymentKey={key}&appVersion=1.0.0");
    assert_eq!(update_check(&app.router, &query).await["label"], "v1");

    release(&app.router, "Production", "appVersion=1.0.0", b"second".to_vec()).await;
    assert_eq!(update_check(&app.router, &query).await["label"], "v2");

    let (status, _) = send_json(
        &app.router,
        "PATCH",
        "/api/v1/deployments/Production/release",
        serde_json::json!({ "isDisabled": true }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(update_check(&app.router, &query).await["label"], "v1");

    let (status, _) = send_json(
        &app.router,
        "DELETE",
        "/api/v1/deployments/Production/history",
        Value::Null,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let info = update_check(&app.router, &query).await;
    assert_eq!(info["isAvailable"], false);
}

#[tokio::test]
async fn rollout_partitions_clients() {
    let app = test_app();
    let key = create_deployment(&app.router, "Production").await;
    release(&app.router, "Production", "appVersion=1.0.0", b"stable".to_vec()).await;
    let (status, body) = release(
        &app.router,
        "Production",
        "appVersion=1.0.0&rollout=25",
        b"canary".to_vec(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["rollout"], 25);

    // A new release is blocked while the rollout is unfinished.
    let (status, _) = release(&app.router, "Production", "appVersion=1.0.0", b"next".to_vec()).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let mut in_rollout = 0;
    for i in 0..400 {
        let query = format!("deploymentKey={key}&appVersion=1.0.0&clientUniqueId=device-{i}");
        let first = update_check(&app.router, &query).await;
        let again = update_check(&app.router, &query).await;
        assert_eq!(first["label"], again["label"]);
        if first["label"] == "v2" {
            in_rollout += 1;
        }
    }
    assert!((60..=140).contains(&in_rollout), "in rollout: {in_rollout}");

    let info = update_check(&app.router, &format!("deploymentKey={key}&appVersion=1.0.0")).await;
    assert_eq!(info["label"], "v1");
}

#[tokio::test]
async fn promote_and_rollback_over_http() {
    let app = test_app();
    create_deployment(&app.router, "Staging").await;
    let production_key = create_deployment(&app.router, "Production").await;
    release(&app.router, "Staging", "appVersion=1.0.0", b"one".to_vec()).await;

    let (status, body) = send_json(
        &app.router,
        "POST",
        "/api/v1/deployments/Staging/promote/Production",
        serde_json::json!({ "description": "promoted" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["releaseMethod"], "Promote");
    assert_eq!(body["data"]["originalDeployment"], "Staging");

    release(&app.router, "Production", "appVersion=1.0.0", b"two".to_vec()).await;
    let (status, body) = send_json(
        &app.router,
        "POST",
        "/api/v1/deployments/Production/rollback/v1",
        Value::Null,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["label"], "v3");
    assert_eq!(body["data"]["originalLabel"], "v1");

    let info = update_check(
        &app.router,
        &format!("deploymentKey={production_key}&appVersion=1.0.0"),
    )
    .await;
    assert_eq!(info["label"], "v3");
    assert_eq!(info["description"], "promoted");

    let (status, body) = get(&app.router, "/api/v1/deployments/Production/history").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn status_reports_feed_metrics() {
    let app = test_app();
    let key = create_deployment(&app.router, "Production").await;

    let (status, _) = send_json(
        &app.router,
        "POST",
        "/reportStatus/deploy",
        serde_json::json!({
            "deploymentKey": key,
            "appVersion": "1.0.0",
            "label": "v1",
            "status": "DeploymentSucceeded",
            "clientUniqueId": "device-1",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send_json(
        &app.router,
        "POST",
        "/reportStatus/download",
        serde_json::json!({ "deploymentKey": key, "label": "v1" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send_json(
        &app.router,
        "POST",
        "/reportStatus/deploy",
        serde_json::json!({ "deploymentKey": key, "label": "v1" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = get(&app.router, "/api/v1/deployments/Production/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["v1"]["active"], 1);
    assert_eq!(body["data"]["v1"]["installed"], 1);
    assert_eq!(body["data"]["v1"]["downloaded"], 1);

    let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let (status, body) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("pushgrid_release_active{deployment=\"Production\",label=\"v1\"} 1"));
}

#[tokio::test]
async fn released_blob_is_downloadable() {
    let app = test_app();
    let key = create_deployment(&app.router, "Production").await;
    release(&app.router, "Production", "appVersion=1.0.0", b"bundle bytes".to_vec()).await;

    let info = update_check(&app.router, &format!("deploymentKey={key}&appVersion=1.0.0")).await;
    let url = info["downloadURL"].as_str().unwrap();
    let path = url.strip_prefix("http://localhost:3000").unwrap();
    assert_eq!(info["packageSize"], 12);

    let req = Request::builder().uri(path).body(Body::empty()).unwrap();
    let (status, body) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"bundle bytes");

    let (status, _) = get(&app.router, "/blobs/does-not-exist").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn diff_worker_serves_diffs_to_previous_release() {
    let dir = tempfile::tempdir().unwrap();
    let blobs = FsBlobStore::new(dir.path().join("blobs"), "http://localhost:3000").unwrap();
    let shared: Arc<dyn BlobStore> = Arc::new(blobs.clone());
    let base = Ledger::new(
        StateStore::open_in_memory().unwrap(),
        shared.clone(),
        MetricsManager::new(Arc::new(MemoryCounterStore::new()), Duration::from_secs(60)),
    );
    let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    std::fs::create_dir_all(dir.path().join("work")).unwrap();
    let differ = PackageDiffer::new(shared, 1, dir.path().join("work"));
    let worker = tokio::spawn(DiffWorker::new(base.clone(), differ).run(jobs_rx, shutdown_rx));

    let ledger = base.with_diff_queue(jobs_tx);
    let router = build_router(ApiState::new(ledger.clone()).with_downloads(blobs));
    let key = create_deployment(&router, "Production").await;

    let (_, v1) = release(
        &router,
        "Production",
        "appVersion=1.0.0",
        zip_of(&[("index.js", b"one"), ("logo.png", b"png")]),
    )
    .await;
    let v1_hash = v1["data"]["packageHash"].as_str().unwrap().to_string();
    release(
        &router,
        "Production",
        "appVersion=1.0.0",
        zip_of(&[("index.js", b"two"), ("logo.png", b"png")]),
    )
    .await;

    let deployment = ledger.deployment_by_name("Production").unwrap();
    let mut attached = false;
    for _ in 0..100 {
        let history = ledger.history(&deployment.id).unwrap();
        if history[1].diffs.contains_key(&v1_hash) {
            attached = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(attached, "diff was never attached");

    let info = update_check(
        &router,
        &format!("deploymentKey={key}&appVersion=1.0.0&packageHash={v1_hash}"),
    )
    .await;
    assert_eq!(info["isAvailable"], true);
    assert_eq!(info["label"], "v2");
    let history = ledger.history(&deployment.id).unwrap();
    assert_eq!(info["downloadURL"], history[1].diffs[&v1_hash].url.as_str());
    assert_ne!(info["downloadURL"], history[1].blob_ref.url.as_str());

    shutdown_tx.send(true).unwrap();
    worker.await.unwrap();
}
