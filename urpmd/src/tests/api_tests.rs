//! Surface tests: the axum routes against a daemon wired with fakes.

use axum_test::TestServer;
use chrono::Utc;
use serde_json::{json, Value};

use urpm_core::model::PackageRecord;

use crate::routes::create_app;
use crate::tests::test_utils::{build_test_daemon, seed_handle, upgrade_action};

fn record(name: &str, version: &str) -> PackageRecord {
    PackageRecord {
        name: name.into(),
        epoch: 0,
        version: version.into(),
        release: "1.mga10".into(),
        arch: "x86_64".into(),
        url: format!("http://mirror.example/main/{name}-{version}-1.mga10.x86_64.rpm"),
        filename: format!("{name}-{version}-1.mga10.x86_64.rpm"),
        size: 2048,
        media: "main".into(),
        summary: format!("{name} package"),
    }
}

#[tokio::test]
async fn status_reports_uptime_and_paths() {
    let test = build_test_daemon(Vec::new()).await;
    let server = TestServer::new(create_app(test.daemon.clone())).unwrap();

    let response = server.get("/status").await;
    response.assert_status_ok();
    let body: Value = response.json();

    assert_eq!(body["running"], json!(true));
    assert!(body["uptime_seconds"].as_i64().unwrap() >= 0);
    assert_eq!(body["last_refresh"], Value::Null);
    assert_eq!(
        body["base_dir"].as_str().unwrap(),
        test.daemon.config().base_dir.display().to_string()
    );
}

#[tokio::test]
async fn media_listing_projects_store_rows() {
    let test = build_test_daemon(Vec::new()).await;
    let store = seed_handle(&test).await;
    store
        .add_media("core", "http://mirror.example/core", true, false)
        .await
        .unwrap();
    store
        .add_media("updates", "http://mirror.example/updates", true, true)
        .await
        .unwrap();
    store.close().await;

    let server = TestServer::new(create_app(test.daemon.clone())).unwrap();
    let body: Value = server.get("/media").await.json();

    let media = body["media"].as_array().unwrap();
    assert_eq!(media.len(), 2);
    assert_eq!(media[0]["name"], "core");
    assert_eq!(media[0]["package_count"], 0);
    assert_eq!(media[1]["update_media"], json!(true));
}

#[tokio::test]
async fn check_available_mixes_hits_and_suggestions() {
    let test = build_test_daemon(Vec::new()).await;
    let store = seed_handle(&test).await;
    store
        .add_media("main", "http://mirror.example/main", true, false)
        .await
        .unwrap();
    store
        .replace_packages(
            "main",
            &[record("firefox", "115.0"), record("firefox-devel", "115.0")],
            Utc::now(),
        )
        .await
        .unwrap();
    store.close().await;

    let server = TestServer::new(create_app(test.daemon.clone())).unwrap();
    let body: Value = server
        .post("/packages/available")
        .json(&json!({ "packages": ["firefox", "firef"] }))
        .await
        .json();

    let firefox = &body["packages"]["firefox"];
    assert_eq!(firefox["available"], json!(true));
    assert_eq!(firefox["version"], "115.0");
    assert_eq!(firefox["media"], "main");

    let miss = &body["packages"]["firef"];
    assert_eq!(miss["available"], json!(false));
    let suggestions = miss["suggestions"].as_array().unwrap();
    assert!(suggestions.iter().any(|s| s == "firefox"));
}

#[tokio::test]
async fn updates_endpoint_exposes_the_resolver_plan() {
    let test = build_test_daemon(vec![upgrade_action("firefox", 4096)]).await;
    let server = TestServer::new(create_app(test.daemon.clone())).unwrap();

    let body: Value = server.get("/updates").await.json();
    assert_eq!(body["count"], 1);
    assert_eq!(body["total_size"], 4096);
    assert_eq!(body["updates"][0]["name"], "firefox");
    assert_eq!(body["updates"][0]["current"], "1.0-1.mga10");
    assert_eq!(body["updates"][0]["available"], "2.0-1.mga10");
}

#[tokio::test]
async fn have_reports_cached_files_with_relative_paths() {
    let test = build_test_daemon(Vec::new()).await;
    let dir = test
        .daemon
        .config()
        .base_dir
        .join("medias/mirror.example/main");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("foo-1.rpm"), b"cached-bytes").unwrap();

    let server = TestServer::new(create_app(test.daemon.clone())).unwrap();
    let body: Value = server
        .post("/have")
        .json(&json!({ "packages": ["foo-1.rpm", "bar-2.rpm"] }))
        .await
        .json();

    assert_eq!(body["available_count"], 1);
    assert_eq!(body["missing_count"], 1);
    assert_eq!(body["available"][0]["filename"], "foo-1.rpm");
    assert_eq!(body["available"][0]["size"], 12);
    assert_eq!(body["available"][0]["path"], "mirror.example/main/foo-1.rpm");
    assert_eq!(body["missing"][0], "bar-2.rpm");
}

#[tokio::test]
async fn have_with_no_names_is_empty() {
    let test = build_test_daemon(Vec::new()).await;
    let server = TestServer::new(create_app(test.daemon.clone())).unwrap();

    let body: Value = server
        .post("/have")
        .json(&json!({ "packages": [] }))
        .await
        .json();
    assert_eq!(body["available_count"], 0);
    assert_eq!(body["missing_count"], 0);
}

#[tokio::test]
async fn cached_artifacts_are_served_under_medias() {
    let test = build_test_daemon(Vec::new()).await;
    let dir = test
        .daemon
        .config()
        .base_dir
        .join("medias/mirror.example/main");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("foo-1.rpm"), b"rpm-payload").unwrap();

    let server = TestServer::new(create_app(test.daemon.clone())).unwrap();
    // The relative path from a have() response, resolved against /medias/.
    let response = server.get("/medias/mirror.example/main/foo-1.rpm").await;
    response.assert_status_ok();
    assert_eq!(response.text(), "rpm-payload");
}

#[tokio::test]
async fn peer_registration_round_trips() {
    let test = build_test_daemon(Vec::new()).await;
    let server = TestServer::new(create_app(test.daemon.clone())).unwrap();

    let response = server
        .post("/peers")
        .json(&json!({ "host": "10.0.0.7", "port": 8573, "media": ["main"] }))
        .await;
    response.assert_status_ok();

    // Same registration again: still one peer.
    server
        .post("/peers")
        .json(&json!({ "host": "10.0.0.7", "port": 8573, "media": ["main"] }))
        .await
        .assert_status_ok();

    let body: Value = server.get("/peers").await.json();
    let peers = body["peers"].as_array().unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0]["host"], "10.0.0.7");
    assert_eq!(peers[0]["port"], 8573);
}

#[tokio::test]
async fn invalid_peer_registrations_are_rejected() {
    let test = build_test_daemon(Vec::new()).await;
    let server = TestServer::new(create_app(test.daemon.clone())).unwrap();

    let response = server
        .post("/peers")
        .json(&json!({ "host": "", "port": 0 }))
        .await;
    response.assert_status_bad_request();
}

#[tokio::test]
async fn refresh_syncs_enabled_media_and_stamps_status() {
    let test = build_test_daemon(Vec::new()).await;
    let store = seed_handle(&test).await;
    store
        .add_media("core", "http://mirror.example/core", true, false)
        .await
        .unwrap();
    store
        .add_media("tainted", "http://mirror.example/tainted", false, false)
        .await
        .unwrap();
    store.close().await;

    let server = TestServer::new(create_app(test.daemon.clone())).unwrap();
    let body: Value = server
        .post("/refresh")
        .json(&json!({ "force": true }))
        .await
        .json();

    assert_eq!(body["success"], json!(true));
    assert_eq!(body["results"]["core"]["success"], json!(true));
    assert_eq!(body["results"]["core"]["packages"], 7);
    // Disabled media are not synced.
    assert!(body["results"].get("tainted").is_none());

    let synced = test.sync.synced.lock().clone();
    assert_eq!(synced, vec![("core".to_string(), true)]);

    let status: Value = server.get("/status").await.json();
    assert!(status["last_refresh"].is_string());
}

#[tokio::test]
async fn search_endpoint_requires_a_pattern() {
    let test = build_test_daemon(Vec::new()).await;
    let server = TestServer::new(create_app(test.daemon.clone())).unwrap();

    server.get("/search?q=").await.assert_status_bad_request();

    let store = seed_handle(&test).await;
    store
        .add_media("main", "http://mirror.example/main", true, false)
        .await
        .unwrap();
    store
        .replace_packages("main", &[record("firefox", "115.0")], Utc::now())
        .await
        .unwrap();
    store.close().await;

    let body: Value = server.get("/search?q=fire").await.json();
    assert_eq!(body["count"], 1);
    assert_eq!(body["packages"][0]["name"], "firefox");
}
