//! Integration tests for API endpoints
//!
//! These tests verify that:
//! - All REST endpoints return correct responses over real HTTP
//! - Actions posted to one instance's API reach the target instance
//! - Store outages map to JSON errors

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use fleet_monitor::{
    api::{ApiConfig, ApiState, spawn_api_server},
    store::MemoryStore,
};
use reqwest::StatusCode;
use serde_json::{Value, json};

use crate::helpers::*;

async fn spawn_test_api(store: &Arc<MemoryStore>, instance_id: &str) -> SocketAddr {
    let state = ApiState::new(store.clone(), instance_id, Duration::from_secs(5));

    let config = ApiConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        enable_cors: true,
    };

    spawn_api_server(config, state).await.unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let store = Arc::new(MemoryStore::new());
    let addr = spawn_test_api(&store, "0").await;

    let response = reqwest::get(format!("http://{addr}/api/health"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_info_returns_reported_snapshot() {
    let store = Arc::new(MemoryStore::new());
    let instance = TestInstance::idle(&store, "0", 10, 1024).await;
    instance.reporter.report_now().await.unwrap();
    let addr = spawn_test_api(&store, "0").await;

    let body: Value = reqwest::get(format!("http://{addr}/api/info"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["instanceIndex"], "0");
    assert_eq!(body["workerCount"], 0);
    assert_eq!(body["memoryUsedMiB"], 10.0);
    assert_eq!(body["memoryFreeMiB"], 1014.0);
    assert_eq!(body["memoryTotalMiB"], 1024.0);
    assert_eq!(body["visitorCount"], 1);
    assert!(body["version"].is_string());

    instance.shutdown().await;
}

#[tokio::test]
async fn test_action_reaches_other_instance() {
    let store = Arc::new(MemoryStore::new());
    let target = TestInstance::idle(&store, "1", 4, 64).await;
    let addr = spawn_test_api(&store, "0").await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/action"))
        .json(&json!({ "instanceIndex": 1, "action": "leak" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Action leak performed");
    assert!(eventually(|| target.ctx.ballast_bytes() > 0).await);

    target.shutdown().await;
}

#[tokio::test]
async fn test_heartbeats_and_fleet() {
    let store = Arc::new(MemoryStore::new());
    let a = TestInstance::idle(&store, "0", 10, 100).await;
    let b = TestInstance::idle(&store, "1", 20, 100).await;
    a.reporter.report_now().await.unwrap();
    b.reporter.report_now().await.unwrap();
    let addr = spawn_test_api(&store, "1").await;

    let heartbeats: Value = reqwest::get(format!("http://{addr}/api/heartbeats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(heartbeats["count"], 2);
    assert_eq!(heartbeats["heartbeats"][0]["instanceIndex"], "0");

    let fleet: Value = reqwest::get(format!("http://{addr}/api/fleet"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fleet["requestingInstanceId"], "1");
    assert_eq!(fleet["totals"]["memoryUsedMiB"], 30.0);
    assert_eq!(fleet["totals"]["memoryTotalMiB"], 200.0);
    assert_eq!(fleet["health"]["0"], "up");
    assert_eq!(fleet["health"]["1"], "up");

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn test_store_outage_returns_json_error() {
    let store = Arc::new(MemoryStore::new());
    let addr = spawn_test_api(&store, "0").await;
    store.set_available(false);

    for path in ["info", "heartbeats", "fleet"] {
        let response = reqwest::get(format!("http://{addr}/api/{path}"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = response.json().await.unwrap();
        assert!(body["error"].is_string(), "{path} should return an error body");
    }
}
