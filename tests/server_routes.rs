use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use lan_service_scan::config::EngineConfig;
use lan_service_scan::hostname::HostnameResolver;
use lan_service_scan::knowledge::NoKnowledge;
use lan_service_scan::rules::ServiceCatalog;
use lan_service_scan::server::router;
use lan_service_scan::ScanOrchestrator;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower::ServiceExt;

fn app() -> Router {
    let orch = ScanOrchestrator::builder(EngineConfig::default())
        .catalog(ServiceCatalog::empty())
        .resolver(HostnameResolver::disabled())
        .knowledge_source(Arc::new(NoKnowledge))
        .build()
        .unwrap();
    router(orch)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.map_or_else(Body::empty, |v| Body::from(v.to_string())))
        .unwrap();
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn scan_round_trip_over_http() {
    let closed = {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap().port()
    };
    let app = app();

    let (status, started) = send(
        &app,
        "POST",
        "/api/scans",
        Some(json!({
            "range": "127.0.0.1",
            "options": {"timeout": 1000, "extraPorts": [closed], "deepDetection": false}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(started["status"], "started");
    assert_eq!(started["totalHosts"], 1);
    let id = started["scanId"].as_str().unwrap().to_string();

    let mut snapshot = Value::Null;
    for _ in 0..200 {
        let (status, body) = send(&app, "GET", &format!("/api/scans/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] == "completed" {
            snapshot = body;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(snapshot["status"], "completed");
    assert_eq!(snapshot["results"], json!([]));
    assert_eq!(snapshot["progress"]["percentage"], 100);
    assert!(snapshot["endedAt"].is_string());

    let (status, body) = send(&app, "POST", &format!("/api/scans/{id}/cancel"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], false);

    let (_, active) = send(&app, "GET", "/api/scans", None).await;
    assert_eq!(active, json!([]));
}

#[tokio::test]
async fn reversed_range_is_rejected() {
    let (status, body) = send(
        &app(),
        "POST",
        "/api/scans",
        Some(json!({"range": "10.0.0.9-10.0.0.1"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "START_AFTER_END");
}
