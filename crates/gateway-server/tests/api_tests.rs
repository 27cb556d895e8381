use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::StreamExt;
use gateway_server::api::create_router;
use gateway_server::state::AppState;
use infrastructure::GatewayConfig;
use infrastructure::drivers::{SimulatedOpcUa, SimulatedS7};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

struct TestApp {
    _dir: TempDir,
    state: Arc<AppState>,
    s7: Arc<SimulatedS7>,
}

impl TestApp {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = GatewayConfig::default_settings().unwrap();
        let path = |name: &str| dir.path().join(name).to_string_lossy().into_owned();
        config.storage.base_tags = path("tags-base.json");
        config.storage.overlay_tags = path("tags-new.json");
        config.storage.metadata = path("tag-metadata.json");
        config.storage.audit_log = path("audit-log.jsonl");
        config.storage.history_log = path("history.jsonl");
        // Nothing listens on the discard port.
        config.bridge.url = "http://127.0.0.1:9".into();
        config.s7.poll_ms = 20;

        let s7 = Arc::new(SimulatedS7::new());
        let opcua = Arc::new(SimulatedOpcUa::new().with_demo_nodes());
        let state = AppState::build_with(config, s7.clone(), opcua)
            .await
            .unwrap();

        Self {
            _dir: dir,
            state,
            s7,
        }
    }

    fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }
}

fn engineer() -> Value {
    json!({
        "username": "engineer",
        "permissions": ["read_tag", "write_tag", "add_tag", "delete_tag"]
    })
}

#[tokio::test]
async fn test_status_reports_default_protocol_and_tags() {
    let app = TestApp::new().await;

    let (status, body) = app.send("GET", "/api/status", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["protocol"], "OPC UA");
    assert_eq!(body["connected"], false);
    assert_eq!(body["tags"]["Machine_Speed"], "DB1,INT0");
    assert!(body["categorizedTags"]["old"].get("Running").is_some());
    assert_eq!(body["mqtt"]["connected"], false);
}

#[tokio::test]
async fn test_connect_then_write() {
    let app = TestApp::new().await;

    let (status, body) = app
        .send(
            "POST",
            "/api/connect",
            Some(json!({ "protocol": "Snap7", "endpointUrl": "opc.tcp://10.0.0.7:4840" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["info"]["target"], "10.0.0.7");

    let (status, body) = app
        .send(
            "POST",
            "/api/write",
            Some(json!({ "tagName": "Machine_Speed", "value": "1200", "user": engineer() })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["value"], 1200);
    assert_eq!(app.s7.get("DB1,INT0"), Some(json!(1200)));

    let (_, status_body) = app.send("GET", "/api/status", None).await;
    assert_eq!(status_body["protocol"], "Snap7");
    assert_eq!(status_body["connected"], true);
}

#[tokio::test]
async fn test_connect_accepts_device_hints_without_routing_on_them() {
    let app = TestApp::new().await;

    let (status, body) = app
        .send(
            "POST",
            "/api/connect",
            Some(json!({
                "protocol": "Snap7",
                "endpointUrl": "10.0.0.7",
                "deviceType": "OPC UA",
                "deviceModel": "S7-1500"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);

    let (_, status_body) = app.send("GET", "/api/status", None).await;
    assert_eq!(status_body["protocol"], "Snap7");
}

#[tokio::test]
async fn test_anonymous_write_is_denied_and_audited() {
    let app = TestApp::new().await;

    let (status, body) = app
        .send(
            "POST",
            "/api/write",
            Some(json!({ "tagName": "Running", "value": true })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().starts_with("Permission Denied"));

    let (_, logs) = app.send("GET", "/api/audit-logs", None).await;
    assert_eq!(logs[0]["action"], "DENIED");
    assert_eq!(logs[0]["user"], "Anonymous");
}

#[tokio::test]
async fn test_add_and_delete_tag_over_http() {
    let app = TestApp::new().await;

    let (status, body) = app
        .send(
            "POST",
            "/api/tags",
            Some(json!({ "name": "Pressure", "nodeId": "DB4,REAL0", "user": engineer() })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["tags"]["Pressure"], "DB4,REAL0");
    assert_eq!(body["categorizedTags"]["new"]["Pressure"]["datatype"], "Float");

    let (status, body) = app
        .send(
            "DELETE",
            "/api/tags/Pressure?user=engineer&permissions=read_tag,delete_tag",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["tags"].get("Pressure").is_none());
}

#[tokio::test]
async fn test_delete_requires_permission_and_protects_base_tags() {
    let app = TestApp::new().await;

    let (status, body) = app
        .send("DELETE", "/api/tags/Running?user=viewer&permissions=read_tag", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("delete_tag"));

    let (status, body) = app
        .send("DELETE", "/api/tags/Running?user=engineer&permissions=delete_tag", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Tag Running is a base tag and cannot be deleted");
}

#[tokio::test]
async fn test_sync_reports_unreachable_flow_engine() {
    let app = TestApp::new().await;

    let (status, body) = app
        .send("POST", "/api/nodered/sync", Some(json!({ "ip": "10.1.1.5" })))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Could not connect to Node-RED");
}

#[tokio::test]
async fn test_event_stream_replays_status_first() {
    let app = TestApp::new().await;

    let request = Request::builder()
        .uri("/api/events")
        .body(Body::empty())
        .unwrap();
    let response = app.router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );

    let mut frames = response.into_body().into_data_stream();
    let first = frames.next().await.unwrap().unwrap();
    let text = String::from_utf8(first.to_vec()).unwrap();
    assert!(text.starts_with("event: plc-status"), "{text}");
    assert!(text.contains("\"protocol\":\"OPC UA\""), "{text}");

    // Shutdown ends the stream.
    app.state.shutdown.cancel();
    while let Some(frame) = frames.next().await {
        frame.unwrap();
    }
}
