#![cfg(unix)]

mod common;

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tower::ServiceExt;

use common::{Harness, FAKE};
use relay_daemon::{routes::build_router, state::DaemonState};

fn app(harness: &Harness) -> (Router, oneshot::Receiver<()>) {
    let (tx, rx) = oneshot::channel();
    let state = Arc::new(DaemonState::new(harness.supervisor.clone(), Some(tx)));
    (build_router(state), rx)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn camera_fields() -> Value {
    json!({
        "input": "/dev/video0",
        "destination": "rtsp://host:8554",
        "codec": "copy",
        "bitrate": 4000,
        "fps": 30,
        "stream_name": "cam1"
    })
}

#[tokio::test]
async fn stream_lifecycle_over_http() {
    let harness = Harness::new(FAKE);
    let (app, _rx) = app(&harness);

    let (status, created) = send(&app, Method::POST, "/streams", None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["id"], 1);
    assert_eq!(created["saved"], false);
    assert_eq!(created["state"], "stopped");

    let (status, configured) = send(&app, Method::PUT, "/streams/1", Some(camera_fields())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(configured["saved"], true);
    assert_eq!(configured["fields"]["stream_name"], "cam1");

    let (status, started) = send(&app, Method::POST, "/streams/1/start", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["running"], true);
    assert_eq!(started["should_be_running"], true);
    assert_eq!(started["output_url"], "rtsp://host:8554/cam1");

    let (_, listed) = send(&app, Method::GET, "/streams", None).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let (_, available) = send(&app, Method::GET, "/available_streams", None).await;
    assert_eq!(
        available,
        json!([{
            "id": 1,
            "name": "cam1",
            "source": "rtsp://host:8554",
            "playback_url": "rtsp://host:8554/cam1"
        }])
    );

    let (status, stopped) = send(&app, Method::POST, "/streams/1/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stopped["running"], false);
    assert_eq!(stopped["should_be_running"], false);

    let (status, _) = send(&app, Method::DELETE, "/streams/1", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, Method::GET, "/streams/1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["message"].as_str().unwrap().contains('1'));
}

#[tokio::test]
async fn start_with_body_saves_fields_first() {
    let harness = Harness::new(FAKE);
    let (app, _rx) = app(&harness);
    send(&app, Method::POST, "/streams", None).await;

    let (status, started) = send(&app, Method::POST, "/streams/1/start", Some(camera_fields())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["saved"], true);
    assert_eq!(started["running"], true);
    assert_eq!(started["fields"]["input"], "/dev/video0");
}

#[tokio::test]
async fn stream_logs_are_served() {
    let harness = Harness::new(FAKE);
    let (app, _rx) = app(&harness);
    let id = harness.add_camera();
    harness.supervisor.start(id).unwrap();

    assert!(common::wait_until(std::time::Duration::from_secs(5), || {
        !harness.supervisor.logs(id).unwrap().log.is_empty()
    }));

    let (status, logs) = send(&app, Method::GET, "/streams/1/logs", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logs["running"], true);
    assert!(logs["log"][0].as_str().unwrap().starts_with("fake-encoder "));
}

#[tokio::test]
async fn unknown_and_malformed_ids_are_rejected() {
    let harness = Harness::new(FAKE);
    let (app, _rx) = app(&harness);

    for (method, uri) in [
        (Method::GET, "/streams/7"),
        (Method::POST, "/streams/7/start"),
        (Method::POST, "/streams/7/stop"),
        (Method::GET, "/streams/7/logs"),
        (Method::DELETE, "/streams/7"),
    ] {
        let (status, body) = send(&app, method, uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        assert!(body["message"].is_string());
    }

    let (status, _) = send(&app, Method::GET, "/streams/abc", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn status_counts_streams() {
    let harness = Harness::new(FAKE);
    let (app, _rx) = app(&harness);
    let running = harness.add_camera();
    harness.add_camera();
    harness.supervisor.start(running).unwrap();

    let (status, body) = send(&app, Method::GET, "/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["streams"], 2);
    assert_eq!(body["desired_running"], 1);
    assert_eq!(body["running"], 1);
    assert_eq!(body["log_lines"], 50);
}

#[tokio::test]
async fn shutdown_signals_the_server_once() {
    let harness = Harness::new(FAKE);
    let (app, mut rx) = app(&harness);

    let (status, body) = send(&app, Method::POST, "/shutdown", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["shutting_down"], true);
    assert!(rx.try_recv().is_ok());

    let (_, body) = send(&app, Method::POST, "/shutdown", None).await;
    assert_eq!(body["shutting_down"], false);
}
