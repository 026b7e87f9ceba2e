// HTTP API tests
//
// Requests go straight through the axum router; no socket is bound.

mod common;

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{harness, FakeEngine, FakeTargets, Harness, HarnessOptions};
use serde_json::{json, Value};
use std::time::Duration;
use studio_node::{create_router, AppState};
use tower::ServiceExt;

fn app() -> (Harness, Router) {
    let h = harness(
        FakeEngine::new(),
        FakeTargets::healthy().targets(),
        HarnessOptions::default(),
    );
    let router = create_router(AppState::new(h.orchestrator.clone()));
    (h, router)
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> Result<(StatusCode, Value)> {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body)?))?,
        None => request.body(Body::empty())?,
    };

    let response = router.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, value))
}

#[tokio::test]
async fn test_voice_activity_creates_then_reuses() -> Result<()> {
    let (_h, router) = app();

    let (status, first) = send(&router, "POST", "/voice-activity", Some(json!({"channel_id": "general"}))).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["created"], true);

    let (status, second) = send(&router, "POST", "/voice-activity", Some(json!({"channel_id": "general"}))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["created"], false);
    assert_eq!(first["session_id"], second["session_id"]);

    let (status, _) = send(&router, "POST", "/voice-activity", Some(json!({"channel_id": "  "}))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn test_session_lifecycle_over_http() -> Result<()> {
    let (h, router) = app();

    let (_, armed) = send(&router, "POST", "/voice-activity", Some(json!({"channel_id": "general"}))).await?;
    let id = armed["session_id"].as_str().unwrap().to_string();

    let (status, session) = send(&router, "GET", &format!("/sessions/{id}"), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["state"], "recording");

    let (status, stopped) = send(&router, "POST", &format!("/sessions/{id}/stop"), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(stopped["artifact"]["checksum"].is_string());

    h.orchestrator.wait_until_settled(&id, Duration::from_secs(5)).await;

    let (_, session) = send(&router, "GET", &format!("/sessions/{id}"), None).await?;
    assert_eq!(session["state"], "archived");
    assert_eq!(session["stage_results"].as_array().unwrap().len(), 4);

    let (status, events) = send(&router, "GET", &format!("/sessions/{id}/events"), None).await?;
    assert_eq!(status, StatusCode::OK);
    let kinds: Vec<&str> = events
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["cause"]["kind"].as_str().unwrap())
        .collect();
    assert_eq!(
        kinds,
        vec![
            "voice-activity",
            "engine-started",
            "stop-requested",
            "artifact-produced",
            "pipeline-complete"
        ]
    );

    let (_, list) = send(&router, "GET", "/sessions", None).await?;
    assert_eq!(list.as_array().unwrap().len(), 1);

    // Stopping an archived session conflicts
    let (status, body) = send(&router, "POST", &format!("/sessions/{id}/stop"), None).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("archived"));

    Ok(())
}

#[tokio::test]
async fn test_abort_with_and_without_reason() -> Result<()> {
    let (_h, router) = app();

    let (_, a) = send(&router, "POST", "/voice-activity", Some(json!({"channel_id": "one"}))).await?;
    let a = a["session_id"].as_str().unwrap().to_string();

    let (status, aborted) = send(
        &router,
        "POST",
        &format!("/sessions/{a}/abort"),
        Some(json!({"reason": "test run"})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(aborted["state"], "failed");

    let (_, events) = send(&router, "GET", &format!("/sessions/{a}/events"), None).await?;
    let last = events.as_array().unwrap().last().unwrap().clone();
    assert_eq!(last["cause"]["kind"], "operator-abort");
    assert_eq!(last["cause"]["reason"], "test run");

    // Aborting again conflicts
    let (status, _) = send(&router, "POST", &format!("/sessions/{a}/abort"), None).await?;
    assert_eq!(status, StatusCode::CONFLICT);

    Ok(())
}

#[tokio::test]
async fn test_unknown_session_is_not_found() -> Result<()> {
    let (_h, router) = app();

    for (method, uri) in [
        ("GET", "/sessions/session-nope"),
        ("GET", "/sessions/session-nope/events"),
        ("POST", "/sessions/session-nope/stop"),
        ("POST", "/sessions/session-nope/abort"),
    ] {
        let (status, body) = send(&router, method, uri, None).await?;
        assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
        assert!(body["error"].is_string());
    }

    Ok(())
}

#[tokio::test]
async fn test_health_reports_components() -> Result<()> {
    let (_h, router) = app();

    let (status, health) = send(&router, "GET", "/health", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["components"].as_array().unwrap().len(), 3);

    Ok(())
}
