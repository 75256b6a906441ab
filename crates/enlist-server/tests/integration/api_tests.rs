use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;

use crate::integration::common::{
    GHOST_USER, MISSING_TARGET, PRIVATE_USER, TEST_API_KEY, fast_engine, setup_test_app,
    setup_test_app_with,
};

#[tokio::test]
async fn health_returns_200() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["run_status"], "idle");
    assert_eq!(json["workers"], 0);
}

#[tokio::test]
async fn unauthenticated_request_returns_401() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(Request::get("/v1/status").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_api_key_returns_401() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(
            Request::get("/v1/status")
                .header("authorization", "Bearer wrong-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "unauthorized");
}

#[tokio::test]
async fn start_without_workers_returns_400() {
    let app = setup_test_app().await;

    let (status, json) = app
        .send(
            "POST",
            "/v1/runs",
            Some(json!({"target": "group", "members": [{"username": "alice"}]})),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "no_workers");

    let (_, status) = app.send("GET", "/v1/status", None).await;
    assert_eq!(status["status"], "idle");
    let (_, history) = app.send("GET", "/v1/events/history", None).await;
    assert_eq!(history, json!([]));
}

#[tokio::test]
async fn register_list_and_remove_workers() {
    let app = setup_test_app().await;

    assert_eq!(app.register_worker("+1000", "session-a").await, StatusCode::CREATED);
    assert_eq!(app.register_worker("+2000", "session-b").await, StatusCode::CREATED);

    let (status, json) = app.send("GET", "/v1/workers", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 2);
    assert_eq!(json["workers"][0]["account_key"], "+1000");
    assert_eq!(json["workers"][0]["state"], "idle");

    let (status, _) = app.send("DELETE", "/v1/workers/+1000", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, json) = app.send("DELETE", "/v1/workers/+1000", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "not_found");

    let (_, json) = app.send("GET", "/v1/workers", None).await;
    assert_eq!(json["total"], 1);
}

#[tokio::test]
async fn re_registering_mid_run_reports_live_state() {
    let engine = fast_engine().with_pacing_delay(Duration::from_secs(30));
    let app = setup_test_app_with(engine, true).await;
    app.register_worker("+1000", "session-a").await;

    let (status, _) = app
        .send(
            "POST",
            "/v1/runs",
            Some(json!({"target": "group", "members": [{"username": "a"}, {"username": "b"}]})),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let (status, registered) = app
        .send(
            "POST",
            "/v1/workers",
            Some(json!({"account_key": "+1000", "session_token": "session-b"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(registered["state"], "draining");

    let (_, listed) = app.send("GET", "/v1/workers", None).await;
    assert_eq!(listed["total"], 1);
    assert_eq!(listed["workers"][0]["state"], registered["state"]);

    app.send("POST", "/v1/runs/stop", None).await;
    app.wait_for_completion().await;
}

#[tokio::test]
async fn register_worker_requires_a_gateway() {
    let app = setup_test_app_with(fast_engine(), false).await;

    let (status, json) = app
        .send(
            "POST",
            "/v1/workers",
            Some(json!({"account_key": "+1000", "session_token": "s"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "validation_error");

    let (status, _) = app
        .send(
            "POST",
            "/v1/workers",
            Some(json!({
                "account_key": "+1000",
                "session_token": "s",
                "gateway_url": app.gateway.url,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn run_processes_members_through_gateway() {
    let app = setup_test_app().await;
    app.register_worker("+1000", "session-a").await;
    app.register_worker("+2000", "session-b").await;

    let (status, json) = app
        .send(
            "POST",
            "/v1/runs",
            Some(json!({
                "target": "group",
                "members": [
                    {"username": "@alice"},
                    {"username": "bob", "name": "Bob"},
                    {"username": GHOST_USER},
                    {"username": PRIVATE_USER},
                    {"id": 42, "name": "Numeric"},
                    {"username": "alice"},
                ],
            })),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["jobs"], 5, "duplicate @alice is enqueued once");
    assert_eq!(json["workers"], 2);
    assert_eq!(json["status"], "processing");

    app.wait_for_completion().await;

    let (_, status) = app.send("GET", "/v1/status", None).await;
    assert_eq!(status["status"], "completed");
    assert_eq!(status["running"], false);
    assert_eq!(status["queue_size"], 0);
    assert_eq!(status["target"], "group");
    assert_eq!(status["stats"]["added"], 3);
    assert_eq!(status["stats"]["skipped"], 2);
    assert_eq!(status["stats"]["failed"], 0);

    assert_eq!(
        app.gateway.log.invited(),
        vec!["777:42", "777:alice", "777:bob"]
    );
    let tokens = app.gateway.log.tokens();
    assert!(!tokens.is_empty());
    assert!(tokens.iter().all(|t| t == "session-a" || t == "session-b"));

    let (_, history) = app.send("GET", "/v1/events/history", None).await;
    let kinds: Vec<&str> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["kind"].as_str().unwrap())
        .collect();
    assert!(kinds.contains(&"run_started"));
    assert_eq!(kinds.iter().filter(|k| **k == "job_added").count(), 3);
    assert_eq!(kinds.last(), Some(&"run_completed"));
}

#[tokio::test]
async fn invalid_member_is_rejected_before_starting() {
    let app = setup_test_app().await;
    app.register_worker("+1000", "session-a").await;

    let (status, json) = app
        .send(
            "POST",
            "/v1/runs",
            Some(json!({"target": "group", "members": [{"name": "No handle"}]})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "validation_error");

    let (_, status) = app.send("GET", "/v1/status", None).await;
    assert_eq!(status["status"], "idle");
}

#[tokio::test]
async fn second_run_conflicts_until_stopped() {
    let engine = fast_engine().with_pacing_delay(Duration::from_secs(30));
    let app = setup_test_app_with(engine, true).await;
    app.register_worker("+1000", "session-a").await;

    let members = json!({
        "target": "group",
        "members": [{"username": "a"}, {"username": "b"}, {"username": "c"}],
    });
    let (status, first) = app.send("POST", "/v1/runs", Some(members.clone())).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, json) = app.send("POST", "/v1/runs", Some(members.clone())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "already_running");

    let (_, status) = app.send("GET", "/v1/status", None).await;
    assert_eq!(status["run_id"], first["run_id"]);

    let (status, json) = app.send("POST", "/v1/runs/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["running"], false);
    let (status, _) = app.send("POST", "/v1/runs/stop", None).await;
    assert_eq!(status, StatusCode::OK);

    app.wait_for_completion().await;
    let (_, status) = app.send("GET", "/v1/status", None).await;
    assert_eq!(status["status"], "completed");
    assert!(status["queue_size"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn unresolvable_target_ends_workers_with_error_event() {
    let app = setup_test_app().await;
    app.register_worker("+1000", "session-a").await;

    let (status, _) = app
        .send(
            "POST",
            "/v1/runs",
            Some(json!({"target": MISSING_TARGET, "members": [{"username": "alice"}]})),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    app.wait_for_completion().await;

    let (_, status) = app.send("GET", "/v1/status", None).await;
    assert_eq!(status["status"], "completed");
    assert_eq!(status["queue_size"], 1);
    assert!(app.gateway.log.invited().is_empty());

    let (_, history) = app.send("GET", "/v1/events/history?limit=50", None).await;
    let failure = history
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["kind"] == "worker_failed")
        .expect("worker failure event");
    assert_eq!(failure["severity"], "error");
    assert_eq!(failure["worker_key"], "+1000");
}

#[tokio::test]
async fn history_limit_returns_most_recent() {
    let app = setup_test_app().await;
    for key in ["+1", "+2", "+3"] {
        app.register_worker(key, "s").await;
    }

    let (_, history) = app.send("GET", "/v1/events/history?limit=2", None).await;
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["worker_key"], "+2");
    assert_eq!(history[1]["worker_key"], "+3");
}

#[tokio::test]
async fn event_stream_replays_history() {
    let app = setup_test_app().await;
    app.register_worker("+1000", "session-a").await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::get("/v1/events")
                .header("authorization", format!("Bearer {TEST_API_KEY}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));

    let mut body = response.into_body();
    let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
        .await
        .expect("first event")
        .unwrap()
        .unwrap();
    let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
    assert!(text.contains("event: worker_registered"), "{text}");
    assert!(text.contains("Worker ready: +1000"), "{text}");
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(
            Request::get("/api-docs/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(json["paths"]["/v1/runs"].is_object());
    assert!(json["components"]["securitySchemes"]["bearer"].is_object());
}
