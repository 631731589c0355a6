//! Gateway Router Tests
//!
//! Drives the full axum router (client identity, admission control,
//! handlers, envelopes) with `tower::ServiceExt::oneshot`.

use crate::a2a::server::{A2aState, CLIENT_ID_HEADER, build_router};
use crate::config::GatewayConfig;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use futures::StreamExt;
use serde_json::{Value, json};
use std::time::Duration;
use tower::ServiceExt;

fn test_state() -> A2aState {
    A2aState::from_config(&GatewayConfig::default()).expect("state")
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
    let resp = app.clone().oneshot(req).await.expect("response");
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, headers, body)
}

fn get(uri: &str, client: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(CLIENT_ID_HEADER, client)
        .body(Body::empty())
        .expect("request")
}

fn post(uri: &str, client: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(CLIENT_ID_HEADER, client)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body).expect("json")))
        .expect("request")
}

/// Read SSE frames from `body` until `count` complete ones have arrived.
async fn read_frames(body: Body, count: usize) -> Vec<String> {
    let mut chunks = body.into_data_stream();
    let mut text = String::new();
    while text.matches("\n\n").count() < count {
        let chunk = tokio::time::timeout(Duration::from_secs(5), chunks.next())
            .await
            .expect("frame in time")
            .expect("stream open")
            .expect("chunk");
        text.push_str(std::str::from_utf8(&chunk).expect("utf8"));
    }
    text.split("\n\n")
        .take(count)
        .map(str::to_string)
        .collect()
}

fn events_request(client: &str, last_event_id: &str) -> Request<Body> {
    Request::builder()
        .uri("/a2a/events")
        .header(CLIENT_ID_HEADER, client)
        .header("last-event-id", last_event_id)
        .body(Body::empty())
        .expect("request")
}

fn state_with_history(capacity: usize) -> A2aState {
    let config = GatewayConfig {
        event_history_capacity: capacity,
        ..GatewayConfig::default()
    };
    A2aState::from_config(&config).expect("state")
}

fn hello() -> Value {
    json!({
        "message": {"role": "user", "parts": [{"type": "text", "text": "Hello from A2A test!"}]}
    })
}

async fn submit(app: &Router, client: &str) -> String {
    let (status, _, body) = send(app, post("/a2a/send-message", client, hello())).await;
    assert_eq!(status, StatusCode::OK);
    body["data"]["taskId"].as_str().expect("task id").to_string()
}

#[tokio::test]
async fn test_health_needs_no_client_id() {
    let app = build_router(test_state());
    let req = Request::builder()
        .uri("/a2a/health")
        .body(Body::empty())
        .expect("request");
    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_well_known_agent_card() {
    let app = build_router(test_state());
    let req = Request::builder()
        .uri("/.well-known/agent.json")
        .body(Body::empty())
        .expect("request");
    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["name"].as_str().expect("name").contains("A2A Gateway"));
}

#[tokio::test]
async fn test_agent_card_is_enveloped() {
    let app = build_router(test_state());
    let (status, headers, body) = send(&app, get("/a2a/agent-card", "client-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["data"]["capabilities"]["streaming"].as_bool().expect("bool"));
    assert_eq!(headers["x-ratelimit-limit"], "100");
}

#[tokio::test]
async fn test_missing_client_id_is_internal_error() {
    let app = build_router(test_state());
    let req = Request::builder()
        .method("POST")
        .uri("/a2a/send-message")
        .body(Body::from(serde_json::to_vec(&hello()).expect("json")))
        .expect("request");
    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
    assert_eq!(body["error"]["message"], "Internal server error");
}

#[tokio::test]
async fn test_send_message_then_get() {
    let app = build_router(test_state());
    let (status, _, body) = send(&app, post("/a2a/send-message", "client-1", hello())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "SUBMITTED");

    let task_id = body["data"]["taskId"].as_str().expect("task id");
    let (status, _, body) = send(&app, get(&format!("/a2a/tasks/{}", task_id), "client-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], task_id);
    assert_eq!(body["data"]["messages"].as_array().expect("messages").len(), 1);
}

#[tokio::test]
async fn test_send_message_validation_error() {
    let app = build_router(test_state());
    let (status, _, body) = send(
        &app,
        post(
            "/a2a/send-message",
            "client-1",
            json!({"message": {"role": "user", "parts": []}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"]["details"][0]["field"], "message.parts");
}

#[tokio::test]
async fn test_malformed_body_is_validation_error() {
    let app = build_router(test_state());
    let req = Request::builder()
        .method("POST")
        .uri("/a2a/send-message")
        .header(CLIENT_ID_HEADER, "client-1")
        .body(Body::from("{not json"))
        .expect("request");
    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_unknown_task_is_not_found() {
    let app = build_router(test_state());
    let (status, _, body) = send(&app, get("/a2a/tasks/missing", "client-1")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "TASK_NOT_FOUND");
}

#[tokio::test]
async fn test_cancel_task_and_cancel_again() {
    let app = build_router(test_state());
    let task_id = submit(&app, "client-1").await;

    let uri = format!("/a2a/tasks/{}/cancel", task_id);
    let (status, _, body) = send(&app, post(&uri, "client-1", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "CANCELED");

    let (status, _, body) = send(&app, post(&uri, "client-1", json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "INVALID_TRANSITION");
}

#[tokio::test]
async fn test_status_route_drives_lifecycle() {
    let app = build_router(test_state());
    let task_id = submit(&app, "client-1").await;
    let uri = format!("/a2a/tasks/{}/status", task_id);

    let (status, _, body) = send(&app, post(&uri, "client-1", json!({"status": "WORKING"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "WORKING");

    let (status, _, body) = send(
        &app,
        post(&uri, "client-1", json!({"status": "COMPLETED", "reason": "done"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["history"].as_array().expect("history").len(), 2);

    let (status, _, _) = send(&app, post(&uri, "client-1", json!({"status": "WORKING"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_append_message_route() {
    let app = build_router(test_state());
    let task_id = submit(&app, "client-1").await;
    let uri = format!("/a2a/tasks/{}/messages", task_id);

    let (status, _, body) = send(
        &app,
        post(
            &uri,
            "client-1",
            json!({"role": "assistant", "parts": [{"type": "text", "text": "On it"}]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["taskId"], task_id);
}

#[tokio::test]
async fn test_list_tasks_filters_and_rejects_bad_query() {
    let app = build_router(test_state());
    let first = submit(&app, "client-1").await;
    submit(&app, "client-1").await;
    send(&app, post(&format!("/a2a/tasks/{}/cancel", first), "client-1", json!({}))).await;

    let (status, _, body) = send(&app, get("/a2a/tasks?status=CANCELED", "client-1")).await;
    assert_eq!(status, StatusCode::OK);
    let tasks = body["data"].as_array().expect("tasks");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["id"], first.as_str());

    let (status, _, body) = send(&app, get("/a2a/tasks?limit=lots", "client-1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test(start_paused = true)]
async fn test_eleventh_send_is_rate_limited() {
    let app = build_router(test_state());
    for _ in 0..10 {
        submit(&app, "busy-client").await;
    }

    let (status, headers, body) =
        send(&app, post("/a2a/send-message", "busy-client", hello())).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(headers[header::RETRY_AFTER], "6");
    assert_eq!(body["error"]["code"], "RATE_LIMIT_EXCEEDED");
    assert_eq!(body["error"]["retryAfter"], 6);

    // Other clients and other endpoints keep their own buckets.
    submit(&app, "quiet-client").await;
    let (status, _, _) = send(&app, get("/a2a/tasks", "busy-client")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_event_stream_opens() {
    let state = test_state();
    let bus = state.bus.clone();
    let app = build_router(state);

    let resp = app
        .oneshot(get("/a2a/events", "watcher"))
        .await
        .expect("response");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/event-stream");
    assert_eq!(bus.subscriber_count(), 1);

    drop(resp);
    assert_eq!(bus.subscriber_count(), 0);
}

#[tokio::test]
async fn test_event_stream_replays_backlog_then_live() {
    let state = state_with_history(3);
    let bus = state.bus.clone();
    let app = build_router(state);

    let a1 = bus.agent_connected("peer-1", None, None);
    let a2 = bus.agent_connected("peer-2", None, None);
    let a3 = bus.agent_connected("peer-3", None, None);

    let resp = app
        .oneshot(events_request("watcher", &a1.id))
        .await
        .expect("response");
    assert_eq!(resp.status(), StatusCode::OK);
    let connected = bus.get_events_after(Some(&a3.id));
    assert_eq!(connected.len(), 1);

    let body = resp.into_body();
    let live = bus.agent_connected("peer-4", None, None);
    let frames = read_frames(body, 4).await;

    let expected = [&a2.id, &a3.id, &connected[0].id, &live.id];
    for (frame, id) in frames.iter().zip(expected) {
        assert!(frame.contains(&format!("id: {id}\n")), "{frame:?} should carry {id}");
    }
    let joined = frames.join("\n\n");
    for id in expected {
        assert_eq!(joined.matches(&format!("id: {id}\n")).count(), 1);
    }
    assert!(!joined.contains(&a1.id));
    assert!(!joined.contains("replay.expired"));
}

#[tokio::test]
async fn test_event_stream_expired_id_gets_notice() {
    let state = state_with_history(2);
    let bus = state.bus.clone();
    let app = build_router(state);

    let stale = bus.agent_connected("peer-1", None, None);
    bus.agent_connected("peer-2", None, None);
    bus.agent_connected("peer-3", None, None);

    let resp = app
        .oneshot(events_request("late-watcher", &stale.id))
        .await
        .expect("response");
    assert_eq!(resp.status(), StatusCode::OK);

    let frames = read_frames(resp.into_body(), 2).await;
    assert!(frames[0].contains("event: replay.expired\n"), "{:?}", frames[0]);
    assert!(frames[0].contains(&format!("data: {}", stale.id)));
    assert!(!frames[0].contains("id: "));
    assert!(frames[1].contains("event: agent.connected\n"), "{:?}", frames[1]);
}

#[tokio::test]
async fn test_empty_task_id_is_validation_error() {
    let app = build_router(test_state());
    let (status, _, body) = send(&app, get("/a2a/tasks/", "client-a")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"]["details"][0]["field"], "taskId");
}
