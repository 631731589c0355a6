//! REST handlers for the A2A task API.
//!
//! Every successful response is `{"success": true, "data": ...}`; every
//! failure goes through [`A2aError`]'s `IntoResponse` and becomes the error
//! envelope. Handlers read raw bodies and leave shape checks to
//! [`validation`](crate::a2a::validation).

use crate::a2a::error::{A2aError, FieldError, Result};
use crate::a2a::rate_limit::ClientId;
use crate::a2a::server::A2aState;
use crate::a2a::types::*;
use crate::a2a::{agent_card, stream, validation};
use axum::{
    Extension,
    body::Bytes,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::HeaderMap,
    response::{
        IntoResponse, Json,
        sse::{KeepAlive, Sse},
    },
};

type ApiResult<T> = Result<Json<ApiResponse<T>>>;

// ─── Tasks ───────────────────────────────────────────────────

/// POST /a2a/send-message
pub async fn send_message(State(state): State<A2aState>, body: Bytes) -> ApiResult<TaskAck> {
    let req = validation::validate_send_message(&body)?;
    let task = state.ledger.submit(req.into()).await?;
    tracing::info!("A2A: task {} submitted", task.id);
    Ok(Json(ApiResponse::ok(TaskAck {
        task_id: task.id,
        status: task.state,
    })))
}

/// GET /a2a/tasks/{task_id}
pub async fn get_task(
    State(state): State<A2aState>,
    Path(task_id): Path<String>,
) -> ApiResult<Task> {
    validation::validate_task_id(&task_id)?;
    let task = state.ledger.get(&task_id).await?;
    Ok(Json(ApiResponse::ok(task)))
}

/// GET /a2a/tasks/ — the id segment is empty.
pub async fn missing_task_id() -> Result<()> {
    validation::validate_task_id("")
}

/// GET /a2a/tasks
pub async fn list_tasks(
    State(state): State<A2aState>,
    filter: std::result::Result<Query<TaskFilter>, QueryRejection>,
) -> ApiResult<Vec<TaskSummary>> {
    let Query(filter) = filter.map_err(|e| {
        A2aError::validation(
            "Invalid query parameters",
            vec![FieldError::new("query", e.body_text())],
        )
    })?;
    let tasks = state.ledger.list(&filter).await?;
    Ok(Json(ApiResponse::ok(tasks)))
}

/// POST /a2a/tasks/{task_id}/cancel
pub async fn cancel_task(
    State(state): State<A2aState>,
    Path(task_id): Path<String>,
) -> ApiResult<TaskAck> {
    validation::validate_task_id(&task_id)?;
    let task = state.ledger.cancel(&task_id, None).await?;
    tracing::info!("A2A: task {} canceled", task.id);
    Ok(Json(ApiResponse::ok(TaskAck {
        task_id: task.id,
        status: task.state,
    })))
}

/// POST /a2a/tasks/{task_id}/messages
pub async fn append_message(
    State(state): State<A2aState>,
    Path(task_id): Path<String>,
    body: Bytes,
) -> ApiResult<Message> {
    validation::validate_task_id(&task_id)?;
    let input = validation::validate_message_input(&body)?;
    let message = state.ledger.append_message(&task_id, input).await?;
    Ok(Json(ApiResponse::ok(message)))
}

/// POST /a2a/tasks/{task_id}/status
pub async fn transition_task(
    State(state): State<A2aState>,
    Path(task_id): Path<String>,
    body: Bytes,
) -> ApiResult<Task> {
    validation::validate_task_id(&task_id)?;
    let req = validation::validate_transition_request(&body)?;
    let task = state
        .ledger
        .transition(&task_id, req.status, req.reason)
        .await?;
    Ok(Json(ApiResponse::ok(task)))
}

// ─── Events ──────────────────────────────────────────────────

/// GET /a2a/events — SSE stream, resumable with `Last-Event-ID`.
pub async fn stream_events(
    State(state): State<A2aState>,
    Extension(ClientId(client_id)): Extension<ClientId>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let last_event_id = headers
        .get(stream::LAST_EVENT_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    Sse::new(stream::event_stream(&state.bus, &client_id, last_event_id))
        .keep_alive(KeepAlive::default())
}

// ─── Discovery ───────────────────────────────────────────────

/// GET /a2a/agent-card
pub async fn get_agent_card(State(state): State<A2aState>) -> Json<ApiResponse<AgentCard>> {
    Json(ApiResponse::ok(agent_card::build_agent_card(
        &state.host,
        state.port,
    )))
}

/// GET /.well-known/agent.json — bare card, as discovery clients expect.
pub async fn well_known_agent_card(State(state): State<A2aState>) -> Json<AgentCard> {
    Json(agent_card::build_agent_card(&state.host, state.port))
}

/// GET /a2a/health
pub async fn health_check(State(state): State<A2aState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::VERSION,
        "protocol": "A2A",
        "subscribers": state.bus.subscriber_count(),
        "rateLimitBuckets": state.limiter.bucket_count(),
    }))
}
