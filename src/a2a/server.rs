//! A2A Gateway HTTP server powered by axum.
//!
//! Serves:
//! - `POST /a2a/send-message`               (Submit a task)
//! - `GET  /a2a/tasks`                      (List tasks)
//! - `GET  /a2a/tasks/{taskId}`             (Fetch one task)
//! - `POST /a2a/tasks/{taskId}/cancel`      (Cancel a task)
//! - `POST /a2a/tasks/{taskId}/messages`    (Append a message)
//! - `POST /a2a/tasks/{taskId}/status`      (Drive a state transition)
//! - `GET  /a2a/events`                     (SSE lifecycle stream)
//! - `GET  /a2a/agent-card`                 (Agent Card, enveloped)
//! - `GET  /.well-known/agent.json`         (Agent Card discovery)
//! - `GET  /a2a/health`                     (Health check)
//!
//! Everything under `/a2a` except health passes through admission control.
//! Discovery and health stay open to unidentified callers.

use crate::a2a::error::Result;
use crate::a2a::events::EventBus;
use crate::a2a::handler;
use crate::a2a::ledger::TaskLedger;
use crate::a2a::rate_limit::{AdmissionController, ClientId, rate_limit_middleware};
use crate::config::GatewayConfig;
use axum::{
    Router,
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Header carrying the caller's identity for admission control.
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// Shared state for the A2A gateway.
#[derive(Clone)]
pub struct A2aState {
    pub ledger: TaskLedger,
    pub bus: EventBus,
    pub limiter: Arc<AdmissionController>,
    pub host: String,
    pub port: u16,
}

impl A2aState {
    /// Wire an in-memory ledger, bus and limiter from `config`.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let bus = EventBus::new(config.event_history_capacity)?;
        Ok(Self {
            ledger: TaskLedger::in_memory(bus.clone()),
            bus,
            limiter: Arc::new(AdmissionController::new(config.rate_limit.clone())),
            host: config.bind.clone(),
            port: config.port,
        })
    }
}

/// Build the axum router for the A2A gateway.
pub fn build_router(state: A2aState) -> Router {
    let limited = Router::new()
        .route("/a2a/send-message", post(handler::send_message))
        .route("/a2a/tasks", get(handler::list_tasks))
        .route("/a2a/tasks/", get(handler::missing_task_id))
        .route("/a2a/tasks/{task_id}", get(handler::get_task))
        .route("/a2a/tasks/{task_id}/cancel", post(handler::cancel_task))
        .route("/a2a/tasks/{task_id}/messages", post(handler::append_message))
        .route("/a2a/tasks/{task_id}/status", post(handler::transition_task))
        .route("/a2a/events", get(handler::stream_events))
        .route("/a2a/agent-card", get(handler::get_agent_card))
        .route_layer(middleware::from_fn_with_state(
            state.limiter.clone(),
            rate_limit_middleware,
        ));

    Router::new()
        .route("/.well-known/agent.json", get(handler::well_known_agent_card))
        .route("/a2a/health", get(handler::health_check))
        .merge(limited)
        .layer(middleware::from_fn(attach_client_id))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Copy a non-blank `x-client-id` header into a [`ClientId`] extension.
///
/// Requests without one reach the limiter unidentified and are refused there.
async fn attach_client_id(mut req: Request, next: Next) -> Response {
    let client_id = req
        .headers()
        .get(CLIENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    if let Some(id) = client_id {
        req.extensions_mut().insert(ClientId(id));
    }
    next.run(req).await
}

/// Start the A2A gateway server and run until Ctrl-C.
pub async fn start_server(config: &GatewayConfig) -> anyhow::Result<()> {
    let state = A2aState::from_config(config)?;
    let cleanup = state.limiter.spawn_cleanup();

    let app = build_router(state);
    let addr: SocketAddr = format!("{}:{}", config.bind, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid gateway address: {}", e))?;

    tracing::info!("A2A Gateway starting on http://{}", addr);
    tracing::info!("   Agent Card: http://{}/.well-known/agent.json", addr);
    tracing::info!("   Tasks:      http://{}/a2a/tasks", addr);
    tracing::info!("   Events:     http://{}/a2a/events", addr);
    if !config.rate_limit.enabled {
        tracing::warn!("A2A: rate limiting disabled in config");
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cleanup.abort();
    tracing::info!("A2A Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("A2A: shutdown signal received");
}
