//! Per-client, per-endpoint admission control using a token bucket.
//!
//! Each `(client id, normalized endpoint)` pair gets its own bucket, created
//! lazily on first use and swept once idle. Refill-then-consume for one key
//! runs under that key's async mutex, so two overlapping requests can never
//! both spend the same token.

use crate::a2a::error::A2aError;
use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const DEFAULT_RPM: u32 = 60;
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_IDLE_THRESHOLD_SECS: u64 = 600;

pub const SEND_MESSAGE: &str = "POST /a2a/send-message";
pub const GET_TASK: &str = "GET /a2a/tasks/:taskId";
pub const LIST_TASKS: &str = "GET /a2a/tasks";
pub const CANCEL_TASK: &str = "POST /a2a/tasks/:taskId/cancel";
pub const AGENT_CARD: &str = "GET /a2a/agent-card";

/// Built-in per-endpoint limits, in requests per minute.
pub const ENDPOINT_DEFAULTS: &[(&str, u32)] = &[
    (SEND_MESSAGE, 10),
    (GET_TASK, 60),
    (LIST_TASKS, 30),
    (CANCEL_TASK, 10),
    (AGENT_CARD, 100),
];

static TASK_RESOURCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^/a2a/tasks/[^/]+").expect("task resource pattern is valid")
});

/// Fold a concrete request into its logical endpoint.
///
/// `POST /a2a/tasks/abc-123/cancel` becomes `POST /a2a/tasks/:taskId/cancel`.
pub fn normalize_endpoint(method: &str, path: &str) -> String {
    let path = path.split('?').next().unwrap_or_default();
    let trimmed = path.trim_end_matches('/');
    let path = if trimmed.is_empty() { "/" } else { trimmed };
    let path = TASK_RESOURCE.replace(path, "/a2a/tasks/:taskId");
    format!("{} {}", method.to_ascii_uppercase(), path)
}

// ─── Configuration ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Fallback for endpoints with no override and no built-in default.
    pub default_rpm: u32,
    pub cleanup_interval_secs: u64,
    /// Buckets untouched for longer than this are swept.
    pub idle_threshold_secs: u64,
    /// Explicit per-endpoint limits, keyed by normalized endpoint.
    pub overrides: HashMap<String, u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_rpm: DEFAULT_RPM,
            cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL_SECS,
            idle_threshold_secs: DEFAULT_IDLE_THRESHOLD_SECS,
            overrides: HashMap::new(),
        }
    }
}

impl RateLimitConfig {
    /// Requests per minute for `endpoint`: override, then built-in default, then global.
    pub fn resolve_rpm(&self, endpoint: &str) -> u32 {
        if let Some(rpm) = self.overrides.get(endpoint) {
            return *rpm;
        }
        ENDPOINT_DEFAULTS
            .iter()
            .find(|(name, _)| *name == endpoint)
            .map(|(_, rpm)| *rpm)
            .unwrap_or(self.default_rpm)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }
}

// ─── Token Bucket ────────────────────────────────────────────

/// Admission state for one key.
///
/// Holds `0 <= tokens <= capacity` immediately after every refill.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    per_minute: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket allowing `rpm` requests per minute with a burst of `rpm`.
    pub fn new(rpm: u32, now: Instant) -> Self {
        let capacity = f64::from(rpm.max(1));
        Self {
            tokens: capacity,
            capacity,
            per_minute: capacity,
            last_refill: now,
        }
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens added per second.
    pub fn refill_rate(&self) -> f64 {
        self.per_minute / 60.0
    }

    pub fn last_refill(&self) -> Instant {
        self.last_refill
    }

    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        let added = elapsed * self.per_minute / 60.0;
        self.tokens = (self.tokens + added).clamp(0.0, self.capacity);
        self.last_refill = now;
    }

    /// Refill, then spend one token if available.
    pub fn try_consume(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Whole seconds until the bucket holds one token again. At least 1.
pub fn calculate_retry_after(bucket: &TokenBucket) -> u64 {
    let missing = (1.0 - bucket.tokens).max(0.0);
    let secs = (missing * 60.0 / bucket.per_minute).ceil();
    (secs as u64).max(1)
}

// ─── Controller ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub client_id: String,
    pub endpoint: String,
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub retry_after_secs: Option<u64>,
}

impl Admission {
    fn unlimited() -> Self {
        Self {
            allowed: true,
            limit: 0,
            remaining: 0,
            retry_after_secs: None,
        }
    }
}

pub struct AdmissionController {
    config: RateLimitConfig,
    buckets: DashMap<BucketKey, Arc<Mutex<TokenBucket>>>,
}

impl AdmissionController {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Refill and try to spend a token for `(client_id, endpoint)`.
    ///
    /// Exhaustion is a normal `allowed: false` result, not an error.
    pub async fn try_consume(&self, client_id: &str, endpoint: &str) -> Admission {
        if !self.config.enabled {
            return Admission::unlimited();
        }

        let limit = self.config.resolve_rpm(endpoint);
        let key = BucketKey {
            client_id: client_id.to_string(),
            endpoint: endpoint.to_string(),
        };
        loop {
            let shared = self
                .buckets
                .entry(key.clone())
                .or_insert_with(|| {
                    tracing::debug!(client_id, endpoint, limit, "Creating rate limit bucket");
                    Arc::new(Mutex::new(TokenBucket::new(limit, Instant::now())))
                })
                .clone();

            let mut bucket = shared.lock().await;
            // Cleanup may have dropped this bucket before the lock was taken.
            let live = self
                .buckets
                .get(&key)
                .is_some_and(|current| Arc::ptr_eq(current.value(), &shared));
            if !live {
                continue;
            }

            let allowed = bucket.try_consume(Instant::now());
            return Admission {
                allowed,
                limit,
                remaining: bucket.tokens().floor() as u32,
                retry_after_secs: (!allowed).then(|| calculate_retry_after(&bucket)),
            };
        }
    }

    /// Drop buckets idle for longer than the configured threshold.
    ///
    /// A bucket whose lock is held is in use and always kept.
    pub fn cleanup(&self) -> usize {
        let idle = self.config.idle_threshold();
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets.retain(|key, bucket| match bucket.try_lock() {
            Ok(b) => {
                let keep = now.saturating_duration_since(b.last_refill()) <= idle;
                if !keep {
                    tracing::debug!(
                        client_id = %key.client_id,
                        endpoint = %key.endpoint,
                        "Removing idle rate limit bucket"
                    );
                }
                keep
            }
            Err(_) => true,
        });
        before.saturating_sub(self.buckets.len())
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Run [`cleanup`](Self::cleanup) on the configured interval until aborted.
    pub fn spawn_cleanup(self: &Arc<Self>) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(controller.config.cleanup_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let removed = controller.cleanup();
                if removed > 0 {
                    tracing::debug!(removed, "Rate limit cleanup swept idle buckets");
                }
            }
        })
    }
}

// ─── Middleware ──────────────────────────────────────────────

/// Verified caller identity, inserted into request extensions upstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(pub String);

/// axum middleware gating requests on the caller's bucket for this endpoint.
pub async fn rate_limit_middleware(
    State(controller): State<Arc<AdmissionController>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(ClientId(client_id)) = req.extensions().get::<ClientId>().cloned() else {
        return A2aError::Internal("admission check reached without a client id".to_string())
            .into_response();
    };

    let endpoint = normalize_endpoint(req.method().as_str(), req.uri().path());
    let admission = controller.try_consume(&client_id, &endpoint).await;

    if !admission.allowed {
        let retry_after = admission.retry_after_secs.unwrap_or(1);
        tracing::warn!(
            client_id = %client_id,
            endpoint = %endpoint,
            retry_after,
            "Rate limit exceeded"
        );
        return A2aError::RateLimitExceeded { retry_after }.into_response();
    }

    let mut response = next.run(req).await;
    if controller.config.enabled {
        let headers = response.headers_mut();
        headers.insert("x-ratelimit-limit", HeaderValue::from(admission.limit));
        headers.insert("x-ratelimit-remaining", HeaderValue::from(admission.remaining));
    }
    response
}
