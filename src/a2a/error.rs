//! Gateway error taxonomy and its HTTP mapping.
//!
//! Every failure leaves the gateway as `{"success": false, "error": {code, message, ...}}`
//! with a status code chosen by [`A2aError::status`].

use crate::a2a::types::TaskState;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable error codes carried in the error envelope.
pub mod error_codes {
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const TASK_NOT_FOUND: &str = "TASK_NOT_FOUND";
    pub const INVALID_TRANSITION: &str = "INVALID_TRANSITION";
    pub const TASK_TERMINAL: &str = "TASK_TERMINAL";
    pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Upper bound on field-level details returned to a client.
pub const MAX_ERROR_DETAILS: usize = 10;

pub type Result<T> = std::result::Result<T, A2aError>;

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum A2aError {
    /// Malformed or over-limit input.
    #[error("{message}")]
    Validation {
        message: String,
        details: Vec<FieldError>,
    },

    #[error("Task not found: {0}")]
    NotFound(String),

    /// State machine rule violation; the task is left unchanged.
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: TaskState, to: TaskState },

    #[error("Task {id} is in terminal state {state}")]
    TaskTerminal { id: String, state: TaskState },

    #[error("Rate limit exceeded, retry after {retry_after}s")]
    RateLimitExceeded { retry_after: u64 },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl A2aError {
    /// Validation error with details capped at [`MAX_ERROR_DETAILS`].
    ///
    /// Overflowing entries are summarized into one trailing entry.
    pub fn validation(message: impl Into<String>, mut details: Vec<FieldError>) -> Self {
        if details.len() > MAX_ERROR_DETAILS {
            let hidden = details.len() - MAX_ERROR_DETAILS;
            details.truncate(MAX_ERROR_DETAILS);
            details.push(FieldError::new("_", format!("... and {hidden} more")));
        }
        Self::Validation {
            message: message.into(),
            details,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => error_codes::VALIDATION_ERROR,
            Self::NotFound(_) => error_codes::TASK_NOT_FOUND,
            Self::InvalidTransition { .. } => error_codes::INVALID_TRANSITION,
            Self::TaskTerminal { .. } => error_codes::TASK_TERMINAL,
            Self::RateLimitExceeded { .. } => error_codes::RATE_LIMIT_EXCEEDED,
            Self::Internal(_) | Self::Configuration(_) => error_codes::INTERNAL_ERROR,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidTransition { .. } | Self::TaskTerminal { .. } => StatusCode::CONFLICT,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) | Self::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing body. Internal errors never leak their message.
    pub fn to_body(&self) -> ErrorBody {
        let message = match self {
            Self::Internal(_) | Self::Configuration(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        ErrorBody {
            code: self.code().to_string(),
            message,
            details: match self {
                Self::Validation { details, .. } if !details.is_empty() => Some(details.clone()),
                _ => None,
            },
            retry_after: match self {
                Self::RateLimitExceeded { retry_after } => Some(*retry_after),
                _ => None,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// Failure envelope: `{"success": false, "error": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: ErrorBody,
}

impl IntoResponse for A2aError {
    fn into_response(self) -> Response {
        match &self {
            Self::Internal(msg) | Self::Configuration(msg) => {
                tracing::error!(code = self.code(), "A2A: internal error: {}", msg);
            }
            Self::RateLimitExceeded { retry_after } => {
                tracing::warn!(retry_after, "A2A: request rejected by rate limiter");
            }
            _ => tracing::debug!(code = self.code(), "A2A: request failed: {}", self),
        }

        let status = self.status();
        let envelope = ErrorEnvelope {
            success: false,
            error: self.to_body(),
        };
        let mut response = (status, Json(envelope)).into_response();
        if let Self::RateLimitExceeded { retry_after } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_details_capped() {
        let details = (0..25)
            .map(|i| FieldError::new(format!("parts[{i}]"), "bad"))
            .collect();
        let err = A2aError::validation("Invalid request", details);
        let body = err.to_body();
        let details = body.details.expect("details");
        assert_eq!(details.len(), MAX_ERROR_DETAILS + 1);
        assert_eq!(details[MAX_ERROR_DETAILS].message, "... and 15 more");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            A2aError::NotFound("t".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            A2aError::InvalidTransition {
                from: TaskState::Completed,
                to: TaskState::Working
            }
            .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            A2aError::RateLimitExceeded { retry_after: 6 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_internal_error_hides_message() {
        let body = A2aError::Internal("db password leaked".into()).to_body();
        assert_eq!(body.code, error_codes::INTERNAL_ERROR);
        assert!(!body.message.contains("password"));
    }

    #[test]
    fn test_rate_limit_response_has_retry_after_header() {
        let resp = A2aError::RateLimitExceeded { retry_after: 6 }.into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            resp.headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
            Some("6")
        );
    }
}
