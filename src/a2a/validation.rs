//! Request body validation.
//!
//! Turns raw bodies into typed requests or a [`A2aError::Validation`] with
//! field-level details. Nothing past this module re-checks shape.

use crate::a2a::error::{A2aError, FieldError, Result};
use crate::a2a::types::{ImageSource, MessageInput, Part, SendMessageRequest, TransitionRequest};
use serde::de::DeserializeOwned;

pub const MAX_PARTS: usize = 64;
pub const MAX_TEXT_CHARS: usize = 100_000;
pub const MAX_ID_LEN: usize = 128;
pub const MAX_NAME_LEN: usize = 256;

/// Deserialize a JSON body, reporting serde's complaint as a validation error.
pub fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    if body.is_empty() {
        return Err(A2aError::validation(
            "Request body is required",
            vec![FieldError::new("body", "must not be empty")],
        ));
    }
    serde_json::from_slice(body).map_err(|e| {
        A2aError::validation(
            "Malformed request body",
            vec![FieldError::new(
                format!("line {}, column {}", e.line(), e.column()),
                e.to_string(),
            )],
        )
    })
}

pub fn validate_send_message(body: &[u8]) -> Result<SendMessageRequest> {
    let req: SendMessageRequest = parse_json(body)?;
    let mut details = Vec::new();

    check_message(&req.message, "message", &mut details);
    if let Some(ref id) = req.task_id {
        check_id(id, "taskId", &mut details);
    }
    if let Some(ref session) = req.session_id {
        check_id(session, "sessionId", &mut details);
    }
    if let Some(ref name) = req.name {
        if name.chars().count() > MAX_NAME_LEN {
            details.push(FieldError::new(
                "name",
                format!("must be at most {} characters", MAX_NAME_LEN),
            ));
        }
    }

    finish(req, details, "Invalid send-message request")
}

pub fn validate_message_input(body: &[u8]) -> Result<MessageInput> {
    let input: MessageInput = parse_json(body)?;
    let mut details = Vec::new();
    check_message(&input, "", &mut details);
    finish(input, details, "Invalid message")
}

pub fn validate_transition_request(body: &[u8]) -> Result<TransitionRequest> {
    parse_json(body)
}

/// A path or query task id.
pub fn validate_task_id(task_id: &str) -> Result<()> {
    let mut details = Vec::new();
    check_id(task_id, "taskId", &mut details);
    finish((), details, "Invalid task id")
}

fn finish<T>(value: T, details: Vec<FieldError>, message: &str) -> Result<T> {
    if details.is_empty() {
        Ok(value)
    } else {
        Err(A2aError::validation(message, details))
    }
}

fn field(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn check_id(id: &str, name: &str, details: &mut Vec<FieldError>) {
    if id.trim().is_empty() {
        details.push(FieldError::new(name, "must not be blank"));
    } else if id.len() > MAX_ID_LEN {
        details.push(FieldError::new(
            name,
            format!("must be at most {} bytes", MAX_ID_LEN),
        ));
    }
}

fn check_message(message: &MessageInput, prefix: &str, details: &mut Vec<FieldError>) {
    let parts_field = field(prefix, "parts");
    if message.parts.is_empty() {
        details.push(FieldError::new(parts_field.as_str(), "must contain at least one part"));
        return;
    }
    if message.parts.len() > MAX_PARTS {
        details.push(FieldError::new(
            parts_field.as_str(),
            format!("must contain at most {} parts", MAX_PARTS),
        ));
    }

    for (i, part) in message.parts.iter().enumerate() {
        let at = format!("{}[{}]", parts_field, i);
        match part {
            Part::Text { text } => {
                if text.trim().is_empty() {
                    details.push(FieldError::new(at, "text must not be empty"));
                } else if text.chars().count() > MAX_TEXT_CHARS {
                    details.push(FieldError::new(
                        at,
                        format!("text must be at most {} characters", MAX_TEXT_CHARS),
                    ));
                }
            }
            Part::Image { source } => match source {
                ImageSource::Url { url } if url.trim().is_empty() => {
                    details.push(FieldError::new(at, "image url must not be empty"));
                }
                ImageSource::Base64 { media_type, data } => {
                    if !media_type.starts_with("image/") {
                        details.push(FieldError::new(
                            at.as_str(),
                            "mediaType must be an image/* type",
                        ));
                    }
                    if data.is_empty() {
                        details.push(FieldError::new(at, "image data must not be empty"));
                    }
                }
                ImageSource::Url { .. } => {}
            },
            Part::ToolCall { id, name, .. } => {
                if id.trim().is_empty() || name.trim().is_empty() {
                    details.push(FieldError::new(at, "tool_call requires id and name"));
                }
            }
            Part::ToolResult { tool_call_id, .. } => {
                if tool_call_id.trim().is_empty() {
                    details.push(FieldError::new(at, "tool_result requires toolCallId"));
                }
            }
        }
    }
}
