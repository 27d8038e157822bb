//! # Error Handling
//!
//! This module defines the bridge's error taxonomy and how errors are
//! converted to HTTP responses for the management API.
//!
//! ## Propagation policy:
//! No error in this system is allowed to terminate the process or corrupt
//! session state. Every failure on the streaming path results in either a
//! dropped unit of work (one message, one frame) or a link-level teardown,
//! and never propagates past the bridge boundary — the only user-visible
//! failure behavior is log output. The `ResponseError` impl below exists
//! solely for the HTTP management handlers.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Error taxonomy for the stream bridge.
///
/// ## Categories:
/// - **MalformedEvent**: inbound message is not valid JSON or lacks a
///   recognized `event` field — logged, message dropped, session continues
/// - **DecodeError**: media payload is not valid base64 — logged, frame
///   dropped, session continues
/// - **ConfigError**: transcription credential missing or placeholder, or
///   configuration loading failed — the link refuses to connect
/// - **SendError**: audio forwarded while the link is not open — caught at
///   the call site, logged, non-fatal
/// - **RemoteError**: the transcription service reported a connection
///   problem — logged, link winds down, never escalated to the session
/// - **Validation**: a runtime configuration update failed validation
#[derive(Debug)]
pub enum BridgeError {
    /// Inbound stream message could not be parsed
    MalformedEvent(String),

    /// Media payload was not valid base64
    DecodeError(String),

    /// Transcription service credential or configuration problem
    ConfigError(String),

    /// Audio send attempted against a link that is not open
    SendError(String),

    /// Transcription service connection error
    RemoteError(String),

    /// Runtime configuration update failed validation
    Validation(String),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::MalformedEvent(msg) => write!(f, "Malformed event: {}", msg),
            BridgeError::DecodeError(msg) => write!(f, "Payload decode error: {}", msg),
            BridgeError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            BridgeError::SendError(msg) => write!(f, "Audio send error: {}", msg),
            BridgeError::RemoteError(msg) => write!(f, "Transcription service error: {}", msg),
            BridgeError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

/// HTTP mapping for the management API.
///
/// The streaming error variants never travel back over the inbound stream
/// connection; this mapping only matters when a handler under `/api/v1`
/// returns an error.
impl ResponseError for BridgeError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            BridgeError::MalformedEvent(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "malformed_event",
                msg.clone(),
            ),
            BridgeError::DecodeError(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "decode_error",
                msg.clone(),
            ),
            BridgeError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
            BridgeError::SendError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "send_error",
                msg.clone(),
            ),
            BridgeError::RemoteError(msg) => (
                actix_web::http::StatusCode::BAD_GATEWAY,
                "remote_error",
                msg.clone(),
            ),
            BridgeError::Validation(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "validation_error",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Inbound JSON that fails to parse is a malformed event, not a server fault.
impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::MalformedEvent(err.to_string())
    }
}

/// Invalid base64 in a media payload drops that one frame.
impl From<base64::DecodeError> for BridgeError {
    fn from(err: base64::DecodeError) -> Self {
        BridgeError::DecodeError(err.to_string())
    }
}

impl From<config::ConfigError> for BridgeError {
    fn from(err: config::ConfigError) -> Self {
        BridgeError::ConfigError(err.to_string())
    }
}

/// Shorthand for Results using the bridge error type.
pub type BridgeResult<T> = Result<T, BridgeError>;
