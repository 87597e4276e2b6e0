//! # Error Handling
//!
//! Two families of errors live here:
//!
//! - **SessionError**: what goes wrong inside a conversation (microphone, transport,
//!   payload decoding, the remote agent). These flow *upward* into the session state
//!   machine, which decides between recovery and teardown.
//! - **AppError**: what goes wrong while serving the local control surface. These are
//!   converted into JSON HTTP responses.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### Enums for Error Kinds
//! - **Variants**: Each variant is one category of failure
//! - **Pattern matching**: `match` forces every category to be handled
//!
//! ### Traits for Error Conversion
//! - **From trait**: Lets `?` convert between error types automatically
//! - **ResponseError trait**: Turns an error into an HTTP response
//! - **Display trait**: Human-readable message shown in the status surface

use actix_web::{HttpResponse, ResponseError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::fmt;

/// Category of a session-level failure.
///
/// ## Recovery policy (decided by the session, not by the producer):
/// - **Device**: microphone/speaker unavailable or denied, fatal to the attempt
/// - **Connect** / **Timeout**: transport-level, retried within the budget
/// - **Decode**: one inbound payload was malformed, skipped and logged
/// - **RemoteApplication**: the remote agent reported an error, fatal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Device,
    Connect,
    Timeout,
    Decode,
    RemoteApplication,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Device => "device",
            ErrorKind::Connect => "connect",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Decode => "decode",
            ErrorKind::RemoteApplication => "remote_application",
        }
    }
}

/// A structured error raised by any session component.
///
/// ## Fields:
/// - `kind`: which component/category failed
/// - `message`: the single human-readable message shown to the user
/// - `recoverable`: whether the session may keep going (retry or skip)
/// - `occurred_at`: when it happened, for the status surface
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionError {
    pub kind: ErrorKind,
    pub message: String,
    pub recoverable: bool,
    pub occurred_at: DateTime<Utc>,
}

impl SessionError {
    fn new(kind: ErrorKind, message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            recoverable,
            occurred_at: Utc::now(),
        }
    }

    /// Microphone or speaker could not be acquired.
    pub fn device(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Device, message, false)
    }

    /// A connection attempt failed or the link dropped.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connect, message, true)
    }

    /// A connection attempt exceeded its timeout.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message, true)
    }

    /// One inbound audio payload could not be decoded.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Decode, message, true)
    }

    /// The remote agent sent an explicit `error` event.
    pub fn remote(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RemoteApplication, message, false)
    }

    /// The reconnection budget ran out. Same kind as a connect error, but final.
    pub fn connect_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connect, message, false)
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for SessionError {}

/// Errors returned by the local control surface handlers.
///
/// ## Error Categories:
/// - **Internal**: something broke inside this process (500)
/// - **BadRequest**: the caller sent malformed data (400)
/// - **ConfigError**: configuration could not be loaded or applied (500)
/// - **ValidationError**: configuration values failed validation (400)
/// - **Unavailable**: the session controller or remote probe is unreachable (503)
#[derive(Debug)]
pub enum AppError {
    Internal(String),
    BadRequest(String),
    ConfigError(String),
    ValidationError(String),
    Unavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Unavailable(msg) => write!(f, "Unavailable: {}", msg),
        }
    }
}

/// Converts control-surface errors into JSON HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "validation_error",
///     "message": "Frame size must be between 64 and 16384 samples",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;

        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": Utc::now().to_rfc3339()
            }
        }))
    }
}

/// `anyhow` is used for bootstrap and controller calls; anything that reaches a
/// handler that way is an internal failure.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Malformed JSON from the caller is a 400, not a 500.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Shorthand for handler results.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_session_error_recoverability() {
        assert!(!SessionError::device("no microphone").recoverable);
        assert!(SessionError::connect("refused").recoverable);
        assert!(SessionError::timeout("10s elapsed").recoverable);
        assert!(SessionError::decode("odd byte count").recoverable);
        assert!(!SessionError::remote("quota exceeded").recoverable);

        let exhausted = SessionError::connect_exhausted("gave up");
        assert_eq!(exhausted.kind, ErrorKind::Connect);
        assert!(!exhausted.recoverable);
    }

    #[test]
    fn test_session_error_display() {
        let err = SessionError::remote("quota exceeded");
        assert_eq!(err.to_string(), "remote_application error: quota exceeded");
    }

    #[test]
    fn test_session_error_serializes_kind_in_snake_case() {
        let json = serde_json::to_value(SessionError::remote("boom")).unwrap();
        assert_eq!(json["kind"], "remote_application");
        assert_eq!(json["message"], "boom");
        assert_eq!(json["recoverable"], false);
    }

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(
            AppError::ValidationError("x".into()).error_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Unavailable("x".into()).error_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::from(anyhow::anyhow!("boom")).error_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
