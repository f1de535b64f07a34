//! # Error Handling
//!
//! This module defines the two error families of the server:
//!
//! - **AppError**: failures of the HTTP surface (health, config, reverse endpoints),
//!   converted into JSON HTTP responses.
//! - **GameError**: failures of the game protocol spoken over the WebSocket. Most of
//!   them are reported to the player as an `error` message and the connection stays
//!   open. Only `GameError::Internal` ends the connection.
//!
//! ## Key Rust Concepts for Error Handling:
//! - **Enums for Error Types**: Each variant represents a different kind of failure
//! - **From trait**: Automatically converts between error types so `?` just works
//! - **Display trait**: Defines the human-readable message
//! - **ResponseError trait**: Converts errors to HTTP responses

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the HTTP endpoints.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **ConfigError**: Configuration problems (500 errors)
/// - **ValidationError**: Data validation failed (400 errors)
/// - **ServiceUnavailable**: The server is at its connection limit (503 errors)
#[derive(Debug)]
pub enum AppError {
    Internal(String),
    BadRequest(String),
    ConfigError(String),
    ValidationError(String),
    ServiceUnavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

/// Implementation of the ResponseError trait for AppError.
///
/// ## JSON Response Format:
/// All errors return JSON with a consistent structure:
/// ```json
/// {
///   "error": {
///     "type": "validation_error",
///     "message": "No audio file provided",
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
            AppError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg),
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

/// Automatic conversion from anyhow::Error to AppError.
///
/// ## Usage:
/// When you use `?` with an anyhow::Error inside a handler, it becomes an AppError::Internal.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always caused by the client, so they map to 400.
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

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;

/// Errors raised while a connection session processes a game request.
///
/// ## Error Categories:
/// - **Validation**: unknown message type, malformed payload, undecodable audio
/// - **NotFound**: the room code does not exist
/// - **Authorization**: a non-host tried a host-only action
/// - **Precondition**: the action is allowed but the room is not ready for it
/// - **InvalidState**: the message is not valid in the session's current state
/// - **Internal**: store, serialization or disk failure; fatal to the connection
///
/// The `Display` output of every variant except `Internal` is exactly the text sent
/// to the player in the `error` message.
#[derive(Debug)]
pub enum GameError {
    Validation(String),
    NotFound(String),
    Authorization(String),
    Precondition(String),
    InvalidState(String),
    Internal(anyhow::Error),
}

impl GameError {
    pub fn room_not_found() -> Self {
        GameError::NotFound("Room not found".to_string())
    }

    pub fn no_room_joined() -> Self {
        GameError::InvalidState("No room joined yet".to_string())
    }

    pub fn invalid_action() -> Self {
        GameError::InvalidState("Invalid action.".to_string())
    }

    /// Whether the session can report this error and keep serving the connection.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, GameError::Internal(_))
    }
}

impl fmt::Display for GameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameError::Validation(msg)
            | GameError::NotFound(msg)
            | GameError::Authorization(msg)
            | GameError::Precondition(msg)
            | GameError::InvalidState(msg) => f.write_str(msg),
            GameError::Internal(err) => write!(f, "Internal error: {:#}", err),
        }
    }
}

impl std::error::Error for GameError {}

impl From<anyhow::Error> for GameError {
    fn from(err: anyhow::Error) -> Self {
        GameError::Internal(err)
    }
}

/// Shorthand for results of game operations.
pub type GameResult<T> = Result<T, GameError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_game_error_messages_are_player_facing() {
        assert_eq!(GameError::room_not_found().to_string(), "Room not found");
        assert_eq!(GameError::no_room_joined().to_string(), "No room joined yet");
        assert_eq!(GameError::invalid_action().to_string(), "Invalid action.");
    }

    #[test]
    fn test_only_internal_errors_are_fatal() {
        assert!(GameError::room_not_found().is_recoverable());
        assert!(GameError::Authorization("nope".to_string()).is_recoverable());
        assert!(!GameError::from(anyhow::anyhow!("disk full")).is_recoverable());
    }

    #[test]
    fn test_service_unavailable_maps_to_503() {
        let response = AppError::ServiceUnavailable("full".to_string()).error_response();
        assert_eq!(response.status(), actix_web::http::StatusCode::SERVICE_UNAVAILABLE);
    }
}
