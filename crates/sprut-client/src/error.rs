//! Error taxonomy for the session client.

use std::time::Duration;

use thiserror::Error;

/// The main result type used throughout the client.
pub type SprutResult<T> = Result<T, SprutError>;

/// Every failure a caller of the session client can observe.
#[derive(Error, Debug, Clone)]
pub enum SprutError {
    /// Missing or invalid construction parameter. Fatal, never retried.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// An operation was attempted while the socket is not open.
    #[error("Not connected: {message}")]
    NotConnected { message: String },

    /// Socket-level failure (connect, write, read).
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// The socket closed while the call was outstanding.
    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },

    /// The hub answered with a shape the client does not understand.
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// The hub rejected the credentials. `detail` carries the hub's own text.
    #[error("{message}{}", .detail.as_deref().map(|detail| format!(": {detail}")).unwrap_or_default())]
    AuthenticationFailed {
        message: String,
        detail: Option<String>,
    },

    /// A pending call exceeded its deadline.
    #[error("Request {request_id} timed out after {duration:?}")]
    Timeout {
        duration: Duration,
        request_id: String,
    },

    /// The command is not on the configured allow-list.
    #[error("Command not allowed: {command}")]
    CommandNotAllowed { command: String },

    /// Caller-side argument validation failed.
    #[error("Invalid arguments: {message}")]
    InvalidArguments { message: String },

    /// Too many calls are already in flight.
    #[error("Capacity exceeded: {message}")]
    CapacityExceeded { message: String },

    /// JSON encoding or decoding failed.
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<serde_json::Error> for SprutError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SprutError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport {
            message: e.to_string(),
        }
    }
}

impl SprutError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a not-connected error.
    pub fn not_connected(message: impl Into<String>) -> Self {
        Self::NotConnected {
            message: message.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a connection-lost error.
    pub fn connection_lost(reason: impl Into<String>) -> Self {
        Self::ConnectionLost {
            reason: reason.into(),
        }
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create an authentication error.
    pub fn authentication_failed(message: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            message: message.into(),
            detail: None,
        }
    }

    /// Create an authentication error that keeps the hub's explanation.
    pub fn authentication_failed_with_detail(
        message: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::AuthenticationFailed {
            message: message.into(),
            detail: Some(detail.into()),
        }
    }

    /// Create a request timeout error.
    pub fn timeout(duration: Duration, request_id: impl Into<String>) -> Self {
        Self::Timeout {
            duration,
            request_id: request_id.into(),
        }
    }

    /// Create a command-not-allowed error.
    pub fn command_not_allowed(command: impl Into<String>) -> Self {
        Self::CommandNotAllowed {
            command: command.into(),
        }
    }

    /// Create an invalid-arguments error.
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            message: message.into(),
        }
    }

    /// Create a capacity error.
    pub fn capacity_exceeded(message: impl Into<String>) -> Self {
        Self::CapacityExceeded {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the failure is transient and the same call may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotConnected { .. }
                | Self::ConnectionLost { .. }
                | Self::Transport { .. }
                | Self::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = SprutError::config("WS_URL is not set");
        assert!(matches!(err, SprutError::Config { .. }));

        let err = SprutError::timeout(Duration::from_secs(5), "7");
        assert!(matches!(err, SprutError::Timeout { .. }));

        let err = SprutError::authentication_failed("bad password");
        assert!(matches!(err, SprutError::AuthenticationFailed { .. }));
    }

    #[test]
    fn test_authentication_display_appends_detail() {
        let err = SprutError::authentication_failed("Authentication failed");
        assert_eq!(err.to_string(), "Authentication failed");

        let err =
            SprutError::authentication_failed_with_detail("Authentication failed", "Wrong password");
        assert_eq!(err.to_string(), "Authentication failed: Wrong password");
    }

    #[test]
    fn test_timeout_display_names_request() {
        let err = SprutError::timeout(Duration::from_millis(250), "42");
        assert_eq!(err.to_string(), "Request 42 timed out after 250ms");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(SprutError::connection_lost("closed").is_retryable());
        assert!(SprutError::not_connected("closed").is_retryable());
        assert!(SprutError::timeout(Duration::from_secs(1), "1").is_retryable());
        assert!(!SprutError::command_not_allowed("delete").is_retryable());
        assert!(!SprutError::authentication_failed("nope").is_retryable());
        assert!(!SprutError::protocol("shape").is_retryable());
    }

    #[test]
    fn test_serde_error_converts() {
        let err: SprutError = serde_json::from_str::<serde_json::Value>("{")
            .map_err(SprutError::from)
            .unwrap_err();
        assert!(matches!(err, SprutError::Serialization { .. }));
    }
}
