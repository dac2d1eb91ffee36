use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Typed error hierarchy for the protocol client.
/// Transport and protocol errors are recovered locally; synthesis, fallback
/// and timeout errors terminate the active session.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ClientError {
    // Transport layer: connection failed to open or closed unexpectedly
    #[error("transport error: {0}")]
    Transport(String),

    // Malformed or unrecognized frame, logged and dropped, never fatal
    #[error("protocol error: {0}")]
    Protocol(String),

    // Server explicitly reported job failure
    #[error("synthesis failed: {0}")]
    Synthesis(String),

    // The one-shot fallback exchange failed
    #[error("fallback request failed: {0}")]
    Fallback(String),

    // Local preconditions: rejected without mutating session state
    #[error("a synthesis session is already in flight")]
    SessionBusy,
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // Watchdog expiry on a session with no frame activity
    #[error("no progress within {0:?}")]
    Timeout(Duration),
}

impl ClientError {
    /// Errors that move the active session to `Failed`.
    pub fn fails_session(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Synthesis(_) | Self::Fallback(_) | Self::Timeout(_)
        )
    }

    /// Precondition violations: `start()` rejections that leave existing
    /// session state untouched.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::SessionBusy | Self::InvalidRequest(_))
    }

    /// Short classification string for logging and `ErrorRecord`s.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Protocol(_) => "protocol",
            Self::Synthesis(_) => "synthesis",
            Self::Fallback(_) => "fallback",
            Self::SessionBusy => "session_busy",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Classify a non-success HTTP status from the fallback endpoint.
    pub fn from_status(status: u16, body: String) -> Self {
        let detail = if body.is_empty() {
            String::new()
        } else {
            format!(": {body}")
        };
        match status {
            401 | 403 => Self::Fallback(format!("authentication rejected{detail}")),
            429 => Self::Fallback(format!("rate limited{detail}")),
            500..=599 => Self::Fallback(format!("server error {status}{detail}")),
            _ => Self::Fallback(format!("unexpected status {status}{detail}")),
        }
    }
}

/// Lightweight kind + message record surfaced to session observers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: String,
    pub message: String,
}

impl ErrorRecord {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl From<&ClientError> for ErrorRecord {
    fn from(e: &ClientError) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: match e {
                // Keep the server-supplied message verbatim for terminal errors
                ClientError::Synthesis(msg) | ClientError::Fallback(msg) => msg.clone(),
                other => other.to_string(),
            },
        }
    }
}
