//! Control-plane error definitions.

use thiserror::Error;

/// Coarse classification used by callers to decide what to do with a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network failure, timeout or cancellation. Always retryable.
    Transport,
    /// Non-success status or unusable response body.
    Protocol,
    /// Bad input on our side, e.g. an empty transaction id.
    Validation,
}

/// Errors that can occur while talking to the control plane.
#[derive(Debug, Error)]
pub enum DataPlaneError {
    /// Request could not be sent or the response could not be read.
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// The pass was cancelled while the request was in flight.
    #[error("request cancelled")]
    Cancelled,

    /// Control plane answered with a non-success status.
    #[error("status {status}: {body}")]
    Status { status: u16, body: String },

    /// Response was successful but could not be used.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid request: {0}")]
    Validation(String),
}

impl DataPlaneError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DataPlaneError::Transport(_) | DataPlaneError::Cancelled => ErrorKind::Transport,
            DataPlaneError::Status { .. } | DataPlaneError::Protocol(_) => ErrorKind::Protocol,
            DataPlaneError::Validation(_) => ErrorKind::Validation,
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            DataPlaneError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// Result type for control-plane operations.
pub type DataPlaneResult<T> = Result<T, DataPlaneError>;
