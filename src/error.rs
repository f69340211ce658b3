use std::time::Duration;

use crate::packet::ErrorPayload;

/// Errors surfaced by the broker, transit layer, registry and node catalog.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("service `{0}` is not available")]
    ServiceNotAvailable(String),

    #[error("validation failed for `{action}`: {message}")]
    Validation { action: String, message: String },

    #[error("remote call to `{action}` on node `{node_id}` failed: {message}")]
    RemoteCallError {
        action: String,
        node_id: String,
        message: String,
        error_name: String,
        stack: Option<String>,
    },

    #[error("request `{request_id}` timed out after {timeout:?}")]
    RequestTimeout {
        request_id: String,
        timeout: Duration,
    },

    #[error("node `{0}` disconnected while a request was pending")]
    NodeDisconnected(String),

    #[error("transport error: {0}")]
    TransportError(#[from] TransportError),

    #[error("handler for `{action}` raised: {message}")]
    HandlerError {
        action: String,
        message: String,
        stack: Option<String>,
    },

    #[error("broker was shut down")]
    Shutdown,
}

impl BrokerError {
    /// Builds a [`BrokerError::RemoteCallError`] from a RESPONSE payload's error object.
    pub(crate) fn from_response_error(action: &str, node_id: &str, error: ErrorPayload) -> Self {
        BrokerError::RemoteCallError {
            action: action.to_string(),
            node_id: node_id.to_string(),
            message: error.message,
            error_name: error.name,
            stack: error.stack,
        }
    }
}

/// Errors raised by a [`crate::transport::Transport`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to transporter: {0}")]
    Connect(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("failed to encode packet: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("transport is disconnected")]
    Disconnected,
}
