use thiserror::Error;

/// Problems with the session identifier presented at upgrade time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("no session cookie on the upgrade request")]
    Missing,
    #[error("malformed session identifier")]
    Malformed,
}

/// A single connection refused an outbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("connection is closed")]
    Closed,
    #[error("outbound queue is full")]
    Saturated,
}

/// An inbound frame that could not be turned into a command.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown message type {0}")]
    UnknownType(i64),
}
