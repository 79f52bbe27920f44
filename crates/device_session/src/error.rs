use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("device unreachable: {0}")]
    Unreachable(String),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("authentication rejected: {0}")]
    AuthenticationRejected(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("request failed with code {code}: {comment}")]
    RequestFailed { code: i64, comment: String },
    #[error("connection closed")]
    Closed,
    #[error("device binding error: {0}")]
    Binding(String),
    #[error("device is not connected")]
    NotConnected,
}
