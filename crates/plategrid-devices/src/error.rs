//! Device and node error types.

use thiserror::Error;

/// Result type alias for device and robot calls.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Result type alias for node client calls.
pub type NodeResult<T> = Result<T, NodeError>;

/// Errors raised by device and robot drivers.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device {device}: {message}")]
    Driver { device: String, message: String },

    #[error("robot {robot}: {message}")]
    Robot { robot: String, message: String },

    #[error("device {device} has no plate task for {plate}")]
    NoPlateTask { device: String, plate: String },

    #[error("node call failed: {0}")]
    Node(#[from] NodeError),
}

/// Errors raised while talking to a remote node.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid node url: {0}")]
    InvalidUrl(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("{method} {url} failed: {status} {body}")]
    Http {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("request failed: {0}")]
    Request(String),
}
