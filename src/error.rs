//! Error types for the streaming voice client
//!
//! Fatal kinds (`DeviceError`, `ConnectionError::ReconnectExhausted`) bubble
//! up to the session controller and terminate the session. Non-fatal kinds
//! (decode failures, dropped outbound chunks) are absorbed at the component
//! boundary and only logged or counted.

use thiserror::Error;

/// Main error type for the client
#[derive(Error, Debug)]
pub enum Error {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Microphone / speaker errors. All fatal to the session; never retried
/// automatically, and surfaced distinctly from connection errors.
#[derive(Error, Debug, Clone)]
pub enum DeviceError {
    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Device access denied: {0}")]
    PermissionDenied(String),

    #[error("Failed to open stream: {0}")]
    Stream(String),

    #[error("Device lost mid-session: {0}")]
    Lost(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Socket lifecycle errors
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    #[error("Connect timed out")]
    Timeout,

    #[error("Connect refused: {0}")]
    Refused(String),

    #[error("Connection closed")]
    Closed,

    #[error("Reconnect attempts exhausted")]
    ReconnectExhausted,

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Wire-format decode/encode errors. Non-fatal: the offending message is
/// dropped and processing continues with the next one.
#[derive(Error, Debug, Clone)]
pub enum CodecError {
    #[error("Invalid WAV header: {0}")]
    InvalidHeader(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Truncated payload: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// Result type alias for the client
pub type Result<T> = std::result::Result<T, Error>;
