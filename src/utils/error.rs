//! The `error` module defines the error type shared by the hub, its clients
//! and the transport layer.
//!
//! Transport failures are always local to one client; they surface here only
//! so that the affected loop can log them before it terminates.

use thiserror::Error;

pub type Result<T, E = HubError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum HubError {
    /// A value handed to one of the `*_json` helpers could not be encoded.
    #[error("failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("write deadline of {0:?} exceeded")]
    WriteTimeout(std::time::Duration),

    #[error("client {0} has already been started")]
    AlreadyStarted(String),

    #[error("hub event loop is already running")]
    AlreadyRunning,

    /// The consumer loop has stopped; no further register/unregister events
    /// will be applied.
    #[error("hub is closed")]
    HubClosed,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
