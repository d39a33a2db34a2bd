//! Error types for the halremote client.

use halremote_proto::CodecError;
use thiserror::Error;

/// Unified error type for client operations
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Pin error: {0}")]
    Pin(#[from] halremote_types::PinError),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Not connected")]
    NotConnected,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a component-level failure.
///
/// Every kind except `PinChange` tears the session down; recovery is the
/// host toggling ready again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionError {
    /// The server rejected the bind; the session cannot progress.
    Bind,
    /// The server rejected a pin change; the session continues.
    PinChange,
    /// Protocol-level error reported on the update channel.
    Command,
    /// Heartbeat lapse on either channel.
    Timeout,
    /// Transport-level error (connect, send, poll).
    Socket,
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionError::Bind => write!(f, "bind rejected"),
            ConnectionError::PinChange => write!(f, "pin change rejected"),
            ConnectionError::Command => write!(f, "command error"),
            ConnectionError::Timeout => write!(f, "connection timed out"),
            ConnectionError::Socket => write!(f, "socket error"),
        }
    }
}
