use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the session engine to a caller.
///
/// Anything other than [`DapError::ConfigInvalid`] terminates the session:
/// the engine closes the transport and the error is published to the
/// current and every future call on the facade. Stores the underlying I/O
/// failure as its rendered message rather than the `io::Error` itself so the
/// whole enum can be `Clone` -- a terminal outcome is read once by the
/// thread that caused it and again by every later caller on the facade.
#[derive(Debug, Clone, Error)]
pub enum DapError {
    #[error("failed to connect to debug adapter: {0}")]
    ConnectFailed(String),

    #[error("adapter rejected {command}: {message}")]
    HandshakeFailed { command: String, message: String },

    #[error("handshake did not complete within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("transport closed")]
    TransportClosed,

    #[error("invalid launch configuration: {0}")]
    ConfigInvalid(String),
}

impl From<serde_json::Error> for DapError {
    fn from(e: serde_json::Error) -> Self {
        DapError::ProtocolError(format!("malformed JSON: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, DapError>;
