//! Client error types.

use thiserror::Error;

/// Errors surfaced by the client session.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] herald_protocol::ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("not subscribed to channel '{0}'")]
    NotSubscribed(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("connection timeout")]
    Timeout,

    #[error("server error: {message}")]
    Server { message: String, detail: String },
}
