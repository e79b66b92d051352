//! Protocol error types.

use thiserror::Error;

/// Errors raised while parsing or interpreting wire data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("invalid UTF-8 in frame")]
    InvalidUtf8,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
