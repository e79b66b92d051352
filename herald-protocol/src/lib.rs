//! # herald-protocol
//!
//! Wire protocol implementation for herald, a text pub/sub protocol in the
//! STOMP family.
//!
//! This crate provides:
//! - Null-terminated text framing (command, headers, optional body)
//! - A buffered frame decoder for byte-stream transports
//! - The event record exchanged as SEND/MESSAGE bodies
//! - Protocol error types

pub mod codec;
pub mod error;
pub mod event;
pub mod frame;

pub use codec::{Decoder, Encoder};
pub use error::ProtocolError;
pub use event::{Event, EventFile};
pub use frame::{Command, Frame, FRAME_TERMINATOR};

/// Protocol version advertised in the CONNECT `accept-version` header.
pub const ACCEPT_VERSION: &str = "1.2";

/// Default port for herald brokers.
pub const DEFAULT_PORT: u16 = 61613;
