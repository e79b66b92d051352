//! Text frame format.
//!
//! A frame on the wire is UTF-8 text followed by a NUL terminator:
//!
//! ```text
//! COMMAND\n
//! key:value\n
//! ...
//! \n
//! [body]\0
//! ```
//!
//! The command line comes first, then zero or more `key:value` header
//! lines, a blank separator line, the optional body, and a single 0x00
//! byte marking end-of-frame.

use crate::error::ProtocolError;
use bytes::{BufMut, BytesMut};
use std::fmt;
use std::str::FromStr;

/// Byte value terminating every frame on the wire.
pub const FRAME_TERMINATOR: u8 = 0;

/// Commands understood by the dispatcher.
///
/// The codec itself accepts any command keyword; frames carrying a keyword
/// outside this set are rejected later with
/// [`ProtocolError::UnknownCommand`], keeping wire parsing decoupled from
/// protocol semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Connected,
    Subscribe,
    Unsubscribe,
    Send,
    Message,
    Receipt,
    Error,
    Disconnect,
}

impl Command {
    /// Returns the wire keyword for this command.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Send => "SEND",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
            Command::Disconnect => "DISCONNECT",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONNECT" => Ok(Command::Connect),
            "CONNECTED" => Ok(Command::Connected),
            "SUBSCRIBE" => Ok(Command::Subscribe),
            "UNSUBSCRIBE" => Ok(Command::Unsubscribe),
            "SEND" => Ok(Command::Send),
            "MESSAGE" => Ok(Command::Message),
            "RECEIPT" => Ok(Command::Receipt),
            "ERROR" => Ok(Command::Error),
            "DISCONNECT" => Ok(Command::Disconnect),
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }
}

/// A single protocol frame.
///
/// Headers keep insertion order so encoding is deterministic within a
/// process run; lookups return the last occurrence of a key, matching the
/// wire rule that a repeated header key is won by its final appearance.
/// An empty `body` means the frame has no body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command keyword (first line of the frame).
    pub command: String,
    /// Ordered `key:value` header pairs.
    pub headers: Vec<(String, String)>,
    /// Body text; round-trips exactly, embedded newlines included.
    pub body: String,
}

impl Frame {
    /// Creates a frame for a known command with no headers or body.
    pub fn new(command: Command) -> Self {
        Self {
            command: command.as_str().to_string(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Adds a header, replacing an existing one with the same key.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(key.into(), value.into());
        self
    }

    /// Sets the frame body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets a header in place, replacing an existing key.
    pub fn set_header(&mut self, key: String, value: String) {
        if let Some(slot) = self.headers.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.headers.push((key, value));
        }
    }

    /// Returns the value for `key`; the last occurrence wins.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Parses the command keyword, rejecting unknown commands.
    pub fn parse_command(&self) -> Result<Command, ProtocolError> {
        self.command.parse()
    }

    /// Encodes the frame into wire bytes, terminator included.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(
            self.command.len() + self.body.len() + 16 * (self.headers.len() + 1),
        );
        buf.put_slice(self.command.as_bytes());
        buf.put_u8(b'\n');
        for (key, value) in &self.headers {
            buf.put_slice(key.as_bytes());
            buf.put_u8(b':');
            buf.put_slice(value.as_bytes());
            buf.put_u8(b'\n');
        }
        buf.put_u8(b'\n');
        if !self.body.is_empty() {
            buf.put_slice(self.body.as_bytes());
        }
        buf.put_u8(FRAME_TERMINATOR);
        buf
    }

    /// Parses one frame from its wire text (terminator already stripped).
    ///
    /// Header lines split on the first `:`; a pre-separator line without a
    /// colon is skipped rather than rejected. Only an empty command line is
    /// malformed.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let (head, body) = match text.split_once("\n\n") {
            Some((head, body)) => (head, body),
            None => (text, ""),
        };

        let mut lines = head.split('\n');
        let command = lines.next().unwrap_or("");
        if command.is_empty() {
            return Err(ProtocolError::MalformedFrame(
                "empty command line".to_string(),
            ));
        }

        let mut headers = Vec::new();
        for line in lines {
            if let Some((key, value)) = line.split_once(':') {
                headers.push((key.to_string(), value.to_string()));
            }
        }

        Ok(Self {
            command: command.to_string(),
            headers,
            body: body.to_string(),
        })
    }
}
