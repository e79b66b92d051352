//! Protocol engine: connection state, correlation tables, event store.
//!
//! The engine is a pure state machine. Outbound operations validate their
//! preconditions, mutate the correlation tables, and return the frame to
//! put on the wire; inbound dispatch consumes a decoded frame and reports
//! what happened as a [`Notice`]. All I/O lives in
//! [`Session`](crate::session::Session).

use crate::error::ClientError;
use herald_protocol::{Command, Event, Frame, ProtocolError, ACCEPT_VERSION};
use std::collections::HashMap;
use std::fmt;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Initial state, no transport yet.
    Disconnected,
    /// CONNECT sent, CONNECTED not yet received.
    AwaitingConnected,
    /// Fully established; commands may be sent.
    Connected,
    /// Logout or error in progress; the read loop is winding down.
    Stopping,
    /// Terminal. The session object is no longer usable.
    Closed,
}

/// Login credentials carried in the CONNECT frame.
///
/// Credentials are forwarded to the broker; this client does not validate
/// them.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub login: String,
    pub passcode: String,
}

/// A request awaiting its RECEIPT frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingReceipt {
    Subscribed { channel: String },
    Unsubscribed { channel: String },
    LoggedOut,
}

impl fmt::Display for PendingReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingReceipt::Subscribed { channel } => {
                write!(f, "subscribed to channel '{channel}'")
            }
            PendingReceipt::Unsubscribed { channel } => {
                write!(f, "unsubscribed from channel '{channel}'")
            }
            PendingReceipt::LoggedOut => write!(f, "logged out"),
        }
    }
}

/// Something the dispatcher wants surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// CONNECTED arrived; the session is usable.
    Connected,
    /// A RECEIPT resolved an ordinary pending request.
    ReceiptProcessed(String),
    /// The logout RECEIPT arrived; the session is stopping cleanly.
    LoggedOut,
    /// The server sent a fatal ERROR frame.
    ServerError { message: String, detail: String },
}

/// The protocol engine proper.
#[derive(Debug)]
pub struct Engine {
    state: SessionState,
    error_occurred: bool,
    error_detail: Option<String>,
    subscriptions: HashMap<String, u64>,
    receipts: HashMap<u64, PendingReceipt>,
    next_subscription_id: u64,
    next_receipt_id: u64,
    store: HashMap<String, Vec<Event>>,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Disconnected,
            error_occurred: false,
            error_detail: None,
            subscriptions: HashMap::new(),
            receipts: HashMap::new(),
            next_subscription_id: 0,
            next_receipt_id: 0,
            store: HashMap::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn error_occurred(&self) -> bool {
        self.error_occurred
    }

    /// Detail of the fatal server error, if one arrived.
    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }

    /// Current subscription id for `channel`, if subscribed.
    pub fn subscription_id(&self, channel: &str) -> Option<u64> {
        self.subscriptions.get(channel).copied()
    }

    /// Events received on `channel`, in arrival order. Unknown channels
    /// yield an empty list.
    pub fn events_on(&self, channel: &str) -> Vec<Event> {
        self.store.get(channel).cloned().unwrap_or_default()
    }

    fn alloc_subscription_id(&mut self) -> u64 {
        let id = self.next_subscription_id;
        self.next_subscription_id += 1;
        id
    }

    fn alloc_receipt_id(&mut self) -> u64 {
        let id = self.next_receipt_id;
        self.next_receipt_id += 1;
        id
    }

    fn require_connected(&self) -> Result<(), ClientError> {
        if self.state != SessionState::Connected {
            return Err(ClientError::NotConnected);
        }
        Ok(())
    }

    // =========================================================================
    // Outbound operations
    // =========================================================================

    /// Builds the CONNECT frame. Allowed only from `Disconnected`.
    pub fn connect(&mut self, credentials: &Credentials, host: &str) -> Result<Frame, ClientError> {
        if self.state != SessionState::Disconnected {
            return Err(ClientError::AlreadyConnected);
        }
        let frame = Frame::new(Command::Connect)
            .with_header("accept-version", ACCEPT_VERSION)
            .with_header("host", host)
            .with_header("login", credentials.login.as_str())
            .with_header("passcode", credentials.passcode.as_str());
        self.state = SessionState::AwaitingConnected;
        Ok(frame)
    }

    /// Builds a SUBSCRIBE frame and records the correlation entries.
    ///
    /// Subscribing again to the same channel overwrites the stored id.
    pub fn subscribe(&mut self, channel: &str) -> Result<Frame, ClientError> {
        self.require_connected()?;
        let subscription_id = self.alloc_subscription_id();
        let receipt_id = self.alloc_receipt_id();
        self.subscriptions
            .insert(channel.to_string(), subscription_id);
        self.receipts.insert(
            receipt_id,
            PendingReceipt::Subscribed {
                channel: channel.to_string(),
            },
        );
        Ok(Frame::new(Command::Subscribe)
            .with_header("destination", channel)
            .with_header("id", subscription_id.to_string())
            .with_header("receipt", receipt_id.to_string()))
    }

    /// Builds an UNSUBSCRIBE frame for an active subscription.
    pub fn unsubscribe(&mut self, channel: &str) -> Result<Frame, ClientError> {
        self.require_connected()?;
        let subscription_id = self
            .subscriptions
            .remove(channel)
            .ok_or_else(|| ClientError::NotSubscribed(channel.to_string()))?;
        let receipt_id = self.alloc_receipt_id();
        self.receipts.insert(
            receipt_id,
            PendingReceipt::Unsubscribed {
                channel: channel.to_string(),
            },
        );
        Ok(Frame::new(Command::Unsubscribe)
            .with_header("id", subscription_id.to_string())
            .with_header("receipt", receipt_id.to_string()))
    }

    /// Builds a SEND frame carrying `event`. Publishes request no receipt.
    pub fn publish(&self, channel: &str, event: &Event) -> Result<Frame, ClientError> {
        self.require_connected()?;
        Ok(Frame::new(Command::Send)
            .with_header("destination", channel)
            .with_body(event.to_body()))
    }

    /// Builds the DISCONNECT frame and records the logout receipt.
    ///
    /// Termination completes when the matching RECEIPT arrives; the caller
    /// must wait for the stop signal before releasing the transport.
    pub fn disconnect(&mut self) -> Result<Frame, ClientError> {
        self.require_connected()?;
        let receipt_id = self.alloc_receipt_id();
        self.receipts.insert(receipt_id, PendingReceipt::LoggedOut);
        Ok(Frame::new(Command::Disconnect).with_header("receipt", receipt_id.to_string()))
    }

    // =========================================================================
    // Inbound dispatch
    // =========================================================================

    /// Dispatches one decoded inbound frame.
    ///
    /// Recoverable problems (missing headers, junk commands, unparseable
    /// bodies) come back as errors so the read loop can log and drop the
    /// frame; the session itself keeps running.
    pub fn dispatch(&mut self, frame: &Frame) -> Result<Option<Notice>, ProtocolError> {
        match frame.parse_command()? {
            Command::Connected => Ok(self.on_connected()),
            Command::Message => self.on_message(frame),
            Command::Receipt => self.on_receipt(frame),
            Command::Error => Ok(Some(self.on_error(frame))),
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }

    fn on_connected(&mut self) -> Option<Notice> {
        if self.state == SessionState::AwaitingConnected {
            self.state = SessionState::Connected;
            Some(Notice::Connected)
        } else {
            // A repeated CONNECTED is a no-op.
            None
        }
    }

    fn on_message(&mut self, frame: &Frame) -> Result<Option<Notice>, ProtocolError> {
        let channel = frame
            .header("destination")
            .ok_or(ProtocolError::MissingHeader("destination"))?;
        let event = Event::from_body(&frame.body)?;
        tracing::debug!(channel, event = %event.name, "event received");
        self.store.entry(channel.to_string()).or_default().push(event);
        Ok(None)
    }

    fn on_receipt(&mut self, frame: &Frame) -> Result<Option<Notice>, ProtocolError> {
        let raw = frame
            .header("receipt-id")
            .ok_or(ProtocolError::MissingHeader("receipt-id"))?;
        let receipt_id: u64 = raw.parse().map_err(|_| {
            ProtocolError::MalformedFrame(format!("receipt-id '{raw}' is not an integer"))
        })?;

        match self.receipts.remove(&receipt_id) {
            Some(PendingReceipt::LoggedOut) => {
                self.state = SessionState::Stopping;
                Ok(Some(Notice::LoggedOut))
            }
            Some(pending) => Ok(Some(Notice::ReceiptProcessed(pending.to_string()))),
            None => {
                tracing::warn!(receipt_id, "receipt for unknown request, ignoring");
                Ok(None)
            }
        }
    }

    fn on_error(&mut self, frame: &Frame) -> Notice {
        let message = frame
            .header("message")
            .unwrap_or("server error")
            .to_string();
        if self.state != SessionState::Closed {
            self.state = SessionState::Stopping;
        }
        self.error_occurred = true;
        if self.error_detail.is_none() {
            self.error_detail = Some(if frame.body.is_empty() {
                message.clone()
            } else {
                format!("{message}: {}", frame.body)
            });
        }
        Notice::ServerError {
            message,
            detail: frame.body.clone(),
        }
    }

    // =========================================================================
    // Transport-driven transitions
    // =========================================================================

    /// Records an unexpected transport closure.
    ///
    /// Returns `false` when the session was already stopping, i.e. the
    /// closure is part of a clean logout.
    pub fn transport_closed(&mut self) -> bool {
        match self.state {
            SessionState::Stopping | SessionState::Closed => false,
            _ => {
                self.state = SessionState::Stopping;
                self.error_occurred = true;
                true
            }
        }
    }

    /// Marks the session terminal.
    pub fn mark_closed(&mut self) {
        self.state = SessionState::Closed;
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
