//! # herald-client
//!
//! Client library for herald.
//!
//! This crate provides:
//! - The protocol engine: connection state machine, subscription and
//!   receipt correlation, event store
//! - An async TCP session with a background frame-reading loop
//! - Per-channel summary report generation
//! - A high-level `Client` API for console front ends

pub mod client;
pub mod engine;
pub mod error;
pub mod report;
pub mod session;

pub use client::Client;
pub use engine::{Credentials, Notice, PendingReceipt, SessionState};
pub use error::ClientError;
pub use session::{Session, SessionConfig};
