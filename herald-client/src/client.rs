//! High-level client API.

use crate::engine::{Credentials, Notice};
use crate::error::ClientError;
use crate::session::{Session, SessionConfig};
use herald_protocol::{Event, EventFile};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;

/// High-level client for a herald broker.
///
/// Wraps a [`Session`]; spawn [`Session::read_loop`] via
/// [`session`](Client::session) for the lifetime of the login.
pub struct Client {
    session: Arc<Session>,
    /// Logged-in username, used to stamp published events.
    login: Mutex<Option<String>>,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            session: Arc::new(Session::new(config)),
            login: Mutex::new(None),
        }
    }

    /// Returns the underlying session (for the background read loop).
    pub fn session(&self) -> Arc<Session> {
        self.session.clone()
    }

    /// Subscribes to session notices.
    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.session.subscribe_notices()
    }

    /// Connects to the broker and sends the CONNECT frame.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), ClientError> {
        let credentials = Credentials {
            login: username.to_string(),
            passcode: password.to_string(),
        };
        self.session.connect(&credentials).await?;
        *self.login.lock() = Some(username.to_string());
        Ok(())
    }

    /// Subscribes to a channel.
    pub async fn join(&self, channel: &str) -> Result<(), ClientError> {
        self.session.subscribe(channel).await
    }

    /// Unsubscribes from a channel.
    pub async fn leave(&self, channel: &str) -> Result<(), ClientError> {
        self.session.unsubscribe(channel).await
    }

    /// Publishes one event, stamped with the logged-in user.
    pub async fn publish(&self, channel: &str, event: Event) -> Result<(), ClientError> {
        let owner = self.login.lock().clone().ok_or(ClientError::NotConnected)?;
        self.session
            .publish(channel, &event.with_owner(owner))
            .await
    }

    /// Publishes every event in `file`, each stamped with the logged-in
    /// user. Returns the number of events sent.
    pub async fn report(&self, file: &EventFile) -> Result<usize, ClientError> {
        let mut published = 0;
        for event in &file.events {
            self.publish(&file.channel_name, event.clone()).await?;
            published += 1;
        }
        Ok(published)
    }

    /// Writes the summary report for `user`'s events on `channel`.
    pub fn summary(
        &self,
        channel: &str,
        user: &str,
        path: impl AsRef<Path>,
    ) -> Result<(), ClientError> {
        self.session.summarize(channel, user, path)
    }

    /// Sends DISCONNECT, waits for the logout receipt, and releases the
    /// transport.
    pub async fn logout(&self) -> Result<(), ClientError> {
        self.session.disconnect().await?;
        self.session.wait_stopped().await;
        self.session.close().await?;
        *self.login.lock() = None;
        Ok(())
    }

    /// Whether the session is fully established.
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Whether the session ended (or is ending) due to an error.
    pub fn error_occurred(&self) -> bool {
        self.session.error_occurred()
    }
}
