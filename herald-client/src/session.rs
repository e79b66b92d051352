//! Async session: transport, locking, and the background read loop.
//!
//! Two tasks share a [`Session`] for its lifetime: the caller issuing
//! outbound operations, and [`read_loop`](Session::read_loop) feeding
//! inbound frames to the dispatcher. The engine sits behind one mutex;
//! the stop signal is a watch channel the read loop checks once per
//! iteration, so a frame already in flight when the signal fires is still
//! processed.

use crate::engine::{Credentials, Engine, Notice, SessionState};
use crate::error::ClientError;
use crate::report;
use herald_protocol::{Decoder, Encoder, Event, Frame};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex};

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Capacity of the notice broadcast channel.
const NOTICE_CHANNEL_CAPACITY: usize = 64;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Broker address.
    pub addr: SocketAddr,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Value of the CONNECT `host` header.
    pub virtual_host: String,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
}

impl SessionConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(10),
            virtual_host: "herald".to_string(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_virtual_host(mut self, host: impl Into<String>) -> Self {
        self.virtual_host = host.into();
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }
}

/// One authenticated connection to a broker, CONNECT to Closed.
pub struct Session {
    config: SessionConfig,
    /// The protocol engine; one lock guards state, tables, and store.
    engine: Mutex<Engine>,
    /// Write half of the stream (for sending frames).
    writer: AsyncMutex<Option<OwnedWriteHalf>>,
    /// Read half of the stream (owned by the read loop).
    reader: AsyncMutex<Option<OwnedReadHalf>>,
    /// Lock-free mirror of the engine's error flag.
    error_occurred: AtomicBool,
    /// Stop signal: set on ERROR, logout RECEIPT, or transport closure.
    stop_tx: watch::Sender<bool>,
    /// Broadcast channel surfacing dispatcher notices.
    notices: broadcast::Sender<Notice>,
}

impl Session {
    /// Creates a new session (not yet connected).
    pub fn new(config: SessionConfig) -> Self {
        let (stop_tx, _) = watch::channel(false);
        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);
        Self {
            config,
            engine: Mutex::new(Engine::new()),
            writer: AsyncMutex::new(None),
            reader: AsyncMutex::new(None),
            error_occurred: AtomicBool::new(false),
            stop_tx,
            notices,
        }
    }

    /// Subscribes to session notices (connection events, receipts, errors).
    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    // =========================================================================
    // Outbound operations
    // =========================================================================

    /// Opens the transport and sends the CONNECT frame.
    ///
    /// The session is established once the broker's CONNECTED frame is
    /// dispatched by the read loop; a [`Notice::Connected`] is broadcast at
    /// that point.
    pub async fn connect(&self, credentials: &Credentials) -> Result<(), ClientError> {
        if self.engine.lock().state() != SessionState::Disconnected {
            return Err(ClientError::AlreadyConnected);
        }

        tracing::debug!("connecting to {}", self.config.addr);
        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(self.config.addr),
        )
        .await
        .map_err(|_| ClientError::Timeout)?
        .map_err(ClientError::Io)?;
        stream.set_nodelay(true).ok();

        let (read_half, write_half) = stream.into_split();
        *self.reader.lock().await = Some(read_half);
        *self.writer.lock().await = Some(write_half);

        let frame = self
            .engine
            .lock()
            .connect(credentials, &self.config.virtual_host)?;
        self.send_frame(&frame).await
    }

    /// Subscribes to a channel.
    pub async fn subscribe(&self, channel: &str) -> Result<(), ClientError> {
        let frame = self.engine.lock().subscribe(channel)?;
        self.send_frame(&frame).await
    }

    /// Unsubscribes from a channel.
    pub async fn unsubscribe(&self, channel: &str) -> Result<(), ClientError> {
        let frame = self.engine.lock().unsubscribe(channel)?;
        self.send_frame(&frame).await
    }

    /// Publishes an event to a channel.
    pub async fn publish(&self, channel: &str, event: &Event) -> Result<(), ClientError> {
        let frame = self.engine.lock().publish(channel, event)?;
        self.send_frame(&frame).await
    }

    /// Sends DISCONNECT. Termination completes when the matching RECEIPT
    /// arrives; await [`wait_stopped`](Session::wait_stopped) before
    /// calling [`close`](Session::close).
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let frame = self.engine.lock().disconnect()?;
        self.send_frame(&frame).await
    }

    async fn send_frame(&self, frame: &Frame) -> Result<(), ClientError> {
        let encoded = Encoder::encode(frame);
        tracing::debug!(command = %frame.command, bytes = encoded.len(), "frame sent");
        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(ClientError::NotConnected)?;
        writer.write_all(&encoded).await.map_err(ClientError::Io)?;
        Ok(())
    }

    // =========================================================================
    // Reports
    // =========================================================================

    /// Writes the summary report for `user`'s events on `channel` to
    /// `path`, overwriting any existing content. The event store is left
    /// unmodified.
    pub fn summarize(
        &self,
        channel: &str,
        user: &str,
        path: impl AsRef<Path>,
    ) -> Result<(), ClientError> {
        let events = self.engine.lock().events_on(channel);
        let rendered = report::render_summary(channel, user, &events);
        std::fs::write(path, rendered).map_err(ClientError::Io)
    }

    /// Events received on `channel`, in arrival order.
    pub fn events_on(&self, channel: &str) -> Vec<Event> {
        self.engine.lock().events_on(channel)
    }

    // =========================================================================
    // Background read loop
    // =========================================================================

    /// Reads frames and feeds the dispatcher; run this in a background
    /// task for the lifetime of the session.
    ///
    /// Returns `Ok(())` after a clean stop (logout receipt), or an error
    /// when the transport fails or closes unexpectedly.
    pub async fn read_loop(&self) -> Result<(), ClientError> {
        tracing::debug!("read loop started");
        let mut decoder = Decoder::new();
        let mut buf = vec![0u8; self.config.read_buffer_size];
        let stop_rx = self.stop_tx.subscribe();

        loop {
            // Cooperative stop: checked once per iteration, before the
            // next blocking read.
            if *stop_rx.borrow() {
                break;
            }

            let read = {
                let mut reader_guard = self.reader.lock().await;
                let Some(reader) = reader_guard.as_mut() else {
                    break;
                };
                reader.read(&mut buf).await
            };

            let n = match read {
                Ok(n) => n,
                Err(e) => {
                    self.engine.lock().transport_closed();
                    self.error_occurred.store(true, Ordering::SeqCst);
                    self.signal_stop();
                    self.engine.lock().mark_closed();
                    return Err(ClientError::Io(e));
                }
            };

            if n == 0 {
                let unexpected = self.engine.lock().transport_closed();
                self.signal_stop();
                if unexpected {
                    tracing::warn!("connection closed by server");
                    self.error_occurred.store(true, Ordering::SeqCst);
                    self.engine.lock().mark_closed();
                    return Err(ClientError::ConnectionClosed);
                }
                break;
            }

            decoder.extend(&buf[..n]);
            loop {
                match decoder.decode_frame() {
                    Ok(Some(frame)) => self.handle_frame(frame),
                    Ok(None) => break,
                    Err(e) => {
                        // The bad frame is already consumed; keep going.
                        tracing::warn!("dropping malformed frame: {e}");
                    }
                }
            }
        }

        self.engine.lock().mark_closed();
        tracing::debug!("read loop stopped");
        Ok(())
    }

    fn handle_frame(&self, frame: Frame) {
        tracing::debug!(command = %frame.command, "frame received");
        let notice = match self.engine.lock().dispatch(&frame) {
            Ok(notice) => notice,
            Err(e) => {
                tracing::warn!("dropping frame: {e}");
                return;
            }
        };
        let Some(notice) = notice else {
            return;
        };

        match &notice {
            Notice::Connected => tracing::info!("session established"),
            Notice::ReceiptProcessed(label) => tracing::info!("{label}"),
            Notice::LoggedOut => {
                tracing::info!("logout acknowledged");
                self.signal_stop();
            }
            Notice::ServerError { message, detail } => {
                tracing::error!("server error: {message} {detail}");
                self.error_occurred.store(true, Ordering::SeqCst);
                self.signal_stop();
            }
        }

        let _ = self.notices.send(notice);
    }

    fn signal_stop(&self) {
        self.stop_tx.send_replace(true);
    }

    // =========================================================================
    // Shutdown and observers
    // =========================================================================

    /// Resolves once the stop signal is set (logout receipt, server
    /// error, or transport closure).
    pub async fn wait_stopped(&self) {
        let mut rx = self.stop_tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Releases the transport. Call after the read loop has stopped.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.signal_stop();
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        let _ = self.reader.lock().await.take();
        self.engine.lock().mark_closed();
        tracing::debug!("session closed");
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.engine.lock().state()
    }

    /// Whether the session is fully established.
    pub fn is_connected(&self) -> bool {
        self.engine.lock().is_connected()
    }

    /// Whether the session ended (or is ending) due to an error rather
    /// than a clean logout.
    pub fn error_occurred(&self) -> bool {
        self.error_occurred.load(Ordering::SeqCst)
    }

    /// Detail of the fatal server error, if one arrived.
    pub fn error_detail(&self) -> Option<String> {
        self.engine.lock().error_detail().map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_protocol::Command;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    fn credentials() -> Credentials {
        Credentials {
            login: "bob".to_string(),
            passcode: "secret".to_string(),
        }
    }

    fn sample_event(user: &str, name: &str, ts: i64) -> Event {
        Event {
            user: user.to_string(),
            city: "Haifa".to_string(),
            name: name.to_string(),
            date_time: ts,
            general_information: BTreeMap::new(),
            description: "smoke over the harbor".to_string(),
        }
    }

    async fn read_broker_frame(
        stream: &mut TcpStream,
        decoder: &mut Decoder,
    ) -> Option<Frame> {
        let mut buf = [0u8; 1024];
        loop {
            if let Some(frame) = decoder.decode_frame().unwrap() {
                return Some(frame);
            }
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                return None;
            }
            decoder.extend(&buf[..n]);
        }
    }

    /// A broker that acknowledges every receipt and echoes SENDs back as
    /// MESSAGEs.
    async fn echo_broker() -> (SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut decoder = Decoder::new();
            while let Some(frame) = read_broker_frame(&mut stream, &mut decoder).await {
                match frame.command.as_str() {
                    "CONNECT" => {
                        let reply = Frame::new(Command::Connected).with_header("version", "1.2");
                        stream.write_all(&reply.encode()).await.unwrap();
                    }
                    "SUBSCRIBE" | "UNSUBSCRIBE" | "DISCONNECT" => {
                        if let Some(receipt) = frame.header("receipt") {
                            let reply =
                                Frame::new(Command::Receipt).with_header("receipt-id", receipt);
                            stream.write_all(&reply.encode()).await.unwrap();
                        }
                        if frame.command == "DISCONNECT" {
                            break;
                        }
                    }
                    "SEND" => {
                        let destination = frame.header("destination").unwrap().to_string();
                        let reply = Frame::new(Command::Message)
                            .with_header("destination", destination)
                            .with_header("message-id", "0")
                            .with_body(frame.body.clone());
                        stream.write_all(&reply.encode()).await.unwrap();
                    }
                    _ => {}
                }
            }
        });
        (addr, handle)
    }

    async fn wait_for_notice(
        notices: &mut broadcast::Receiver<Notice>,
        want: impl Fn(&Notice) -> bool,
    ) -> Notice {
        loop {
            let notice = notices.recv().await.unwrap();
            if want(&notice) {
                return notice;
            }
        }
    }

    #[test]
    fn test_config_defaults_and_clamping() {
        let addr: SocketAddr = "127.0.0.1:61613".parse().unwrap();
        let config = SessionConfig::new(addr);
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));

        let config = SessionConfig::new(addr).with_read_buffer_size(100);
        assert_eq!(config.read_buffer_size, MIN_READ_BUFFER_SIZE);

        let config = SessionConfig::new(addr).with_read_buffer_size(10 * 1024 * 1024);
        assert_eq!(config.read_buffer_size, MAX_READ_BUFFER_SIZE);
    }

    #[tokio::test]
    async fn test_session_lifecycle_clean_logout() {
        let (addr, broker) = echo_broker().await;
        let session = Arc::new(Session::new(SessionConfig::new(addr)));

        session.connect(&credentials()).await.unwrap();
        let mut notices = session.subscribe_notices();

        let reader = session.clone();
        let read_task = tokio::spawn(async move { reader.read_loop().await });

        wait_for_notice(&mut notices, |n| matches!(n, Notice::Connected)).await;
        assert!(session.is_connected());

        session.subscribe("fire").await.unwrap();
        let notice =
            wait_for_notice(&mut notices, |n| matches!(n, Notice::ReceiptProcessed(_))).await;
        assert_eq!(
            notice,
            Notice::ReceiptProcessed("subscribed to channel 'fire'".to_string())
        );

        // Publish and wait for the echoed MESSAGE to land in the store.
        session
            .publish("fire", &sample_event("bob", "harbor fire", 100))
            .await
            .unwrap();
        for _ in 0..100 {
            if !session.events_on("fire").is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let events = session.events_on("fire");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "harbor fire");

        session.disconnect().await.unwrap();
        session.wait_stopped().await;
        session.close().await.unwrap();

        read_task.await.unwrap().unwrap();
        broker.await.unwrap();

        assert!(!session.error_occurred());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_server_error_stops_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let broker = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut decoder = Decoder::new();
            // CONNECT arrives; answer with a fatal ERROR.
            read_broker_frame(&mut stream, &mut decoder).await.unwrap();
            let reply = Frame::new(Command::Error)
                .with_header("message", "access denied")
                .with_body("wrong passcode");
            stream.write_all(&reply.encode()).await.unwrap();
        });

        let session = Arc::new(Session::new(SessionConfig::new(addr)));
        session.connect(&credentials()).await.unwrap();
        let mut notices = session.subscribe_notices();

        let reader = session.clone();
        let read_task = tokio::spawn(async move { reader.read_loop().await });

        let notice =
            wait_for_notice(&mut notices, |n| matches!(n, Notice::ServerError { .. })).await;
        assert_eq!(
            notice,
            Notice::ServerError {
                message: "access denied".to_string(),
                detail: "wrong passcode".to_string(),
            }
        );

        session.wait_stopped().await;
        assert!(session.error_occurred());
        assert_eq!(
            session.error_detail(),
            Some("access denied: wrong passcode".to_string())
        );

        session.close().await.unwrap();
        read_task.await.unwrap().unwrap();
        broker.await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_loss_sets_error_flag() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let broker = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut decoder = Decoder::new();
            read_broker_frame(&mut stream, &mut decoder).await.unwrap();
            let reply = Frame::new(Command::Connected).with_header("version", "1.2");
            stream.write_all(&reply.encode()).await.unwrap();
            // Drop the connection without a frame.
        });

        let session = Arc::new(Session::new(SessionConfig::new(addr)));
        session.connect(&credentials()).await.unwrap();

        let reader = session.clone();
        let read_task = tokio::spawn(async move { reader.read_loop().await });

        session.wait_stopped().await;
        assert!(session.error_occurred());
        assert!(matches!(
            read_task.await.unwrap(),
            Err(ClientError::ConnectionClosed)
        ));
        broker.await.unwrap();
    }

    #[tokio::test]
    async fn test_outbound_requires_connection() {
        let addr: SocketAddr = "127.0.0.1:61613".parse().unwrap();
        let session = Session::new(SessionConfig::new(addr));

        assert!(matches!(
            session.subscribe("fire").await,
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(
            session.disconnect().await,
            Err(ClientError::NotConnected)
        ));
    }

    #[test]
    fn test_summarize_writes_report_file() {
        let addr: SocketAddr = "127.0.0.1:61613".parse().unwrap();
        let session = Session::new(SessionConfig::new(addr));

        // Feed MESSAGE frames straight to the dispatcher; MESSAGE handling
        // is not gated on connection state.
        for (name, ts) in [("B", 100), ("A", 100)] {
            let frame = Frame::new(Command::Message)
                .with_header("destination", "fire")
                .with_body(sample_event("bob", name, ts).to_body());
            session.handle_frame(frame);
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.txt");
        session.summarize("fire", "bob", &path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("Channel fire\nTotal: 2\n"));
        let a = written.find("event name: A").unwrap();
        let b = written.find("event name: B").unwrap();
        assert!(a < b);

        // Overwrites on a second call, store untouched.
        session.summarize("fire", "nobody", &path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("Total: 0"));
        assert_eq!(session.events_on("fire").len(), 2);
    }

    #[test]
    fn test_summarize_unwritable_destination() {
        let addr: SocketAddr = "127.0.0.1:61613".parse().unwrap();
        let session = Session::new(SessionConfig::new(addr));

        let result = session.summarize("fire", "bob", "/nonexistent-dir/summary.txt");
        assert!(matches!(result, Err(ClientError::Io(_))));
    }
}
