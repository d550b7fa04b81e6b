//! Transport seams and the WebSocket adapter.
//!
//! The client never talks to a socket directly. It drives a [`Connection`]
//! (lifecycle and target url) and exchanges stateless JSON text over a
//! [`ControlChannel`]. [`WsTransport`] implements both on top of
//! `tokio-tungstenite`; it carries control text frames only and performs no
//! document sync handshake.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::ProtocolError;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// A reconnectable link to a coordination server.
#[async_trait]
pub trait Connection: Send + Sync {
    fn status(&self) -> ConnectionState;

    /// Current target address.
    fn url(&self) -> String;

    /// Retarget the connection. Takes effect on the next `connect`.
    fn set_url(&self, url: &str);

    /// Whether the connection should be (re)established.
    fn set_should_connect(&self, should_connect: bool);

    async fn connect(&self) -> Result<(), ProtocolError>;

    /// Close the link and stop reconnecting until `set_should_connect(true)`.
    async fn disconnect(&self);
}

/// One-way, unordered JSON text messaging with the coordination server.
pub trait ControlChannel: Send + Sync {
    /// Queue a payload for the server. Fails only when it cannot be queued.
    fn send_stateless(&self, payload: String) -> Result<(), ProtocolError>;

    /// Receive every payload pushed by the server from now on.
    fn subscribe(&self) -> broadcast::Receiver<String>;
}

/// Buffered control events per subscriber before lagging.
const EVENT_CAPACITY: usize = 256;

/// How long a dial (TCP + WebSocket handshake) may take by default.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket transport carrying the control channel as text frames.
pub struct WsTransport {
    url: Mutex<String>,
    should_connect: AtomicBool,
    state: watch::Sender<ConnectionState>,
    outgoing: Mutex<Option<mpsc::UnboundedSender<String>>>,
    events: broadcast::Sender<String>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Bumped on every dial; a reader only reports the close of its own link
    generation: Arc<AtomicU64>,
    connect_timeout: Duration,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            url: Mutex::new(url.into()),
            should_connect: AtomicBool::new(true),
            state: watch::Sender::new(ConnectionState::Disconnected),
            outgoing: Mutex::new(None),
            events,
            tasks: Mutex::new(Vec::new()),
            generation: Arc::new(AtomicU64::new(0)),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn stop_tasks(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in tasks {
            task.abort();
        }
        *self.outgoing.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

#[async_trait]
impl Connection for WsTransport {
    fn status(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn url(&self) -> String {
        self.url.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_url(&self, url: &str) {
        *self.url.lock().unwrap_or_else(|e| e.into_inner()) = url.to_string();
    }

    fn set_should_connect(&self, should_connect: bool) {
        self.should_connect.store(should_connect, Ordering::SeqCst);
    }

    async fn connect(&self) -> Result<(), ProtocolError> {
        if !self.should_connect.load(Ordering::SeqCst) {
            log::debug!("Connect skipped: connection is paused");
            return Ok(());
        }
        self.stop_tasks();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_replace(ConnectionState::Connecting);

        let url = self.url();
        let dial = tokio_tungstenite::connect_async(url.as_str());
        let ws_stream = match tokio::time::timeout(self.connect_timeout, dial).await {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                log::warn!("Failed to connect to {url}: {e}");
                self.state.send_replace(ConnectionState::Disconnected);
                return Err(ProtocolError::ConnectionClosed);
            }
            Err(_) => {
                log::warn!("Connecting to {url} timed out after {:?}", self.connect_timeout);
                self.state.send_replace(ConnectionState::Disconnected);
                return Err(ProtocolError::Timeout);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward queued control payloads to the socket
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let writer = tokio::spawn(async move {
            while let Some(payload) = out_rx.recv().await {
                if ws_writer.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        // Publish the link before the reader can observe its close
        *self.outgoing.lock().unwrap_or_else(|e| e.into_inner()) = Some(out_tx);
        self.state.send_replace(ConnectionState::Connected);

        // Reader task: fan control payloads out to subscribers
        let events = self.events.clone();
        let state = self.state.clone();
        let current = self.generation.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let _ = events.send(text.to_string());
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            if current.load(Ordering::SeqCst) == generation {
                state.send_replace(ConnectionState::Disconnected);
                log::info!("Connection closed");
            }
        });

        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend([writer, reader]);
        log::info!("Connected to {url}");
        Ok(())
    }

    async fn disconnect(&self) {
        self.should_connect.store(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.stop_tasks();
        self.state.send_replace(ConnectionState::Disconnected);
    }
}

impl ControlChannel for WsTransport {
    fn send_stateless(&self, payload: String) -> Result<(), ProtocolError> {
        let outgoing = self.outgoing.lock().unwrap_or_else(|e| e.into_inner());
        match outgoing.as_ref() {
            Some(tx) => tx.send(payload).map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.events.subscribe()
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.stop_tasks();
    }
}

/// Bundle of the two seams a [`crate::DocumentClient`] needs.
#[derive(Clone)]
pub struct Transport {
    pub connection: Arc<dyn Connection>,
    pub control: Arc<dyn ControlChannel>,
}

impl Transport {
    pub fn new(connection: Arc<dyn Connection>, control: Arc<dyn ControlChannel>) -> Self {
        Self {
            connection,
            control,
        }
    }

    /// Use one WebSocket for both seams.
    pub fn websocket(ws: Arc<WsTransport>) -> Self {
        Self {
            connection: ws.clone(),
            control: ws,
        }
    }
}
