//! In-process control channel.
//!
//! [`LocalControlChannel::pair`] wires a client-side [`ControlChannel`] to a
//! [`LocalAuthority`] that plays the coordination server: it reads the
//! requests the client sent and pushes events back. Used to embed the
//! client next to an in-process authority and to exercise the
//! version/mutex flows without a socket.

use tokio::sync::{broadcast, mpsc};

use crate::protocol::{ControlMessage, ProtocolError};
use crate::transport::ControlChannel;

/// Client side of an in-process control channel.
pub struct LocalControlChannel {
    requests: mpsc::UnboundedSender<String>,
    events: broadcast::Sender<String>,
}

/// Server side of an in-process control channel.
pub struct LocalAuthority {
    requests: mpsc::UnboundedReceiver<String>,
    events: broadcast::Sender<String>,
}

impl LocalControlChannel {
    /// Create a connected channel/authority pair.
    pub fn pair(capacity: usize) -> (Self, LocalAuthority) {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(capacity);
        (
            Self {
                requests: requests_tx,
                events: events.clone(),
            },
            LocalAuthority {
                requests: requests_rx,
                events,
            },
        )
    }
}

impl ControlChannel for LocalControlChannel {
    fn send_stateless(&self, payload: String) -> Result<(), ProtocolError> {
        self.requests
            .send(payload)
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.events.subscribe()
    }
}

impl LocalAuthority {
    /// Next raw payload sent by the client, or `None` once the client side
    /// is gone.
    pub async fn next_payload(&mut self) -> Option<String> {
        self.requests.recv().await
    }

    /// Next request sent by the client, parsed.
    pub async fn next_request(&mut self) -> Option<Result<ControlMessage, ProtocolError>> {
        let payload = self.requests.recv().await?;
        Some(
            serde_json::from_str(&payload)
                .map_err(|e| ProtocolError::DeserializationError(e.to_string())),
        )
    }

    /// A request already queued, without waiting.
    pub fn try_next_request(&mut self) -> Option<ControlMessage> {
        let payload = self.requests.try_recv().ok()?;
        serde_json::from_str(&payload).ok()
    }

    /// Push a raw event payload. Returns the number of subscribers reached.
    pub fn emit(&self, payload: impl Into<String>) -> usize {
        self.events.send(payload.into()).unwrap_or(0)
    }

    /// Push a JSON event.
    pub fn emit_json(&self, event: &serde_json::Value) -> usize {
        self.emit(event.to_string())
    }
}
