//! Server-arbitrated named locks over the control channel.
//!
//! The control channel is unordered and shared with version events, so an
//! acquire waits for the first event in the `mutex.` namespace and skips
//! everything else. The server decides; this side only asks.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

use crate::protocol::{ControlEvent, ControlMessage, MutexOutcome, ProtocolError};
use crate::transport::ControlChannel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutexConfig {
    /// How long `acquire` waits for the server's answer. `None` waits
    /// forever.
    pub acquire_deadline: Option<Duration>,
}

impl Default for MutexConfig {
    fn default() -> Self {
        Self {
            acquire_deadline: Some(Duration::from_secs(30)),
        }
    }
}

/// Named lock primitive bound to one control channel.
#[derive(Clone)]
pub struct DistributedMutex {
    control: Arc<dyn ControlChannel>,
    config: MutexConfig,
}

impl DistributedMutex {
    pub fn new(control: Arc<dyn ControlChannel>, config: MutexConfig) -> Self {
        Self { control, config }
    }

    /// Ask the server for `key`.
    ///
    /// `timeout` is forwarded to the server as a lease hint in milliseconds.
    /// Returns `Ok(true)` on `mutex.granted`, `Ok(false)` on any other
    /// `mutex.*` answer, and `Err(ProtocolError::Timeout)` when no answer
    /// arrives before the configured deadline.
    pub async fn acquire(&self, key: &str, timeout: Duration) -> Result<bool, ProtocolError> {
        // subscribe before sending so the answer cannot slip past
        let mut events = self.control.subscribe();
        let request = ControlMessage::MutexRequest {
            key: key.to_string(),
            timeout: timeout.as_millis() as u64,
        };
        self.control.send_stateless(request.encode()?)?;

        let answer = async {
            loop {
                match events.recv().await {
                    Ok(payload) => match ControlEvent::parse(&payload) {
                        Ok(ControlEvent::Mutex(MutexOutcome::Granted)) => return Ok(true),
                        Ok(ControlEvent::Mutex(MutexOutcome::Other(kind))) => {
                            log::debug!("Mutex {key} not granted: {kind}");
                            return Ok(false);
                        }
                        Ok(_) => continue,
                        Err(e) => log::trace!("Skipping control payload: {e}"),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Mutex waiter lagged, {skipped} control events skipped");
                    }
                    Err(RecvError::Closed) => return Err(ProtocolError::ConnectionClosed),
                }
            }
        };

        match self.config.acquire_deadline {
            Some(deadline) => tokio::time::timeout(deadline, answer)
                .await
                .map_err(|_| ProtocolError::Timeout)?,
            None => answer.await,
        }
    }

    /// Tell the server `key` is no longer held.
    pub fn release(&self, key: &str) -> Result<(), ProtocolError> {
        let release = ControlMessage::MutexRelease {
            key: key.to_string(),
        };
        self.control.send_stateless(release.encode()?)
    }
}
