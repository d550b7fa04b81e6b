//! Same-origin replication without a server.
//!
//! A [`CrossTabProvider`] connects one `yrs::Doc` to every other provider
//! that opened the same name on the same [`RoomManager`], and optionally
//! keeps a snapshot of the document in a [`SnapshotCache`].
//!
//! ```text
//!   local edit ──► observe_update_v1 ──┬──► BroadcastGroup "doc-sync-<name>"
//!                                      └──► debounce ──► cache.save_snapshot
//!
//!   peer envelope ──► apply (FromPeer)      cache load ──► apply (FromCache)
//! ```
//!
//! Only `Local` updates go back out or restart the debounce.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;
use yrs::updates::decoder::Decode;
use yrs::{Doc, ReadTxn, StateVector, Subscription, Transact, Update};

use colloquy_core::{DocumentError, UpdateOrigin};

use crate::broadcast::{BroadcastGroup, RoomManager};
use crate::protocol::{BroadcastEnvelope, BroadcastMessage, ProtocolError};
use crate::storage::{SnapshotCache, SnapshotMetadata, StoreError};

/// Provider configuration.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Document name; selects the broadcast group and the cache entry
    pub name: String,
    /// Keep a snapshot in the cache (needs a cache to take effect)
    pub enable_persistence: bool,
    /// Quiet period after the last local edit before the snapshot is written
    pub debounce: Duration,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enable_persistence: true,
            debounce: Duration::from_millis(500),
        }
    }

    /// Short debounce for tests.
    pub fn for_testing(name: impl Into<String>) -> Self {
        Self {
            debounce: Duration::from_millis(50),
            ..Self::new(name)
        }
    }

    pub fn group_name(&self) -> String {
        format!("doc-sync-{}", self.name)
    }
}

/// Writes full-state snapshots of one document.
#[derive(Clone)]
struct Persister {
    doc: Doc,
    name: String,
    cache: Arc<dyn SnapshotCache>,
    last_saved: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl Persister {
    fn save(&self) -> Result<SnapshotMetadata, StoreError> {
        let state = self
            .doc
            .transact()
            .encode_state_as_update_v1(&StateVector::default());
        let meta = self.cache.save_snapshot(&self.name, &state)?;
        *self.last_saved.lock().unwrap_or_else(|e| e.into_inner()) = meta.saved_at();
        log::debug!(
            "Saved snapshot {} rev {} ({} bytes)",
            self.name,
            meta.revision,
            meta.snapshot_size
        );
        Ok(meta)
    }

    fn save_logged(&self) {
        if let Err(e) = self.save() {
            log::error!("Failed to save snapshot {}: {e}", self.name);
        }
    }

    /// Apply a full-state snapshot tagged `FromCache`.
    fn apply_snapshot(&self, bytes: &[u8]) -> Result<(), DocumentError> {
        let update = Update::decode_v1(bytes)?;
        self.doc
            .transact_mut_with(UpdateOrigin::FromCache)
            .apply_update(update)
            .map_err(|e| DocumentError::UpdateRejected(e.to_string()))
    }

    /// Load the cached snapshot into the document. A missing snapshot is
    /// not an error.
    fn restore(&self) {
        let bytes = match self.cache.load_snapshot(&self.name) {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound(_)) => return,
            Err(e) => {
                log::error!("Failed to load snapshot {}: {e}", self.name);
                return;
            }
        };
        match self.apply_snapshot(&bytes) {
            Ok(()) => {
                let saved_at = self
                    .cache
                    .load_metadata(&self.name)
                    .ok()
                    .and_then(|meta| meta.saved_at());
                *self.last_saved.lock().unwrap_or_else(|e| e.into_inner()) = saved_at;
                log::info!("Restored {} from cache ({} bytes)", self.name, bytes.len());
            }
            Err(e) => log::error!("Discarding unreadable snapshot {}: {e}", self.name),
        }
    }
}

/// Restart a quiet-period timer on every signal; save once it elapses.
async fn run_debounce(persister: Persister, delay: Duration, mut signals: mpsc::UnboundedReceiver<()>) {
    while signals.recv().await.is_some() {
        loop {
            tokio::select! {
                signal = signals.recv() => {
                    if signal.is_none() {
                        return;
                    }
                }
                _ = tokio::time::sleep(delay) => {
                    persister.save_logged();
                    break;
                }
            }
        }
    }
}

async fn run_peer(
    doc: Doc,
    peer_id: Uuid,
    group: String,
    mut messages: broadcast::Receiver<Arc<Vec<u8>>>,
) {
    loop {
        let bytes = match messages.recv().await {
            Ok(bytes) => bytes,
            Err(RecvError::Lagged(skipped)) => {
                log::warn!("Peer {peer_id} lagged on {group}, {skipped} updates skipped");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        match apply_envelope(&doc, peer_id, &bytes) {
            Ok(true) => log::trace!("Applied peer update on {group}"),
            Ok(false) => {}
            Err(e) => log::warn!("Dropping malformed message on {group}: {e}"),
        }
    }
}

/// Returns whether an update was applied.
fn apply_envelope(doc: &Doc, peer_id: Uuid, bytes: &[u8]) -> Result<bool, ProtocolError> {
    let envelope = BroadcastEnvelope::decode(bytes)?;
    if envelope.sender == peer_id {
        return Ok(false);
    }
    match envelope.message {
        BroadcastMessage::Update { update } => {
            let update = Update::decode_v1(&update)
                .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
            doc.transact_mut_with(UpdateOrigin::FromPeer)
                .apply_update(update)
                .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
            Ok(true)
        }
    }
}

/// Replicates a document across providers of the same name.
pub struct CrossTabProvider {
    config: ProviderConfig,
    peer_id: Uuid,
    rooms: RoomManager,
    group: Arc<BroadcastGroup>,
    persister: Option<Persister>,
    last_saved: Arc<Mutex<Option<DateTime<Utc>>>>,
    update_sub: Option<Subscription>,
    peer_task: Option<JoinHandle<()>>,
    debounce_task: Option<JoinHandle<()>>,
}

impl CrossTabProvider {
    /// Join the group for `config.name`, restore the cached snapshot and
    /// start replicating. Must be called inside a tokio runtime.
    pub async fn open(
        config: ProviderConfig,
        doc: &Doc,
        rooms: &RoomManager,
        cache: Option<Arc<dyn SnapshotCache>>,
    ) -> Result<Self, DocumentError> {
        let peer_id = Uuid::new_v4();
        let group_name = config.group_name();
        let group = rooms.get_or_create(&group_name).await;
        let messages = group.join(peer_id).await;

        let last_saved = Arc::new(Mutex::new(None));
        let persister = match cache {
            Some(cache) if config.enable_persistence => Some(Persister {
                doc: doc.clone(),
                name: config.name.clone(),
                cache,
                last_saved: last_saved.clone(),
            }),
            _ => None,
        };

        let (signal_tx, debounce_task) = match &persister {
            Some(persister) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let task = tokio::spawn(run_debounce(persister.clone(), config.debounce, rx));
                (Some(tx), Some(task))
            }
            None => (None, None),
        };

        let update_sub = {
            let group = group.clone();
            doc.observe_update_v1(move |txn, event| {
                let origin = UpdateOrigin::of(txn.origin());
                if origin.should_broadcast() {
                    let envelope = BroadcastEnvelope::update(peer_id, event.update.clone());
                    if let Err(e) = group.broadcast(&envelope) {
                        log::error!("Failed to broadcast update on {}: {e}", group.name());
                    }
                }
                if origin.should_persist() {
                    if let Some(tx) = &signal_tx {
                        let _ = tx.send(());
                    }
                }
            })
            .map_err(|e| DocumentError::ObserverUnavailable(e.to_string()))?
        };

        if let Some(persister) = &persister {
            persister.restore();
        }

        let peer_task = tokio::spawn(run_peer(doc.clone(), peer_id, group_name, messages));

        log::info!("Provider {} opened as peer {peer_id}", config.name);
        Ok(Self {
            config,
            peer_id,
            rooms: rooms.clone(),
            group,
            persister,
            last_saved,
            update_sub: Some(update_sub),
            peer_task: Some(peer_task),
            debounce_task,
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn peer_id(&self) -> Uuid {
        self.peer_id
    }

    pub fn group(&self) -> &Arc<BroadcastGroup> {
        &self.group
    }

    /// When the snapshot was last written, or loaded at open.
    pub fn last_saved(&self) -> Option<DateTime<Utc>> {
        *self.last_saved.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Write the snapshot now.
    pub fn save(&self) -> Result<SnapshotMetadata, StoreError> {
        match &self.persister {
            Some(persister) => persister.save(),
            None => Err(StoreError::NotFound(format!(
                "persistence disabled for {}",
                self.config.name
            ))),
        }
    }

    /// Stop replicating: cancel the pending debounce, write a final
    /// snapshot, unsubscribe, leave the group and close it once empty.
    pub async fn destroy(mut self) {
        if let Some(task) = self.debounce_task.take() {
            task.abort();
            // the task holds a cache handle until it is dropped
            let _ = task.await;
        }
        if let Some(persister) = &self.persister {
            persister.save_logged();
        }
        self.update_sub.take();
        if let Some(task) = self.peer_task.take() {
            task.abort();
            let _ = task.await;
        }
        self.persister.take();
        self.group.leave(&self.peer_id).await;
        if self.rooms.remove_if_empty(self.group.name()).await {
            log::debug!("Closed group {}", self.group.name());
        }
        log::info!("Provider {} closed", self.config.name);
    }
}

impl Drop for CrossTabProvider {
    fn drop(&mut self) {
        if let Some(task) = self.debounce_task.take() {
            task.abort();
        }
        if let Some(task) = self.peer_task.take() {
            task.abort();
        }
    }
}
