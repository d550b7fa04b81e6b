//! Named broadcast groups for peers sharing one process.
//!
//! Uses tokio broadcast channels for O(1) send to all subscribers.
//! Each peer gets an independent receiver that buffers up to `capacity`
//! messages; a receiver that falls further behind lags and skips ahead.
//! The sender receives its own messages too, filtering is the caller's job.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::{BroadcastEnvelope, ProtocolError};

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub active_peers: usize,
}

/// A broadcast group shared by every peer that joined the same name.
pub struct BroadcastGroup {
    name: String,
    sender: broadcast::Sender<Arc<Vec<u8>>>,
    peers: RwLock<HashSet<Uuid>>,
    capacity: usize,
    /// Lock-free on the send path
    messages_sent: AtomicU64,
}

impl BroadcastGroup {
    /// Create a new broadcast group with the given buffer capacity.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            name: name.into(),
            sender,
            peers: RwLock::new(HashSet::new()),
            capacity,
            messages_sent: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Join the group. Returns a receiver for messages sent from now on.
    pub async fn join(&self, peer_id: Uuid) -> broadcast::Receiver<Arc<Vec<u8>>> {
        self.peers.write().await.insert(peer_id);
        log::debug!("Peer {peer_id} joined group {}", self.name);
        self.sender.subscribe()
    }

    /// Leave the group. Returns whether the peer was a member.
    pub async fn leave(&self, peer_id: &Uuid) -> bool {
        let removed = self.peers.write().await.remove(peer_id);
        if removed {
            log::debug!("Peer {peer_id} left group {}", self.name);
        }
        removed
    }

    /// Encode and send an envelope to every subscriber.
    ///
    /// Returns the number of receivers reached.
    pub fn broadcast(&self, envelope: &BroadcastEnvelope) -> Result<usize, ProtocolError> {
        let encoded = envelope.encode()?;
        Ok(self.broadcast_raw(Arc::new(encoded)))
    }

    /// Broadcast pre-encoded bytes directly.
    pub fn broadcast_raw(&self, encoded: Arc<Vec<u8>>) -> usize {
        let count = self.sender.send(encoded).unwrap_or(0);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn has_peer(&self, peer_id: &Uuid) -> bool {
        self.peers.read().await.contains(peer_id)
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            active_peers: self.peers.read().await.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Maps group names to broadcast groups.
///
/// Groups are isolated: a message sent to one name never reaches
/// subscribers of another. Clones share the same set of groups.
#[derive(Clone)]
pub struct RoomManager {
    rooms: Arc<RwLock<HashMap<String, Arc<BroadcastGroup>>>>,
    default_capacity: usize,
}

impl RoomManager {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            default_capacity,
        }
    }

    /// Get or create the group for `name`.
    pub async fn get_or_create(&self, name: &str) -> Arc<BroadcastGroup> {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(name) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        // Double-check after acquiring write lock
        if let Some(room) = rooms.get(name) {
            return room.clone();
        }

        let room = Arc::new(BroadcastGroup::new(name, self.default_capacity));
        rooms.insert(name.to_string(), room.clone());
        room
    }

    /// Drop the group for `name` if nobody is left in it.
    pub async fn remove_if_empty(&self, name: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(name) {
            if room.peer_count().await == 0 {
                rooms.remove(name);
                return true;
            }
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_rooms(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new(256)
    }
}
