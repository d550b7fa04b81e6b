//! Local snapshot cache for cross-tab persistence.
//!
//! ```text
//! ┌──────────────────┐  full state (v1)  ┌──────────────────────────────────┐
//! │ CrossTabProvider │ ────────────────► │ SnapshotCache                    │
//! │ (debounced save) │ ◄──────────────── │  RocksSnapshotCache  (on disk)   │
//! └──────────────────┘   load on open    │  MemorySnapshotCache (in-proc)   │
//!                                        └──────────────────────────────────┘
//! ```
//!
//! Snapshots are keyed by document name and always hold the full encoded
//! document state, so loading one is a single `apply_update`.

pub mod memory;
pub mod rocks;

pub use memory::MemorySnapshotCache;
pub use rocks::{RocksSnapshotCache, StoreConfig};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata stored alongside each snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub name: String,
    /// Uncompressed snapshot size in bytes
    pub snapshot_size: u64,
    /// Stored size in bytes
    pub compressed_size: u64,
    /// Milliseconds since the Unix epoch
    pub saved_at: i64,
    /// Number of times this snapshot has been written
    pub revision: u64,
}

impl SnapshotMetadata {
    pub(crate) fn next(previous: Option<&Self>, name: &str, size: usize, stored: usize) -> Self {
        Self {
            name: name.to_string(),
            snapshot_size: size as u64,
            compressed_size: stored as u64,
            saved_at: Utc::now().timestamp_millis(),
            revision: previous.map(|m| m.revision + 1).unwrap_or(1),
        }
    }

    pub fn saved_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.saved_at)
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::SerializationError(e.to_string()))
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
        Ok(meta)
    }
}

/// Where full-state snapshots of named documents are kept.
///
/// Implementations are called from observer-driven tasks and must not
/// block for long.
pub trait SnapshotCache: Send + Sync {
    /// Replace the snapshot stored under `name`.
    fn save_snapshot(&self, name: &str, snapshot: &[u8]) -> Result<SnapshotMetadata, StoreError>;

    /// Load the snapshot stored under `name`, or `StoreError::NotFound`.
    fn load_snapshot(&self, name: &str) -> Result<Vec<u8>, StoreError>;

    /// Load the metadata stored under `name`, or `StoreError::NotFound`.
    fn load_metadata(&self, name: &str) -> Result<SnapshotMetadata, StoreError>;

    /// Remove a snapshot and its metadata. Missing names are not an error.
    fn delete_snapshot(&self, name: &str) -> Result<(), StoreError>;
}

/// Storage errors.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// RocksDB internal error
    DatabaseError(String),
    /// No snapshot under this name
    NotFound(String),
    CompressionError(String),
    SerializationError(String),
    DeserializationError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DatabaseError(e) => write!(f, "Database error: {e}"),
            StoreError::NotFound(name) => write!(f, "Snapshot not found: {name}"),
            StoreError::CompressionError(e) => write!(f, "Compression error: {e}"),
            StoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            StoreError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}
