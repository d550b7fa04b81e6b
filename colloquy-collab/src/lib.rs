//! # colloquy-collab — Network side of the collaboration layer
//!
//! Binds a `yrs::Doc` (modelled by `colloquy-core`) to a coordination
//! server, to same-origin peers and to a local snapshot cache.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐   Connection / ControlChannel   ┌──────────────┐
//! │ DocumentClient │ ◄─────────────────────────────► │ coordination │
//! │ (failover)     │     JSON control messages       │ server       │
//! └──┬──────────┬──┘                                 └──────────────┘
//!    │          │
//!    ▼          ▼
//! ┌────────┐ ┌───────────────┐ ┌──────────────────┐
//! │ Thread │ │ VersionTracker│ │ DistributedMutex │
//! │ Store  │ │               │ │                  │
//! └───┬────┘ └──────┬────────┘ └──────────────────┘
//!     ▼             ▼
//! ┌─────────────────────────┐   BroadcastGroup   ┌──────────────────┐
//! │ yrs::Doc                │ ◄────────────────► │ CrossTabProvider │
//! └─────────────────────────┘                    └────────┬─────────┘
//!                                                         ▼
//!                                                 ┌───────────────┐
//!                                                 │ SnapshotCache │
//!                                                 └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — Control messages/events (JSON) and the broadcast envelope (bincode)
//! - [`transport`] — `Connection` / `ControlChannel` seams and the WebSocket adapter
//! - [`control`] — In-process control channel
//! - [`cluster`] — Node directory lookup
//! - [`client`] — Document client with cluster failover
//! - [`versions`] — Version history tracking and previews
//! - [`mutex`] — Server-arbitrated named locks
//! - [`broadcast`] — Named fan-out groups
//! - [`tabsync`] — Serverless replication with debounced persistence
//! - [`storage`] — Snapshot caches (RocksDB, in-memory)

pub mod broadcast;
pub mod client;
pub mod cluster;
pub mod control;
pub mod mutex;
pub mod protocol;
pub mod storage;
pub mod tabsync;
pub mod transport;
pub mod versions;

// Re-exports for convenience
pub use broadcast::{BroadcastGroup, BroadcastStats, RoomManager};
pub use client::{ClientConfig, ClientError, ClientMode, DocumentClient};
pub use cluster::{ClusterTopology, DirectoryError, HttpNodeDirectory, NodeDirectory};
pub use control::{LocalAuthority, LocalControlChannel};
pub use mutex::{DistributedMutex, MutexConfig};
pub use protocol::{
    BroadcastEnvelope, BroadcastMessage, ControlEvent, ControlMessage, MutexOutcome,
    ProtocolError,
};
pub use storage::{
    MemorySnapshotCache, RocksSnapshotCache, SnapshotCache, SnapshotMetadata, StoreConfig,
    StoreError,
};
pub use tabsync::{CrossTabProvider, ProviderConfig};
pub use transport::{Connection, ConnectionState, ControlChannel, Transport, WsTransport};
pub use versions::{PreviewWatch, VersionPreview, VersionSnapshot, VersionTracker};
