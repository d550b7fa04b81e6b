//! Replicated document client.
//!
//! Binds one `yrs::Doc` to a [`Transport`], resolves which server to talk to,
//! and in cluster mode keeps a failover task watching the connection:
//!
//! ```text
//!            every failover_interval
//!   ┌──────────────────────────────────────────┐
//!   │ status == Connected ? ── yes ─► clear failed set
//!   │        │ no
//!   │        ▼
//!   │ disconnect, mark current url failed
//!   │ next alternative not failed?
//!   │   yes ─► set_url(alt), set_should_connect(true), connect
//!   │   no  ─► clear failed set, set_url(primary), connect
//!   └──────────────────────────────────────────┘
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use yrs::Doc;

use colloquy_core::{DocumentLayout, ThreadStore};

use crate::cluster::{self, ClusterTopology, DirectoryError, HttpNodeDirectory, NodeDirectory};
use crate::mutex::{DistributedMutex, MutexConfig};
use crate::protocol::ProtocolError;
use crate::transport::{Connection, ConnectionState, ControlChannel, Transport};
use crate::versions::{VersionSnapshot, VersionTracker};

/// How the configured addresses are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMode {
    /// Exactly one server address
    Single,
    /// Entry points of a cluster, resolved through the node directory
    Cluster,
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub app_id: String,
    pub base_urls: Vec<String>,
    pub mode: ClientMode,
    /// Appended to every server address as `shard=<key>`
    pub shard_key: Option<String>,
    /// How long a disconnected node gets before failing over (default: 5s)
    pub failover_interval: Duration,
    /// Upper bound on a single dial, so a silent node cannot stall failover
    /// (default: 5s)
    pub connect_timeout: Duration,
    /// Root names inside the document
    pub layout: DocumentLayout,
    pub mutex: MutexConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            base_urls: Vec::new(),
            mode: ClientMode::Single,
            shard_key: None,
            failover_interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            layout: DocumentLayout::default(),
            mutex: MutexConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn single(app_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            base_urls: vec![url.into()],
            ..Self::default()
        }
    }

    pub fn cluster(app_id: impl Into<String>, urls: Vec<String>) -> Self {
        Self {
            app_id: app_id.into(),
            base_urls: urls,
            mode: ClientMode::Cluster,
            ..Self::default()
        }
    }

    pub fn with_shard_key(mut self, shard_key: impl Into<String>) -> Self {
        self.shard_key = Some(shard_key.into());
        self
    }

    /// Apply the shard key, if any, to a server address.
    pub fn sharded_url(&self, url: &str) -> String {
        match &self.shard_key {
            Some(key) => {
                let separator = if url.contains('?') { '&' } else { '?' };
                format!("{url}{separator}shard={key}")
            }
            None => url.to_string(),
        }
    }
}

/// Client construction and topology errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientError {
    /// The configuration cannot produce a server address
    Config(String),
    /// The node directory could not be queried
    Directory(DirectoryError),
    Protocol(ProtocolError),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Config(e) => write!(f, "Invalid client configuration: {e}"),
            ClientError::Directory(e) => write!(f, "{e}"),
            ClientError::Protocol(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<DirectoryError> for ClientError {
    fn from(e: DirectoryError) -> Self {
        ClientError::Directory(e)
    }
}

impl From<ProtocolError> for ClientError {
    fn from(e: ProtocolError) -> Self {
        ClientError::Protocol(e)
    }
}

/// Topology plus the addresses that failed since the last healthy tick.
#[derive(Debug)]
struct FailoverState {
    topology: ClusterTopology,
    failed: Vec<String>,
}

/// A document bound to a coordination server.
pub struct DocumentClient {
    doc: Doc,
    config: ClientConfig,
    connection: Arc<dyn Connection>,
    control: Arc<dyn ControlChannel>,
    failover: Arc<Mutex<FailoverState>>,
    failover_task: Option<JoinHandle<()>>,
}

impl DocumentClient {
    /// Resolve the server, connect, and in cluster mode start failover.
    ///
    /// `directory` is only consulted in cluster mode; `None` uses the HTTP
    /// directory. A failed first connection is logged, not returned: the
    /// failover task (cluster mode) or the caller (single mode) retries.
    pub async fn open(
        config: ClientConfig,
        doc: Doc,
        transport: Transport,
        directory: Option<&dyn NodeDirectory>,
    ) -> Result<Self, ClientError> {
        let topology = match config.mode {
            ClientMode::Single => Self::single_topology(&config)?,
            ClientMode::Cluster => {
                if config.base_urls.is_empty() {
                    return Err(ClientError::Config("cluster mode needs at least one node".into()));
                }
                let default_directory;
                let directory: &dyn NodeDirectory = match directory {
                    Some(directory) => directory,
                    None => {
                        default_directory = HttpNodeDirectory::default();
                        &default_directory
                    }
                };
                let resolved = cluster::resolve(directory, &config.app_id, &config.base_urls)
                    .await
                    .ok_or_else(|| ClientError::Config("no valid node address".into()))?;
                ClusterTopology {
                    primary_node: config.sharded_url(&resolved.primary_node),
                    alternative_nodes: resolved
                        .alternative_nodes
                        .iter()
                        .map(|node| config.sharded_url(node))
                        .collect(),
                }
            }
        };

        let connection = transport.connection;
        connection.set_url(&topology.primary_node);
        connection.set_should_connect(true);
        if let Err(e) = dial(connection.as_ref(), config.connect_timeout).await {
            log::warn!("Initial connection to {} failed: {e}", topology.primary_node);
        }

        let failover = Arc::new(Mutex::new(FailoverState {
            topology,
            failed: Vec::new(),
        }));
        let failover_task = match config.mode {
            ClientMode::Cluster => Some(Self::spawn_failover(
                connection.clone(),
                failover.clone(),
                config.failover_interval,
                config.connect_timeout,
            )),
            ClientMode::Single => None,
        };

        Ok(Self {
            doc,
            config,
            connection,
            control: transport.control,
            failover,
            failover_task,
        })
    }

    fn single_topology(config: &ClientConfig) -> Result<ClusterTopology, ClientError> {
        match config.base_urls.as_slice() {
            [url] if !url.is_empty() => Ok(ClusterTopology::single(config.sharded_url(url))),
            [] | [_] => Err(ClientError::Config("no server address".into())),
            _ => Err(ClientError::Config(
                "single-endpoint mode does not support multiple addresses".into(),
            )),
        }
    }

    fn spawn_failover(
        connection: Arc<dyn Connection>,
        state: Arc<Mutex<FailoverState>>,
        interval: Duration,
        connect_timeout: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                failover_tick(connection.as_ref(), &state, connect_timeout).await;
            }
        })
    }

    // ─── Accessors ────────────────────────────────────────────────────

    pub fn document(&self) -> &Doc {
        &self.doc
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub fn control(&self) -> &Arc<dyn ControlChannel> {
        &self.control
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Thread/comment store over this document.
    pub fn threads(&self) -> ThreadStore {
        ThreadStore::with_layout(&self.doc, &self.config.layout)
    }

    /// Mutex primitive over this client's control channel.
    pub fn mutex(&self) -> DistributedMutex {
        DistributedMutex::new(self.control.clone(), self.config.mutex.clone())
    }

    /// Start tracking version metadata. `on_update` runs once immediately
    /// and after every recomputation.
    pub fn version_tracker<F>(&self, on_update: F) -> VersionTracker
    where
        F: Fn(VersionSnapshot) + Send + Sync + 'static,
    {
        VersionTracker::with_layout(&self.doc, self.control.clone(), &self.config.layout, on_update)
    }

    pub fn status(&self) -> ConnectionState {
        self.connection.status()
    }

    pub fn current_url(&self) -> String {
        self.connection.url()
    }

    pub fn topology(&self) -> ClusterTopology {
        lock(&self.failover).topology.clone()
    }

    /// Re-query the node directory through the current node and adopt the
    /// answer for future failovers.
    pub async fn refresh_topology(
        &self,
        directory: &dyn NodeDirectory,
    ) -> Result<ClusterTopology, ClientError> {
        let current = self.current_url();
        let resolved = directory.query(&current, &self.config.app_id).await?;
        let topology = ClusterTopology {
            primary_node: self.config.sharded_url(&resolved.primary_node),
            alternative_nodes: resolved
                .alternative_nodes
                .iter()
                .map(|node| self.config.sharded_url(node))
                .collect(),
        };
        let mut state = lock(&self.failover);
        state.topology = topology.clone();
        state.failed.clear();
        Ok(topology)
    }

    /// Stop failover and close the connection.
    pub async fn destroy(&mut self) {
        if let Some(task) = self.failover_task.take() {
            task.abort();
        }
        self.connection.disconnect().await;
        log::debug!("Document client destroyed");
    }
}

impl Drop for DocumentClient {
    fn drop(&mut self) {
        if let Some(task) = self.failover_task.take() {
            task.abort();
        }
    }
}

fn lock(state: &Mutex<FailoverState>) -> std::sync::MutexGuard<'_, FailoverState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// `connect`, giving up after `timeout`.
async fn dial(connection: &dyn Connection, timeout: Duration) -> Result<(), ProtocolError> {
    tokio::time::timeout(timeout, connection.connect())
        .await
        .map_err(|_| ProtocolError::Timeout)?
}

/// One health check of the failover loop.
async fn failover_tick(
    connection: &dyn Connection,
    state: &Mutex<FailoverState>,
    connect_timeout: Duration,
) {
    if connection.status() == ConnectionState::Connected {
        lock(state).failed.clear();
        return;
    }

    connection.disconnect().await;
    let current = connection.url();

    let target = {
        let mut state = lock(state);
        if !state.failed.contains(&current) {
            state.failed.push(current);
        }
        let topology = state.topology.clone();
        let next = topology
            .alternative_nodes
            .iter()
            .find(|node| !state.failed.contains(node))
            .cloned();
        match next {
            Some(node) => {
                log::info!("Primary node went down, switching to {node}");
                node
            }
            None => {
                log::error!("All nodes appear dead, retrying all");
                state.failed.clear();
                topology.primary_node
            }
        }
    };

    connection.set_url(&target);
    connection.set_should_connect(true);
    if let Err(e) = dial(connection, connect_timeout).await {
        log::warn!("Connection to {target} failed: {e}");
    }
}
