//! Cluster node discovery.
//!
//! In cluster mode the configured addresses are only entry points. Each is
//! asked, in order, which node is primary for the application:
//!
//! ```text
//! GET http(s)://<candidate>/publicapi/cluster/node/<appId>
//!   → { "primaryNode": "wss://n1", "alternativeNodes": ["wss://n2", "wss://n3"] }
//! ```
//!
//! The first successful answer wins. When nobody answers, the first
//! configured address is used as-is with no alternatives.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// Primary node plus the nodes to fail over to, in preference order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTopology {
    pub primary_node: String,
    #[serde(default)]
    pub alternative_nodes: Vec<String>,
}

impl ClusterTopology {
    /// A single node with nothing to fail over to.
    pub fn single(url: impl Into<String>) -> Self {
        Self {
            primary_node: url.into(),
            alternative_nodes: Vec::new(),
        }
    }
}

/// Directory lookup failures. Resolution logs them and moves on.
#[derive(Debug, Clone, PartialEq)]
pub enum DirectoryError {
    /// The request never produced a response
    Transport(String),
    /// Non-2xx response
    Status { code: u16, body: String },
    /// 2xx response that is not a topology
    InvalidResponse(String),
}

impl std::fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DirectoryError::Transport(e) => write!(f, "Directory request failed: {e}"),
            DirectoryError::Status { code, body } => {
                write!(f, "Directory returned {code}: {body}")
            }
            DirectoryError::InvalidResponse(e) => write!(f, "Invalid directory response: {e}"),
        }
    }
}

impl std::error::Error for DirectoryError {}

/// Answers "which node is primary for this application".
#[async_trait]
pub trait NodeDirectory: Send + Sync {
    async fn query(&self, candidate: &str, app_id: &str) -> Result<ClusterTopology, DirectoryError>;
}

/// Convert a WebSocket address to the matching HTTP origin.
pub fn http_base(candidate: &str) -> String {
    if let Some(rest) = candidate.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = candidate.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        candidate.to_string()
    }
}

/// Node directory served by the cluster nodes over HTTP.
pub struct HttpNodeDirectory {
    client: Client,
}

impl HttpNodeDirectory {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("Falling back to default HTTP client: {e}");
                Client::new()
            });
        Self { client }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn endpoint(candidate: &str, app_id: &str) -> String {
        format!(
            "{}/publicapi/cluster/node/{app_id}",
            http_base(candidate).trim_end_matches('/')
        )
    }
}

impl Default for HttpNodeDirectory {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl NodeDirectory for HttpNodeDirectory {
    async fn query(&self, candidate: &str, app_id: &str) -> Result<ClusterTopology, DirectoryError> {
        let url = Self::endpoint(candidate, app_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DirectoryError::Status {
                code: status.as_u16(),
                body,
            });
        }

        response
            .json::<ClusterTopology>()
            .await
            .map_err(|e| DirectoryError::InvalidResponse(e.to_string()))
    }
}

/// Ask each candidate in turn for the cluster topology.
///
/// Empty candidates are skipped; failures are logged and the next candidate
/// is tried. Returns `None` only when `candidates` holds no usable address.
pub async fn resolve(
    directory: &dyn NodeDirectory,
    app_id: &str,
    candidates: &[String],
) -> Option<ClusterTopology> {
    for candidate in candidates.iter().filter(|c| !c.is_empty()) {
        match directory.query(candidate, app_id).await {
            Ok(topology) if !topology.primary_node.is_empty() => {
                log::info!(
                    "Cluster primary {} ({} alternatives) via {candidate}",
                    topology.primary_node,
                    topology.alternative_nodes.len()
                );
                return Some(topology);
            }
            Ok(_) => log::warn!("Node {candidate} returned no primary node"),
            Err(e) => log::error!("Node {candidate} unavailable: {e}"),
        }
    }

    let fallback = candidates.first().filter(|c| !c.is_empty())?;
    log::warn!("No cluster node answered, using {fallback}");
    Some(ClusterTopology::single(fallback.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Directory answering from a fixed table and recording every query.
    struct TableDirectory {
        answers: HashMap<String, ClusterTopology>,
        queried: Mutex<Vec<String>>,
    }

    impl TableDirectory {
        fn new(answers: &[(&str, ClusterTopology)]) -> Self {
            Self {
                answers: answers
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
                queried: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl NodeDirectory for TableDirectory {
        async fn query(
            &self,
            candidate: &str,
            _app_id: &str,
        ) -> Result<ClusterTopology, DirectoryError> {
            self.queried.lock().unwrap().push(candidate.to_string());
            self.answers
                .get(candidate)
                .cloned()
                .ok_or_else(|| DirectoryError::Transport("connection refused".into()))
        }
    }

    fn topology(primary: &str, alternatives: &[&str]) -> ClusterTopology {
        ClusterTopology {
            primary_node: primary.into(),
            alternative_nodes: alternatives.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_http_base() {
        assert_eq!(http_base("wss://n1.example"), "https://n1.example");
        assert_eq!(http_base("ws://localhost:1234"), "http://localhost:1234");
        assert_eq!(http_base("https://already"), "https://already");
    }

    #[test]
    fn test_endpoint() {
        assert_eq!(
            HttpNodeDirectory::endpoint("wss://n1.example/", "app-7"),
            "https://n1.example/publicapi/cluster/node/app-7"
        );
    }

    #[test]
    fn test_topology_json() {
        let parsed: ClusterTopology =
            serde_json::from_str(r#"{"primaryNode":"A","alternativeNodes":["B"]}"#).unwrap();
        assert_eq!(parsed, topology("A", &["B"]));
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let directory = TableDirectory::new(&[
            ("ws://two", topology("A", &["B"])),
            ("ws://three", topology("C", &[])),
        ]);
        let candidates = vec!["ws://one".to_string(), "ws://two".into(), "ws://three".into()];

        let resolved = resolve(&directory, "app", &candidates).await.unwrap();
        assert_eq!(resolved, topology("A", &["B"]));
        assert_eq!(*directory.queried.lock().unwrap(), vec!["ws://one", "ws://two"]);
    }

    #[tokio::test]
    async fn test_empty_candidates_skipped() {
        let directory = TableDirectory::new(&[("ws://two", topology("A", &[]))]);
        let candidates = vec![String::new(), "ws://two".into()];

        let resolved = resolve(&directory, "app", &candidates).await.unwrap();
        assert_eq!(resolved.primary_node, "A");
        assert_eq!(*directory.queried.lock().unwrap(), vec!["ws://two"]);
    }

    #[tokio::test]
    async fn test_nobody_answers_uses_first_candidate() {
        let directory = TableDirectory::new(&[]);
        let candidates = vec!["ws://one".to_string(), "ws://two".into()];

        let resolved = resolve(&directory, "app", &candidates).await.unwrap();
        assert_eq!(resolved, ClusterTopology::single("ws://one"));
    }

    #[tokio::test]
    async fn test_no_usable_candidate() {
        let directory = TableDirectory::new(&[]);
        assert!(resolve(&directory, "app", &[]).await.is_none());
        assert!(resolve(&directory, "app", &[String::new()]).await.is_none());
    }
}
