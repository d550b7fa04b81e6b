//! Version history tracking.
//!
//! The version list lives in the document and is written by the
//! coordination server. [`VersionTracker`] mirrors it, listens for the
//! server's version events, and sends version requests. It never edits the
//! history itself.
//!
//! ```text
//!  versions array changed ──┐
//!  config map changed ──────┼──► recompute state ──► on_update(VersionSnapshot)
//!  saved / version.created /│
//!  document.reverted ───────┘
//! ```

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use yrs::updates::decoder::Decode;
use yrs::{Doc, GetString, Observable, ReadTxn, Subscription, Transact, Update};

use colloquy_core::version::{latest_version, read_versions, HistoryDocument, VersionConfig};
use colloquy_core::{DocumentLayout, UpdateOrigin, VersionRecord};

use crate::protocol::{ControlEvent, ControlMessage, ProtocolError};
use crate::transport::ControlChannel;

/// What observers receive after every recomputation.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionSnapshot {
    pub versions: Vec<VersionRecord>,
    /// Latest version number
    pub version: u64,
    pub current_version: u64,
    pub versioning_enabled: bool,
}

#[derive(Debug, Clone, Default)]
struct TrackerState {
    versions: Vec<VersionRecord>,
    latest_version: u64,
    current_version: u64,
    versioning_enabled: bool,
    last_saved: Option<DateTime<Utc>>,
}

impl TrackerState {
    fn snapshot(&self) -> VersionSnapshot {
        VersionSnapshot {
            versions: self.versions.clone(),
            version: self.latest_version,
            current_version: self.current_version,
            versioning_enabled: self.versioning_enabled,
        }
    }

    fn apply_config(&mut self, config: &VersionConfig) {
        self.versioning_enabled = config.auto_versioning;
        self.current_version = config.current_version;
        if config.last_saved.is_some() {
            self.last_saved = config.last_saved;
        }
    }

    fn apply_versions(&mut self, versions: Vec<VersionRecord>) {
        self.latest_version = latest_version(versions.len());
        self.versions = versions;
    }

    /// Returns whether the event changed tracked state.
    fn apply_event(&mut self, event: &ControlEvent) -> bool {
        match event {
            ControlEvent::Saved => self.last_saved = Some(Utc::now()),
            ControlEvent::VersionCreated { version } => {
                self.latest_version = *version;
                self.current_version = *version;
            }
            ControlEvent::DocumentReverted { version } => self.current_version = *version,
            ControlEvent::VersionPreview { .. }
            | ControlEvent::Mutex(_)
            | ControlEvent::Unrecognized(_) => return false,
        }
        true
    }
}

type Callback = Arc<dyn Fn(VersionSnapshot) + Send + Sync>;

/// Shared state plus the observer, reachable from document observers and
/// the event task.
#[derive(Clone)]
struct Shared {
    state: Arc<Mutex<TrackerState>>,
    on_update: Callback,
}

impl Shared {
    fn update(&self, f: impl FnOnce(&mut TrackerState) -> bool) {
        let snapshot = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if !f(&mut *state) {
                return;
            }
            state.snapshot()
        };
        (self.on_update)(snapshot);
    }

    fn read<T>(&self, f: impl FnOnce(&TrackerState) -> T) -> T {
        f(&*self.state.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

/// Mirrors server-confirmed version metadata and issues version requests.
pub struct VersionTracker {
    history: HistoryDocument,
    control: Arc<dyn ControlChannel>,
    shared: Shared,
    subscriptions: Vec<Subscription>,
    events_task: Option<JoinHandle<()>>,
}

impl VersionTracker {
    /// Start tracking with the default layout. Must be called inside a
    /// tokio runtime.
    pub fn new<F>(doc: &Doc, control: Arc<dyn ControlChannel>, on_update: F) -> Self
    where
        F: Fn(VersionSnapshot) + Send + Sync + 'static,
    {
        Self::with_layout(doc, control, &DocumentLayout::default(), on_update)
    }

    pub fn with_layout<F>(
        doc: &Doc,
        control: Arc<dyn ControlChannel>,
        layout: &DocumentLayout,
        on_update: F,
    ) -> Self
    where
        F: Fn(VersionSnapshot) + Send + Sync + 'static,
    {
        let history = HistoryDocument::with_layout(doc, layout);

        let mut initial = TrackerState::default();
        initial.apply_versions(history.versions());
        initial.apply_config(&history.config());
        let shared = Shared {
            state: Arc::new(Mutex::new(initial)),
            on_update: Arc::new(on_update),
        };

        let versions_sub = {
            let shared = shared.clone();
            history.versions_ref().observe(move |txn, event| {
                let versions = read_versions(txn, event.target());
                shared.update(|state| {
                    state.apply_versions(versions);
                    true
                });
            })
        };
        let config_sub = {
            let shared = shared.clone();
            history.config_ref().observe(move |txn, event| {
                let config = VersionConfig::read(txn, event.target());
                shared.update(|state| {
                    state.apply_config(&config);
                    true
                });
            })
        };

        let events_task = {
            let shared = shared.clone();
            let mut events = control.subscribe();
            tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(payload) => match ControlEvent::parse(&payload) {
                            Ok(event) => shared.update(|state| state.apply_event(&event)),
                            Err(e) => log::debug!("Ignoring control payload: {e}"),
                        },
                        Err(RecvError::Lagged(skipped)) => {
                            log::warn!("Version tracker lagged, {skipped} events skipped");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            })
        };

        let initial = shared.read(TrackerState::snapshot);
        (shared.on_update)(initial);

        Self {
            history,
            control,
            shared,
            subscriptions: vec![versions_sub, config_sub],
            events_task: Some(events_task),
        }
    }

    fn send(&self, message: ControlMessage) -> Result<(), ProtocolError> {
        self.control.send_stateless(message.encode()?)
    }

    // ─── Requests ─────────────────────────────────────────────────────

    /// Ask the server to snapshot the current state as a new version.
    pub fn create_version(&self, name: Option<&str>, force: Option<bool>) -> Result<(), ProtocolError> {
        self.send(ControlMessage::CreateVersion {
            name: name.map(String::from),
            force,
        })
    }

    /// Ask the server to revert `fields` (default: `["default"]`).
    pub fn revert_to_version(
        &self,
        version: u64,
        fields: Option<Vec<String>>,
    ) -> Result<(), ProtocolError> {
        self.send(ControlMessage::Revert {
            version,
            fields: Some(fields.unwrap_or_else(|| vec!["default".to_string()])),
            current_version_name: None,
            new_version_name: None,
        })
    }

    /// Revert while naming the version created by the revert and the one
    /// that preserves the pre-revert state.
    pub fn revert_to_version_named(
        &self,
        version: u64,
        new_version_name: Option<&str>,
        current_version_name: Option<&str>,
    ) -> Result<(), ProtocolError> {
        self.send(ControlMessage::Revert {
            version,
            fields: None,
            current_version_name: Some(
                current_version_name
                    .map(String::from)
                    .unwrap_or_else(|| format!("Before revert to version {version}")),
            ),
            new_version_name: Some(
                new_version_name
                    .map(String::from)
                    .unwrap_or_else(|| format!("Revert to version {version}")),
            ),
        })
    }

    /// Ask the server for a full-state snapshot of `version`, delivered as
    /// a `version.preview` event.
    pub fn preview_version(&self, version: u64) -> Result<(), ProtocolError> {
        self.send(ControlMessage::Preview { version })
    }

    // ─── Auto-versioning config ───────────────────────────────────────

    pub fn is_auto_versioning(&self) -> bool {
        self.history.config().auto_versioning
    }

    pub fn enable_auto_versioning(&self) {
        self.history.set_auto_versioning(true);
    }

    pub fn disable_auto_versioning(&self) {
        self.history.set_auto_versioning(false);
    }

    /// Flip auto-versioning based on the last observed state.
    pub fn toggle_versioning(&self) {
        let enabled = self.shared.read(|state| state.versioning_enabled);
        self.history.set_auto_versioning(!enabled);
    }

    pub fn set_auto_versioning_interval(&self, seconds: u64) {
        self.history.set_interval_seconds(seconds);
    }

    // ─── Views ────────────────────────────────────────────────────────

    pub fn last_saved(&self) -> Option<DateTime<Utc>> {
        self.shared.read(|state| state.last_saved)
    }

    /// Version records as currently stored in the document.
    pub fn versions(&self) -> Vec<VersionRecord> {
        self.history.versions()
    }

    /// The state most recently delivered to the observer.
    pub fn snapshot(&self) -> VersionSnapshot {
        self.shared.read(TrackerState::snapshot)
    }

    /// Call `callback` with every preview the server delivers. Dropping the
    /// returned watch stops it.
    pub fn watch_previews<F>(&self, callback: F) -> PreviewWatch
    where
        F: Fn(VersionPreview) + Send + 'static,
    {
        let mut events = self.control.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(payload) => {
                        let Ok(ControlEvent::VersionPreview { ydoc }) = ControlEvent::parse(&payload)
                        else {
                            continue;
                        };
                        match VersionPreview::from_base64(&ydoc) {
                            Ok(preview) => callback(preview),
                            Err(e) => log::warn!("Dropping unreadable preview: {e}"),
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Preview watch lagged, {skipped} events skipped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        PreviewWatch { task }
    }

    /// Stop listening for events and document changes.
    pub fn destroy(&mut self) {
        if let Some(task) = self.events_task.take() {
            task.abort();
        }
        self.subscriptions.clear();
    }
}

impl Drop for VersionTracker {
    fn drop(&mut self) {
        if let Some(task) = self.events_task.take() {
            task.abort();
        }
    }
}

/// Handle for a preview watch; stops watching on drop.
pub struct PreviewWatch {
    task: JoinHandle<()>,
}

impl Drop for PreviewWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A past version materialized into its own document.
pub struct VersionPreview {
    doc: Doc,
}

impl VersionPreview {
    /// Decode a base64 full-state snapshot.
    pub fn from_base64(encoded: &str) -> Result<Self, ProtocolError> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        let update = Update::decode_v1(&bytes)
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;

        let doc = Doc::new();
        doc.transact_mut_with(UpdateOrigin::FromPeer)
            .apply_update(update)
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(Self { doc })
    }

    pub fn document(&self) -> &Doc {
        &self.doc
    }

    /// Plain text of a text root, if the snapshot has one named `field`.
    pub fn text(&self, field: &str) -> Option<String> {
        let txn = self.doc.transact();
        let text = txn.get_text(field)?;
        Some(text.get_string(&txn))
    }

    /// Serialized XML of a rich-text root, if the snapshot has one named
    /// `field`.
    pub fn xml(&self, field: &str) -> Option<String> {
        let txn = self.doc.transact();
        let fragment = txn.get_xml_fragment(field)?;
        Some(fragment.get_string(&txn))
    }
}
