//! Wire messages.
//!
//! Two unrelated formats live here:
//!
//! ```text
//! control channel (JSON text, one-way, unordered)
//!   client → server   {"action":"version.create","name":"Draft"}
//!   server → client   {"event":"version.created","version":4}
//!
//! broadcast group (bincode, in-process peers)
//!   ┌──────────────┬──────────────────────────────┐
//!   │ sender: Uuid │ message: Update { update }   │
//!   └──────────────┴──────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Requests sent to the coordination server over the control channel.
///
/// None of them has a direct reply; outcomes surface later as
/// [`ControlEvent`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ControlMessage {
    #[serde(rename = "version.create")]
    CreateVersion {
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        force: Option<bool>,
    },
    #[serde(rename = "document.revert", rename_all = "camelCase")]
    Revert {
        version: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        fields: Option<Vec<String>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        current_version_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        new_version_name: Option<String>,
    },
    #[serde(rename = "version.preview")]
    Preview { version: u64 },
    #[serde(rename = "mutex.request")]
    MutexRequest {
        key: String,
        /// Advisory, in milliseconds
        timeout: u64,
    },
    #[serde(rename = "mutex.release")]
    MutexRelease { key: String },
}

impl ControlMessage {
    /// Serialize to the JSON text sent over the channel.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }
}

/// Outcome of a `mutex.request`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutexOutcome {
    Granted,
    /// Any other event in the `mutex` namespace, carrying what follows
    /// `mutex.` (e.g. `"denied"`; empty for a bare `mutex`)
    Other(String),
}

/// Events pushed by the coordination server.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    Saved,
    VersionCreated { version: u64 },
    DocumentReverted { version: u64 },
    /// Base64 full-state snapshot of the requested version
    VersionPreview { ydoc: String },
    Mutex(MutexOutcome),
    /// An event kind this client does not handle
    Unrecognized(String),
}

impl ControlEvent {
    /// Parse one control-channel payload.
    ///
    /// Unknown event names parse as [`ControlEvent::Unrecognized`]; only
    /// payloads that are not JSON objects, lack an `event` name, or miss a
    /// field required by a known event are errors.
    pub fn parse(payload: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(payload)
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        let event = value
            .get("event")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::InvalidMessageType)?;

        let version = || {
            value
                .get("version")
                .and_then(version_number)
                .ok_or_else(|| {
                    ProtocolError::DeserializationError(format!("{event} without version"))
                })
        };

        Ok(match event {
            "saved" => ControlEvent::Saved,
            "version.created" => ControlEvent::VersionCreated { version: version()? },
            "document.reverted" => ControlEvent::DocumentReverted { version: version()? },
            "version.preview" => {
                let ydoc = value.get("ydoc").and_then(Value::as_str).ok_or_else(|| {
                    ProtocolError::DeserializationError("version.preview without ydoc".into())
                })?;
                ControlEvent::VersionPreview {
                    ydoc: ydoc.to_string(),
                }
            }
            "mutex.granted" => ControlEvent::Mutex(MutexOutcome::Granted),
            other => match other.split_once('.') {
                Some(("mutex", kind)) => ControlEvent::Mutex(MutexOutcome::Other(kind.to_string())),
                None if other == "mutex" => ControlEvent::Mutex(MutexOutcome::Other(String::new())),
                _ => ControlEvent::Unrecognized(other.to_string()),
            },
        })
    }
}

/// Versions arrive as numbers, or occasionally as numeric strings.
fn version_number(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Payload exchanged between in-process peers of one broadcast group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BroadcastMessage {
    /// A v1-encoded document update
    Update { update: Vec<u8> },
}

/// A [`BroadcastMessage`] stamped with the id of the peer that sent it.
///
/// Every subscriber of a group receives its own messages too, so receivers
/// drop envelopes carrying their own `sender`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastEnvelope {
    pub sender: Uuid,
    pub message: BroadcastMessage,
}

impl BroadcastEnvelope {
    pub fn update(sender: Uuid, update: Vec<u8>) -> Self {
        Self {
            sender,
            message: BroadcastMessage::Update { update },
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (envelope, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(envelope)
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    InvalidMessageType,
    ConnectionClosed,
    Timeout,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::InvalidMessageType => write!(f, "Invalid message type"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Timeout => write!(f, "Timed out"),
        }
    }
}

impl std::error::Error for ProtocolError {}
