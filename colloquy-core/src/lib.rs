//! # colloquy-core — Replicated thread, comment and version model
//!
//! Everything in this crate lives inside a single `yrs::Doc`. The types here
//! never own an authoritative copy of the data: every read recomputes a
//! transient view from the document, every write is one `yrs` transaction.
//!
//! ## Document layout
//!
//! ```text
//! yrs::Doc
//!  ├── __tiptapcollab__threads   Array<Map>   threads (+ nested comment arrays)
//!  ├── __tiptapcollab__versions  Array        server-written version records
//!  ├── __tiptapcollab__config    Map          autoVersioning, currentVersion, ...
//!  └── __tiptapcollab__users     Map          reserved for user mapping
//! ```
//!
//! ## Modules
//!
//! - [`origin`] — Origin tags attached to every applied update
//! - [`layout`] — Root names inside the shared document
//! - [`json`] — Bridging opaque JSON payloads to `yrs::Any`
//! - [`thread`] — Thread / Comment views and option types
//! - [`store`] — Thread and comment CRUD over the document
//! - [`version`] — Version records and the versioning config map

pub mod error;
pub mod json;
pub mod layout;
pub mod origin;
pub mod store;
pub mod thread;
pub mod version;

pub use error::DocumentError;
pub use layout::{DocumentLayout, DEFAULT_PREFIX};
pub use origin::UpdateOrigin;
pub use store::ThreadStore;
pub use thread::{
    Comment, CommentDeletion, CommentUpdate, DeleteCommentOptions, DeleteThreadOptions, Thread,
    ThreadQuery, ThreadStatus, ThreadUpdate,
};
pub use version::{latest_version, read_versions, HistoryDocument, VersionConfig, VersionRecord};

use chrono::{SecondsFormat, Utc};

/// Current time as an RFC 3339 UTC string with millisecond precision.
///
/// The fixed width and `Z` suffix make lexicographic order match
/// chronological order, which comment sorting relies on.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
