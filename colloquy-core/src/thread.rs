//! Thread and comment views.
//!
//! These are snapshots read out of the document; mutating them has no effect
//! on the shared state. All writes go through [`crate::ThreadStore`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use yrs::{Any, Array, ArrayRef, Map, MapRef, Out, ReadTxn};

use crate::error::DocumentError;
use crate::json::{any_to_json, out_to_json};

/// Field names shared with other clients of the document.
pub(crate) mod fields {
    pub const ID: &str = "id";
    pub const CREATED_AT: &str = "createdAt";
    pub const UPDATED_AT: &str = "updatedAt";
    pub const DELETED_AT: &str = "deletedAt";
    pub const RESOLVED_AT: &str = "resolvedAt";
    pub const COMMENTS: &str = "comments";
    pub const DELETED_COMMENTS: &str = "deletedComments";
    pub const CONTENT: &str = "content";
    pub const DATA: &str = "data";
}

/// A comment inside a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<String>,
    /// `null` once redacted
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub data: Value,
}

/// A discussion thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: Option<String>,
    /// `None` while the thread is active
    #[serde(default)]
    pub deleted_at: Option<String>,
    #[serde(default)]
    pub resolved_at: Option<String>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub deleted_comments: Vec<Comment>,
    #[serde(default)]
    pub data: Value,
}

impl Thread {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    pub fn status(&self) -> ThreadStatus {
        if self.is_active() {
            ThreadStatus::Unarchived
        } else {
            ThreadStatus::Archived
        }
    }

    /// Read a thread out of its document map.
    pub(crate) fn read<T: ReadTxn>(txn: &T, map: &MapRef) -> Result<Self, DocumentError> {
        let id = read_string(txn, map, fields::ID)
            .ok_or_else(|| DocumentError::MalformedRecord("thread without id".into()))?;
        Ok(Self {
            created_at: read_string(txn, map, fields::CREATED_AT).unwrap_or_default(),
            updated_at: read_string(txn, map, fields::UPDATED_AT),
            deleted_at: read_string(txn, map, fields::DELETED_AT),
            resolved_at: read_string(txn, map, fields::RESOLVED_AT),
            comments: read_comments(txn, map, fields::COMMENTS)?,
            deleted_comments: read_comments(txn, map, fields::DELETED_COMMENTS)?,
            data: map
                .get(txn, fields::DATA)
                .map(|out| out_to_json(&out))
                .unwrap_or(Value::Null),
            id,
        })
    }

    /// Read a thread stored either as a shared map or as a plain JSON object.
    pub(crate) fn read_out<T: ReadTxn>(txn: &T, out: &Out) -> Result<Self, DocumentError> {
        match out {
            Out::YMap(map) => Self::read(txn, map),
            Out::Any(any @ Any::Map(_)) => serde_json::from_value(any_to_json(any))
                .map_err(|e| DocumentError::MalformedRecord(e.to_string())),
            _ => Err(DocumentError::MalformedRecord(
                "thread entry is not a map".into(),
            )),
        }
    }
}

impl Comment {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub(crate) fn read<T: ReadTxn>(txn: &T, map: &MapRef) -> Result<Self, DocumentError> {
        let id = read_string(txn, map, fields::ID)
            .ok_or_else(|| DocumentError::MalformedRecord("comment without id".into()))?;
        Ok(Self {
            created_at: read_string(txn, map, fields::CREATED_AT).unwrap_or_default(),
            updated_at: read_string(txn, map, fields::UPDATED_AT),
            deleted_at: read_string(txn, map, fields::DELETED_AT),
            content: map
                .get(txn, fields::CONTENT)
                .map(|out| out_to_json(&out))
                .unwrap_or(Value::Null),
            data: map
                .get(txn, fields::DATA)
                .map(|out| out_to_json(&out))
                .unwrap_or(Value::Null),
            id,
        })
    }

    pub(crate) fn read_out<T: ReadTxn>(txn: &T, out: &Out) -> Result<Self, DocumentError> {
        match out {
            Out::YMap(map) => Self::read(txn, map),
            Out::Any(any @ Any::Map(_)) => serde_json::from_value(any_to_json(any))
                .map_err(|e| DocumentError::MalformedRecord(e.to_string())),
            _ => Err(DocumentError::MalformedRecord(
                "comment entry is not a map".into(),
            )),
        }
    }
}

/// Read a string field; `null`, missing and non-string values read as `None`.
pub(crate) fn read_string<T: ReadTxn>(txn: &T, map: &MapRef, key: &str) -> Option<String> {
    match map.get(txn, key) {
        Some(Out::Any(Any::String(s))) => Some(s.to_string()),
        _ => None,
    }
}

/// Nested comment array of a thread, if present.
pub(crate) fn comment_array<T: ReadTxn>(txn: &T, map: &MapRef, key: &str) -> Option<ArrayRef> {
    match map.get(txn, key) {
        Some(Out::YArray(array)) => Some(array),
        _ => None,
    }
}

fn read_comments<T: ReadTxn>(
    txn: &T,
    map: &MapRef,
    key: &str,
) -> Result<Vec<Comment>, DocumentError> {
    match map.get(txn, key) {
        Some(Out::YArray(array)) => array
            .iter(txn)
            .map(|out| Comment::read_out(txn, &out))
            .collect(),
        Some(Out::Any(Any::Array(items))) => items
            .iter()
            .map(|any| {
                serde_json::from_value(any_to_json(any))
                    .map_err(|e| DocumentError::MalformedRecord(e.to_string()))
            })
            .collect(),
        _ => Ok(Vec::new()),
    }
}

/// Thread lifecycle bucket used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    /// Soft-deleted (`deletedAt` set)
    Archived,
    /// Active
    Unarchived,
}

/// Which threads `get_threads` returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadQuery {
    pub types: Vec<ThreadStatus>,
}

impl ThreadQuery {
    pub fn all() -> Self {
        Self {
            types: vec![ThreadStatus::Archived, ThreadStatus::Unarchived],
        }
    }

    pub fn archived() -> Self {
        Self {
            types: vec![ThreadStatus::Archived],
        }
    }

    pub fn matches(&self, thread: &Thread) -> bool {
        self.types.contains(&thread.status())
    }
}

impl Default for ThreadQuery {
    fn default() -> Self {
        Self {
            types: vec![ThreadStatus::Unarchived],
        }
    }
}

/// Fields to overwrite on a thread. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThreadUpdate {
    pub data: Option<Value>,
    /// `Some(None)` clears the resolution
    pub resolved_at: Option<Option<String>>,
}

impl ThreadUpdate {
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn resolve(at: impl Into<String>) -> Self {
        Self {
            resolved_at: Some(Some(at.into())),
            ..Self::default()
        }
    }

    pub fn unresolve() -> Self {
        Self {
            resolved_at: Some(None),
            ..Self::default()
        }
    }
}

/// Fields to overwrite on a comment. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommentUpdate {
    pub content: Option<Value>,
    pub data: Option<Value>,
}

impl CommentUpdate {
    pub fn content(content: Value) -> Self {
        Self {
            content: Some(content),
            data: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteThreadOptions {
    /// Clear both comment arrays along with a soft delete
    pub delete_comments: bool,
    /// Physically remove the thread
    pub force: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteCommentOptions {
    /// Null out the content of the archived copy
    pub delete_content: bool,
    /// Deleting the opening comment removes the whole thread
    pub delete_thread: bool,
}

/// Outcome of `delete_comment`.
#[derive(Debug, Clone, PartialEq)]
pub enum CommentDeletion {
    /// The comment was moved to `deletedComments`
    Comment(Comment),
    /// The opening comment was targeted with `delete_thread`; the thread is gone
    ThreadDeleted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn thread(deleted_at: Option<&str>) -> Thread {
        Thread {
            id: "t1".into(),
            created_at: "2026-01-01T00:00:00.000Z".into(),
            updated_at: None,
            deleted_at: deleted_at.map(String::from),
            resolved_at: None,
            comments: Vec::new(),
            deleted_comments: Vec::new(),
            data: Value::Null,
        }
    }

    #[test]
    fn test_thread_status() {
        assert_eq!(thread(None).status(), ThreadStatus::Unarchived);
        assert_eq!(
            thread(Some("2026-01-02T00:00:00.000Z")).status(),
            ThreadStatus::Archived
        );
    }

    #[test]
    fn test_query_default_is_active_only() {
        let query = ThreadQuery::default();
        assert!(query.matches(&thread(None)));
        assert!(!query.matches(&thread(Some("2026-01-02T00:00:00.000Z"))));
    }

    #[test]
    fn test_query_all() {
        let query = ThreadQuery::all();
        assert!(query.matches(&thread(None)));
        assert!(query.matches(&thread(Some("2026-01-02T00:00:00.000Z"))));
        assert!(!ThreadQuery::archived().matches(&thread(None)));
    }

    #[test]
    fn test_thread_json_shape() {
        let value = serde_json::to_value(thread(None)).unwrap();
        assert_eq!(value["id"], json!("t1"));
        assert_eq!(value["deletedAt"], Value::Null);
        assert!(value["deletedComments"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_plain_object_thread_parses() {
        let raw = json!({
            "id": "t9",
            "createdAt": "2026-01-01T00:00:00.000Z",
            "deletedAt": null,
            "comments": [{ "id": "c1", "createdAt": "2026-01-01T00:00:01.000Z", "content": "hi" }],
        });
        let parsed: Thread = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.comments.len(), 1);
        assert_eq!(parsed.comments[0].content, json!("hi"));
        assert!(parsed.is_active());
    }
}
