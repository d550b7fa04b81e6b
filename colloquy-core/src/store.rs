//! Thread and comment CRUD over the shared document.
//!
//! Every public mutation opens exactly one transaction tagged
//! [`UpdateOrigin::Local`]. Composite operations (`create_thread` →
//! `update_thread`, `add_comment` → `update_comment`) share that
//! transaction through the `*_in` helpers, so observers in any context see
//! either the state before the call or the fully applied result.
//!
//! ```text
//! create_thread(data)
//!   └── transact_mut_with(Local) ─┬─ push thread map (id, createdAt, [], [], deletedAt=null)
//!                                 └─ update_thread_in(data)      (same txn)
//!                                        └─ commit → observers fire once
//! ```

use serde_json::Value;
use uuid::Uuid;
use yrs::{
    Any, Array, ArrayPrelim, ArrayRef, DeepObservable, Doc, Map, MapPrelim, MapRef, Out, ReadTxn,
    Subscription, Transact, TransactionMut,
};

use crate::error::DocumentError;
use crate::json::json_to_any;
use crate::layout::DocumentLayout;
use crate::origin::UpdateOrigin;
use crate::thread::{
    comment_array, fields, read_string, Comment, CommentDeletion, CommentUpdate,
    DeleteCommentOptions, DeleteThreadOptions, Thread, ThreadQuery, ThreadUpdate,
};
use crate::timestamp_now;

/// Thread/comment store bound to one document.
///
/// Cheap to clone: it only holds document handles.
#[derive(Clone)]
pub struct ThreadStore {
    doc: Doc,
    threads: ArrayRef,
    threads_key: String,
}

impl ThreadStore {
    /// Bind to the default layout of `doc`.
    pub fn new(doc: &Doc) -> Self {
        Self::with_layout(doc, &DocumentLayout::default())
    }

    pub fn with_layout(doc: &Doc, layout: &DocumentLayout) -> Self {
        Self {
            doc: doc.clone(),
            threads: layout.threads(doc),
            threads_key: layout.threads_key(),
        }
    }

    fn transact_local(&self) -> TransactionMut<'_> {
        self.doc.transact_mut_with(UpdateOrigin::Local)
    }

    // ─── Threads ──────────────────────────────────────────────────────

    /// Create a thread and populate it with `data`.
    pub fn create_thread(&self, data: Value) -> Result<Thread, DocumentError> {
        let mut txn = self.transact_local();

        let id = Uuid::new_v4().to_string();
        let thread = self.threads.push_back(&mut txn, MapPrelim::default());
        thread.insert(&mut txn, fields::ID, id.clone());
        thread.insert(&mut txn, fields::CREATED_AT, timestamp_now());
        thread.insert(&mut txn, fields::COMMENTS, ArrayPrelim::default());
        thread.insert(&mut txn, fields::DELETED_COMMENTS, ArrayPrelim::default());
        thread.insert(&mut txn, fields::DELETED_AT, Any::Null);

        Self::update_thread_in(&mut txn, &thread, &ThreadUpdate::data(data))?;
        log::debug!("Created thread {id}");
        Thread::read(&txn, &thread)
    }

    /// Overwrite thread fields and bump `updatedAt`.
    pub fn update_thread(&self, id: &str, update: ThreadUpdate) -> Result<Thread, DocumentError> {
        let mut txn = self.transact_local();
        let (_, thread) = self.require_thread(&txn, id)?;
        Self::update_thread_in(&mut txn, &thread, &update)?;
        Thread::read(&txn, &thread)
    }

    fn update_thread_in(
        txn: &mut TransactionMut,
        thread: &MapRef,
        update: &ThreadUpdate,
    ) -> Result<(), DocumentError> {
        thread.insert(txn, fields::UPDATED_AT, timestamp_now());
        if let Some(data) = &update.data {
            thread.insert(txn, fields::DATA, json_to_any(data));
        }
        if let Some(resolved_at) = &update.resolved_at {
            let value = match resolved_at {
                Some(at) => Any::String(at.as_str().into()),
                None => Any::Null,
            };
            thread.insert(txn, fields::RESOLVED_AT, value);
        }
        Ok(())
    }

    /// Soft-delete a thread, or remove it entirely with `force`.
    ///
    /// Returns the archived thread, or `None` when it was removed.
    pub fn delete_thread(
        &self,
        id: &str,
        options: DeleteThreadOptions,
    ) -> Result<Option<Thread>, DocumentError> {
        let mut txn = self.transact_local();
        let (index, thread) = self.require_thread(&txn, id)?;

        if options.force {
            self.threads.remove(&mut txn, index);
            log::debug!("Force-deleted thread {id}");
            return Ok(None);
        }

        thread.insert(&mut txn, fields::DELETED_AT, timestamp_now());
        if options.delete_comments {
            thread.insert(&mut txn, fields::COMMENTS, ArrayPrelim::default());
            thread.insert(&mut txn, fields::DELETED_COMMENTS, ArrayPrelim::default());
        }
        Thread::read(&txn, &thread).map(Some)
    }

    /// Clear `deletedAt` on a soft-deleted thread.
    pub fn restore_thread(&self, id: &str) -> Result<Thread, DocumentError> {
        let mut txn = self.transact_local();
        let (_, thread) = self.require_thread(&txn, id)?;
        thread.insert(&mut txn, fields::DELETED_AT, Any::Null);
        Thread::read(&txn, &thread)
    }

    /// Threads matching `query`, in document order. Unreadable entries are
    /// skipped with a warning.
    pub fn get_threads(&self, query: &ThreadQuery) -> Vec<Thread> {
        let txn = self.doc.transact();
        read_threads(&txn, &self.threads)
            .into_iter()
            .filter(|thread| query.matches(thread))
            .collect()
    }

    /// A single thread, active or archived.
    pub fn get_thread(&self, id: &str) -> Result<Thread, DocumentError> {
        let txn = self.doc.transact();
        let (_, thread) = self.require_thread(&txn, id)?;
        Thread::read(&txn, &thread)
    }

    /// Total number of thread entries, archived included.
    pub fn thread_count(&self) -> u32 {
        let txn = self.doc.transact();
        self.threads.len(&txn)
    }

    // ─── Comments ─────────────────────────────────────────────────────

    /// Append a comment to a thread.
    pub fn add_comment(
        &self,
        thread_id: &str,
        update: CommentUpdate,
    ) -> Result<Comment, DocumentError> {
        let mut txn = self.transact_local();
        let (_, thread) = self.require_thread(&txn, thread_id)?;

        let comments = match comment_array(&txn, &thread, fields::COMMENTS) {
            Some(array) => array,
            None => thread.insert(&mut txn, fields::COMMENTS, ArrayPrelim::default()),
        };

        let comment_id = Uuid::new_v4().to_string();
        let comment = comments.push_back(&mut txn, MapPrelim::default());
        comment.insert(&mut txn, fields::ID, comment_id.clone());
        comment.insert(&mut txn, fields::CREATED_AT, timestamp_now());

        Self::update_comment_in(&mut txn, &comment, &update);
        log::debug!("Added comment {comment_id} to thread {thread_id}");
        Comment::read(&txn, &comment)
    }

    /// Overwrite comment fields and bump `updatedAt`. Only active comments
    /// can be updated.
    pub fn update_comment(
        &self,
        thread_id: &str,
        comment_id: &str,
        update: CommentUpdate,
    ) -> Result<Comment, DocumentError> {
        let mut txn = self.transact_local();
        let (_, thread) = self.require_thread(&txn, thread_id)?;
        let (_, _, comment) = Self::require_comment(&txn, &thread, thread_id, comment_id)?;
        Self::update_comment_in(&mut txn, &comment, &update);
        Comment::read(&txn, &comment)
    }

    fn update_comment_in(txn: &mut TransactionMut, comment: &MapRef, update: &CommentUpdate) {
        comment.insert(txn, fields::UPDATED_AT, timestamp_now());
        if let Some(data) = &update.data {
            comment.insert(txn, fields::DATA, json_to_any(data));
        }
        if let Some(content) = &update.content {
            comment.insert(txn, fields::CONTENT, json_to_any(content));
        }
    }

    /// Move a comment into `deletedComments`.
    ///
    /// With `delete_thread`, deleting the opening comment (index 0) removes
    /// the whole thread instead and leaves the comment arrays untouched.
    pub fn delete_comment(
        &self,
        thread_id: &str,
        comment_id: &str,
        options: DeleteCommentOptions,
    ) -> Result<CommentDeletion, DocumentError> {
        let mut txn = self.transact_local();
        let (thread_index, thread) = self.require_thread(&txn, thread_id)?;
        let (comments, index, comment) =
            Self::require_comment(&txn, &thread, thread_id, comment_id)?;

        if index == 0 && options.delete_thread {
            self.threads.remove(&mut txn, thread_index);
            log::debug!("Deleting opening comment {comment_id} removed thread {thread_id}");
            return Ok(CommentDeletion::ThreadDeleted);
        }

        let id = comment.get(&txn, fields::ID);
        let created_at = comment.get(&txn, fields::CREATED_AT);
        let data = comment.get(&txn, fields::DATA);
        let content = if options.delete_content {
            None
        } else {
            comment.get(&txn, fields::CONTENT)
        };

        let deleted = match comment_array(&txn, &thread, fields::DELETED_COMMENTS) {
            Some(array) => array,
            None => thread.insert(&mut txn, fields::DELETED_COMMENTS, ArrayPrelim::default()),
        };

        let now = timestamp_now();
        let archived = deleted.push_back(&mut txn, MapPrelim::default());
        archived.insert(&mut txn, fields::ID, out_to_any(id));
        archived.insert(&mut txn, fields::CREATED_AT, out_to_any(created_at));
        archived.insert(&mut txn, fields::UPDATED_AT, now.clone());
        archived.insert(&mut txn, fields::DELETED_AT, now);
        archived.insert(&mut txn, fields::DATA, out_to_any(data));
        archived.insert(&mut txn, fields::CONTENT, out_to_any(content));

        comments.remove(&mut txn, index);
        Comment::read(&txn, &archived).map(CommentDeletion::Comment)
    }

    /// Active comments, or active and deleted comments ordered by creation.
    pub fn get_thread_comments(
        &self,
        thread_id: &str,
        include_deleted: bool,
    ) -> Result<Vec<Comment>, DocumentError> {
        let thread = self.get_thread(thread_id)?;
        if !include_deleted {
            return Ok(thread.comments);
        }
        let mut all = thread.comments;
        all.extend(thread.deleted_comments);
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }

    /// A single comment of a thread.
    pub fn get_thread_comment(
        &self,
        thread_id: &str,
        comment_id: &str,
        include_deleted: bool,
    ) -> Result<Comment, DocumentError> {
        self.get_thread_comments(thread_id, include_deleted)?
            .into_iter()
            .find(|c| c.id == comment_id)
            .ok_or_else(|| DocumentError::CommentNotFound {
                thread_id: thread_id.to_string(),
                comment_id: comment_id.to_string(),
            })
    }

    // ─── Observation ──────────────────────────────────────────────────

    /// Watch every change to threads or their comments.
    ///
    /// The callback receives all threads (archived included) as of the
    /// committed transaction. Drop the subscription to stop watching.
    pub fn observe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Vec<Thread>) + Send + Sync + 'static,
    {
        let key = self.threads_key.clone();
        self.threads.observe_deep(move |txn, _events| {
            if let Some(threads) = txn.get_array(key.as_str()) {
                callback(read_threads(txn, &threads));
            }
        })
    }

    // ─── Lookup ───────────────────────────────────────────────────────

    fn find_thread<T: ReadTxn>(&self, txn: &T, id: &str) -> Option<(u32, MapRef)> {
        self.threads
            .iter(txn)
            .enumerate()
            .find_map(|(index, out)| match out {
                Out::YMap(map) if read_string(txn, &map, fields::ID).as_deref() == Some(id) => {
                    Some((index as u32, map))
                }
                _ => None,
            })
    }

    fn require_thread<T: ReadTxn>(&self, txn: &T, id: &str) -> Result<(u32, MapRef), DocumentError> {
        self.find_thread(txn, id)
            .ok_or_else(|| DocumentError::ThreadNotFound(id.to_string()))
    }

    fn require_comment<T: ReadTxn>(
        txn: &T,
        thread: &MapRef,
        thread_id: &str,
        comment_id: &str,
    ) -> Result<(ArrayRef, u32, MapRef), DocumentError> {
        let not_found = || DocumentError::CommentNotFound {
            thread_id: thread_id.to_string(),
            comment_id: comment_id.to_string(),
        };
        let comments = comment_array(txn, thread, fields::COMMENTS).ok_or_else(not_found)?;
        let found = comments
            .iter(txn)
            .enumerate()
            .find_map(|(index, out)| match out {
                Out::YMap(map)
                    if read_string(txn, &map, fields::ID).as_deref() == Some(comment_id) =>
                {
                    Some((index as u32, map))
                }
                _ => None,
            });
        match found {
            Some((index, map)) => Ok((comments, index, map)),
            None => Err(not_found()),
        }
    }
}

fn read_threads<T: ReadTxn>(txn: &T, threads: &ArrayRef) -> Vec<Thread> {
    threads
        .iter(txn)
        .filter_map(|out| match Thread::read_out(txn, &out) {
            Ok(thread) => Some(thread),
            Err(e) => {
                log::warn!("Skipping unreadable thread entry: {e}");
                None
            }
        })
        .collect()
}

/// Copy a plain value between maps. Shared types cannot be copied by value.
fn out_to_any(out: Option<Out>) -> Any {
    match out {
        Some(Out::Any(any)) => any,
        None => Any::Null,
        Some(_) => {
            log::warn!("Dropping non-plain value while archiving comment");
            Any::Null
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn store() -> ThreadStore {
        ThreadStore::new(&Doc::new())
    }

    #[test]
    fn test_create_thread() {
        let store = store();
        let data = json!({ "title": "Wording", "anchor": "p1" });
        let thread = store.create_thread(data.clone()).unwrap();

        assert_eq!(thread.data, data);
        assert!(thread.comments.is_empty());
        assert!(thread.deleted_comments.is_empty());
        assert!(thread.is_active());
        assert!(thread.updated_at.is_some());
        assert_eq!(store.thread_count(), 1);
    }

    #[test]
    fn test_thread_ids_unique() {
        let store = store();
        let a = store.create_thread(json!({})).unwrap();
        let b = store.create_thread(json!({})).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_update_thread_missing() {
        let store = store();
        let err = store
            .update_thread("nope", ThreadUpdate::data(json!({})))
            .unwrap_err();
        assert_eq!(err, DocumentError::ThreadNotFound("nope".into()));
    }

    #[test]
    fn test_update_thread_resolve_and_clear() {
        let store = store();
        let thread = store.create_thread(json!({ "k": "v" })).unwrap();

        let resolved = store
            .update_thread(&thread.id, ThreadUpdate::resolve("2026-03-01T10:00:00.000Z"))
            .unwrap();
        assert_eq!(
            resolved.resolved_at.as_deref(),
            Some("2026-03-01T10:00:00.000Z")
        );
        // data untouched when not provided
        assert_eq!(resolved.data, json!({ "k": "v" }));

        let cleared = store
            .update_thread(&thread.id, ThreadUpdate::unresolve())
            .unwrap();
        assert!(cleared.resolved_at.is_none());
    }

    #[test]
    fn test_soft_delete_and_restore_keeps_comments() {
        let store = store();
        let thread = store.create_thread(json!({})).unwrap();
        store
            .add_comment(&thread.id, CommentUpdate::content(json!("first")))
            .unwrap();
        store
            .add_comment(&thread.id, CommentUpdate::content(json!("second")))
            .unwrap();
        let before = store.get_thread(&thread.id).unwrap();

        let archived = store
            .delete_thread(&thread.id, DeleteThreadOptions::default())
            .unwrap()
            .unwrap();
        assert!(archived.deleted_at.is_some());
        assert!(store.get_threads(&ThreadQuery::default()).is_empty());
        assert_eq!(store.get_threads(&ThreadQuery::archived()).len(), 1);

        let restored = store.restore_thread(&thread.id).unwrap();
        assert!(restored.deleted_at.is_none());
        assert_eq!(restored.comments, before.comments);
    }

    #[test]
    fn test_soft_delete_with_comments_clears_both() {
        let store = store();
        let thread = store.create_thread(json!({})).unwrap();
        let c1 = store
            .add_comment(&thread.id, CommentUpdate::content(json!("a")))
            .unwrap();
        store
            .add_comment(&thread.id, CommentUpdate::content(json!("b")))
            .unwrap();
        store
            .delete_comment(&thread.id, &c1.id, DeleteCommentOptions::default())
            .unwrap();

        let archived = store
            .delete_thread(
                &thread.id,
                DeleteThreadOptions {
                    delete_comments: true,
                    force: false,
                },
            )
            .unwrap()
            .unwrap();
        assert!(archived.comments.is_empty());
        assert!(archived.deleted_comments.is_empty());
        // still addressable
        assert!(store.get_thread(&thread.id).is_ok());
    }

    #[test]
    fn test_force_delete_removes_entry() {
        let store = store();
        let thread = store.create_thread(json!({})).unwrap();
        let result = store
            .delete_thread(
                &thread.id,
                DeleteThreadOptions {
                    delete_comments: false,
                    force: true,
                },
            )
            .unwrap();
        assert!(result.is_none());
        assert_eq!(store.thread_count(), 0);
        assert!(matches!(
            store.get_thread(&thread.id),
            Err(DocumentError::ThreadNotFound(_))
        ));
    }

    #[test]
    fn test_add_and_update_comment() {
        let store = store();
        let thread = store.create_thread(json!({})).unwrap();
        let comment = store
            .add_comment(
                &thread.id,
                CommentUpdate {
                    content: Some(json!({ "type": "doc", "text": "hello" })),
                    data: Some(json!({ "author": "ana" })),
                },
            )
            .unwrap();
        assert_eq!(comment.data, json!({ "author": "ana" }));
        assert!(comment.updated_at.is_some());

        let updated = store
            .update_comment(&thread.id, &comment.id, CommentUpdate::content(json!("edited")))
            .unwrap();
        assert_eq!(updated.content, json!("edited"));
        assert_eq!(updated.data, json!({ "author": "ana" }));
        assert_eq!(updated.created_at, comment.created_at);
    }

    #[test]
    fn test_comment_not_found() {
        let store = store();
        let thread = store.create_thread(json!({})).unwrap();
        let err = store
            .update_comment(&thread.id, "missing", CommentUpdate::default())
            .unwrap_err();
        assert!(matches!(err, DocumentError::CommentNotFound { .. }));

        let err = store
            .add_comment("missing-thread", CommentUpdate::default())
            .unwrap_err();
        assert!(matches!(err, DocumentError::ThreadNotFound(_)));
    }

    #[test]
    fn test_delete_comment_moves_and_redacts() {
        let store = store();
        let thread = store.create_thread(json!({})).unwrap();
        store
            .add_comment(&thread.id, CommentUpdate::content(json!("keep")))
            .unwrap();
        let target = store
            .add_comment(&thread.id, CommentUpdate::content(json!("secret")))
            .unwrap();

        let deletion = store
            .delete_comment(
                &thread.id,
                &target.id,
                DeleteCommentOptions {
                    delete_content: true,
                    delete_thread: false,
                },
            )
            .unwrap();

        let archived = match deletion {
            CommentDeletion::Comment(c) => c,
            CommentDeletion::ThreadDeleted => panic!("thread should survive"),
        };
        assert_eq!(archived.id, target.id);
        assert_eq!(archived.created_at, target.created_at);
        assert_eq!(archived.content, Value::Null);
        assert!(archived.deleted_at.is_some());

        let thread = store.get_thread(&thread.id).unwrap();
        assert_eq!(thread.comments.len(), 1);
        assert_eq!(thread.deleted_comments.len(), 1);
    }

    #[test]
    fn test_delete_opening_comment_removes_thread() {
        let store = store();
        let thread = store.create_thread(json!({})).unwrap();
        let first = store
            .add_comment(&thread.id, CommentUpdate::content(json!("opening")))
            .unwrap();
        store
            .add_comment(&thread.id, CommentUpdate::content(json!("reply")))
            .unwrap();

        let deletion = store
            .delete_comment(
                &thread.id,
                &first.id,
                DeleteCommentOptions {
                    delete_content: false,
                    delete_thread: true,
                },
            )
            .unwrap();
        assert_eq!(deletion, CommentDeletion::ThreadDeleted);
        assert!(store.get_threads(&ThreadQuery::default()).is_empty());
        assert!(store.get_threads(&ThreadQuery::all()).is_empty());
    }

    #[test]
    fn test_delete_reply_with_delete_thread_only_moves_comment() {
        let store = store();
        let thread = store.create_thread(json!({})).unwrap();
        store
            .add_comment(&thread.id, CommentUpdate::content(json!("opening")))
            .unwrap();
        let reply = store
            .add_comment(&thread.id, CommentUpdate::content(json!("reply")))
            .unwrap();

        let deletion = store
            .delete_comment(
                &thread.id,
                &reply.id,
                DeleteCommentOptions {
                    delete_content: false,
                    delete_thread: true,
                },
            )
            .unwrap();
        assert!(matches!(deletion, CommentDeletion::Comment(_)));
        assert_eq!(store.get_threads(&ThreadQuery::default()).len(), 1);
    }

    #[test]
    fn test_comments_with_deleted_sorted() {
        let store = store();
        let thread = store.create_thread(json!({})).unwrap();
        let mut ids = Vec::new();
        for i in 0..4 {
            let c = store
                .add_comment(&thread.id, CommentUpdate::content(json!(format!("c{i}"))))
                .unwrap();
            ids.push(c.id);
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        store
            .delete_comment(&thread.id, &ids[1], DeleteCommentOptions::default())
            .unwrap();
        store
            .delete_comment(&thread.id, &ids[3], DeleteCommentOptions::default())
            .unwrap();

        let active = store.get_thread_comments(&thread.id, false).unwrap();
        let all = store.get_thread_comments(&thread.id, true).unwrap();
        let deleted = store.get_thread(&thread.id).unwrap().deleted_comments;

        assert_eq!(all.len(), active.len() + deleted.len());
        assert!(all.windows(2).all(|w| w[0].created_at <= w[1].created_at));
        let order: Vec<&str> = all.iter().map(|c| c.id.as_str()).collect();
        let expected: Vec<&str> = ids.iter().map(String::as_str).collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn test_get_thread_comment() {
        let store = store();
        let thread = store.create_thread(json!({})).unwrap();
        let c = store
            .add_comment(&thread.id, CommentUpdate::content(json!("x")))
            .unwrap();
        store
            .delete_comment(&thread.id, &c.id, DeleteCommentOptions::default())
            .unwrap();

        assert!(store.get_thread_comment(&thread.id, &c.id, false).is_err());
        let found = store.get_thread_comment(&thread.id, &c.id, true).unwrap();
        assert!(found.is_deleted());
    }

    #[test]
    fn test_observe_fires_once_per_operation() {
        let store = store();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let _sub = store.observe(move |threads| {
            seen.fetch_add(1, Ordering::SeqCst);
            // never observe a half-built thread
            for t in &threads {
                assert!(t.updated_at.is_some());
                assert!(t.comments.iter().all(|c| c.updated_at.is_some()));
            }
        });

        let thread = store.create_thread(json!({ "a": "b" })).unwrap();
        store
            .add_comment(&thread.id, CommentUpdate::content(json!("hi")))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_changes_replicate_between_documents() {
        use yrs::updates::decoder::Decode;
        use yrs::{StateVector, Update};

        let source = Doc::new();
        let replica = Doc::new();
        let store = ThreadStore::new(&source);
        let thread = store.create_thread(json!({ "from": "source" })).unwrap();

        let update = source
            .transact()
            .encode_state_as_update_v1(&StateVector::default());
        replica
            .transact_mut_with(UpdateOrigin::FromPeer)
            .apply_update(Update::decode_v1(&update).unwrap())
            .unwrap();

        let mirrored = ThreadStore::new(&replica).get_thread(&thread.id).unwrap();
        assert_eq!(mirrored.data, json!({ "from": "source" }));
    }
}
