//! Integration tests for threads shared between independent documents.
//!
//! Each test stands up two or more `yrs::Doc` replicas, edits them through
//! `ThreadStore`, exchanges full-state updates and checks that every replica
//! converges on the same view.

use colloquy_core::{
    CommentDeletion, CommentUpdate, DeleteCommentOptions, DeleteThreadOptions, HistoryDocument,
    ThreadQuery, ThreadStore, UpdateOrigin,
};
use serde_json::json;
use yrs::updates::decoder::Decode;
use yrs::{Doc, ReadTxn, StateVector, Transact, Update};

/// Push the full state of `from` into `to`, tagged as a peer update.
fn sync(from: &Doc, to: &Doc) {
    let update = from
        .transact()
        .encode_state_as_update_v1(&StateVector::default());
    to.transact_mut_with(UpdateOrigin::FromPeer)
        .apply_update(Update::decode_v1(&update).unwrap())
        .unwrap();
}

fn sync_both(a: &Doc, b: &Doc) {
    sync(a, b);
    sync(b, a);
}

#[test]
fn test_concurrent_threads_converge() {
    let doc_a = Doc::new();
    let doc_b = Doc::new();
    let alice = ThreadStore::new(&doc_a);
    let bob = ThreadStore::new(&doc_b);

    let ta = alice.create_thread(json!({ "by": "alice" })).unwrap();
    let tb = bob.create_thread(json!({ "by": "bob" })).unwrap();
    sync_both(&doc_a, &doc_b);

    let seen_a = alice.get_threads(&ThreadQuery::default());
    let seen_b = bob.get_threads(&ThreadQuery::default());
    assert_eq!(seen_a.len(), 2);
    assert_eq!(seen_a, seen_b);
    assert!(seen_a.iter().any(|t| t.id == ta.id));
    assert!(seen_a.iter().any(|t| t.id == tb.id));
}

#[test]
fn test_concurrent_replies_all_survive() {
    let doc_a = Doc::new();
    let doc_b = Doc::new();
    let alice = ThreadStore::new(&doc_a);
    let bob = ThreadStore::new(&doc_b);

    let thread = alice.create_thread(json!({})).unwrap();
    alice
        .add_comment(&thread.id, CommentUpdate::content(json!("opening")))
        .unwrap();
    sync(&doc_a, &doc_b);

    alice
        .add_comment(&thread.id, CommentUpdate::content(json!("alice reply")))
        .unwrap();
    bob.add_comment(&thread.id, CommentUpdate::content(json!("bob reply")))
        .unwrap();
    sync_both(&doc_a, &doc_b);

    let comments_a = alice.get_thread_comments(&thread.id, false).unwrap();
    let comments_b = bob.get_thread_comments(&thread.id, false).unwrap();
    assert_eq!(comments_a.len(), 3);
    assert_eq!(comments_a, comments_b);
    assert_eq!(comments_a[0].content, json!("opening"));
}

#[test]
fn test_soft_delete_replicates() {
    let doc_a = Doc::new();
    let doc_b = Doc::new();
    let alice = ThreadStore::new(&doc_a);
    let bob = ThreadStore::new(&doc_b);

    let thread = alice.create_thread(json!({})).unwrap();
    sync(&doc_a, &doc_b);
    bob.delete_thread(&thread.id, DeleteThreadOptions::default())
        .unwrap();
    sync(&doc_b, &doc_a);

    assert!(alice.get_threads(&ThreadQuery::default()).is_empty());
    let archived = alice.get_threads(&ThreadQuery::archived());
    assert_eq!(archived.len(), 1);

    alice.restore_thread(&thread.id).unwrap();
    sync(&doc_a, &doc_b);
    assert_eq!(bob.get_threads(&ThreadQuery::default()).len(), 1);
}

#[test]
fn test_thread_removed_by_opening_comment_everywhere() {
    let doc_a = Doc::new();
    let doc_b = Doc::new();
    let alice = ThreadStore::new(&doc_a);
    let bob = ThreadStore::new(&doc_b);

    let thread = alice.create_thread(json!({})).unwrap();
    let opening = alice
        .add_comment(&thread.id, CommentUpdate::content(json!("opening")))
        .unwrap();
    sync(&doc_a, &doc_b);

    let outcome = bob
        .delete_comment(
            &thread.id,
            &opening.id,
            DeleteCommentOptions {
                delete_content: false,
                delete_thread: true,
            },
        )
        .unwrap();
    assert_eq!(outcome, CommentDeletion::ThreadDeleted);
    sync(&doc_b, &doc_a);

    assert!(alice.get_threads(&ThreadQuery::all()).is_empty());
    assert!(alice.get_thread(&thread.id).is_err());
}

#[test]
fn test_version_config_visible_to_peers() {
    let doc_a = Doc::new();
    let doc_b = Doc::new();
    let history_a = HistoryDocument::new(&doc_a);
    let history_b = HistoryDocument::new(&doc_b);

    history_a.set_auto_versioning(true);
    history_a.set_interval_seconds(30);
    sync(&doc_a, &doc_b);

    let config = history_b.config();
    assert!(config.auto_versioning);
    assert_eq!(config.interval_seconds, Some(30));
}
