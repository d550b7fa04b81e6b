use criterion::{criterion_group, criterion_main, Criterion};
use colloquy_collab::broadcast::BroadcastGroup;
use colloquy_collab::protocol::{BroadcastEnvelope, ControlEvent, ControlMessage};
use colloquy_collab::storage::{RocksSnapshotCache, SnapshotCache, StoreConfig};
use colloquy_core::ThreadStore;
use serde_json::json;
use std::hint::black_box;
use std::sync::Arc;
use uuid::Uuid;
use yrs::{Doc, ReadTxn, StateVector, Transact};

fn bench_envelope_encode(c: &mut Criterion) {
    let sender = Uuid::new_v4();
    let update = vec![0u8; 64];

    c.bench_function("envelope_encode_64B", |b| {
        b.iter(|| {
            let envelope = BroadcastEnvelope::update(black_box(sender), black_box(update.clone()));
            black_box(envelope.encode().unwrap());
        })
    });
}

fn bench_envelope_decode(c: &mut Criterion) {
    let encoded = BroadcastEnvelope::update(Uuid::new_v4(), vec![0u8; 64])
        .encode()
        .unwrap();

    c.bench_function("envelope_decode_64B", |b| {
        b.iter(|| {
            black_box(BroadcastEnvelope::decode(black_box(&encoded)).unwrap());
        })
    });
}

fn bench_control_message_encode(c: &mut Criterion) {
    let message = ControlMessage::Revert {
        version: 12,
        fields: Some(vec!["default".into()]),
        current_version_name: Some("Before revert to version 12".into()),
        new_version_name: Some("Revert to version 12".into()),
    };

    c.bench_function("control_message_encode", |b| {
        b.iter(|| {
            black_box(black_box(&message).encode().unwrap());
        })
    });
}

fn bench_control_event_parse(c: &mut Criterion) {
    let payload = json!({ "event": "version.created", "version": 42 }).to_string();

    c.bench_function("control_event_parse", |b| {
        b.iter(|| {
            black_box(ControlEvent::parse(black_box(&payload)).unwrap());
        })
    });
}

fn bench_broadcast_1000_updates(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("broadcast_1000_updates_100_peers", |b| {
        b.iter(|| {
            rt.block_on(async {
                let group = BroadcastGroup::new("bench", 2048);

                let mut receivers = Vec::new();
                for _ in 0..100 {
                    receivers.push(group.join(Uuid::new_v4()).await);
                }

                let sender = Uuid::new_v4();
                for i in 0..1000u64 {
                    let envelope = BroadcastEnvelope::update(sender, vec![i as u8; 64]);
                    black_box(group.broadcast(&envelope).unwrap());
                }
            });
        })
    });
}

/// Full state of a document holding `threads` threads with two comments each.
fn thread_document_state(threads: usize) -> Vec<u8> {
    let doc = Doc::new();
    let store = ThreadStore::new(&doc);
    for i in 0..threads {
        let thread = store.create_thread(json!({ "anchor": i })).unwrap();
        for text in ["first", "second"] {
            store
                .add_comment(&thread.id, colloquy_core::CommentUpdate::content(json!(text)))
                .unwrap();
        }
    }
    let txn = doc.transact();
    txn.encode_state_as_update_v1(&StateVector::default())
}

fn bench_save_snapshot(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(RocksSnapshotCache::open(StoreConfig::for_testing(dir.path())).unwrap());
    let state = thread_document_state(100);

    c.bench_function("save_snapshot_100_threads", |b| {
        b.iter(|| {
            black_box(cache.save_snapshot("bench", black_box(&state)).unwrap());
        })
    });
}

fn bench_load_snapshot(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let cache = RocksSnapshotCache::open(StoreConfig::for_testing(dir.path())).unwrap();
    cache
        .save_snapshot("bench", &thread_document_state(100))
        .unwrap();

    c.bench_function("load_snapshot_100_threads", |b| {
        b.iter(|| {
            black_box(cache.load_snapshot(black_box("bench")).unwrap());
        })
    });
}

fn bench_lz4_compress_snapshot(c: &mut Criterion) {
    let state = thread_document_state(100);

    c.bench_function("lz4_compress_snapshot", |b| {
        b.iter(|| {
            black_box(lz4_flex::compress_prepend_size(black_box(&state)));
        })
    });
}

criterion_group!(
    benches,
    bench_envelope_encode,
    bench_envelope_decode,
    bench_control_message_encode,
    bench_control_event_parse,
    bench_broadcast_1000_updates,
    bench_save_snapshot,
    bench_load_snapshot,
    bench_lz4_compress_snapshot,
);
criterion_main!(benches);
