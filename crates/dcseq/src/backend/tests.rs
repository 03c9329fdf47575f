use std::sync::Arc;

use crate::testing::{MemoryContent, MemoryRpc, MemorySheet, RecordingSleep};
use crate::{
    DEFAULT_FLOOR, LocalFileStore, RemoteRpcStore, RemoteTabularStore, SequenceBackend,
    SequenceKey, VersionedFileStore,
};

fn run_fresh_key_starts_above_floor<B: SequenceBackend>(backend: B) {
    let key = SequenceKey::new("bddcsg_seq");
    assert_eq!(backend.current_value(&key).unwrap(), DEFAULT_FLOOR);
    assert_eq!(backend.next_value(&key).unwrap(), DEFAULT_FLOOR + 1);
    assert_eq!(backend.current_value(&key).unwrap(), DEFAULT_FLOOR + 1);
}

fn run_values_strictly_increase<B: SequenceBackend>(backend: B) {
    let key = SequenceKey::new("akdchydnch_seq");
    let mut last = backend.current_value(&key).unwrap();
    for _ in 0..20 {
        let next = backend.next_value(&key).unwrap();
        assert_eq!(next, last + 1);
        last = next;
    }
}

fn run_current_value_is_idempotent<B: SequenceBackend>(backend: B) {
    let key = SequenceKey::new("sbdcah_seq");
    backend.next_value(&key).unwrap();
    let first = backend.current_value(&key).unwrap();
    for _ in 0..5 {
        assert_eq!(backend.current_value(&key).unwrap(), first);
    }
    assert_eq!(backend.next_value(&key).unwrap(), first + 1);
}

fn run_keys_are_independent<B: SequenceBackend>(backend: B) {
    let a = SequenceKey::new("akdcsg_seq");
    let b = SequenceKey::new("bddcsg_seq");
    assert_eq!(backend.next_value(&a).unwrap(), 301);
    assert_eq!(backend.next_value(&a).unwrap(), 302);
    assert_eq!(backend.next_value(&b).unwrap(), 301);

    let all = backend.list_all().unwrap();
    assert_eq!(all.get(&a), Some(&302));
    assert_eq!(all.get(&b), Some(&301));
}

fn run_set_value_moves_the_counter<B: SequenceBackend>(backend: B) {
    let key = SequenceKey::new("akdcah_seq");
    backend.next_value(&key).unwrap();
    backend.set_value(&key, 1200).unwrap();
    assert_eq!(backend.current_value(&key).unwrap(), 1200);
    assert_eq!(backend.next_value(&key).unwrap(), 1201);
}

fn run_all<F, B>(make: F)
where
    F: Fn() -> B,
    B: SequenceBackend,
{
    run_fresh_key_starts_above_floor(make());
    run_values_strictly_increase(make());
    run_current_value_is_idempotent(make());
    run_keys_are_independent(make());
    run_set_value_moves_the_counter(make());
}

#[test]
fn local_file_store_conformance() {
    let dir = tempfile::tempdir().unwrap();
    let counter = std::sync::atomic::AtomicU32::new(0);
    run_all(|| {
        let n = counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        LocalFileStore::new(dir.path().join(format!("state-{n}.json")))
    });
}

#[test]
fn tabular_store_conformance() {
    run_all(|| RemoteTabularStore::new(MemorySheet::default()).unwrap());
}

#[test]
fn rpc_store_conformance() {
    run_all(|| RemoteRpcStore::new(MemoryRpc::default()));
}

#[test]
fn versioned_store_conformance() {
    run_all(|| {
        VersionedFileStore::new(MemoryContent::default())
            .with_sleeper(Arc::new(RecordingSleep::default()))
    });
}

#[test]
fn shared_backend_is_usable_through_arc() {
    let backend: Arc<dyn SequenceBackend> = Arc::new(RemoteRpcStore::new(MemoryRpc::default()));
    run_values_strictly_increase(backend.clone());
    assert_eq!(backend.kind(), crate::BackendKind::RemoteRpc);
}

#[test]
fn custom_floor_is_honoured() {
    let dir = tempfile::tempdir().unwrap();
    let key = SequenceKey::new("akdcxx_seq");

    let local = LocalFileStore::new(dir.path().join("s.json")).with_floor(1000);
    assert_eq!(local.next_value(&key).unwrap(), 1001);

    let sheet = RemoteTabularStore::new(MemorySheet::default()).unwrap().with_floor(1000);
    assert_eq!(sheet.next_value(&key).unwrap(), 1001);

    let versioned = VersionedFileStore::new(MemoryContent::default()).with_floor(1000);
    assert_eq!(versioned.next_value(&key).unwrap(), 1001);
}
