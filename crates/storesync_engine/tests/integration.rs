//! Integration tests for the sync engine against an in-memory storage
//! service with real compare-and-set semantics.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use storesync_engine::{
    DirtyState, LocalStore, MemoryLocalStore, SequenceKeyGenerator, StorageKey, StorageService,
    SyncConfig, SyncEngine, SyncError, SyncResult,
};
use storesync_protocol::{
    ContactRecord, Manifest, RecordType, ServiceAddress, StorageId, StorageRecord, UnknownRecord,
};

/// An in-memory storage service with the real compare-and-set contract.
///
/// Every RPC asserts the local store's transaction is closed, which pins
/// down the "no network I/O inside the transaction" invariant.
struct InMemoryServer {
    manifest: Mutex<Manifest>,
    records: Mutex<HashMap<StorageId, StorageRecord>>,
    store: Arc<MemoryLocalStore>,
    conflict_once: AtomicBool,
    write_count: AtomicU64,
    rpc_count: AtomicU64,
}

impl InMemoryServer {
    fn new(store: Arc<MemoryLocalStore>) -> Self {
        Self {
            manifest: Mutex::new(Manifest::new(0, vec![])),
            records: Mutex::new(HashMap::new()),
            store,
            conflict_once: AtomicBool::new(false),
            write_count: AtomicU64::new(0),
            rpc_count: AtomicU64::new(0),
        }
    }

    fn seed(&self, manifest: Manifest, records: Vec<StorageRecord>) {
        *self.records.lock() = records
            .into_iter()
            .map(|record| (record.id().clone(), record))
            .collect();
        *self.manifest.lock() = manifest;
    }

    /// Drops a record's payload while leaving its ID in the manifest.
    fn drop_record(&self, id: &StorageId) {
        self.records.lock().remove(id);
    }

    fn force_conflict_once(&self) {
        self.conflict_once.store(true, Ordering::SeqCst);
    }

    fn manifest(&self) -> Manifest {
        self.manifest.lock().clone()
    }

    fn record(&self, id: &StorageId) -> Option<StorageRecord> {
        self.records.lock().get(id).cloned()
    }

    fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::SeqCst)
    }

    fn rpc_count(&self) -> u64 {
        self.rpc_count.load(Ordering::SeqCst)
    }

    fn observe_rpc(&self) {
        self.rpc_count.fetch_add(1, Ordering::SeqCst);
        assert!(
            !self.store.in_transaction(),
            "RPC issued while the local transaction was open"
        );
    }
}

impl StorageService for InMemoryServer {
    fn manifest_if_different(
        &self,
        _key: &StorageKey,
        known_version: u64,
    ) -> SyncResult<Option<Manifest>> {
        self.observe_rpc();
        let manifest = self.manifest.lock();
        if manifest.version > known_version {
            Ok(Some(manifest.clone()))
        } else {
            Ok(None)
        }
    }

    fn read_records(&self, _key: &StorageKey, ids: &[StorageId]) -> SyncResult<Vec<StorageRecord>> {
        self.observe_rpc();
        let records = self.records.lock();
        Ok(ids.iter().filter_map(|id| records.get(id).cloned()).collect())
    }

    fn write_records(
        &self,
        _key: &StorageKey,
        manifest: &Manifest,
        inserts: &[StorageRecord],
        deletes: &[Vec<u8>],
    ) -> SyncResult<Option<Manifest>> {
        self.observe_rpc();
        let mut current = self.manifest.lock();

        if self.conflict_once.swap(false, Ordering::SeqCst)
            || manifest.version != current.version + 1
        {
            return Ok(Some(current.clone()));
        }

        let mut records = self.records.lock();
        for raw in deletes {
            records.retain(|id, _| id.raw() != raw.as_slice());
        }
        for record in inserts {
            records.insert(record.id().clone(), record.clone());
        }
        *current = manifest.clone();
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

struct Harness {
    engine: SyncEngine<InMemoryServer, MemoryLocalStore>,
}

impl Harness {
    fn new() -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let store = Arc::new(MemoryLocalStore::ready(
            "self-id",
            StorageKey::from_bytes([7; 32]),
        ));
        let server = Arc::new(InMemoryServer::new(Arc::clone(&store)));
        let engine = SyncEngine::new(
            SyncConfig::new(),
            server,
            store,
            Arc::new(SequenceKeyGenerator::starting_at(1000)),
        );
        Self { engine }
    }

    fn store(&self) -> &MemoryLocalStore {
        self.engine.store()
    }

    fn server(&self) -> &InMemoryServer {
        self.engine.service()
    }

    /// Seeds the server so its manifest exactly mirrors current local
    /// state at the given version, and persists that version locally.
    fn converge_at(&self, version: u64) {
        let ids = self.store().all_storage_ids();
        let records = ids
            .iter()
            .map(|id| self.store().record_by_storage_id(id).unwrap())
            .collect();
        self.server().seed(Manifest::new(version, ids), records);
        self.store().set_manifest_version(version);
    }
}

fn contact(id_byte: u8, service_id: &str) -> ContactRecord {
    ContactRecord::new(
        StorageId::for_contact(vec![id_byte; 16]),
        ServiceAddress::from_service_id(service_id),
    )
}

#[test]
fn s1_same_versions_probe_only() {
    let harness = Harness::new();
    harness.store().seed_contact(contact(1, "k1"));
    harness.converge_at(4);

    let report = harness.engine.sync().unwrap();

    assert!(!report.needs_multi_device_sync);
    assert_eq!(harness.store().manifest_version(), 4);
    assert_eq!(harness.server().write_count(), 0);
    // Exactly one RPC: the manifest-if-different probe.
    assert_eq!(harness.server().rpc_count(), 1);
}

#[test]
fn s2_remote_only_contact_materialises_locally() {
    let harness = Harness::new();
    harness.store().set_manifest_version(4);

    let mut remote = contact(1, "k1");
    remote.blocked = true;
    let remote_id = remote.id.clone();
    harness.server().seed(
        Manifest::new(5, vec![remote_id.clone()]),
        vec![StorageRecord::Contact(remote)],
    );

    let report = harness.engine.sync().unwrap();

    let local = harness
        .store()
        .contact_by_address(&ServiceAddress::from_service_id("k1"))
        .unwrap();
    assert!(local.blocked);
    assert_eq!(local.id, remote_id);
    assert_eq!(harness.store().manifest_version(), 5);
    assert_eq!(harness.server().write_count(), 0);
    assert!(!report.needs_multi_device_sync);
}

#[test]
fn s3_dirty_local_row_pushes_rotation() {
    let harness = Harness::new();
    let record = contact(1, "k1");
    let old_id = record.id.clone();
    let row = harness.store().seed_contact(record);
    harness.converge_at(5);
    harness.store().mark_dirty(row, DirtyState::PendingUpdate);

    let report = harness.engine.sync().unwrap();

    let server_manifest = harness.server().manifest();
    assert_eq!(server_manifest.version, 6);
    assert_eq!(harness.store().manifest_version(), 6);
    assert!(!server_manifest.contains(&old_id));
    assert_eq!(server_manifest.storage_ids.len(), 1);
    assert_eq!(harness.store().dirty_state(row), Some(DirtyState::Clean));
    assert!(report.needs_multi_device_sync);

    // The local row now carries the freshly minted ID the server holds.
    let new_id = server_manifest.storage_ids[0].clone();
    assert_ne!(new_id, old_id);
    assert_eq!(harness.store().contact_records()[0].id, new_id);
}

#[test]
fn s4_concurrent_edits_merge_and_advance() {
    let harness = Harness::new();
    let mut local = contact(1, "k1");
    local.archived = true;
    let local_id = local.id.clone();
    harness.store().seed_contact(local);
    harness.store().set_manifest_version(5);

    let mut remote = contact(2, "k1");
    remote.blocked = true;
    let remote_id = remote.id.clone();
    harness.server().seed(
        Manifest::new(6, vec![remote_id.clone()]),
        vec![StorageRecord::Contact(remote)],
    );

    let report = harness.engine.sync().unwrap();

    let merged = harness.store().contact_records()[0].clone();
    assert!(merged.blocked);
    assert!(merged.archived);
    assert_ne!(merged.id, local_id);
    assert_ne!(merged.id, remote_id);

    let server_manifest = harness.server().manifest();
    assert_eq!(server_manifest.version, 7);
    assert_eq!(harness.store().manifest_version(), 7);
    assert_eq!(server_manifest.storage_ids, vec![merged.id.clone()]);
    assert_eq!(
        harness.server().record(&merged.id).unwrap(),
        StorageRecord::Contact(merged)
    );
    assert!(report.needs_multi_device_sync);
}

#[test]
fn s5_semantic_duplicates_coalesce() {
    let harness = Harness::new();
    harness.store().seed_contact(contact(9, "k1"));
    harness.converge_at(5);
    // Lose the server's copy of local state and replace it with two
    // records claiming the same contact.
    let dupe_a = contact(1, "k1");
    let dupe_b = contact(2, "k1");
    harness.server().seed(
        Manifest::new(6, vec![dupe_a.id.clone(), dupe_b.id.clone()]),
        vec![
            StorageRecord::Contact(dupe_a),
            StorageRecord::Contact(dupe_b),
        ],
    );

    harness.engine.sync().unwrap();

    // Exactly one contact row locally and one contact ID on the server.
    assert_eq!(harness.store().contact_records().len(), 1);
    let server_manifest = harness.server().manifest();
    let contact_ids: Vec<_> = server_manifest
        .storage_ids
        .iter()
        .filter(|id| id.record_type() == RecordType::Contact)
        .collect();
    assert_eq!(contact_ids.len(), 1);
}

#[test]
fn s6_conflict_preserves_dirty_state_and_version() {
    let harness = Harness::new();
    let record = contact(1, "k1");
    let row = harness.store().seed_contact(record);
    harness.converge_at(5);
    harness.store().mark_dirty(row, DirtyState::PendingUpdate);
    harness.server().force_conflict_once();

    let error = harness.engine.sync().unwrap_err();

    assert!(matches!(error, SyncError::RemoteConflict { .. }));
    assert!(error.is_retry_later());
    assert_eq!(harness.store().manifest_version(), 5);
    assert_eq!(
        harness.store().dirty_state(row),
        Some(DirtyState::PendingUpdate)
    );

    // The next invocation pushes cleanly.
    let report = harness.engine.sync().unwrap();
    assert!(report.needs_multi_device_sync);
    assert_eq!(harness.store().manifest_version(), 6);
    assert_eq!(harness.store().dirty_state(row), Some(DirtyState::Clean));
}

#[test]
fn unknown_records_round_trip_unchanged() {
    let harness = Harness::new();
    harness.store().set_manifest_version(0);

    let unknown = UnknownRecord::new(
        StorageId::new(RecordType::Unknown(9), vec![3; 16]),
        vec![0xCA, 0xFE, 0xBA, 0xBE],
    );
    harness.server().seed(
        Manifest::new(1, vec![unknown.id.clone()]),
        vec![StorageRecord::Unknown(unknown.clone())],
    );

    harness.engine.sync().unwrap();
    assert_eq!(harness.store().unknown_records(), vec![unknown.clone()]);

    // A later local change must carry the unknown ID forward untouched.
    let row = harness.store().seed_contact(contact(1, "k1"));
    harness.store().mark_dirty(row, DirtyState::PendingInsert);
    harness.engine.sync().unwrap();

    let server_manifest = harness.server().manifest();
    assert!(server_manifest.contains(&unknown.id));
    assert_eq!(
        harness.server().record(&unknown.id).unwrap(),
        StorageRecord::Unknown(unknown)
    );
}

#[test]
fn noop_sync_is_idempotent() {
    let harness = Harness::new();
    let row = harness.store().seed_contact(contact(1, "k1"));
    harness.store().mark_dirty(row, DirtyState::PendingUpdate);

    harness.engine.sync().unwrap();
    let writes_after_first = harness.server().write_count();
    assert_eq!(writes_after_first, 1);

    let report = harness.engine.sync().unwrap();
    assert_eq!(harness.server().write_count(), writes_after_first);
    assert!(!report.needs_multi_device_sync);
}

#[test]
fn manifest_version_is_monotonic() {
    let harness = Harness::new();
    let mut seen = vec![harness.store().manifest_version()];

    for byte in 1..5u8 {
        let row = harness
            .store()
            .seed_contact(contact(byte, &format!("k{byte}")));
        harness.store().mark_dirty(row, DirtyState::PendingInsert);
        harness.engine.sync().unwrap();
        seen.push(harness.store().manifest_version());
    }

    assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(harness.store().manifest_version(), 4);
}

#[test]
fn short_record_reads_flag_a_force_push() {
    let harness = Harness::new();
    let present = contact(1, "k1");
    let missing = contact(2, "k2");
    let missing_id = missing.id.clone();
    harness.server().seed(
        Manifest::new(1, vec![present.id.clone(), missing_id.clone()]),
        vec![
            StorageRecord::Contact(present),
            StorageRecord::Contact(missing),
        ],
    );
    harness.server().drop_record(&missing_id);

    let report = harness.engine.sync().unwrap();
    assert!(report.needs_force_push);

    // The record that did come back still merged.
    assert_eq!(harness.store().contact_records().len(), 1);
}

#[test]
fn type_mismatched_ids_flag_a_force_push() {
    let harness = Harness::new();
    harness.store().seed_contact(contact(1, "k1"));
    harness.converge_at(3);

    // Same raw bytes as the local contact ID, but group-typed.
    let mismatched = StorageId::for_group_v1(vec![1; 16]);
    let mut manifest = harness.server().manifest();
    manifest.version = 4;
    manifest.storage_ids.push(mismatched.clone());
    let mut records: Vec<StorageRecord> = manifest
        .storage_ids
        .iter()
        .filter_map(|id| harness.server().record(id))
        .collect();
    records.push(StorageRecord::GroupV1(storesync_protocol::GroupV1Record::new(
        mismatched,
        vec![5; 16],
    )));
    harness.server().seed(manifest, records);

    let report = harness.engine.sync().unwrap();
    assert!(report.needs_force_push);
}

#[test]
fn convergence_reaches_a_fixed_point() {
    let harness = Harness::new();

    // Independent edits on both sides.
    let row_a = harness.store().seed_contact(contact(1, "a"));
    harness.store().mark_dirty(row_a, DirtyState::PendingInsert);
    let row_b = harness.store().seed_contact(contact(2, "b"));
    harness.store().mark_dirty(row_b, DirtyState::PendingUpdate);

    let mut remote = contact(3, "c");
    remote.blocked = true;
    harness.server().seed(
        Manifest::new(1, vec![remote.id.clone()]),
        vec![StorageRecord::Contact(remote)],
    );
    // The local row for "b" claims an ID the server never saw, so the
    // first cycle reconciles it as a leftover insert.

    for _ in 0..4 {
        harness.engine.sync().unwrap();
    }

    let server_manifest = harness.server().manifest();
    let mut server_ids = server_manifest.storage_ids.clone();
    let mut local_ids = harness.store().all_storage_ids();
    server_ids.sort();
    local_ids.sort();

    assert_eq!(server_ids, local_ids);
    assert_eq!(server_manifest.version, harness.store().manifest_version());
    assert_eq!(harness.store().contact_records().len(), 3);

    // Fixed point: one more cycle writes nothing.
    let writes = harness.server().write_count();
    harness.engine.sync().unwrap();
    assert_eq!(harness.server().write_count(), writes);
}

#[test]
fn pending_deletes_destroy_rows_and_ids() {
    let harness = Harness::new();
    let keep = harness.store().seed_contact(contact(1, "keep"));
    let drop_row = harness.store().seed_contact(contact(2, "drop"));
    harness.converge_at(2);
    harness.store().mark_dirty(drop_row, DirtyState::PendingDelete);

    harness.engine.sync().unwrap();

    assert_eq!(harness.store().contact_records().len(), 1);
    let server_manifest = harness.server().manifest();
    assert_eq!(server_manifest.storage_ids.len(), 1);
    assert_eq!(harness.store().dirty_state(keep), Some(DirtyState::Clean));
    assert!(harness.store().dirty_state(drop_row).is_none());
}

mod convergence_properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Any mix of independent local and remote contact edits reaches a
        /// fixed point within a few cycles.
        #[test]
        fn random_edits_converge(
            remote_keys in proptest::collection::vec(0u8..5, 0..4),
            local_keys in proptest::collection::hash_set(5u8..10, 0..4),
        ) {
            let harness = Harness::new();

            let mut remote_ids = Vec::new();
            let mut remote_records = Vec::new();
            for (index, key) in remote_keys.iter().enumerate() {
                let mut record = contact(100 + index as u8, &format!("r{key}"));
                record.blocked = true;
                remote_ids.push(record.id.clone());
                remote_records.push(StorageRecord::Contact(record));
            }
            harness.server().seed(Manifest::new(1, remote_ids), remote_records);

            for (index, key) in local_keys.iter().enumerate() {
                let row = harness
                    .store()
                    .seed_contact(contact(200 + index as u8, &format!("l{key}")));
                harness.store().mark_dirty(row, DirtyState::PendingInsert);
            }

            for _ in 0..4 {
                harness.engine.sync().unwrap();
            }

            let mut server_ids = harness.server().manifest().storage_ids;
            let mut local_ids = harness.store().all_storage_ids();
            server_ids.sort();
            local_ids.sort();
            prop_assert_eq!(server_ids, local_ids);

            let writes = harness.server().write_count();
            harness.engine.sync().unwrap();
            prop_assert_eq!(harness.server().write_count(), writes);
        }
    }
}
