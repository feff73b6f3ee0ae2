//! Remote storage service abstraction.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::fmt;
use storesync_protocol::{Manifest, StorageId, StorageRecord};

/// Width of the root storage key, in bytes.
pub const STORAGE_KEY_LEN: usize = 32;

/// The root key scoping all storage-service requests to one account.
///
/// Record encryption happens below the [`StorageService`] boundary and is
/// not this subsystem's concern; the key is only carried through.
#[derive(Clone, PartialEq, Eq)]
pub struct StorageKey([u8; STORAGE_KEY_LEN]);

impl StorageKey {
    /// Creates a storage key from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; STORAGE_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; STORAGE_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never log key material.
        write!(f, "StorageKey(..)")
    }
}

/// The remote storage service.
///
/// The service is a dumb blob store with compare-and-set writes: it never
/// merges, and it only accepts a manifest whose version is exactly one
/// greater than the version it currently holds.
pub trait StorageService: Send + Sync {
    /// Returns the manifest iff the server's version differs from
    /// `known_version`.
    fn manifest_if_different(
        &self,
        key: &StorageKey,
        known_version: u64,
    ) -> SyncResult<Option<Manifest>>;

    /// Reads the records for the requested IDs.
    ///
    /// IDs the server no longer holds are silently omitted; callers must
    /// compare the result count against the request count.
    fn read_records(&self, key: &StorageKey, ids: &[StorageId]) -> SyncResult<Vec<StorageRecord>>;

    /// Atomically writes a new manifest plus record inserts and deletes.
    ///
    /// The write is conditional on `manifest.version - 1` matching the
    /// server's current version. On mismatch the server's current manifest
    /// is returned and nothing is written.
    fn write_records(
        &self,
        key: &StorageKey,
        manifest: &Manifest,
        inserts: &[StorageRecord],
        deletes: &[Vec<u8>],
    ) -> SyncResult<Option<Manifest>>;
}

/// A recorded `write_records` call.
#[derive(Debug, Clone)]
pub struct RecordedWrite {
    /// The manifest that was pushed.
    pub manifest: Manifest,
    /// The inserted records.
    pub inserts: Vec<StorageRecord>,
    /// The deleted raw IDs.
    pub deletes: Vec<Vec<u8>>,
}

/// A scripted storage service for unit tests.
///
/// Responses are set ahead of time; every write is recorded for
/// inspection. Unset responses produce an empty/`None` result rather than
/// an error so simple tests stay short.
#[derive(Default)]
pub struct MockStorageService {
    manifest_response: Mutex<Option<Manifest>>,
    read_response: Mutex<Vec<StorageRecord>>,
    write_conflict: Mutex<Option<Manifest>>,
    fail_next: Mutex<Option<SyncError>>,
    writes: Mutex<Vec<RecordedWrite>>,
}

impl MockStorageService {
    /// Creates a new mock with no scripted responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the manifest returned by `manifest_if_different`.
    pub fn set_manifest(&self, manifest: Option<Manifest>) {
        *self.manifest_response.lock() = manifest;
    }

    /// Scripts the records returned by `read_records`.
    pub fn set_records(&self, records: Vec<StorageRecord>) {
        *self.read_response.lock() = records;
    }

    /// Scripts a conflict for the next `write_records` call.
    pub fn set_write_conflict(&self, manifest: Option<Manifest>) {
        *self.write_conflict.lock() = manifest;
    }

    /// Scripts an error for the next RPC of any kind.
    pub fn fail_next(&self, error: SyncError) {
        *self.fail_next.lock() = Some(error);
    }

    /// Returns every recorded write.
    #[must_use]
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().clone()
    }

    fn take_failure(&self) -> SyncResult<()> {
        match self.fail_next.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl StorageService for MockStorageService {
    fn manifest_if_different(
        &self,
        _key: &StorageKey,
        known_version: u64,
    ) -> SyncResult<Option<Manifest>> {
        self.take_failure()?;
        Ok(self
            .manifest_response
            .lock()
            .clone()
            .filter(|manifest| manifest.version > known_version))
    }

    fn read_records(&self, _key: &StorageKey, ids: &[StorageId]) -> SyncResult<Vec<StorageRecord>> {
        self.take_failure()?;
        let scripted = self.read_response.lock();
        Ok(ids
            .iter()
            .filter_map(|id| scripted.iter().find(|record| record.id() == id))
            .cloned()
            .collect())
    }

    fn write_records(
        &self,
        _key: &StorageKey,
        manifest: &Manifest,
        inserts: &[StorageRecord],
        deletes: &[Vec<u8>],
    ) -> SyncResult<Option<Manifest>> {
        self.take_failure()?;
        if let Some(conflict) = self.write_conflict.lock().take() {
            return Ok(Some(conflict));
        }
        self.writes.lock().push(RecordedWrite {
            manifest: manifest.clone(),
            inserts: inserts.to_vec(),
            deletes: deletes.to_vec(),
        });
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storesync_protocol::StorageId;

    #[test]
    fn debug_redacts_key_material() {
        let key = StorageKey::from_bytes([0xAB; 32]);
        assert_eq!(format!("{key:?}"), "StorageKey(..)");
    }

    #[test]
    fn mock_manifest_respects_known_version() {
        let mock = MockStorageService::new();
        mock.set_manifest(Some(Manifest::new(5, vec![])));

        let key = StorageKey::from_bytes([0; 32]);
        assert!(mock.manifest_if_different(&key, 4).unwrap().is_some());
        assert!(mock.manifest_if_different(&key, 5).unwrap().is_none());
    }

    #[test]
    fn mock_read_omits_missing_ids() {
        let mock = MockStorageService::new();
        let key = StorageKey::from_bytes([0; 32]);

        let held = StorageId::for_contact(vec![1; 16]);
        let missing = StorageId::for_contact(vec![2; 16]);
        mock.set_records(vec![StorageRecord::Unknown(
            storesync_protocol::UnknownRecord::new(held.clone(), vec![]),
        )]);

        // The mock only matches by exact ID, so the missing one is omitted.
        let got = mock
            .read_records(&key, &[held.clone(), missing])
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id(), &held);
    }
}
