//! Write-operation assembly.
//!
//! A [`WriteOperationResult`] is the unit of remote mutation: one new
//! manifest plus the record inserts and raw-ID deletes that take the
//! server from the previous manifest to it. Two builders produce them:
//! [`create_merge_write`] from the per-kind processor results, and
//! [`build_local_write`] from the local store's dirty rows.

use crate::keygen::StorageKeyGenerator;
use crate::processor::ProcessResult;
use crate::store::{PendingAccountChange, PendingChange, PendingDelete, RowId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use storesync_protocol::{
    AccountRecord, ContactRecord, GroupV1Record, GroupV2Record, Manifest, StorageId, StorageRecord,
};

/// A manifest plus the record mutations that produce it.
#[derive(Debug, Clone)]
pub struct WriteOperationResult {
    /// The manifest to upload.
    pub manifest: Manifest,
    /// Records to insert.
    pub inserts: Vec<StorageRecord>,
    /// Raw IDs to delete.
    pub deletes: Vec<Vec<u8>>,
}

impl WriteOperationResult {
    /// True if there is nothing to write remotely.
    ///
    /// The manifest alone does not count: a version bump with no record
    /// mutations is never uploaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.deletes.is_empty()
    }
}

impl fmt::Display for WriteOperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "manifest v{} with {} IDs, {} inserts, {} deletes",
            self.manifest.version,
            self.manifest.storage_ids.len(),
            self.inserts.len(),
            self.deletes.len()
        )
    }
}

/// Assembles the remote write for the merge phase.
///
/// Every update contributes its new side as an insert and its old side's
/// raw ID as a delete; invalid and duplicate records contribute deletes.
/// The manifest is the post-merge local ID set under `remote_version + 1`.
#[must_use]
pub fn create_merge_write(
    remote_version: u64,
    post_merge_local_ids: Vec<StorageId>,
    contacts: ProcessResult<ContactRecord>,
    groups_v1: ProcessResult<GroupV1Record>,
    groups_v2: ProcessResult<GroupV2Record>,
    account: ProcessResult<AccountRecord>,
) -> WriteOperationResult {
    let mut inserts = Vec::new();
    let mut deletes = Vec::new();

    fold_result(contacts, &mut inserts, &mut deletes);
    fold_result(groups_v1, &mut inserts, &mut deletes);
    fold_result(groups_v2, &mut inserts, &mut deletes);
    fold_result(account, &mut inserts, &mut deletes);

    WriteOperationResult {
        manifest: Manifest::new(remote_version + 1, post_merge_local_ids),
        inserts,
        deletes,
    }
}

fn fold_result<R: Into<StorageRecord>>(
    result: ProcessResult<R>,
    inserts: &mut Vec<StorageRecord>,
    deletes: &mut Vec<Vec<u8>>,
) {
    for update in result.remote_updates {
        let old: StorageRecord = update.old.into();
        deletes.push(old.id().raw().to_vec());
        inserts.push(update.new.into());
    }
    for delete in result.remote_deletes {
        let record: StorageRecord = delete.into();
        deletes.push(record.id().raw().to_vec());
    }
}

/// The remote write for pending local changes, plus the storage-ID
/// rotations to apply locally once the push succeeds.
#[derive(Debug, Clone)]
pub struct LocalWriteResult {
    /// The write to push.
    pub write: WriteOperationResult,
    /// New storage IDs per contributing row.
    pub storage_id_updates: HashMap<RowId, StorageId>,
}

/// Builds the remote write for the local store's dirty rows.
///
/// Every pending update and insert gets a freshly minted storage ID;
/// updates and deletions remove the row's current ID from the manifest.
/// Returns `None` when nothing is pending.
#[must_use]
pub fn build_local_write(
    current_version: u64,
    all_local_ids: Vec<StorageId>,
    pending_updates: &[PendingChange],
    pending_inserts: &[PendingChange],
    pending_deletes: &[PendingDelete],
    pending_account: Option<&PendingAccountChange>,
    keygen: &dyn StorageKeyGenerator,
) -> Option<LocalWriteResult> {
    if pending_updates.is_empty()
        && pending_inserts.is_empty()
        && pending_deletes.is_empty()
        && pending_account.is_none()
    {
        return None;
    }

    let mut inserts = Vec::new();
    let mut deletes = Vec::new();
    let mut removed: HashSet<StorageId> = HashSet::new();
    let mut storage_id_updates: HashMap<RowId, StorageId> = HashMap::new();

    for change in pending_updates {
        let old_id = change.record.id().clone();
        let new_record = change.record.with_raw_id(keygen.generate());
        deletes.push(old_id.raw().to_vec());
        removed.insert(old_id);
        storage_id_updates.insert(change.row, new_record.id().clone());
        inserts.push(new_record);
    }

    for change in pending_inserts {
        let new_record = change.record.with_raw_id(keygen.generate());
        storage_id_updates.insert(change.row, new_record.id().clone());
        inserts.push(new_record);
    }

    for delete in pending_deletes {
        deletes.push(delete.id.raw().to_vec());
        removed.insert(delete.id.clone());
    }

    if let Some(account) = pending_account {
        let new_record =
            StorageRecord::Account(account.record.clone()).with_raw_id(keygen.generate());
        if !account.is_insert {
            let old_id = account.record.id.clone();
            deletes.push(old_id.raw().to_vec());
            removed.insert(old_id);
        }
        storage_id_updates.insert(account.row, new_record.id().clone());
        inserts.push(new_record);
    }

    let mut manifest_ids: Vec<StorageId> = all_local_ids
        .into_iter()
        .filter(|id| !removed.contains(id))
        .collect();
    manifest_ids.extend(inserts.iter().map(|record| record.id().clone()));

    Some(LocalWriteResult {
        write: WriteOperationResult {
            manifest: Manifest::new(current_version + 1, manifest_ids),
            inserts,
            deletes,
        },
        storage_id_updates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keygen::SequenceKeyGenerator;
    use crate::processor::RecordUpdate;
    use storesync_protocol::ServiceAddress;

    fn contact(id_byte: u8, service_id: &str) -> ContactRecord {
        ContactRecord::new(
            StorageId::for_contact(vec![id_byte; 16]),
            ServiceAddress::from_service_id(service_id),
        )
    }

    #[test]
    fn merge_write_pairs_update_sides() {
        let old = contact(1, "a");
        let new = contact(2, "a");
        let contacts = ProcessResult {
            remote_updates: vec![RecordUpdate {
                old: old.clone(),
                new: new.clone(),
            }],
            remote_deletes: vec![contact(3, "b")],
        };

        let write = create_merge_write(
            6,
            vec![new.id.clone()],
            contacts,
            ProcessResult::empty(),
            ProcessResult::empty(),
            ProcessResult::empty(),
        );

        assert_eq!(write.manifest.version, 7);
        assert_eq!(write.inserts.len(), 1);
        assert_eq!(write.inserts[0].id(), &new.id);
        assert_eq!(write.deletes, vec![vec![1u8; 16], vec![3u8; 16]]);
        assert!(!write.is_empty());
    }

    #[test]
    fn empty_merge_write_emits_nothing() {
        let write = create_merge_write(
            4,
            vec![],
            ProcessResult::<ContactRecord>::empty(),
            ProcessResult::empty(),
            ProcessResult::empty(),
            ProcessResult::empty(),
        );
        assert!(write.is_empty());
    }

    #[test]
    fn local_write_rotates_updated_rows() {
        let keygen = SequenceKeyGenerator::default();
        let record = contact(1, "a");
        let old_id = record.id.clone();

        let result = build_local_write(
            5,
            vec![old_id.clone()],
            &[PendingChange {
                row: RowId(1),
                record: record.into(),
            }],
            &[],
            &[],
            None,
            &keygen,
        )
        .unwrap();

        let write = &result.write;
        assert_eq!(write.manifest.version, 6);
        assert_eq!(write.inserts.len(), 1);
        assert_eq!(write.deletes, vec![old_id.raw().to_vec()]);

        let new_id = write.inserts[0].id();
        assert_ne!(new_id, &old_id);
        assert!(write.manifest.contains(new_id));
        assert!(!write.manifest.contains(&old_id));
        assert_eq!(result.storage_id_updates.get(&RowId(1)), Some(new_id));
    }

    #[test]
    fn local_write_for_account_insert_has_no_delete() {
        let keygen = SequenceKeyGenerator::default();
        let account = AccountRecord::new(StorageId::for_account(vec![0; 16]), "self");

        let result = build_local_write(
            0,
            vec![],
            &[],
            &[],
            &[],
            Some(&PendingAccountChange {
                row: RowId(0),
                record: account,
                is_insert: true,
            }),
            &keygen,
        )
        .unwrap();

        assert!(result.write.deletes.is_empty());
        assert_eq!(result.write.inserts.len(), 1);
        assert_eq!(result.write.manifest.version, 1);
    }

    #[test]
    fn no_pending_work_builds_nothing() {
        let keygen = SequenceKeyGenerator::default();
        assert!(build_local_write(5, vec![], &[], &[], &[], None, &keygen).is_none());
    }
}
