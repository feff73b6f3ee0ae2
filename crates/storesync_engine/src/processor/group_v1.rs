//! Group v1 record processing.

use crate::error::SyncResult;
use crate::keygen::StorageKeyGenerator;
use crate::processor::RecordProcessor;
use crate::store::LocalStore;
use storesync_protocol::{GroupV1Record, SemanticKey, StorageId};
use tracing::{debug, warn};

/// Merges remote v1 group records into local group rows.
pub struct GroupV1Processor<'a, L: LocalStore + ?Sized> {
    store: &'a L,
    keygen: &'a dyn StorageKeyGenerator,
}

impl<'a, L: LocalStore + ?Sized> GroupV1Processor<'a, L> {
    /// Creates a processor over the given store.
    pub fn new(store: &'a L, keygen: &'a dyn StorageKeyGenerator) -> Self {
        Self { store, keygen }
    }
}

impl<L: LocalStore + ?Sized> RecordProcessor for GroupV1Processor<'_, L> {
    type Record = GroupV1Record;

    /// A v1 group record is invalid when its group ID is malformed, or
    /// when the group has already been migrated to v2 — keeping the stale
    /// v1 snapshot around would resurrect the pre-migration group.
    fn is_invalid(&self, remote: &GroupV1Record) -> bool {
        if !remote.has_valid_group_id() {
            warn!("bad v1 group ID, marking record invalid");
            return true;
        }
        if self.store.has_group_v2_migration(&remote.group_id) {
            warn!("v1 group already migrated to v2, marking record invalid");
            return true;
        }
        false
    }

    fn matching(&self, remote: &GroupV1Record) -> Option<GroupV1Record> {
        self.store.group_v1_by_id(&remote.group_id)
    }

    fn merge(&self, remote: &GroupV1Record, local: &GroupV1Record) -> GroupV1Record {
        let merged = GroupV1Record {
            id: remote.id.clone(),
            group_id: remote.group_id.clone(),
            blocked: remote.blocked || local.blocked,
            profile_sharing_enabled: remote.profile_sharing_enabled
                || local.profile_sharing_enabled,
            archived: remote.archived || local.archived,
            forced_unread: remote.forced_unread || local.forced_unread,
            mute_until: remote.mute_until.max(local.mute_until),
            unknown_fields: remote.unknown_fields.clone(),
        };

        if merged.attributes_match(remote) {
            remote.clone()
        } else if merged.attributes_match(local) {
            local.clone()
        } else {
            GroupV1Record {
                id: StorageId::for_group_v1(self.keygen.generate()),
                ..merged
            }
        }
    }

    fn semantic_key(&self, record: &GroupV1Record) -> SemanticKey {
        record.semantic_key()
    }

    fn insert_local(&self, record: GroupV1Record) -> SyncResult<()> {
        debug!("inserting local v1 group row");
        self.store.apply_group_v1_insert(record)
    }

    fn update_local(&self, old: &GroupV1Record, new: GroupV1Record) -> SyncResult<()> {
        debug!("updating local v1 group row");
        self.store.apply_group_v1_update(old, new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keygen::SequenceKeyGenerator;
    use crate::memory::MemoryLocalStore;
    use crate::service::StorageKey;

    fn store() -> MemoryLocalStore {
        MemoryLocalStore::ready("self-id", StorageKey::from_bytes([0; 32]))
    }

    fn group(id_byte: u8, group_id: Vec<u8>) -> GroupV1Record {
        GroupV1Record::new(StorageId::for_group_v1(vec![id_byte; 16]), group_id)
    }

    #[test]
    fn malformed_group_ids_are_invalid() {
        let store = store();
        let keygen = SequenceKeyGenerator::default();
        let processor = GroupV1Processor::new(&store, &keygen);

        assert!(processor.is_invalid(&group(1, vec![1; 9])));
        assert!(!processor.is_invalid(&group(1, vec![1; 16])));
    }

    #[test]
    fn migrated_groups_are_invalid() {
        let store = store();
        store.add_group_v2_migration(vec![7; 16]);
        let keygen = SequenceKeyGenerator::default();
        let processor = GroupV1Processor::new(&store, &keygen);

        assert!(processor.is_invalid(&group(1, vec![7; 16])));
        assert!(!processor.is_invalid(&group(1, vec![8; 16])));
    }

    #[test]
    fn gv1_merge_uses_profile_sharing_not_blocked() {
        let store = store();
        let keygen = SequenceKeyGenerator::default();
        let processor = GroupV1Processor::new(&store, &keygen);

        let mut remote = group(1, vec![7; 16]);
        remote.blocked = true;

        let mut local = group(2, vec![7; 16]);
        local.profile_sharing_enabled = true;

        let merged = processor.merge(&remote, &local);
        assert!(merged.blocked);
        assert!(merged.profile_sharing_enabled);

        // Blocking alone must not flip profile sharing on.
        let plain_local = group(3, vec![7; 16]);
        let merged = processor.merge(&remote, &plain_local);
        assert!(merged.blocked);
        assert!(!merged.profile_sharing_enabled);
    }
}
