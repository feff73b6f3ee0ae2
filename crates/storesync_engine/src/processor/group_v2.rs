//! Group v2 record processing.

use crate::error::SyncResult;
use crate::keygen::StorageKeyGenerator;
use crate::processor::RecordProcessor;
use crate::store::LocalStore;
use storesync_protocol::{GroupV2Record, SemanticKey, StorageId};
use tracing::{debug, warn};

/// Merges remote v2 group records into local group rows.
pub struct GroupV2Processor<'a, L: LocalStore + ?Sized> {
    store: &'a L,
    keygen: &'a dyn StorageKeyGenerator,
}

impl<'a, L: LocalStore + ?Sized> GroupV2Processor<'a, L> {
    /// Creates a processor over the given store.
    pub fn new(store: &'a L, keygen: &'a dyn StorageKeyGenerator) -> Self {
        Self { store, keygen }
    }
}

impl<L: LocalStore + ?Sized> RecordProcessor for GroupV2Processor<'_, L> {
    type Record = GroupV2Record;

    fn is_invalid(&self, remote: &GroupV2Record) -> bool {
        if !remote.has_valid_master_key() {
            warn!("bad v2 group master key, marking record invalid");
            return true;
        }
        false
    }

    fn matching(&self, remote: &GroupV2Record) -> Option<GroupV2Record> {
        self.store.group_v2_by_master_key(&remote.master_key)
    }

    fn merge(&self, remote: &GroupV2Record, local: &GroupV2Record) -> GroupV2Record {
        let merged = GroupV2Record {
            id: remote.id.clone(),
            master_key: remote.master_key.clone(),
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
            GroupV2Record {
                id: StorageId::for_group_v2(self.keygen.generate()),
                ..merged
            }
        }
    }

    fn semantic_key(&self, record: &GroupV2Record) -> SemanticKey {
        record.semantic_key()
    }

    fn insert_local(&self, record: GroupV2Record) -> SyncResult<()> {
        debug!("inserting local v2 group row");
        self.store.apply_group_v2_insert(record)
    }

    fn update_local(&self, old: &GroupV2Record, new: GroupV2Record) -> SyncResult<()> {
        debug!("updating local v2 group row");
        self.store.apply_group_v2_update(old, new)
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

    fn group(id_byte: u8, master_key: Vec<u8>) -> GroupV2Record {
        GroupV2Record::new(StorageId::for_group_v2(vec![id_byte; 16]), master_key)
    }

    #[test]
    fn short_master_keys_are_invalid() {
        let store = store();
        let keygen = SequenceKeyGenerator::default();
        let processor = GroupV2Processor::new(&store, &keygen);

        assert!(processor.is_invalid(&group(1, vec![1; 31])));
        assert!(!processor.is_invalid(&group(1, vec![1; 32])));
    }

    #[test]
    fn merge_prefers_remote_when_identical_to_merged() {
        let store = store();
        let keygen = SequenceKeyGenerator::default();
        let processor = GroupV2Processor::new(&store, &keygen);

        let mut remote = group(1, vec![1; 32]);
        remote.forced_unread = true;
        let local = group(2, vec![1; 32]);

        let merged = processor.merge(&remote, &local);
        assert_eq!(merged, remote);
        assert_eq!(merged.id, remote.id);
    }
}
