//! Contact record processing.

use crate::error::SyncResult;
use crate::keygen::StorageKeyGenerator;
use crate::processor::RecordProcessor;
use crate::store::LocalStore;
use storesync_protocol::{ContactRecord, SemanticKey, ServiceAddress, StorageId};
use tracing::debug;

/// Merges remote contact records into local contact rows.
pub struct ContactProcessor<'a, L: LocalStore + ?Sized> {
    store: &'a L,
    keygen: &'a dyn StorageKeyGenerator,
    self_id: String,
}

impl<'a, L: LocalStore + ?Sized> ContactProcessor<'a, L> {
    /// Creates a processor over the given store.
    pub fn new(store: &'a L, keygen: &'a dyn StorageKeyGenerator) -> Self {
        let self_id = store.self_id();
        Self {
            store,
            keygen,
            self_id,
        }
    }

    fn is_self(&self, address: &ServiceAddress) -> bool {
        address.service_id.as_deref() == Some(self.self_id.as_str())
    }
}

impl<L: LocalStore + ?Sized> RecordProcessor for ContactProcessor<'_, L> {
    type Record = ContactRecord;

    /// A contact record is invalid when it is unaddressable, or when it
    /// describes the owning user (the account record covers that).
    fn is_invalid(&self, remote: &ContactRecord) -> bool {
        !remote.address.is_matchable() || self.is_self(&remote.address)
    }

    fn matching(&self, remote: &ContactRecord) -> Option<ContactRecord> {
        self.store.contact_by_address(&remote.address)
    }

    fn merge(&self, remote: &ContactRecord, local: &ContactRecord) -> ContactRecord {
        let address = ServiceAddress::new(
            remote
                .address
                .service_id
                .clone()
                .or_else(|| local.address.service_id.clone()),
            remote
                .address
                .e164
                .clone()
                .or_else(|| local.address.e164.clone()),
        );
        let given_name = if remote.given_name.is_empty() {
            local.given_name.clone()
        } else {
            remote.given_name.clone()
        };
        let family_name = if remote.family_name.is_empty() {
            local.family_name.clone()
        } else {
            remote.family_name.clone()
        };
        let profile_key = remote
            .profile_key
            .clone()
            .or_else(|| local.profile_key.clone());

        let merged = ContactRecord {
            id: remote.id.clone(),
            address,
            given_name,
            family_name,
            profile_key,
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
            ContactRecord {
                id: StorageId::for_contact(self.keygen.generate()),
                ..merged
            }
        }
    }

    fn semantic_key(&self, record: &ContactRecord) -> SemanticKey {
        record.semantic_key()
    }

    fn insert_local(&self, record: ContactRecord) -> SyncResult<()> {
        debug!("inserting local contact row");
        self.store.apply_contact_insert(record)
    }

    fn update_local(&self, old: &ContactRecord, new: ContactRecord) -> SyncResult<()> {
        debug!("updating local contact row");
        self.store.apply_contact_update(old, new)
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

    fn contact(id_byte: u8, service_id: &str) -> ContactRecord {
        ContactRecord::new(
            StorageId::for_contact(vec![id_byte; 16]),
            ServiceAddress::from_service_id(service_id),
        )
    }

    #[test]
    fn unaddressable_and_self_records_are_invalid() {
        let store = store();
        let keygen = SequenceKeyGenerator::default();
        let processor = ContactProcessor::new(&store, &keygen);

        let unaddressable = ContactRecord::new(
            StorageId::for_contact(vec![1; 16]),
            ServiceAddress::default(),
        );
        assert!(processor.is_invalid(&unaddressable));

        let for_self = contact(2, "self-id");
        assert!(processor.is_invalid(&for_self));

        assert!(!processor.is_invalid(&contact(3, "friend")));
    }

    #[test]
    fn merge_ors_sticky_flags_and_maxes_mute() {
        let store = store();
        let keygen = SequenceKeyGenerator::default();
        let processor = ContactProcessor::new(&store, &keygen);

        let mut remote = contact(1, "friend");
        remote.blocked = true;
        remote.mute_until = 50;

        let mut local = contact(2, "friend");
        local.archived = true;
        local.mute_until = 100;

        let merged = processor.merge(&remote, &local);
        assert!(merged.blocked);
        assert!(merged.archived);
        assert_eq!(merged.mute_until, 100);
        // Differs from both sides, so the merged record got a fresh ID.
        assert_ne!(merged.id, remote.id);
        assert_ne!(merged.id, local.id);
    }

    #[test]
    fn merge_returns_remote_when_it_subsumes_local() {
        let store = store();
        let keygen = SequenceKeyGenerator::default();
        let processor = ContactProcessor::new(&store, &keygen);

        let mut remote = contact(1, "friend");
        remote.blocked = true;
        remote.given_name = "Ada".into();

        let local = contact(2, "friend");

        let merged = processor.merge(&remote, &local);
        assert_eq!(merged, remote);
    }

    #[test]
    fn merge_keeps_local_names_when_remote_is_blank() {
        let store = store();
        let keygen = SequenceKeyGenerator::default();
        let processor = ContactProcessor::new(&store, &keygen);

        let remote = contact(1, "friend");
        let mut local = contact(2, "friend");
        local.given_name = "Ada".into();
        local.family_name = "Lovelace".into();

        let merged = processor.merge(&remote, &local);
        assert_eq!(merged, local);
    }

    #[test]
    fn duplicate_remote_records_coalesce() {
        let store = store();
        store.seed_contact(contact(9, "friend"));
        let keygen = SequenceKeyGenerator::default();
        let processor = ContactProcessor::new(&store, &keygen);

        let first = contact(1, "friend");
        let second = contact(2, "friend");
        let result = processor.process(vec![first, second.clone()]).unwrap();

        assert_eq!(result.remote_deletes, vec![second]);
    }

    #[test]
    fn unmatched_records_insert_local_rows() {
        let store = store();
        let keygen = SequenceKeyGenerator::default();
        let processor = ContactProcessor::new(&store, &keygen);

        let remote = contact(1, "friend");
        let result = processor.process(vec![remote.clone()]).unwrap();

        assert!(result.is_local_only());
        assert_eq!(
            store.contact_by_address(&remote.address).unwrap(),
            remote
        );
    }
}
