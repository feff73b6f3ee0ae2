//! Account record processing.

use crate::error::SyncResult;
use crate::keygen::StorageKeyGenerator;
use crate::processor::RecordProcessor;
use crate::store::LocalStore;
use storesync_protocol::{AccountRecord, SemanticKey, StorageId};
use tracing::{debug, warn};

/// Merges the remote account record into local account settings.
///
/// There is exactly one account record per account; anything claiming a
/// different owner is invalid, and extra copies for the right owner fall
/// out through duplicate coalescing.
pub struct AccountProcessor<'a, L: LocalStore + ?Sized> {
    store: &'a L,
    keygen: &'a dyn StorageKeyGenerator,
    self_id: String,
}

impl<'a, L: LocalStore + ?Sized> AccountProcessor<'a, L> {
    /// Creates a processor over the given store.
    pub fn new(store: &'a L, keygen: &'a dyn StorageKeyGenerator) -> Self {
        let self_id = store.self_id();
        Self {
            store,
            keygen,
            self_id,
        }
    }
}

impl<L: LocalStore + ?Sized> RecordProcessor for AccountProcessor<'_, L> {
    type Record = AccountRecord;

    fn is_invalid(&self, remote: &AccountRecord) -> bool {
        if remote.self_id != self.self_id {
            warn!("remote account record names a different owner, marking invalid");
            return true;
        }
        false
    }

    fn matching(&self, _remote: &AccountRecord) -> Option<AccountRecord> {
        self.store.account_record()
    }

    fn merge(&self, remote: &AccountRecord, local: &AccountRecord) -> AccountRecord {
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
        let avatar_url = remote.avatar_url.clone().or_else(|| local.avatar_url.clone());

        // Preference toggles were adjusted on another device; remote wins.
        let merged = AccountRecord {
            id: remote.id.clone(),
            self_id: remote.self_id.clone(),
            given_name,
            family_name,
            avatar_url,
            read_receipts: remote.read_receipts,
            typing_indicators: remote.typing_indicators,
            link_previews: remote.link_previews,
            note_to_self_archived: remote.note_to_self_archived,
            unknown_fields: remote.unknown_fields.clone(),
        };

        if merged.attributes_match(remote) {
            remote.clone()
        } else if merged.attributes_match(local) {
            local.clone()
        } else {
            AccountRecord {
                id: StorageId::for_account(self.keygen.generate()),
                ..merged
            }
        }
    }

    fn semantic_key(&self, record: &AccountRecord) -> SemanticKey {
        record.semantic_key()
    }

    fn insert_local(&self, record: AccountRecord) -> SyncResult<()> {
        debug!("initialising local account settings from remote record");
        self.store.apply_account_insert(record)
    }

    fn update_local(&self, old: &AccountRecord, new: AccountRecord) -> SyncResult<()> {
        debug!("updating local account settings");
        self.store.apply_account_update(old, new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keygen::SequenceKeyGenerator;
    use crate::memory::MemoryLocalStore;
    use crate::service::StorageKey;

    fn account(id_byte: u8, self_id: &str) -> AccountRecord {
        AccountRecord::new(StorageId::for_account(vec![id_byte; 16]), self_id)
    }

    #[test]
    fn wrong_owner_is_invalid() {
        let store = MemoryLocalStore::ready("self-id", StorageKey::from_bytes([0; 32]));
        let keygen = SequenceKeyGenerator::default();
        let processor = AccountProcessor::new(&store, &keygen);

        assert!(processor.is_invalid(&account(1, "someone-else")));
        assert!(!processor.is_invalid(&account(1, "self-id")));
    }

    #[test]
    fn merge_prefers_remote_preferences() {
        let store = MemoryLocalStore::ready("self-id", StorageKey::from_bytes([0; 32]));
        let keygen = SequenceKeyGenerator::default();
        let processor = AccountProcessor::new(&store, &keygen);

        let mut remote = account(1, "self-id");
        remote.read_receipts = true;

        let mut local = account(2, "self-id");
        local.read_receipts = false;
        local.given_name = "Ada".into();

        let merged = processor.merge(&remote, &local);
        assert!(merged.read_receipts);
        assert_eq!(merged.given_name, "Ada");
        // Differs from both images, so the merged record got a fresh ID.
        assert_ne!(merged.id, remote.id);
        assert_ne!(merged.id, local.id);
    }

    #[test]
    fn duplicate_account_records_coalesce() {
        let store = MemoryLocalStore::ready("self-id", StorageKey::from_bytes([0; 32]));
        store.seed_account(account(9, "self-id"));
        let keygen = SequenceKeyGenerator::default();
        let processor = AccountProcessor::new(&store, &keygen);

        let first = account(1, "self-id");
        let second = account(2, "self-id");
        let result = processor.process(vec![first, second.clone()]).unwrap();

        assert_eq!(result.remote_deletes, vec![second]);
    }
}
