//! In-memory local store.

use crate::error::{SyncError, SyncResult};
use crate::service::StorageKey;
use crate::store::{
    DirtyState, LocalStore, PendingAccountChange, PendingChange, PendingDelete, RowId,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use storesync_protocol::{
    AccountRecord, ContactRecord, GroupV1Record, GroupV2Record, RecordType, ServiceAddress,
    StorageId, StorageRecord, UnknownRecord,
};

#[derive(Debug, Clone)]
struct Row<R> {
    row: RowId,
    record: R,
    dirty: DirtyState,
}

#[derive(Debug, Clone, Default)]
struct Inner {
    ready: bool,
    self_id: String,
    storage_key: Option<StorageKey>,
    manifest_version: u64,
    next_row: u64,
    contacts: Vec<Row<ContactRecord>>,
    groups_v1: Vec<Row<GroupV1Record>>,
    groups_v2: Vec<Row<GroupV2Record>>,
    account: Option<Row<AccountRecord>>,
    unknowns: Vec<UnknownRecord>,
    migrated_v1_groups: Vec<Vec<u8>>,
    in_transaction: bool,
    transaction_successful: bool,
}

impl Inner {
    fn allocate_row(&mut self) -> RowId {
        let row = RowId(self.next_row);
        self.next_row += 1;
        row
    }
}

/// An in-memory [`LocalStore`] for tests and embedding.
///
/// Transactions snapshot the whole store on begin and restore it on an
/// unsuccessful end, so the rollback semantics match a real database.
#[derive(Default)]
pub struct MemoryLocalStore {
    inner: RwLock<Inner>,
    snapshot: Mutex<Option<Inner>>,
}

impl MemoryLocalStore {
    /// Creates an empty store that is not yet ready to sync.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ready store with the given identity and root key.
    #[must_use]
    pub fn ready(self_id: impl Into<String>, key: StorageKey) -> Self {
        let store = Self::new();
        {
            let mut inner = store.inner.write();
            inner.ready = true;
            inner.self_id = self_id.into();
            inner.storage_key = Some(key);
        }
        store
    }

    /// Sets readiness.
    pub fn set_ready(&self, ready: bool) {
        self.inner.write().ready = ready;
    }

    /// Sets the root storage key.
    pub fn set_storage_key(&self, key: Option<StorageKey>) {
        self.inner.write().storage_key = key;
    }

    /// Adds a clean contact row and returns its row ID.
    pub fn seed_contact(&self, record: ContactRecord) -> RowId {
        let mut inner = self.inner.write();
        let row = inner.allocate_row();
        inner.contacts.push(Row {
            row,
            record,
            dirty: DirtyState::Clean,
        });
        row
    }

    /// Adds a clean v1 group row and returns its row ID.
    pub fn seed_group_v1(&self, record: GroupV1Record) -> RowId {
        let mut inner = self.inner.write();
        let row = inner.allocate_row();
        inner.groups_v1.push(Row {
            row,
            record,
            dirty: DirtyState::Clean,
        });
        row
    }

    /// Adds a clean v2 group row and returns its row ID.
    pub fn seed_group_v2(&self, record: GroupV2Record) -> RowId {
        let mut inner = self.inner.write();
        let row = inner.allocate_row();
        inner.groups_v2.push(Row {
            row,
            record,
            dirty: DirtyState::Clean,
        });
        row
    }

    /// Sets the account row and returns its row ID.
    pub fn seed_account(&self, record: AccountRecord) -> RowId {
        let mut inner = self.inner.write();
        let existing = inner.account.as_ref().map(|account| account.row);
        let row = match existing {
            Some(row) => row,
            None => inner.allocate_row(),
        };
        inner.account = Some(Row {
            row,
            record,
            dirty: DirtyState::Clean,
        });
        row
    }

    /// Adds an unknown record directly.
    pub fn seed_unknown(&self, record: UnknownRecord) {
        self.inner.write().unknowns.push(record);
    }

    /// Marks a row's dirty state.
    pub fn mark_dirty(&self, row: RowId, dirty: DirtyState) {
        let mut inner = self.inner.write();
        for contact in &mut inner.contacts {
            if contact.row == row {
                contact.dirty = dirty;
                return;
            }
        }
        for group in &mut inner.groups_v1 {
            if group.row == row {
                group.dirty = dirty;
                return;
            }
        }
        for group in &mut inner.groups_v2 {
            if group.row == row {
                group.dirty = dirty;
                return;
            }
        }
        if let Some(account) = &mut inner.account {
            if account.row == row {
                account.dirty = dirty;
            }
        }
    }

    /// Records that a v1 group has been migrated to v2.
    pub fn add_group_v2_migration(&self, group_id: Vec<u8>) {
        self.inner.write().migrated_v1_groups.push(group_id);
    }

    /// Returns a row's dirty state, if the row exists.
    #[must_use]
    pub fn dirty_state(&self, row: RowId) -> Option<DirtyState> {
        let inner = self.inner.read();
        inner
            .contacts
            .iter()
            .map(|r| (r.row, r.dirty))
            .chain(inner.groups_v1.iter().map(|r| (r.row, r.dirty)))
            .chain(inner.groups_v2.iter().map(|r| (r.row, r.dirty)))
            .chain(inner.account.iter().map(|r| (r.row, r.dirty)))
            .find(|(id, _)| *id == row)
            .map(|(_, dirty)| dirty)
    }

    /// Returns every contact record.
    #[must_use]
    pub fn contact_records(&self) -> Vec<ContactRecord> {
        self.inner
            .read()
            .contacts
            .iter()
            .map(|r| r.record.clone())
            .collect()
    }

    /// Returns every unknown record.
    #[must_use]
    pub fn unknown_records(&self) -> Vec<UnknownRecord> {
        self.inner.read().unknowns.clone()
    }
}

impl LocalStore for MemoryLocalStore {
    fn is_ready(&self) -> bool {
        self.inner.read().ready
    }

    fn storage_key(&self) -> Option<StorageKey> {
        self.inner.read().storage_key.clone()
    }

    fn manifest_version(&self) -> u64 {
        self.inner.read().manifest_version
    }

    fn set_manifest_version(&self, version: u64) {
        self.inner.write().manifest_version = version;
    }

    fn self_id(&self) -> String {
        self.inner.read().self_id.clone()
    }

    fn all_storage_ids(&self) -> Vec<StorageId> {
        let inner = self.inner.read();
        let mut ids = Vec::new();
        ids.extend(
            inner
                .contacts
                .iter()
                .filter(|r| r.dirty != DirtyState::PendingInsert)
                .map(|r| r.record.id.clone()),
        );
        ids.extend(
            inner
                .groups_v1
                .iter()
                .filter(|r| r.dirty != DirtyState::PendingInsert)
                .map(|r| r.record.id.clone()),
        );
        ids.extend(
            inner
                .groups_v2
                .iter()
                .filter(|r| r.dirty != DirtyState::PendingInsert)
                .map(|r| r.record.id.clone()),
        );
        if let Some(account) = &inner.account {
            if account.dirty != DirtyState::PendingInsert {
                ids.push(account.record.id.clone());
            }
        }
        ids.extend(inner.unknowns.iter().map(|r| r.id.clone()));
        ids
    }

    fn contact_by_address(&self, address: &ServiceAddress) -> Option<ContactRecord> {
        let inner = self.inner.read();
        if let Some(service_id) = &address.service_id {
            let hit = inner
                .contacts
                .iter()
                .find(|r| r.record.address.service_id.as_ref() == Some(service_id));
            if let Some(row) = hit {
                return Some(row.record.clone());
            }
        }
        if let Some(e164) = &address.e164 {
            let hit = inner
                .contacts
                .iter()
                .find(|r| r.record.address.e164.as_ref() == Some(e164));
            if let Some(row) = hit {
                return Some(row.record.clone());
            }
        }
        None
    }

    fn group_v1_by_id(&self, group_id: &[u8]) -> Option<GroupV1Record> {
        self.inner
            .read()
            .groups_v1
            .iter()
            .find(|r| r.record.group_id == group_id)
            .map(|r| r.record.clone())
    }

    fn group_v2_by_master_key(&self, master_key: &[u8]) -> Option<GroupV2Record> {
        self.inner
            .read()
            .groups_v2
            .iter()
            .find(|r| r.record.master_key == master_key)
            .map(|r| r.record.clone())
    }

    fn account_record(&self) -> Option<AccountRecord> {
        self.inner
            .read()
            .account
            .as_ref()
            .map(|r| r.record.clone())
    }

    fn has_group_v2_migration(&self, group_id: &[u8]) -> bool {
        self.inner
            .read()
            .migrated_v1_groups
            .iter()
            .any(|migrated| migrated == group_id)
    }

    fn apply_contact_insert(&self, record: ContactRecord) -> SyncResult<()> {
        let mut inner = self.inner.write();
        let row = inner.allocate_row();
        inner.contacts.push(Row {
            row,
            record,
            dirty: DirtyState::Clean,
        });
        Ok(())
    }

    fn apply_contact_update(&self, old: &ContactRecord, new: ContactRecord) -> SyncResult<()> {
        let mut inner = self.inner.write();
        let row = inner
            .contacts
            .iter_mut()
            .find(|r| r.record.id == old.id)
            .ok_or_else(|| SyncError::Store("no contact row backing the update".into()))?;
        row.record = new;
        Ok(())
    }

    fn apply_group_v1_insert(&self, record: GroupV1Record) -> SyncResult<()> {
        let mut inner = self.inner.write();
        let row = inner.allocate_row();
        inner.groups_v1.push(Row {
            row,
            record,
            dirty: DirtyState::Clean,
        });
        Ok(())
    }

    fn apply_group_v1_update(&self, old: &GroupV1Record, new: GroupV1Record) -> SyncResult<()> {
        let mut inner = self.inner.write();
        let row = inner
            .groups_v1
            .iter_mut()
            .find(|r| r.record.id == old.id)
            .ok_or_else(|| SyncError::Store("no v1 group row backing the update".into()))?;
        row.record = new;
        Ok(())
    }

    fn apply_group_v2_insert(&self, record: GroupV2Record) -> SyncResult<()> {
        let mut inner = self.inner.write();
        let row = inner.allocate_row();
        inner.groups_v2.push(Row {
            row,
            record,
            dirty: DirtyState::Clean,
        });
        Ok(())
    }

    fn apply_group_v2_update(&self, old: &GroupV2Record, new: GroupV2Record) -> SyncResult<()> {
        let mut inner = self.inner.write();
        let row = inner
            .groups_v2
            .iter_mut()
            .find(|r| r.record.id == old.id)
            .ok_or_else(|| SyncError::Store("no v2 group row backing the update".into()))?;
        row.record = new;
        Ok(())
    }

    fn apply_account_insert(&self, record: AccountRecord) -> SyncResult<()> {
        let mut inner = self.inner.write();
        let existing = inner.account.as_ref().map(|account| account.row);
        let row = match existing {
            Some(row) => row,
            None => inner.allocate_row(),
        };
        inner.account = Some(Row {
            row,
            record,
            dirty: DirtyState::Clean,
        });
        Ok(())
    }

    fn apply_account_update(&self, old: &AccountRecord, new: AccountRecord) -> SyncResult<()> {
        let mut inner = self.inner.write();
        let account = inner
            .account
            .as_mut()
            .filter(|r| r.record.id == old.id)
            .ok_or_else(|| SyncError::Store("no account row backing the update".into()))?;
        account.record = new;
        Ok(())
    }

    fn insert_unknown_records(&self, records: Vec<UnknownRecord>) -> SyncResult<()> {
        self.inner.write().unknowns.extend(records);
        Ok(())
    }

    fn delete_unknown_records(&self, ids: &[StorageId]) -> SyncResult<()> {
        self.inner
            .write()
            .unknowns
            .retain(|record| !ids.contains(&record.id));
        Ok(())
    }

    fn record_by_storage_id(&self, id: &StorageId) -> SyncResult<StorageRecord> {
        let inner = self.inner.read();
        match id.record_type() {
            RecordType::Contact => inner
                .contacts
                .iter()
                .find(|r| &r.record.id == id)
                .map(|r| StorageRecord::Contact(r.record.clone())),
            RecordType::GroupV1 => inner
                .groups_v1
                .iter()
                .find(|r| &r.record.id == id)
                .map(|r| StorageRecord::GroupV1(r.record.clone())),
            RecordType::GroupV2 => {
                let row = inner.groups_v2.iter().find(|r| &r.record.id == id);
                if let Some(row) = row {
                    if row.record.master_key.is_empty() {
                        return Err(SyncError::MissingGv2MasterKey);
                    }
                    Some(StorageRecord::GroupV2(row.record.clone()))
                } else {
                    None
                }
            }
            RecordType::Account => inner
                .account
                .as_ref()
                .filter(|r| &r.record.id == id)
                .map(|r| StorageRecord::Account(r.record.clone())),
            RecordType::Unknown(_) => inner
                .unknowns
                .iter()
                .find(|r| &r.id == id)
                .map(|r| StorageRecord::Unknown(r.clone())),
        }
        .ok_or(SyncError::MissingLocalModel {
            record_type: id.record_type(),
        })
    }

    fn pending_updates(&self) -> Vec<PendingChange> {
        let inner = self.inner.read();
        let mut pending = Vec::new();
        pending.extend(
            inner
                .contacts
                .iter()
                .filter(|r| r.dirty == DirtyState::PendingUpdate)
                .map(|r| PendingChange {
                    row: r.row,
                    record: StorageRecord::Contact(r.record.clone()),
                }),
        );
        pending.extend(
            inner
                .groups_v1
                .iter()
                .filter(|r| r.dirty == DirtyState::PendingUpdate)
                .map(|r| PendingChange {
                    row: r.row,
                    record: StorageRecord::GroupV1(r.record.clone()),
                }),
        );
        pending.extend(
            inner
                .groups_v2
                .iter()
                .filter(|r| r.dirty == DirtyState::PendingUpdate)
                .map(|r| PendingChange {
                    row: r.row,
                    record: StorageRecord::GroupV2(r.record.clone()),
                }),
        );
        pending
    }

    fn pending_inserts(&self) -> Vec<PendingChange> {
        let inner = self.inner.read();
        let mut pending = Vec::new();
        pending.extend(
            inner
                .contacts
                .iter()
                .filter(|r| r.dirty == DirtyState::PendingInsert)
                .map(|r| PendingChange {
                    row: r.row,
                    record: StorageRecord::Contact(r.record.clone()),
                }),
        );
        pending.extend(
            inner
                .groups_v1
                .iter()
                .filter(|r| r.dirty == DirtyState::PendingInsert)
                .map(|r| PendingChange {
                    row: r.row,
                    record: StorageRecord::GroupV1(r.record.clone()),
                }),
        );
        pending.extend(
            inner
                .groups_v2
                .iter()
                .filter(|r| r.dirty == DirtyState::PendingInsert)
                .map(|r| PendingChange {
                    row: r.row,
                    record: StorageRecord::GroupV2(r.record.clone()),
                }),
        );
        pending
    }

    fn pending_deletes(&self) -> Vec<PendingDelete> {
        let inner = self.inner.read();
        let mut pending = Vec::new();
        pending.extend(
            inner
                .contacts
                .iter()
                .filter(|r| r.dirty == DirtyState::PendingDelete)
                .map(|r| PendingDelete {
                    row: r.row,
                    id: r.record.id.clone(),
                }),
        );
        pending.extend(
            inner
                .groups_v1
                .iter()
                .filter(|r| r.dirty == DirtyState::PendingDelete)
                .map(|r| PendingDelete {
                    row: r.row,
                    id: r.record.id.clone(),
                }),
        );
        pending.extend(
            inner
                .groups_v2
                .iter()
                .filter(|r| r.dirty == DirtyState::PendingDelete)
                .map(|r| PendingDelete {
                    row: r.row,
                    id: r.record.id.clone(),
                }),
        );
        pending
    }

    fn pending_account_change(&self) -> Option<PendingAccountChange> {
        let inner = self.inner.read();
        let account = inner.account.as_ref()?;
        match account.dirty {
            DirtyState::PendingInsert => Some(PendingAccountChange {
                row: account.row,
                record: account.record.clone(),
                is_insert: true,
            }),
            DirtyState::PendingUpdate => Some(PendingAccountChange {
                row: account.row,
                record: account.record.clone(),
                is_insert: false,
            }),
            _ => None,
        }
    }

    fn clear_dirty_state(&self, rows: &[RowId]) {
        let mut inner = self.inner.write();
        clear_rows(&mut inner.contacts, rows);
        clear_rows(&mut inner.groups_v1, rows);
        clear_rows(&mut inner.groups_v2, rows);
        if let Some(account) = &mut inner.account {
            if rows.contains(&account.row) {
                account.dirty = DirtyState::Clean;
            }
        }
    }

    fn clear_dirty_state_for_ids(&self, ids: &[StorageId]) {
        let mut inner = self.inner.write();
        for contact in &mut inner.contacts {
            if ids.contains(&contact.record.id) {
                contact.dirty = DirtyState::Clean;
            }
        }
        for group in &mut inner.groups_v1 {
            if ids.contains(&group.record.id) {
                group.dirty = DirtyState::Clean;
            }
        }
        for group in &mut inner.groups_v2 {
            if ids.contains(&group.record.id) {
                group.dirty = DirtyState::Clean;
            }
        }
        if let Some(account) = &mut inner.account {
            if ids.contains(&account.record.id) {
                account.dirty = DirtyState::Clean;
            }
        }
    }

    fn apply_storage_id_updates(&self, updates: &HashMap<RowId, StorageId>) {
        let mut inner = self.inner.write();
        for contact in &mut inner.contacts {
            if let Some(id) = updates.get(&contact.row) {
                contact.record.id = id.clone();
            }
        }
        for group in &mut inner.groups_v1 {
            if let Some(id) = updates.get(&group.row) {
                group.record.id = id.clone();
            }
        }
        for group in &mut inner.groups_v2 {
            if let Some(id) = updates.get(&group.row) {
                group.record.id = id.clone();
            }
        }
        if let Some(account) = &mut inner.account {
            if let Some(id) = updates.get(&account.row) {
                account.record.id = id.clone();
            }
        }
    }

    fn begin_transaction(&self) {
        let mut inner = self.inner.write();
        let mut snapshot = self.snapshot.lock();
        debug_assert!(!inner.in_transaction, "transaction already open");
        *snapshot = Some(inner.clone());
        inner.in_transaction = true;
        inner.transaction_successful = false;
    }

    fn set_transaction_successful(&self) {
        self.inner.write().transaction_successful = true;
    }

    fn end_transaction(&self) {
        let mut inner = self.inner.write();
        let snapshot = self.snapshot.lock().take();
        if !inner.transaction_successful {
            if let Some(snapshot) = snapshot {
                *inner = snapshot;
            }
        }
        inner.in_transaction = false;
        inner.transaction_successful = false;
    }

    fn in_transaction(&self) -> bool {
        self.inner.read().in_transaction
    }
}

fn clear_rows<R>(rows: &mut Vec<Row<R>>, cleared: &[RowId]) {
    rows.retain_mut(|row| {
        if !cleared.contains(&row.row) {
            return true;
        }
        if row.dirty == DirtyState::PendingDelete {
            // Flushing a pending delete destroys the local row.
            false
        } else {
            row.dirty = DirtyState::Clean;
            true
        }
    });
}
