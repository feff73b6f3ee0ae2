//! Local record store abstraction.
//!
//! The engine consumes this interface; it does not define the schema
//! behind it. Implementations back the matchers with whatever rows they
//! keep (recipient rows, group rows, account settings) and project them
//! into record form so they are comparable with remote records.

use crate::error::SyncResult;
use crate::service::StorageKey;
use std::collections::HashMap;
use std::fmt;
use storesync_protocol::{
    AccountRecord, ContactRecord, GroupV1Record, GroupV2Record, ServiceAddress, StorageId,
    StorageRecord, UnknownRecord,
};

/// Identifies a local row independently of its rotating storage ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowId(pub u64);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row:{}", self.0)
    }
}

/// Uncommitted sync work attached to a local row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirtyState {
    /// Nothing to sync.
    #[default]
    Clean,
    /// The row has never been uploaded.
    PendingInsert,
    /// The row changed since its last upload.
    PendingUpdate,
    /// The row was deleted locally and awaits removal from the manifest.
    PendingDelete,
}

/// A dirty row staged for upload, projected into record form.
///
/// The record carries the row's *current* storage ID; the local-change
/// builder mints the fresh ID that actually gets uploaded.
#[derive(Debug, Clone)]
pub struct PendingChange {
    /// The local row.
    pub row: RowId,
    /// The row projected into record form.
    pub record: StorageRecord,
}

/// A locally deleted row awaiting removal from the manifest.
#[derive(Debug, Clone)]
pub struct PendingDelete {
    /// The local row.
    pub row: RowId,
    /// The row's current storage ID.
    pub id: StorageId,
}

/// A pending change to the account record.
#[derive(Debug, Clone)]
pub struct PendingAccountChange {
    /// The row backing the account settings.
    pub row: RowId,
    /// The account record to upload.
    pub record: AccountRecord,
    /// True if the account record has never been uploaded.
    pub is_insert: bool,
}

/// The client-side record store.
///
/// All methods are callable inside or outside the store's transaction;
/// the orchestrator alone decides the transaction boundary and guarantees
/// no network I/O happens within it.
pub trait LocalStore: Send + Sync {
    /// True once the client is registered and initial setup is complete.
    fn is_ready(&self) -> bool;

    /// Returns the root storage key, if one has been provisioned.
    fn storage_key(&self) -> Option<StorageKey>;

    /// Reads the persisted manifest version (0 before the first sync).
    fn manifest_version(&self) -> u64;

    /// Persists the manifest version.
    fn set_manifest_version(&self, version: u64);

    /// Returns the owning user's identifier.
    fn self_id(&self) -> String;

    /// Enumerates every storage ID the local store participates in:
    /// per-type row IDs, the account ID, and unknown-record IDs. Rows
    /// marked [`DirtyState::PendingInsert`] have no ID yet and are
    /// excluded.
    fn all_storage_ids(&self) -> Vec<StorageId>;

    /// Looks up a contact row by address and projects it into record form.
    fn contact_by_address(&self, address: &ServiceAddress) -> Option<ContactRecord>;

    /// Looks up a v1 group row by group ID.
    fn group_v1_by_id(&self, group_id: &[u8]) -> Option<GroupV1Record>;

    /// Looks up a v2 group row by master key.
    fn group_v2_by_master_key(&self, master_key: &[u8]) -> Option<GroupV2Record>;

    /// Projects the local account settings into record form.
    fn account_record(&self) -> Option<AccountRecord>;

    /// True if the v1 group has already been migrated to a v2 group.
    fn has_group_v2_migration(&self, group_id: &[u8]) -> bool;

    /// Writes a new contact row from a remote record.
    fn apply_contact_insert(&self, record: ContactRecord) -> SyncResult<()>;

    /// Applies merged contact attributes and rotates the row's storage ID.
    fn apply_contact_update(&self, old: &ContactRecord, new: ContactRecord) -> SyncResult<()>;

    /// Writes a new v1 group row from a remote record.
    fn apply_group_v1_insert(&self, record: GroupV1Record) -> SyncResult<()>;

    /// Applies merged v1 group attributes and rotates the storage ID.
    fn apply_group_v1_update(&self, old: &GroupV1Record, new: GroupV1Record) -> SyncResult<()>;

    /// Writes a new v2 group row from a remote record.
    fn apply_group_v2_insert(&self, record: GroupV2Record) -> SyncResult<()>;

    /// Applies merged v2 group attributes and rotates the storage ID.
    fn apply_group_v2_update(&self, old: &GroupV2Record, new: GroupV2Record) -> SyncResult<()>;

    /// Initialises the account settings from a remote record.
    fn apply_account_insert(&self, record: AccountRecord) -> SyncResult<()>;

    /// Applies merged account attributes and rotates the account's ID.
    fn apply_account_update(&self, old: &AccountRecord, new: AccountRecord) -> SyncResult<()>;

    /// Stores unknown-type records verbatim.
    fn insert_unknown_records(&self, records: Vec<UnknownRecord>) -> SyncResult<()>;

    /// Drops unknown-type records by ID.
    fn delete_unknown_records(&self, ids: &[StorageId]) -> SyncResult<()>;

    /// Materialises the record behind a storage ID from local state.
    ///
    /// Errors with [`crate::SyncError::MissingLocalModel`] when no row
    /// backs the ID and [`crate::SyncError::MissingGv2MasterKey`] when a
    /// v2 group row lacks its master key; both indicate local corruption.
    fn record_by_storage_id(&self, id: &StorageId) -> SyncResult<StorageRecord>;

    /// Rows marked [`DirtyState::PendingUpdate`], excluding the account.
    fn pending_updates(&self) -> Vec<PendingChange>;

    /// Rows marked [`DirtyState::PendingInsert`], excluding the account.
    fn pending_inserts(&self) -> Vec<PendingChange>;

    /// Rows marked [`DirtyState::PendingDelete`].
    fn pending_deletes(&self) -> Vec<PendingDelete>;

    /// The account's pending change, if any.
    fn pending_account_change(&self) -> Option<PendingAccountChange>;

    /// Clears dirty state by row. Rows pending deletion are destroyed.
    fn clear_dirty_state(&self, rows: &[RowId]);

    /// Clears dirty state on the rows currently holding the given IDs.
    fn clear_dirty_state_for_ids(&self, ids: &[StorageId]);

    /// Rotates row storage IDs after a successful local-change push.
    fn apply_storage_id_updates(&self, updates: &HashMap<RowId, StorageId>);

    /// Opens the store's write transaction.
    fn begin_transaction(&self);

    /// Marks the open transaction as successful.
    fn set_transaction_successful(&self);

    /// Ends the open transaction, committing iff it was marked successful.
    fn end_transaction(&self);

    /// True while the write transaction is open.
    fn in_transaction(&self) -> bool;
}

/// Scopes a [`LocalStore`] transaction so the early-error path still ends
/// it.
///
/// Dropping the guard without [`TransactionGuard::commit`] rolls the
/// transaction back.
pub struct TransactionGuard<'a, L: LocalStore + ?Sized> {
    store: &'a L,
    successful: bool,
}

impl<'a, L: LocalStore + ?Sized> TransactionGuard<'a, L> {
    /// Opens a transaction on the store.
    pub fn begin(store: &'a L) -> Self {
        store.begin_transaction();
        Self {
            store,
            successful: false,
        }
    }

    /// Marks the transaction successful and ends it.
    pub fn commit(mut self) {
        self.successful = true;
    }
}

impl<L: LocalStore + ?Sized> Drop for TransactionGuard<'_, L> {
    fn drop(&mut self) {
        if self.successful {
            self.store.set_transaction_successful();
        }
        self.store.end_transaction();
    }
}
