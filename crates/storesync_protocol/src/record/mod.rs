//! Record kinds and the union over them.

mod account;
mod contact;
mod group_v1;
mod group_v2;
mod unknown;

pub use account::AccountRecord;
pub use contact::{ContactRecord, ServiceAddress};
pub use group_v1::{GroupV1Record, GROUP_V1_ID_LEN};
pub use group_v2::{GroupV2Record, GROUP_V2_MASTER_KEY_LEN};
pub use unknown::UnknownRecord;

use crate::id::{RecordType, StorageId};

/// The stable identity of the entity a record represents.
///
/// Storage IDs rotate on every update, so duplicate detection and
/// local-row matching key on the semantic identity instead: the service
/// address for contacts, the group ID for v1 groups, the master key for v2
/// groups, and the self identifier for the account record. Unknown records
/// have no semantics beyond their ID.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SemanticKey {
    /// Contact identity token (service ID preferred over phone number).
    Contact(String),
    /// Group v1 identity (group ID bytes).
    GroupV1(Vec<u8>),
    /// Group v2 identity (master key bytes).
    GroupV2(Vec<u8>),
    /// Account identity (self identifier).
    Account(String),
    /// Unknown-record identity (type code plus raw ID bytes).
    Unknown(u8, Vec<u8>),
}

/// A record stored in the storage service.
///
/// The union is exhaustive by construction: adding a record kind is a
/// compile-time obligation on every `match` below.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageRecord {
    /// A contact record.
    Contact(ContactRecord),
    /// A legacy (v1) group record.
    GroupV1(GroupV1Record),
    /// A (v2) group record.
    GroupV2(GroupV2Record),
    /// The account record.
    Account(AccountRecord),
    /// A record of a type this client does not understand, carried verbatim.
    Unknown(UnknownRecord),
}

impl StorageRecord {
    /// Returns the record's storage ID.
    #[must_use]
    pub fn id(&self) -> &StorageId {
        match self {
            StorageRecord::Contact(r) => &r.id,
            StorageRecord::GroupV1(r) => &r.id,
            StorageRecord::GroupV2(r) => &r.id,
            StorageRecord::Account(r) => &r.id,
            StorageRecord::Unknown(r) => &r.id,
        }
    }

    /// Returns the record's type tag.
    #[must_use]
    pub fn record_type(&self) -> RecordType {
        self.id().record_type()
    }

    /// Returns the record's semantic key.
    #[must_use]
    pub fn semantic_key(&self) -> SemanticKey {
        match self {
            StorageRecord::Contact(r) => r.semantic_key(),
            StorageRecord::GroupV1(r) => r.semantic_key(),
            StorageRecord::GroupV2(r) => r.semantic_key(),
            StorageRecord::Account(r) => r.semantic_key(),
            StorageRecord::Unknown(r) => r.semantic_key(),
        }
    }

    /// Returns a copy of the record under a new storage ID built from
    /// `raw`, keeping the type tag.
    #[must_use]
    pub fn with_raw_id(&self, raw: Vec<u8>) -> StorageRecord {
        let id = StorageId::new(self.record_type(), raw);
        let mut copy = self.clone();
        match &mut copy {
            StorageRecord::Contact(r) => r.id = id,
            StorageRecord::GroupV1(r) => r.id = id,
            StorageRecord::GroupV2(r) => r.id = id,
            StorageRecord::Account(r) => r.id = id,
            StorageRecord::Unknown(r) => r.id = id,
        }
        copy
    }
}

impl From<ContactRecord> for StorageRecord {
    fn from(record: ContactRecord) -> Self {
        StorageRecord::Contact(record)
    }
}

impl From<GroupV1Record> for StorageRecord {
    fn from(record: GroupV1Record) -> Self {
        StorageRecord::GroupV1(record)
    }
}

impl From<GroupV2Record> for StorageRecord {
    fn from(record: GroupV2Record) -> Self {
        StorageRecord::GroupV2(record)
    }
}

impl From<AccountRecord> for StorageRecord {
    fn from(record: AccountRecord) -> Self {
        StorageRecord::Account(record)
    }
}

impl From<UnknownRecord> for StorageRecord {
    fn from(record: UnknownRecord) -> Self {
        StorageRecord::Unknown(record)
    }
}
