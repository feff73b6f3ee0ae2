//! Storage identifiers.

use std::fmt;

/// Width of storage IDs minted by this client, in bytes.
///
/// The service accepts IDs of any width; IDs produced elsewhere are carried
/// opaquely even when their width differs.
pub const STORAGE_ID_LEN: usize = 16;

/// The kind of record a [`StorageId`] addresses.
///
/// Type tags are fixed by the service. Tags this client does not understand
/// are carried as [`RecordType::Unknown`] with their raw code so the ID
/// round-trips unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordType {
    /// A contact record.
    Contact,
    /// A legacy (v1) group record.
    GroupV1,
    /// A (v2) group record.
    GroupV2,
    /// The account record for the owning user.
    Account,
    /// A record type this client does not understand.
    Unknown(u8),
}

impl RecordType {
    /// Converts to the service's numeric type code.
    #[must_use]
    pub const fn to_code(self) -> u8 {
        match self {
            RecordType::Contact => 1,
            RecordType::GroupV1 => 2,
            RecordType::GroupV2 => 3,
            RecordType::Account => 4,
            RecordType::Unknown(code) => code,
        }
    }

    /// Converts from the service's numeric type code.
    ///
    /// Codes outside the known range map to [`RecordType::Unknown`]; this
    /// never fails, so forward-incompatible IDs survive a round trip.
    #[must_use]
    pub const fn from_code(code: u8) -> Self {
        match code {
            1 => RecordType::Contact,
            2 => RecordType::GroupV1,
            3 => RecordType::GroupV2,
            4 => RecordType::Account,
            other => RecordType::Unknown(other),
        }
    }

    /// Returns true if this is a type tag the client does not understand.
    #[must_use]
    pub const fn is_unknown(self) -> bool {
        matches!(self, RecordType::Unknown(_))
    }
}

/// An opaque, type-tagged record identifier.
///
/// A storage ID names an unchanging snapshot of a record. When the
/// underlying record changes, a fresh ID is minted and the old one is
/// deleted from the manifest; IDs are never reused.
///
/// Equality covers both the type tag and the raw bytes: two IDs with
/// identical bytes under different tags are distinct.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorageId {
    record_type: RecordType,
    raw: Vec<u8>,
}

impl StorageId {
    /// Creates a storage ID from a type tag and raw bytes.
    #[must_use]
    pub fn new(record_type: RecordType, raw: Vec<u8>) -> Self {
        Self { record_type, raw }
    }

    /// Creates a contact-typed ID.
    #[must_use]
    pub fn for_contact(raw: Vec<u8>) -> Self {
        Self::new(RecordType::Contact, raw)
    }

    /// Creates a group-v1-typed ID.
    #[must_use]
    pub fn for_group_v1(raw: Vec<u8>) -> Self {
        Self::new(RecordType::GroupV1, raw)
    }

    /// Creates a group-v2-typed ID.
    #[must_use]
    pub fn for_group_v2(raw: Vec<u8>) -> Self {
        Self::new(RecordType::GroupV2, raw)
    }

    /// Creates an account-typed ID.
    #[must_use]
    pub fn for_account(raw: Vec<u8>) -> Self {
        Self::new(RecordType::Account, raw)
    }

    /// Returns the type tag.
    #[must_use]
    pub const fn record_type(&self) -> RecordType {
        self.record_type
    }

    /// Returns the raw ID bytes.
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Consumes the ID and returns its raw bytes.
    #[must_use]
    pub fn into_raw(self) -> Vec<u8> {
        self.raw
    }

    /// Returns true if the type tag is one this client does not understand.
    #[must_use]
    pub const fn is_unknown(&self) -> bool {
        self.record_type.is_unknown()
    }
}

impl fmt::Debug for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageId({:?}, {})", self.record_type, hex(&self.raw))
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex(&self.raw))
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
