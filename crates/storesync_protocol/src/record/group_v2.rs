//! Group (v2) records.

use crate::id::StorageId;
use crate::record::SemanticKey;

/// Required width of a v2 group master key, in bytes.
pub const GROUP_V2_MASTER_KEY_LEN: usize = 32;

/// A (v2) group record.
///
/// The group's canonical identity is derived from its master key, so the
/// master key doubles as the semantic key here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupV2Record {
    /// Storage ID of this snapshot.
    pub id: StorageId,
    /// The group master key (semantic key).
    pub master_key: Vec<u8>,
    /// Whether the group is blocked.
    pub blocked: bool,
    /// Whether profile sharing is enabled for the group.
    pub profile_sharing_enabled: bool,
    /// Whether the conversation is archived.
    pub archived: bool,
    /// Whether the conversation is marked unread.
    pub forced_unread: bool,
    /// Mute expiry timestamp in epoch milliseconds (0 = unmuted).
    pub mute_until: u64,
    /// Fields this client does not understand, carried verbatim.
    pub unknown_fields: Vec<u8>,
}

impl GroupV2Record {
    /// Creates a group record with default attributes.
    #[must_use]
    pub fn new(id: StorageId, master_key: Vec<u8>) -> Self {
        Self {
            id,
            master_key,
            blocked: false,
            profile_sharing_enabled: false,
            archived: false,
            forced_unread: false,
            mute_until: 0,
            unknown_fields: Vec::new(),
        }
    }

    /// Returns true if the master key has the required width.
    #[must_use]
    pub fn has_valid_master_key(&self) -> bool {
        self.master_key.len() == GROUP_V2_MASTER_KEY_LEN
    }

    /// Returns the record's semantic key.
    #[must_use]
    pub fn semantic_key(&self) -> SemanticKey {
        SemanticKey::GroupV2(self.master_key.clone())
    }

    /// Returns true if every attribute other than the storage ID matches.
    #[must_use]
    pub fn attributes_match(&self, other: &Self) -> bool {
        self.master_key == other.master_key
            && self.blocked == other.blocked
            && self.profile_sharing_enabled == other.profile_sharing_enabled
            && self.archived == other.archived
            && self.forced_unread == other.forced_unread
            && self.mute_until == other.mute_until
            && self.unknown_fields == other.unknown_fields
    }
}
