//! Legacy (v1) group records.

use crate::id::StorageId;
use crate::record::SemanticKey;

/// Required width of a v1 group ID, in bytes.
pub const GROUP_V1_ID_LEN: usize = 16;

/// A legacy (v1) group record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupV1Record {
    /// Storage ID of this snapshot.
    pub id: StorageId,
    /// The group ID bytes (semantic key).
    pub group_id: Vec<u8>,
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

impl GroupV1Record {
    /// Creates a group record with default attributes.
    #[must_use]
    pub fn new(id: StorageId, group_id: Vec<u8>) -> Self {
        Self {
            id,
            group_id,
            blocked: false,
            profile_sharing_enabled: false,
            archived: false,
            forced_unread: false,
            mute_until: 0,
            unknown_fields: Vec::new(),
        }
    }

    /// Returns true if the group ID has the required width.
    #[must_use]
    pub fn has_valid_group_id(&self) -> bool {
        self.group_id.len() == GROUP_V1_ID_LEN
    }

    /// Returns the record's semantic key.
    #[must_use]
    pub fn semantic_key(&self) -> SemanticKey {
        SemanticKey::GroupV1(self.group_id.clone())
    }

    /// Returns true if every attribute other than the storage ID matches.
    #[must_use]
    pub fn attributes_match(&self, other: &Self) -> bool {
        self.group_id == other.group_id
            && self.blocked == other.blocked
            && self.profile_sharing_enabled == other.profile_sharing_enabled
            && self.archived == other.archived
            && self.forced_unread == other.forced_unread
            && self.mute_until == other.mute_until
            && self.unknown_fields == other.unknown_fields
    }
}
