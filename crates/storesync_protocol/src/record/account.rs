//! Account records.

use crate::id::StorageId;
use crate::record::SemanticKey;

/// The account record for the owning user.
///
/// There is exactly one per account. Remote account records whose
/// `self_id` does not match the local identity are invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    /// Storage ID of this snapshot.
    pub id: StorageId,
    /// The owning user's identifier (semantic key).
    pub self_id: String,
    /// Profile given name.
    pub given_name: String,
    /// Profile family name.
    pub family_name: String,
    /// Avatar URL path, when set.
    pub avatar_url: Option<String>,
    /// Whether read receipts are enabled.
    pub read_receipts: bool,
    /// Whether typing indicators are enabled.
    pub typing_indicators: bool,
    /// Whether link previews are enabled.
    pub link_previews: bool,
    /// Whether the note-to-self conversation is archived.
    pub note_to_self_archived: bool,
    /// Fields this client does not understand, carried verbatim.
    pub unknown_fields: Vec<u8>,
}

impl AccountRecord {
    /// Creates an account record with default attributes.
    #[must_use]
    pub fn new(id: StorageId, self_id: impl Into<String>) -> Self {
        Self {
            id,
            self_id: self_id.into(),
            given_name: String::new(),
            family_name: String::new(),
            avatar_url: None,
            read_receipts: false,
            typing_indicators: false,
            link_previews: false,
            note_to_self_archived: false,
            unknown_fields: Vec::new(),
        }
    }

    /// Returns the record's semantic key.
    #[must_use]
    pub fn semantic_key(&self) -> SemanticKey {
        SemanticKey::Account(self.self_id.clone())
    }

    /// Returns true if every attribute other than the storage ID matches.
    #[must_use]
    pub fn attributes_match(&self, other: &Self) -> bool {
        self.self_id == other.self_id
            && self.given_name == other.given_name
            && self.family_name == other.family_name
            && self.avatar_url == other.avatar_url
            && self.read_receipts == other.read_receipts
            && self.typing_indicators == other.typing_indicators
            && self.link_previews == other.link_previews
            && self.note_to_self_archived == other.note_to_self_archived
            && self.unknown_fields == other.unknown_fields
    }
}
