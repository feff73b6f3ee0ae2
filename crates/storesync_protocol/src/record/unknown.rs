//! Unknown-type records.

use crate::id::StorageId;
use crate::record::SemanticKey;

/// A record of a type this client does not understand.
///
/// Unknown records are preserved verbatim across sync cycles: neither
/// their payload bytes nor their IDs are ever modified by this client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRecord {
    /// Storage ID of this snapshot.
    pub id: StorageId,
    /// Opaque payload, never interpreted.
    pub payload: Vec<u8>,
}

impl UnknownRecord {
    /// Creates an unknown record.
    #[must_use]
    pub fn new(id: StorageId, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }

    /// Returns the record's semantic key (the ID itself).
    #[must_use]
    pub fn semantic_key(&self) -> SemanticKey {
        SemanticKey::Unknown(self.id.record_type().to_code(), self.id.raw().to_vec())
    }
}
