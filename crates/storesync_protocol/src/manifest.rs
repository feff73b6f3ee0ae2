//! Storage manifest.

use crate::error::{ProtocolError, ProtocolResult};
use crate::id::{RecordType, StorageId};
use crate::wire::{read_bytes, read_u32, read_u64, read_u8, write_bytes};
use std::collections::HashSet;

/// Upper bound on the ID count in a decoded manifest.
const MAX_MANIFEST_IDS: usize = 1_000_000;

/// The versioned list of every storage ID the service holds for an account.
///
/// The version is monotonically increasing: every accepted write uploads a
/// new manifest whose version is exactly one greater than the version it
/// was based on. Diffing two manifests' ID sets is how a client discovers
/// what changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Manifest version.
    pub version: u64,
    /// Every storage ID the service currently holds.
    pub storage_ids: Vec<StorageId>,
}

impl Manifest {
    /// Creates a new manifest.
    #[must_use]
    pub fn new(version: u64, storage_ids: Vec<StorageId>) -> Self {
        Self {
            version,
            storage_ids,
        }
    }

    /// Returns true if the manifest contains the given ID.
    #[must_use]
    pub fn contains(&self, id: &StorageId) -> bool {
        self.storage_ids.contains(id)
    }

    /// Returns the ID set for membership queries.
    #[must_use]
    pub fn id_set(&self) -> HashSet<&StorageId> {
        self.storage_ids.iter().collect()
    }

    /// Encodes the manifest to its wire form.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&(self.storage_ids.len() as u32).to_le_bytes());
        for id in &self.storage_ids {
            buf.push(id.record_type().to_code());
            write_bytes(&mut buf, id.raw());
        }
        buf
    }

    /// Decodes a manifest from its wire form.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let mut offset = 0;
        let version = read_u64(bytes, &mut offset)?;
        let count = read_u32(bytes, &mut offset)? as usize;

        if count > MAX_MANIFEST_IDS {
            return Err(ProtocolError::LengthOverflow {
                length: count,
                max: MAX_MANIFEST_IDS,
            });
        }

        let mut storage_ids = Vec::with_capacity(count);
        for _ in 0..count {
            let code = read_u8(bytes, &mut offset)?;
            let raw = read_bytes(bytes, &mut offset)?;
            storage_ids.push(StorageId::new(RecordType::from_code(code), raw));
        }

        Ok(Self {
            version,
            storage_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_roundtrip() {
        let manifest = Manifest::new(
            7,
            vec![
                StorageId::for_contact(vec![1; 16]),
                StorageId::for_group_v2(vec![2; 16]),
                StorageId::new(RecordType::Unknown(9), vec![3; 24]),
            ],
        );

        let decoded = Manifest::decode(&manifest.encode()).unwrap();
        assert_eq!(decoded, manifest);
        assert_eq!(decoded.storage_ids[2].record_type(), RecordType::Unknown(9));
    }

    #[test]
    fn contains_respects_type_tag() {
        let manifest = Manifest::new(1, vec![StorageId::for_contact(vec![1; 16])]);
        assert!(manifest.contains(&StorageId::for_contact(vec![1; 16])));
        assert!(!manifest.contains(&StorageId::for_group_v1(vec![1; 16])));
    }

    #[test]
    fn decode_rejects_truncated_input() {
        let manifest = Manifest::new(3, vec![StorageId::for_contact(vec![1; 16])]);
        let bytes = manifest.encode();
        assert!(Manifest::decode(&bytes[..bytes.len() - 1]).is_err());
    }
}
