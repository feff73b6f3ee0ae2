//! Key-difference computation between two storage-ID sets.

use std::collections::{HashMap, HashSet};
use storesync_protocol::{RecordType, StorageId};

/// The difference between a remote and a local storage-ID set.
#[derive(Debug, Clone, Default)]
pub struct KeyDifference {
    /// IDs present remotely but not locally.
    pub remote_only: Vec<StorageId>,
    /// IDs present locally but not remotely.
    pub local_only: Vec<StorageId>,
    /// True if the same raw ID bytes appear under differing type tags
    /// across the two sets. The server's index is structurally corrupt;
    /// the orchestrator schedules a force push after the cycle.
    pub has_type_mismatches: bool,
}

impl KeyDifference {
    /// Returns true if the two sets hold exactly the same IDs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remote_only.is_empty() && self.local_only.is_empty()
    }
}

/// Diffs two storage-ID sets by raw-byte-and-tag equality.
///
/// Order within `remote_only` and `local_only` follows the input order.
#[must_use]
pub fn find_key_difference(remote: &[StorageId], local: &[StorageId]) -> KeyDifference {
    let remote_set: HashSet<&StorageId> = remote.iter().collect();
    let local_set: HashSet<&StorageId> = local.iter().collect();

    let remote_only: Vec<StorageId> = remote
        .iter()
        .filter(|id| !local_set.contains(*id))
        .cloned()
        .collect();
    let local_only: Vec<StorageId> = local
        .iter()
        .filter(|id| !remote_set.contains(*id))
        .cloned()
        .collect();

    let mut local_types_by_raw: HashMap<&[u8], Vec<RecordType>> = HashMap::new();
    for id in local {
        local_types_by_raw
            .entry(id.raw())
            .or_default()
            .push(id.record_type());
    }

    let has_type_mismatches = remote.iter().any(|id| {
        local_types_by_raw
            .get(id.raw())
            .is_some_and(|types| types.iter().any(|&ty| ty != id.record_type()))
    });

    KeyDifference {
        remote_only,
        local_only,
        has_type_mismatches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(byte: u8) -> StorageId {
        StorageId::for_contact(vec![byte; 16])
    }

    #[test]
    fn identical_sets_are_empty() {
        let ids = vec![contact(1), contact(2)];
        let diff = find_key_difference(&ids, &ids);
        assert!(diff.is_empty());
        assert!(!diff.has_type_mismatches);
    }

    #[test]
    fn classifies_each_side() {
        let remote = vec![contact(1), contact(2)];
        let local = vec![contact(2), contact(3)];

        let diff = find_key_difference(&remote, &local);
        assert_eq!(diff.remote_only, vec![contact(1)]);
        assert_eq!(diff.local_only, vec![contact(3)]);
        assert!(!diff.is_empty());
    }

    #[test]
    fn same_bytes_under_different_tags_flag_a_mismatch() {
        let remote = vec![StorageId::for_group_v1(vec![1; 16])];
        let local = vec![contact(1)];

        let diff = find_key_difference(&remote, &local);
        assert!(diff.has_type_mismatches);
        // The IDs are still distinct, so both sides show up in the diff.
        assert_eq!(diff.remote_only.len(), 1);
        assert_eq!(diff.local_only.len(), 1);
    }

    #[test]
    fn mismatch_flag_ignores_matching_tags() {
        let remote = vec![contact(1), contact(9)];
        let local = vec![contact(1)];
        let diff = find_key_difference(&remote, &local);
        assert!(!diff.has_type_mismatches);
    }
}
