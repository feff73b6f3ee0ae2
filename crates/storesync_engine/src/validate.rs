//! Pre-push validation of write operations.
//!
//! A validation failure indicates a logic bug in this engine, not
//! adversarial input, so every check maps to the fatal
//! [`SyncError::Validation`].

use crate::error::{SyncError, SyncResult};
use crate::write::WriteOperationResult;
use std::collections::HashSet;
use storesync_protocol::{Manifest, SemanticKey};

/// Validates a write operation before it is pushed.
///
/// `previous` is the manifest the write was based on, when known. With
/// `needs_force_push` set, the ID-provenance check is skipped — the
/// server's index is already known to be corrupt and a force push will
/// rebuild it — but the structural checks still hold.
pub fn validate_write(
    write: &WriteOperationResult,
    previous: Option<&Manifest>,
    needs_force_push: bool,
) -> SyncResult<()> {
    if write.is_empty() {
        return Err(SyncError::Validation(
            "attempted to push an empty write operation".into(),
        ));
    }

    if let Some(previous) = previous {
        if write.manifest.version != previous.version + 1 {
            return Err(SyncError::Validation(format!(
                "manifest version must advance by one: {} -> {}",
                previous.version, write.manifest.version
            )));
        }
    }

    let insert_raws: HashSet<&[u8]> = write.inserts.iter().map(|r| r.id().raw()).collect();
    for delete in &write.deletes {
        if insert_raws.contains(delete.as_slice()) {
            return Err(SyncError::Validation(
                "an ID appears in both inserts and deletes".into(),
            ));
        }
    }

    let manifest_raws: HashSet<&[u8]> =
        write.manifest.storage_ids.iter().map(|id| id.raw()).collect();
    for delete in &write.deletes {
        if manifest_raws.contains(delete.as_slice()) {
            return Err(SyncError::Validation(
                "a deleted ID remains in the new manifest".into(),
            ));
        }
    }

    for record in &write.inserts {
        if !write.manifest.contains(record.id()) {
            return Err(SyncError::Validation(
                "an inserted record is missing from the new manifest".into(),
            ));
        }
    }

    if !needs_force_push {
        if let Some(previous) = previous {
            let previous_ids = previous.id_set();
            for id in &write.manifest.storage_ids {
                if !previous_ids.contains(id) && !insert_raws.contains(id.raw()) {
                    return Err(SyncError::Validation(
                        "a manifest ID is neither in the previous manifest nor inserted".into(),
                    ));
                }
            }
        }
    }

    let mut seen: HashSet<SemanticKey> = HashSet::new();
    for record in &write.inserts {
        if !seen.insert(record.semantic_key()) {
            return Err(SyncError::Validation(
                "two inserted records of the same type share a semantic key".into(),
            ));
        }
    }

    Ok(())
}
