//! Per-kind record processors.
//!
//! One processor exists per record kind. Each knows how to reject invalid
//! remote records, match a remote record to its local row, merge the two,
//! and stage local writes. The batch loop in [`RecordProcessor::process`]
//! is shared; only the per-kind hooks differ.

mod account;
mod contact;
mod group_v1;
mod group_v2;

pub use account::AccountProcessor;
pub use contact::ContactProcessor;
pub use group_v1::GroupV1Processor;
pub use group_v2::GroupV2Processor;

use crate::error::SyncResult;
use std::collections::HashSet;
use std::fmt;
use storesync_protocol::SemanticKey;
use tracing::warn;

/// A record replacement: the old snapshot is deleted remotely and the new
/// one inserted in its place.
#[derive(Debug, Clone)]
pub struct RecordUpdate<R> {
    /// The snapshot currently held by the server.
    pub old: R,
    /// The snapshot that replaces it.
    pub new: R,
}

/// The outcome of processing one batch of remote records.
#[derive(Debug, Clone)]
pub struct ProcessResult<R> {
    /// Remote records to replace (old deleted, new inserted).
    pub remote_updates: Vec<RecordUpdate<R>>,
    /// Remote records to delete outright (invalid or duplicate).
    pub remote_deletes: Vec<R>,
}

impl<R> ProcessResult<R> {
    /// Creates an empty result.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            remote_updates: Vec::new(),
            remote_deletes: Vec::new(),
        }
    }

    /// True if processing produced no remote writes.
    #[must_use]
    pub fn is_local_only(&self) -> bool {
        self.remote_updates.is_empty() && self.remote_deletes.is_empty()
    }
}

impl<R> Default for ProcessResult<R> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<R> fmt::Display for ProcessResult<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} updates, {} deletes",
            self.remote_updates.len(),
            self.remote_deletes.len()
        )
    }
}

/// The processing contract for one record kind.
///
/// `process` implements the shared batch algorithm: invalid records are
/// staged for remote deletion, unmatched records materialise locally, and
/// matched records merge three ways. Duplicate detection keys on the
/// record's semantic identity because storage IDs rotate on every update;
/// the first remote record to claim a local entity wins and later
/// claimants are deleted remotely.
pub trait RecordProcessor {
    /// The record kind this processor handles.
    type Record: Clone + PartialEq;

    /// True if the record is malformed and should be removed from the
    /// service.
    fn is_invalid(&self, remote: &Self::Record) -> bool;

    /// Finds the local row this record refers to, projected into record
    /// form so it is comparable. Only valid records reach this point.
    fn matching(&self, remote: &Self::Record) -> Option<Self::Record>;

    /// Merges a remote record with its local image.
    ///
    /// Returns `remote` unchanged when the merged attributes match it
    /// bit-for-bit, `local` unchanged when they match the local image, and
    /// otherwise a new record under a fresh storage ID.
    fn merge(&self, remote: &Self::Record, local: &Self::Record) -> Self::Record;

    /// The record's stable semantic identity.
    fn semantic_key(&self, record: &Self::Record) -> SemanticKey;

    /// Writes a new local row for a record with no local counterpart.
    fn insert_local(&self, record: Self::Record) -> SyncResult<()>;

    /// Applies merged attributes to the matched row and rotates its ID.
    fn update_local(&self, old: &Self::Record, new: Self::Record) -> SyncResult<()>;

    /// Processes one batch of remote records.
    fn process(&self, remotes: Vec<Self::Record>) -> SyncResult<ProcessResult<Self::Record>> {
        let mut matched: HashSet<SemanticKey> = HashSet::new();
        let mut result = ProcessResult::empty();

        for remote in remotes {
            if self.is_invalid(&remote) {
                result.remote_deletes.push(remote);
                continue;
            }

            let Some(local) = self.matching(&remote) else {
                self.insert_local(remote)?;
                continue;
            };

            let merged = self.merge(&remote, &local);

            if !matched.insert(self.semantic_key(&local)) {
                // A second remote record claims the same local entity. The
                // first one already owns the row; delete this one remotely
                // or the uploaded ID set would fail validation.
                warn!("multiple remote records map to the same local entity, deleting duplicate");
                result.remote_deletes.push(remote);
                continue;
            }

            if merged != remote {
                result.remote_updates.push(RecordUpdate {
                    old: remote,
                    new: merged.clone(),
                });
            }

            if merged != local {
                self.update_local(&local, merged)?;
            }
        }

        Ok(result)
    }
}
