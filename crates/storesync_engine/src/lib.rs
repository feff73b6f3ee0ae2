//! # Storesync Engine
//!
//! Reconciliation engine that keeps a client's local record store
//! consistent with the remote storage service.
//!
//! The service is a dumb versioned key-value store; all merging happens on
//! the client. One [`SyncEngine::sync`] invocation:
//!
//! 1. Fetches the remote manifest if its version is newer than ours.
//! 2. Diffs the remote and local storage-ID sets ([`find_key_difference`]).
//! 3. Fetches the remote-only records and runs them through the per-kind
//!    [`RecordProcessor`]s inside a local transaction.
//! 4. Pushes the merged outcome back under the next manifest version.
//! 5. Pushes any independently pending local changes the same way.
//!
//! Remote writes are compare-and-set on the manifest version; a conflict
//! surfaces as [`SyncError::RemoteConflict`] and the next invocation
//! re-merges against the server's current state. The local transaction
//! never spans network I/O: all remote reads finish before it opens and
//! all remote writes start after it commits.
//!
//! This crate provides:
//! - [`SyncEngine`], the orchestrator, with its state machine and stats
//! - [`RecordProcessor`] implementations for every record kind
//! - [`find_key_difference`] and [`WriteOperationResult`] assembly
//! - The [`StorageService`] and [`LocalStore`] collaborator traits
//! - [`MemoryLocalStore`] and [`MockStorageService`] for tests

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod diff;
mod error;
mod keygen;
mod memory;
mod processor;
mod service;
mod store;
mod sync;
mod validate;
mod write;

pub use config::{RetryConfig, SyncConfig};
pub use diff::{find_key_difference, KeyDifference};
pub use error::{SyncError, SyncResult};
pub use keygen::{RandomKeyGenerator, SequenceKeyGenerator, StorageKeyGenerator};
pub use memory::MemoryLocalStore;
pub use processor::{
    AccountProcessor, ContactProcessor, GroupV1Processor, GroupV2Processor, ProcessResult,
    RecordProcessor, RecordUpdate,
};
pub use service::{MockStorageService, RecordedWrite, StorageKey, StorageService, STORAGE_KEY_LEN};
pub use store::{
    DirtyState, LocalStore, PendingAccountChange, PendingChange, PendingDelete, RowId,
    TransactionGuard,
};
pub use sync::{SyncEngine, SyncReport, SyncState, SyncStats};
pub use validate::validate_write;
pub use write::{build_local_write, create_merge_write, LocalWriteResult, WriteOperationResult};
