//! The sync orchestrator.
//!
//! One [`SyncEngine::sync`] call drives the full pull-merge-push cycle
//! described in the crate docs. The local transaction covers only the
//! merge bookkeeping: every remote read happens before it opens and every
//! remote write after it commits, so a failed push leaves the local
//! manifest version behind and the next cycle re-observes the same
//! remote-only IDs and reconverges.

use crate::config::SyncConfig;
use crate::diff::find_key_difference;
use crate::error::{SyncError, SyncResult};
use crate::keygen::StorageKeyGenerator;
use crate::processor::{
    AccountProcessor, ContactProcessor, GroupV1Processor, GroupV2Processor, RecordProcessor,
};
use crate::service::{StorageKey, StorageService};
use crate::store::{LocalStore, RowId, TransactionGuard};
use crate::validate::validate_write;
use crate::write::{build_local_write, create_merge_write};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use storesync_protocol::{
    AccountRecord, ContactRecord, GroupV1Record, GroupV2Record, Manifest, StorageRecord,
    UnknownRecord,
};
use tracing::{debug, info, warn};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Engine is idle, not syncing.
    Idle,
    /// Probing the server for a newer manifest.
    FetchingManifest,
    /// Fetching remote-only records.
    FetchingRecords,
    /// Merging remote records inside the local transaction.
    Merging,
    /// Pushing the merged write operation.
    PushingMerge,
    /// Pushing pending local changes.
    PushingLocal,
    /// The last cycle completed.
    Synced,
    /// The last cycle failed.
    Error,
    /// Waiting before a retry attempt.
    RetryWait,
}

impl SyncState {
    /// Returns true if a sync cycle is currently executing.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::FetchingManifest
                | SyncState::FetchingRecords
                | SyncState::Merging
                | SyncState::PushingMerge
                | SyncState::PushingLocal
        )
    }

    /// Returns true if a new sync cycle may start.
    #[must_use]
    pub fn can_start_sync(&self) -> bool {
        matches!(
            self,
            SyncState::Idle | SyncState::Synced | SyncState::Error | SyncState::RetryWait
        )
    }
}

/// Counters across sync cycles.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Completed sync cycles.
    pub cycles_completed: u64,
    /// Remote records fetched and processed.
    pub remote_records_processed: u64,
    /// Remote writes pushed.
    pub remote_writes: u64,
    /// Compare-and-set conflicts hit.
    pub conflicts: u64,
    /// Retry attempts made by [`SyncEngine::sync_with_retry`].
    pub retries: u64,
    /// Message of the last error, if any.
    pub last_error: Option<String>,
}

/// The outcome of a completed sync cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Linked devices should be told to sync.
    pub needs_multi_device_sync: bool,
    /// An external force-push job should rebuild the server's manifest
    /// from local state.
    pub needs_force_push: bool,
    /// The storage key should be rotated to linked devices before the
    /// force push.
    pub needs_key_update: bool,
    /// The cycle was skipped because the client is not ready.
    pub skipped: bool,
}

impl SyncReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Remote records partitioned by type tag.
#[derive(Default)]
struct Partitioned {
    contacts: Vec<ContactRecord>,
    groups_v1: Vec<GroupV1Record>,
    groups_v2: Vec<GroupV2Record>,
    accounts: Vec<AccountRecord>,
    unknowns: Vec<UnknownRecord>,
}

impl Partitioned {
    fn from_records(records: Vec<StorageRecord>) -> Self {
        let mut partitioned = Self::default();
        for record in records {
            match record {
                StorageRecord::Contact(r) => partitioned.contacts.push(r),
                StorageRecord::GroupV1(r) => partitioned.groups_v1.push(r),
                StorageRecord::GroupV2(r) => partitioned.groups_v2.push(r),
                StorageRecord::Account(r) => partitioned.accounts.push(r),
                StorageRecord::Unknown(r) => partitioned.unknowns.push(r),
            }
        }
        partitioned
    }
}

/// Drives the pull-merge-push cycle against a storage service.
///
/// At most one cycle runs at a time; a second [`SyncEngine::sync`] call
/// while one is active fails with [`SyncError::AlreadyRunning`] rather
/// than interleaving.
pub struct SyncEngine<S: StorageService, L: LocalStore> {
    config: SyncConfig,
    service: Arc<S>,
    store: Arc<L>,
    keygen: Arc<dyn StorageKeyGenerator>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    cancelled: AtomicBool,
}

impl<S: StorageService, L: LocalStore> SyncEngine<S, L> {
    /// Creates a new sync engine.
    pub fn new(
        config: SyncConfig,
        service: Arc<S>,
        store: Arc<L>,
        keygen: Arc<dyn StorageKeyGenerator>,
    ) -> Self {
        Self {
            config,
            service,
            store,
            keygen,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Returns the local store.
    pub fn store(&self) -> &Arc<L> {
        &self.store
    }

    /// Returns the storage service.
    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Requests cancellation of the running cycle.
    ///
    /// The cycle aborts at its next suspension point with
    /// [`SyncError::Cancelled`], which callers treat as retry-later.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    /// Performs one full sync cycle.
    ///
    /// Skips silently (with `skipped` set in the report) when the client
    /// is not registered or has no storage key. A decrypt failure is
    /// escalated through the report instead of being re-raised.
    pub fn sync(&self) -> SyncResult<SyncReport> {
        if !self.state().can_start_sync() {
            return Err(SyncError::AlreadyRunning);
        }
        self.cancelled.store(false, Ordering::SeqCst);

        if !self.store.is_ready() {
            info!("client not ready, skipping sync");
            self.set_state(SyncState::Synced);
            return Ok(SyncReport::skipped());
        }
        let Some(key) = self.store.storage_key() else {
            info!("no storage key provisioned, skipping sync");
            self.set_state(SyncState::Synced);
            return Ok(SyncReport::skipped());
        };

        match self.perform_sync(&key) {
            Ok(report) => {
                self.set_state(SyncState::Synced);
                let mut stats = self.stats.write();
                stats.cycles_completed += 1;
                stats.last_error = None;
                Ok(report)
            }
            Err(SyncError::DecryptFailure) => {
                warn!("failed to decrypt remote records, escalating to key update and force push");
                self.set_state(SyncState::Synced);
                self.stats.write().cycles_completed += 1;
                Ok(SyncReport {
                    needs_multi_device_sync: self.config.multi_device,
                    needs_force_push: true,
                    needs_key_update: true,
                    skipped: false,
                })
            }
            Err(error) => {
                self.set_state(SyncState::Error);
                self.stats.write().last_error = Some(error.to_string());
                Err(error)
            }
        }
    }

    /// Performs a sync, retrying retry-later errors with backoff.
    pub fn sync_with_retry(&self) -> SyncResult<SyncReport> {
        let retry = self.config.retry.clone();
        let mut last_error = None;

        for attempt in 0..retry.max_attempts {
            if attempt > 0 {
                self.set_state(SyncState::RetryWait);
                std::thread::sleep(retry.delay_for_attempt(attempt));
                self.stats.write().retries += 1;
            }

            match self.sync() {
                Ok(report) => return Ok(report),
                Err(error) if error.is_retry_later() && attempt + 1 < retry.max_attempts => {
                    warn!(attempt, "sync attempt failed, will retry: {error}");
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }

        Err(last_error.unwrap_or_else(|| SyncError::Store("no sync attempts were made".into())))
    }

    fn perform_sync(&self, key: &StorageKey) -> SyncResult<SyncReport> {
        let mut needs_multi_device = false;
        let mut needs_force_push = false;

        let local_version = self.store.manifest_version();
        self.set_state(SyncState::FetchingManifest);
        self.check_cancelled()?;
        let remote_manifest = self.service.manifest_if_different(key, local_version)?;

        // Tracks the newest manifest we know the server holds; the
        // local-change push validates against it.
        let mut latest_manifest: Option<Manifest> = None;

        match remote_manifest {
            Some(manifest) if manifest.version > local_version => {
                info!(
                    local_version,
                    remote_version = manifest.version,
                    "newer remote manifest found"
                );
                latest_manifest =
                    self.merge_remote(key, manifest, &mut needs_force_push, &mut needs_multi_device)?;
            }
            Some(manifest) => {
                // The server can only answer with an older manifest if a
                // force push rolled the version back; adopt its version so
                // the next probe is consistent.
                debug!(
                    local_version,
                    remote_version = manifest.version,
                    "remote manifest is not newer"
                );
                latest_manifest = Some(manifest);
            }
            None => {
                debug!(local_version, "remote manifest unchanged");
            }
        }

        self.push_local_changes(key, latest_manifest, needs_force_push, &mut needs_multi_device)?;

        if needs_force_push {
            warn!("scheduling a force push after this cycle");
        }

        Ok(SyncReport {
            needs_multi_device_sync: needs_multi_device && self.config.multi_device,
            needs_force_push,
            needs_key_update: false,
            skipped: false,
        })
    }

    /// Diffs the ID sets, fetches remote-only records, merges them inside
    /// the local transaction, and pushes the merged write.
    ///
    /// Returns the newest manifest known to be held by the server.
    fn merge_remote(
        &self,
        key: &StorageKey,
        remote_manifest: Manifest,
        needs_force_push: &mut bool,
        needs_multi_device: &mut bool,
    ) -> SyncResult<Option<Manifest>> {
        let local_ids_before = self.store.all_storage_ids();
        let diff = find_key_difference(&remote_manifest.storage_ids, &local_ids_before);

        if diff.has_type_mismatches {
            warn!("type mismatches in the key sets, scheduling a force push");
            *needs_force_push = true;
        }

        if diff.is_empty() {
            info!("remote manifest was newer but held no new keys");
            self.store.set_manifest_version(remote_manifest.version);
            return Ok(Some(remote_manifest));
        }

        info!(
            remote_only = diff.remote_only.len(),
            local_only = diff.local_only.len(),
            "retrieving records for key difference"
        );

        self.set_state(SyncState::FetchingRecords);
        self.check_cancelled()?;
        let remote_records = self.service.read_records(key, &diff.remote_only)?;

        if remote_records.len() < diff.remote_only.len() {
            warn!(
                requested = diff.remote_only.len(),
                returned = remote_records.len(),
                "server did not return every requested record, scheduling a force push"
            );
            *needs_force_push = true;
        }
        self.stats.write().remote_records_processed += remote_records.len() as u64;

        let remote = Partitioned::from_records(remote_records);

        self.set_state(SyncState::Merging);
        let store = self.store.as_ref();
        let merge_write = {
            let transaction = TransactionGuard::begin(store);

            let contact_result =
                ContactProcessor::new(store, self.keygen.as_ref()).process(remote.contacts)?;
            let gv1_result =
                GroupV1Processor::new(store, self.keygen.as_ref()).process(remote.groups_v1)?;
            let gv2_result =
                GroupV2Processor::new(store, self.keygen.as_ref()).process(remote.groups_v2)?;
            let account_result =
                AccountProcessor::new(store, self.keygen.as_ref()).process(remote.accounts)?;

            let unknown_inserts = remote.unknowns;
            let unknown_deletes: Vec<_> = diff
                .local_only
                .iter()
                .filter(|id| id.is_unknown())
                .cloned()
                .collect();
            store.insert_unknown_records(unknown_inserts.clone())?;
            store.delete_unknown_records(&unknown_deletes)?;

            let local_ids_after = store.all_storage_ids();
            info!(
                contacts = %contact_result,
                groups_v1 = %gv1_result,
                groups_v2 = %gv2_result,
                account = %account_result,
                unknown_inserts = unknown_inserts.len(),
                unknown_deletes = unknown_deletes.len(),
                ids_before = local_ids_before.len(),
                ids_after = local_ids_after.len(),
                "merge complete"
            );

            let mut merge_write = create_merge_write(
                remote_manifest.version,
                local_ids_after,
                contact_result,
                gv1_result,
                gv2_result,
                account_result,
            );

            // Reconcile post-merge leftovers: local-only IDs the merge did
            // not insert are materialised from the local store, and
            // remote-only IDs it did not delete are deleted.
            let post_diff = find_key_difference(
                &remote_manifest.storage_ids,
                &merge_write.manifest.storage_ids,
            );

            let insert_ids: HashSet<_> =
                merge_write.inserts.iter().map(|r| r.id().clone()).collect();
            let unhandled_local_only: Vec<_> = post_diff
                .local_only
                .into_iter()
                .filter(|id| !insert_ids.contains(id))
                .collect();
            if !unhandled_local_only.is_empty() {
                info!(
                    count = unhandled_local_only.len(),
                    "adding local-only records left after merge as inserts"
                );
                for id in &unhandled_local_only {
                    merge_write.inserts.push(store.record_by_storage_id(id)?);
                }
                store.clear_dirty_state_for_ids(&unhandled_local_only);
            }

            let delete_raws: HashSet<_> = merge_write.deletes.iter().cloned().collect();
            let unhandled_remote_only: Vec<_> = post_diff
                .remote_only
                .into_iter()
                .map(|id| id.into_raw())
                .filter(|raw| !delete_raws.contains(raw))
                .collect();
            if !unhandled_remote_only.is_empty() {
                info!(
                    count = unhandled_remote_only.len(),
                    "adding remote-only records left after merge as deletes"
                );
                merge_write.deletes.extend(unhandled_remote_only);
            }

            transaction.commit();
            merge_write
        };

        if merge_write.is_empty() {
            info!("no remote writes needed after merge");
            self.store.set_manifest_version(remote_manifest.version);
            return Ok(Some(remote_manifest));
        }

        info!(%merge_write, "pushing merged write operation");
        validate_write(&merge_write, Some(&remote_manifest), *needs_force_push)?;

        self.set_state(SyncState::PushingMerge);
        self.check_cancelled()?;
        let conflict = self.service.write_records(
            key,
            &merge_write.manifest,
            &merge_write.inserts,
            &merge_write.deletes,
        )?;
        if let Some(server_manifest) = conflict {
            warn!(
                server_version = server_manifest.version,
                "conflict while pushing the merged write, retrying later"
            );
            self.stats.write().conflicts += 1;
            return Err(SyncError::RemoteConflict {
                server_version: server_manifest.version,
            });
        }

        self.stats.write().remote_writes += 1;
        self.store.set_manifest_version(merge_write.manifest.version);
        *needs_multi_device = true;

        Ok(Some(merge_write.manifest))
    }

    /// Collects the store's dirty rows and pushes them as a second write.
    fn push_local_changes(
        &self,
        key: &StorageKey,
        latest_manifest: Option<Manifest>,
        needs_force_push: bool,
        needs_multi_device: &mut bool,
    ) -> SyncResult<()> {
        let local_version = self.store.manifest_version();
        let all_local_ids = self.store.all_storage_ids();
        let pending_updates = self.store.pending_updates();
        let pending_inserts = self.store.pending_inserts();
        let pending_deletes = self.store.pending_deletes();
        let pending_account = self.store.pending_account_change();

        let Some(local_write) = build_local_write(
            local_version,
            all_local_ids,
            &pending_updates,
            &pending_inserts,
            &pending_deletes,
            pending_account.as_ref(),
            self.keygen.as_ref(),
        ) else {
            debug!("no local changes to push");
            return Ok(());
        };

        info!(
            updates = pending_updates.len(),
            inserts = pending_inserts.len(),
            deletes = pending_deletes.len(),
            account = pending_account.is_some(),
            "pushing pending local changes"
        );

        validate_write(&local_write.write, latest_manifest.as_ref(), needs_force_push)?;

        self.set_state(SyncState::PushingLocal);
        self.check_cancelled()?;
        let conflict = self.service.write_records(
            key,
            &local_write.write.manifest,
            &local_write.write.inserts,
            &local_write.write.deletes,
        )?;
        if let Some(server_manifest) = conflict {
            warn!(
                server_version = server_manifest.version,
                "conflict while pushing local changes, retrying later"
            );
            self.stats.write().conflicts += 1;
            return Err(SyncError::RemoteConflict {
                server_version: server_manifest.version,
            });
        }

        let mut contributing_rows: Vec<RowId> = Vec::with_capacity(
            pending_updates.len() + pending_inserts.len() + pending_deletes.len() + 1,
        );
        contributing_rows.extend(pending_updates.iter().map(|c| c.row));
        contributing_rows.extend(pending_inserts.iter().map(|c| c.row));
        contributing_rows.extend(pending_deletes.iter().map(|d| d.row));
        if let Some(account) = &pending_account {
            contributing_rows.push(account.row);
        }

        self.store.clear_dirty_state(&contributing_rows);
        self.store
            .apply_storage_id_updates(&local_write.storage_id_updates);
        self.store
            .set_manifest_version(local_write.write.manifest.version);
        self.stats.write().remote_writes += 1;
        *needs_multi_device = true;

        Ok(())
    }
}
