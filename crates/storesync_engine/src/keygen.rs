//! Storage-ID generation.

use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::atomic::{AtomicU64, Ordering};
use storesync_protocol::STORAGE_ID_LEN;

/// Mints the raw bytes of fresh storage IDs.
///
/// Every logical update rotates a record's ID, so the generator is
/// consulted by the merge path and by the local-change builder. IDs must
/// never repeat within an account.
pub trait StorageKeyGenerator: Send + Sync {
    /// Generates the raw bytes of a fresh storage ID.
    fn generate(&self) -> Vec<u8>;
}

/// Generates IDs from the operating system's CSPRNG.
#[derive(Debug, Default)]
pub struct RandomKeyGenerator;

impl RandomKeyGenerator {
    /// Creates a new random generator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl StorageKeyGenerator for RandomKeyGenerator {
    fn generate(&self) -> Vec<u8> {
        let mut raw = vec![0u8; STORAGE_ID_LEN];
        OsRng.fill_bytes(&mut raw);
        raw
    }
}

/// Generates deterministic sequential IDs for tests.
#[derive(Debug, Default)]
pub struct SequenceKeyGenerator {
    next: AtomicU64,
}

impl SequenceKeyGenerator {
    /// Creates a generator starting at the given counter value.
    #[must_use]
    pub fn starting_at(next: u64) -> Self {
        Self {
            next: AtomicU64::new(next),
        }
    }
}

impl StorageKeyGenerator for SequenceKeyGenerator {
    fn generate(&self) -> Vec<u8> {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        let mut raw = vec![0u8; STORAGE_ID_LEN];
        raw[STORAGE_ID_LEN - 8..].copy_from_slice(&n.to_be_bytes());
        raw
    }
}
