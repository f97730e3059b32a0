//! Entitlement record storage
//!
//! The store is the only coordination point between concurrent requests:
//! it enforces natural-key uniqueness on insert and compares the version
//! token on update. Everything above it is stateless.

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use unlock_common::{EntitlementKey, EntitlementRecord, EntitlementStatus, Error};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    /// A record already exists for this natural key
    #[error("Entitlement already exists for {0}")]
    Duplicate(EntitlementKey),

    /// The stored version did not match the expected one
    #[error("Version conflict on {id}: expected {expected}, found {actual}")]
    VersionConflict { id: Uuid, expected: u64, actual: u64 },

    #[error("Entitlement not found: {0}")]
    NotFound(Uuid),

    #[error("Corrupt entitlement {id}: {reason}")]
    Corrupt { id: String, reason: String },

    /// Connection failures, timeouts and other backend trouble
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Error::RecordNotFound(id.to_string()),
            StoreError::VersionConflict {
                expected, actual, ..
            } => Error::StaleDecision { expected, actual },
            StoreError::Duplicate(key) => {
                Error::Transient(format!("duplicate entitlement for {}", key))
            }
            StoreError::Corrupt { id, reason } => Error::CorruptRecord { id, reason },
            StoreError::Backend(msg) => Error::Transient(msg),
        }
    }
}

/// Number of records per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
}

impl StatusCounts {
    pub fn add(&mut self, status: EntitlementStatus) {
        match status {
            EntitlementStatus::Pending => self.pending += 1,
            EntitlementStatus::Approved => self.approved += 1,
            EntitlementStatus::Rejected => self.rejected += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.approved + self.rejected
    }
}

/// Durable keyed storage for entitlement records.
///
/// Records are never deleted; there is intentionally no removal method.
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Load a record by surrogate id
    async fn get(&self, id: Uuid) -> Result<Option<EntitlementRecord>, StoreError>;

    /// Load a record by natural key
    async fn find_by_key(
        &self,
        key: &EntitlementKey,
    ) -> Result<Option<EntitlementRecord>, StoreError>;

    /// Insert a new record.
    ///
    /// Fails with [`StoreError::Duplicate`] if the natural key is taken.
    async fn insert(&self, record: &EntitlementRecord) -> Result<(), StoreError>;

    /// Replace a record if its stored version equals `expected_version`.
    async fn update(
        &self,
        record: &EntitlementRecord,
        expected_version: u64,
    ) -> Result<(), StoreError>;

    /// Records ordered by creation time, newest first
    async fn list(
        &self,
        status: Option<EntitlementStatus>,
    ) -> Result<Vec<EntitlementRecord>, StoreError>;

    async fn count_by_status(&self) -> Result<StatusCounts, StoreError>;
}

/// Validate a loaded record before handing it out
fn checked(record: EntitlementRecord) -> Result<EntitlementRecord, StoreError> {
    match record.check_invariants() {
        Ok(()) => Ok(record),
        Err(Error::CorruptRecord { id, reason }) => Err(StoreError::Corrupt { id, reason }),
        Err(e) => Err(StoreError::Corrupt {
            id: record.id.to_string(),
            reason: e.to_string(),
        }),
    }
}

fn sort_newest_first(records: &mut [EntitlementRecord]) {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}
