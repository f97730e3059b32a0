//! In-process entitlement store
//!
//! Used by tests and by `STORE_BACKEND=memory` for local development.
//! The write lock makes insert-if-absent and compare-and-set atomic.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use unlock_common::{EntitlementKey, EntitlementRecord, EntitlementStatus};
use uuid::Uuid;

use super::{checked, sort_newest_first, EntitlementStore, StatusCounts, StoreError};

#[derive(Default)]
struct Tables {
    records: HashMap<Uuid, EntitlementRecord>,
    by_key: HashMap<EntitlementKey, Uuid>,
}

/// Memory-backed [`EntitlementStore`]
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.tables.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl EntitlementStore for MemoryStore {
    async fn get(&self, id: Uuid) -> Result<Option<EntitlementRecord>, StoreError> {
        let tables = self.tables.read().await;
        tables.records.get(&id).cloned().map(checked).transpose()
    }

    async fn find_by_key(
        &self,
        key: &EntitlementKey,
    ) -> Result<Option<EntitlementRecord>, StoreError> {
        let tables = self.tables.read().await;
        tables
            .by_key
            .get(key)
            .and_then(|id| tables.records.get(id))
            .cloned()
            .map(checked)
            .transpose()
    }

    async fn insert(&self, record: &EntitlementRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;

        if tables.by_key.contains_key(&record.key) {
            debug!("Duplicate insert for {}", record.key);
            return Err(StoreError::Duplicate(record.key.clone()));
        }

        tables.by_key.insert(record.key.clone(), record.id);
        tables.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn update(
        &self,
        record: &EntitlementRecord,
        expected_version: u64,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;

        let stored = tables
            .records
            .get_mut(&record.id)
            .ok_or(StoreError::NotFound(record.id))?;

        if stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                id: record.id,
                expected: expected_version,
                actual: stored.version,
            });
        }

        *stored = record.clone();
        Ok(())
    }

    async fn list(
        &self,
        status: Option<EntitlementStatus>,
    ) -> Result<Vec<EntitlementRecord>, StoreError> {
        let tables = self.tables.read().await;
        let mut records = tables
            .records
            .values()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .map(checked)
            .collect::<Result<Vec<_>, _>>()?;

        sort_newest_first(&mut records);
        Ok(records)
    }

    async fn count_by_status(&self) -> Result<StatusCounts, StoreError> {
        let tables = self.tables.read().await;
        let mut counts = StatusCounts::default();
        for record in tables.records.values() {
            counts.add(record.status);
        }
        Ok(counts)
    }
}
