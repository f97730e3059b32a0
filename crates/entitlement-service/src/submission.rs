//! Proof-of-payment submission
//!
//! Loads the current record, runs it through the state machine and writes
//! the result back with a uniqueness-checked insert or a version-checked
//! update. Races with other writers on the same key are retried
//! immediately, a bounded number of times.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use unlock_common::{
    access_status, transition, Action, Actor, Command, EntitlementKey, Error, Result,
    Submission, SubmissionSource, Transition,
};

use crate::audit::{emit, AuditEvent, AuditOutcome, AuditSink};
use crate::directory::Catalog;
use crate::models::{SubmissionOutcome, SubmitProofRequest};
use crate::storage::{EntitlementStore, StoreError};

/// Default number of read-transition-write attempts
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

pub struct SubmissionService {
    store: Arc<dyn EntitlementStore>,
    catalog: Arc<dyn Catalog>,
    audit: Arc<dyn AuditSink>,
    max_attempts: u32,
    audit_timeout: Duration,
}

impl SubmissionService {
    pub fn new(
        store: Arc<dyn EntitlementStore>,
        catalog: Arc<dyn Catalog>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            catalog,
            audit,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            audit_timeout: Duration::from_millis(500),
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_audit_timeout(mut self, timeout: Duration) -> Self {
        self.audit_timeout = timeout;
        self
    }

    /// Submit proof of payment for an item on behalf of `actor`
    pub async fn submit_proof(
        &self,
        actor: &Actor,
        item_type: &str,
        item_id: &str,
        request: SubmitProofRequest,
    ) -> Result<SubmissionOutcome> {
        let item = self
            .catalog
            .get_item(item_type, item_id)
            .await?
            .ok_or_else(|| Error::ItemNotFound {
                item_type: item_type.to_string(),
                item_id: item_id.to_string(),
            })?;

        if request.source == SubmissionSource::Free && !item.is_free() {
            return Err(Error::InvalidSubmission(format!(
                "item {}/{} is not free",
                item_type, item_id
            )));
        }

        // Free items never touch the store
        if item.is_free() {
            debug!("Free item {}/{}, skipping submission", item_type, item_id);
            return Ok(SubmissionOutcome {
                status: access_status(&item, None),
                record: None,
                changed: false,
            });
        }

        let key = EntitlementKey::new(actor.user_id.clone(), item_id, item_type);
        let command = Command::Submit(Submission {
            key: key.clone(),
            proof_url: request.proof_url,
            source: request.source,
            item_price: item.price,
        });

        for attempt in 1..=self.max_attempts {
            let current = self.store.find_by_key(&key).await?;

            let (record, expected_version) =
                match transition(current.as_ref(), &command, actor, Utc::now())? {
                    Transition::Unchanged(record) => {
                        debug!("Entitlement {} already approved, submission is a no-op", key);
                        self.audit(actor, &key, Some(record.id), AuditOutcome::Unchanged)
                            .await;
                        return Ok(SubmissionOutcome {
                            status: access_status(&item, Some(&record)),
                            record: Some(record),
                            changed: false,
                        });
                    }
                    Transition::Insert(record) => (record, None),
                    Transition::Update {
                        record,
                        expected_version,
                    } => (record, Some(expected_version)),
                };

            let written = match expected_version {
                None => self.store.insert(&record).await,
                Some(version) => self.store.update(&record, version).await,
            };

            match written {
                Ok(()) => {
                    info!(
                        "Entitlement {} for {} is {} (version {})",
                        record.id, key, record.status, record.version
                    );
                    self.audit(actor, &key, Some(record.id), AuditOutcome::Applied)
                        .await;
                    return Ok(SubmissionOutcome {
                        status: access_status(&item, Some(&record)),
                        record: Some(record),
                        changed: true,
                    });
                }
                Err(StoreError::Duplicate(_)) | Err(StoreError::VersionConflict { .. }) => {
                    debug!(
                        "Write race on {} (attempt {}/{}), reloading",
                        key, attempt, self.max_attempts
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(
            "Giving up on submission for {} after {} attempts",
            key, self.max_attempts
        );
        let err = Error::ConcurrentModificationRetryExceeded {
            attempts: self.max_attempts,
        };
        self.audit(actor, &key, None, AuditOutcome::Failed(err.kind().to_string()))
            .await;
        Err(err)
    }

    async fn audit(
        &self,
        actor: &Actor,
        key: &EntitlementKey,
        id: Option<uuid::Uuid>,
        outcome: AuditOutcome,
    ) {
        let event = AuditEvent::new(&actor.user_id, Action::Submit, key.clone(), id, outcome);
        emit(&self.audit, event, self.audit_timeout).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLog;
    use crate::directory::MemoryCatalog;
    use crate::storage::{MemoryStore, StatusCounts};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use unlock_common::{AccessStatus, EntitlementRecord, EntitlementStatus, Item};

    fn item(id: &str, price: u64) -> Item {
        Item {
            id: id.to_string(),
            item_type: "project".to_string(),
            title: format!("Project {}", id),
            price,
            asset_url: Some(format!("https://drive/{}", id)),
        }
    }

    fn proof(url: &str) -> SubmitProofRequest {
        SubmitProofRequest {
            proof_url: Some(url.to_string()),
            source: SubmissionSource::Manual,
        }
    }

    fn service(store: Arc<dyn EntitlementStore>) -> (SubmissionService, Arc<MemoryAuditLog>) {
        let catalog = Arc::new(MemoryCatalog::with_items([item("p1", 2000), item("p2", 0)]));
        let audit = Arc::new(MemoryAuditLog::new());
        (
            SubmissionService::new(store, catalog, audit.clone()),
            audit,
        )
    }

    #[tokio::test]
    async fn test_first_submission_is_pending() {
        let store = Arc::new(MemoryStore::new());
        let (svc, audit) = service(store.clone());

        let outcome = svc
            .submit_proof(&Actor::buyer("u1"), "project", "p1", proof("https://proof/1"))
            .await
            .unwrap();

        assert_eq!(outcome.status, AccessStatus::Pending);
        assert!(outcome.changed);
        assert_eq!(outcome.record.unwrap().version, 1);
        assert_eq!(store.len().await, 1);

        let events = audit.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].outcome, AuditOutcome::Applied);
    }

    #[tokio::test]
    async fn test_unknown_item() {
        let (svc, _) = service(Arc::new(MemoryStore::new()));
        let err = svc
            .submit_proof(&Actor::buyer("u1"), "project", "nope", proof("https://proof/1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ItemNotFound { .. }));
    }

    #[tokio::test]
    async fn test_missing_proof_for_paid_item() {
        let store = Arc::new(MemoryStore::new());
        let (svc, _) = service(store.clone());

        let request = SubmitProofRequest {
            proof_url: Some("  ".to_string()),
            source: SubmissionSource::Manual,
        };
        let err = svc
            .submit_proof(&Actor::buyer("u1"), "project", "p1", request)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidSubmission(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_approved_buyer_resubmits_without_proof() {
        let store = Arc::new(MemoryStore::new());
        let mut approved = EntitlementRecord::new_pending(
            EntitlementKey::new("u1", "p1", "project"),
            Some("https://proof/1".to_string()),
            SubmissionSource::Manual,
            Utc::now(),
        );
        approved.status = EntitlementStatus::Approved;
        approved.metadata.verified_at = Some(Utc::now());
        approved.metadata.reviewer_id = Some("admin1".to_string());
        approved.version = 2;
        store.insert(&approved).await.unwrap();
        let (svc, audit) = service(store.clone());

        let request = SubmitProofRequest {
            proof_url: None,
            source: SubmissionSource::Manual,
        };
        let outcome = svc
            .submit_proof(&Actor::buyer("u1"), "project", "p1", request)
            .await
            .unwrap();

        assert_eq!(outcome.status, AccessStatus::Unlocked);
        assert!(!outcome.changed);
        assert_eq!(outcome.record, Some(approved.clone()));
        assert_eq!(store.get(approved.id).await.unwrap(), Some(approved));
        assert_eq!(audit.events().await[0].outcome, AuditOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_free_source_on_paid_item() {
        let (svc, _) = service(Arc::new(MemoryStore::new()));
        let request = SubmitProofRequest {
            proof_url: None,
            source: SubmissionSource::Free,
        };
        let err = svc
            .submit_proof(&Actor::buyer("u1"), "project", "p1", request)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSubmission(_)));
    }

    #[tokio::test]
    async fn test_free_item_short_circuits() {
        let store = Arc::new(MemoryStore::new());
        let (svc, audit) = service(store.clone());

        let request = SubmitProofRequest {
            proof_url: None,
            source: SubmissionSource::Free,
        };
        let outcome = svc
            .submit_proof(&Actor::buyer("u2"), "project", "p2", request)
            .await
            .unwrap();

        assert_eq!(outcome.status, AccessStatus::Free);
        assert!(outcome.record.is_none());
        assert!(!outcome.changed);
        assert!(store.is_empty().await);
        assert!(audit.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_double_submit_keeps_one_record() {
        let store = Arc::new(MemoryStore::new());
        let (svc, _) = service(store.clone());
        let buyer = Actor::buyer("u1");

        let first = svc
            .submit_proof(&buyer, "project", "p1", proof("https://proof/1"))
            .await
            .unwrap()
            .record
            .unwrap();
        let second = svc
            .submit_proof(&buyer, "project", "p1", proof("https://proof/2"))
            .await
            .unwrap()
            .record
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.version, 2);
        assert_eq!(second.metadata.proof_url.as_deref(), Some("https://proof/2"));
        assert_eq!(store.len().await, 1);
    }

    /// Store whose first few writes lose a race
    struct RacyStore {
        inner: MemoryStore,
        conflicts_left: AtomicU32,
    }

    #[async_trait]
    impl EntitlementStore for RacyStore {
        async fn get(&self, id: uuid::Uuid) -> std::result::Result<Option<EntitlementRecord>, StoreError> {
            self.inner.get(id).await
        }

        async fn find_by_key(
            &self,
            key: &EntitlementKey,
        ) -> std::result::Result<Option<EntitlementRecord>, StoreError> {
            self.inner.find_by_key(key).await
        }

        async fn insert(&self, record: &EntitlementRecord) -> std::result::Result<(), StoreError> {
            if self.conflicts_left.load(Ordering::SeqCst) > 0 {
                self.conflicts_left.fetch_sub(1, Ordering::SeqCst);
                return Err(StoreError::Duplicate(record.key.clone()));
            }
            self.inner.insert(record).await
        }

        async fn update(
            &self,
            record: &EntitlementRecord,
            expected_version: u64,
        ) -> std::result::Result<(), StoreError> {
            self.inner.update(record, expected_version).await
        }

        async fn list(
            &self,
            status: Option<EntitlementStatus>,
        ) -> std::result::Result<Vec<EntitlementRecord>, StoreError> {
            self.inner.list(status).await
        }

        async fn count_by_status(&self) -> std::result::Result<StatusCounts, StoreError> {
            self.inner.count_by_status().await
        }
    }

    #[tokio::test]
    async fn test_retries_lost_insert_race() {
        let store = Arc::new(RacyStore {
            inner: MemoryStore::new(),
            conflicts_left: AtomicU32::new(2),
        });
        let (svc, _) = service(store.clone());

        let outcome = svc
            .submit_proof(&Actor::buyer("u1"), "project", "p1", proof("https://proof/1"))
            .await
            .unwrap();
        assert_eq!(outcome.status, AccessStatus::Pending);
        assert_eq!(store.inner.len().await, 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let store = Arc::new(RacyStore {
            inner: MemoryStore::new(),
            conflicts_left: AtomicU32::new(10),
        });
        let (svc, audit) = service(store.clone());

        let err = svc
            .submit_proof(&Actor::buyer("u1"), "project", "p1", proof("https://proof/1"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::ConcurrentModificationRetryExceeded { attempts: 3 }
        ));
        assert!(store.inner.is_empty().await);
        assert_eq!(
            audit.events().await[0].outcome,
            AuditOutcome::Failed("concurrent_modification_retry_exceeded".to_string())
        );
    }
}
