//! Moderation: review queue and approve/reject decisions
//!
//! Decisions are conditioned on the version the moderator looked at. A
//! stale decision is reported to the caller and never retried here: the
//! moderator has to look at the changed record again.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use unlock_common::models::has_text;
use unlock_common::{
    transition, Actor, Command, Decision, EntitlementRecord, EntitlementStatus, Error, Result,
    Transition, Verdict,
};
use uuid::Uuid;

use crate::audit::{emit, AuditEvent, AuditOutcome, AuditSink};
use crate::directory::{Catalog, UserDirectory};
use crate::models::{BuyerSummary, ItemSummary, QueueEntry, QueueFilter, QueuePage};
use crate::storage::{EntitlementStore, StatusCounts, StoreError};

pub const DEFAULT_PAGE_SIZE: usize = 25;
pub const DEFAULT_MAX_PAGE_SIZE: usize = 100;

pub struct ModerationService {
    store: Arc<dyn EntitlementStore>,
    catalog: Arc<dyn Catalog>,
    users: Arc<dyn UserDirectory>,
    audit: Arc<dyn AuditSink>,
    page_size: usize,
    max_page_size: usize,
    audit_timeout: Duration,
}

impl ModerationService {
    pub fn new(
        store: Arc<dyn EntitlementStore>,
        catalog: Arc<dyn Catalog>,
        users: Arc<dyn UserDirectory>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            catalog,
            users,
            audit,
            page_size: DEFAULT_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            audit_timeout: Duration::from_millis(500),
        }
    }

    pub fn with_page_sizes(mut self, page_size: usize, max_page_size: usize) -> Self {
        self.max_page_size = max_page_size.max(1);
        self.page_size = page_size.clamp(1, self.max_page_size);
        self
    }

    pub fn with_audit_timeout(mut self, timeout: Duration) -> Self {
        self.audit_timeout = timeout;
        self
    }

    fn require_moderator(actor: &Actor) -> Result<()> {
        if actor.is_moderator() {
            Ok(())
        } else {
            warn!("Moderation attempt by non-moderator {}", actor.user_id);
            Err(Error::Forbidden(actor.user_id.clone()))
        }
    }

    /// Review queue, newest first
    pub async fn list_pending(&self, actor: &Actor, filter: QueueFilter) -> Result<QueuePage> {
        Self::require_moderator(actor)?;

        let status = filter.status.unwrap_or(EntitlementStatus::Pending);
        let needle = filter
            .search
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());
        let offset = filter.offset.unwrap_or(0);
        let limit = filter
            .limit
            .unwrap_or(self.page_size)
            .clamp(1, self.max_page_size);

        let records = self.store.list(Some(status)).await?;

        // Without a search term only the requested page is joined
        let (entries, total) = match needle {
            None => {
                let total = records.len();
                let mut entries = Vec::new();
                for record in records.into_iter().skip(offset).take(limit) {
                    entries.push(self.join(record).await?);
                }
                (entries, total)
            }
            Some(needle) => {
                let mut matched = Vec::new();
                for record in records {
                    let entry = self.join(record).await?;
                    if entry_matches(&entry, &needle) {
                        matched.push(entry);
                    }
                }
                let total = matched.len();
                (matched.into_iter().skip(offset).take(limit).collect(), total)
            }
        };

        Ok(QueuePage {
            entries,
            total,
            offset,
            limit,
        })
    }

    async fn join(&self, record: EntitlementRecord) -> Result<QueueEntry> {
        let item = self
            .catalog
            .get_item(&record.key.item_type, &record.key.item_id)
            .await?;
        let buyer = self.users.get_user(&record.key.user_id).await?;

        Ok(QueueEntry {
            item: item.as_ref().map(ItemSummary::from),
            buyer: buyer.as_ref().map(BuyerSummary::from),
            record,
        })
    }

    /// A single record, for the decision screen
    pub async fn get_record(&self, actor: &Actor, id: Uuid) -> Result<QueueEntry> {
        Self::require_moderator(actor)?;

        let record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::RecordNotFound(id.to_string()))?;

        self.join(record).await
    }

    /// Approve or reject a pending record
    pub async fn decide(
        &self,
        actor: &Actor,
        id: Uuid,
        verdict: Verdict,
        notes: Option<String>,
        expected_version: u64,
    ) -> Result<EntitlementRecord> {
        Self::require_moderator(actor)?;

        if verdict == Verdict::Reject && !has_text(&notes) {
            return Err(Error::MissingRejectionNote);
        }

        let current = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::RecordNotFound(id.to_string()))?;

        if current.version != expected_version {
            info!(
                "Stale {:?} on {}: reviewed version {}, record at {}",
                verdict, id, expected_version, current.version
            );
            let err = Error::StaleDecision {
                expected: expected_version,
                actual: current.version,
            };
            self.audit(actor, &current, verdict, AuditOutcome::Failed(err.kind().to_string()))
                .await;
            return Err(err);
        }

        let command = Command::Decide(Decision { verdict, notes });
        let result = transition(Some(&current), &command, actor, Utc::now());

        let (record, version) = match result {
            Ok(Transition::Update {
                record,
                expected_version,
            }) => (record, expected_version),
            Ok(other) => {
                // Decisions always produce an update
                return Err(Error::InvalidTransition {
                    from: other.record().status,
                    action: verdict.action(),
                });
            }
            Err(e) => {
                let err = Error::from(e);
                self.audit(actor, &current, verdict, AuditOutcome::Failed(err.kind().to_string()))
                    .await;
                return Err(err);
            }
        };

        match self.store.update(&record, version).await {
            Ok(()) => {}
            Err(StoreError::VersionConflict {
                expected, actual, ..
            }) => {
                info!("Lost decision race on {}: {} vs {}", id, expected, actual);
                let err = Error::StaleDecision { expected, actual };
                self.audit(actor, &current, verdict, AuditOutcome::Failed(err.kind().to_string()))
                    .await;
                return Err(err);
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            "Entitlement {} {} by {} (version {})",
            record.id, record.status, actor.user_id, record.version
        );
        self.audit(actor, &record, verdict, AuditOutcome::Applied)
            .await;

        Ok(record)
    }

    /// Record counts per status
    pub async fn stats(&self, actor: &Actor) -> Result<StatusCounts> {
        Self::require_moderator(actor)?;
        Ok(self.store.count_by_status().await?)
    }

    async fn audit(
        &self,
        actor: &Actor,
        record: &EntitlementRecord,
        verdict: Verdict,
        outcome: AuditOutcome,
    ) {
        let event = AuditEvent::new(
            &actor.user_id,
            verdict.action(),
            record.key.clone(),
            Some(record.id),
            outcome,
        );
        emit(&self.audit, event, self.audit_timeout).await;
    }
}

fn entry_matches(entry: &QueueEntry, needle: &str) -> bool {
    let contains = |s: &str| s.to_lowercase().contains(needle);

    entry.item.as_ref().map_or(false, |i| contains(&i.title))
        || entry
            .buyer
            .as_ref()
            .map_or(false, |b| contains(&b.email) || contains(&b.name))
}
