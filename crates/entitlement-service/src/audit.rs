//! Best-effort audit trail
//!
//! Audit entries are write-once and never transactional with the
//! entitlement write: a failing or slow sink is logged and skipped.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};
use unlock_common::{Action, EntitlementKey};
use uuid::Uuid;

/// Redis list receiving audit entries
pub const AUDIT_LIST_KEY: &str = "audit:entitlements";

/// Result of the audited operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result", content = "detail")]
pub enum AuditOutcome {
    Applied,
    /// Idempotent no-op (e.g. submit on an approved record)
    Unchanged,
    /// Failed with the given error kind
    Failed(String),
}

/// One audit entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub actor: String,
    pub action: Action,
    pub target_key: EntitlementKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entitlement_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub outcome: AuditOutcome,
}

impl AuditEvent {
    pub fn new(
        actor: &str,
        action: Action,
        target_key: EntitlementKey,
        entitlement_id: Option<Uuid>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            actor: actor.to_string(),
            action,
            target_key,
            entitlement_id,
            timestamp: Utc::now(),
            outcome,
        }
    }
}

/// Append-only activity log
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> Result<()>;
}

/// Emit an event without letting the sink affect the caller
pub async fn emit(sink: &Arc<dyn AuditSink>, event: AuditEvent, timeout: Duration) {
    match tokio::time::timeout(timeout, sink.record(&event)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(
            "Audit sink rejected {} on {}: {:#}",
            event.action, event.target_key, e
        ),
        Err(_) => warn!(
            "Audit sink timed out after {:?} for {} on {}",
            timeout, event.action, event.target_key
        ),
    }
}

/// Writes audit entries to the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<()> {
        info!(
            target: "entitlement_audit",
            actor = %event.actor,
            action = %event.action,
            target_key = %event.target_key,
            outcome = ?event.outcome,
            "audit"
        );
        Ok(())
    }
}

/// Pushes JSON entries onto a Redis list
#[derive(Clone)]
pub struct RedisAuditLog {
    conn: ConnectionManager,
}

impl RedisAuditLog {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl AuditSink for RedisAuditLog {
    async fn record(&self, event: &AuditEvent) -> Result<()> {
        let json = serde_json::to_string(event).context("Failed to serialize audit event")?;
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(AUDIT_LIST_KEY, json)
            .await
            .context("Failed to append audit event")?;
        Ok(())
    }
}

/// Collects entries in memory, for tests
#[derive(Default)]
pub struct MemoryAuditLog {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn record(&self, event: &AuditEvent) -> Result<()> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}
