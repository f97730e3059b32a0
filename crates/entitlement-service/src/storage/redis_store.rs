//! Redis storage for entitlement records
//!
//! Data model:
//! - entitlement:{id} → JSON record
//! - entitlement:{id}:meta → Hash {version, status}
//! - entitlement:key:{item_type}:{item_id}:{user_id} → id (uniqueness)
//! - entitlements:by_created → Sorted set (score=created_at millis, member=id)
//! - entitlements:status:{status} → Set of ids
//!
//! Inserts and conditional updates run as Lua scripts so the uniqueness and
//! version checks happen atomically inside Redis.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::{debug, info};
use unlock_common::{EntitlementKey, EntitlementRecord, EntitlementStatus};
use uuid::Uuid;

use super::{checked, sort_newest_first, EntitlementStore, StatusCounts, StoreError};

const BY_CREATED: &str = "entitlements:by_created";

/// KEYS: key index, record, meta, by_created, status set
/// ARGV: id, json, created score, version, status
const INSERT_SCRIPT: &str = r#"
if redis.call('SETNX', KEYS[1], ARGV[1]) == 0 then
  return 0
end
redis.call('SET', KEYS[2], ARGV[2])
redis.call('HSET', KEYS[3], 'version', ARGV[4], 'status', ARGV[5])
redis.call('ZADD', KEYS[4], ARGV[3], ARGV[1])
redis.call('SADD', KEYS[5], ARGV[1])
return 1
"#;

/// KEYS: record, meta, pending set, approved set, rejected set, target set
/// ARGV: expected version, json, new version, new status, id
/// Returns {-1, 0} when missing, {0, actual} on conflict, {1, new} on success.
const UPDATE_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[2], 'version')
if not current then
  return {-1, 0}
end
current = tonumber(current)
if current ~= tonumber(ARGV[1]) then
  return {0, current}
end
redis.call('SET', KEYS[1], ARGV[2])
redis.call('HSET', KEYS[2], 'version', ARGV[3], 'status', ARGV[4])
redis.call('SREM', KEYS[3], ARGV[5])
redis.call('SREM', KEYS[4], ARGV[5])
redis.call('SREM', KEYS[5], ARGV[5])
redis.call('SADD', KEYS[6], ARGV[5])
return {1, tonumber(ARGV[3])}
"#;

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

fn encode(record: &EntitlementRecord) -> Result<String, StoreError> {
    serde_json::to_string(record).map_err(|e| StoreError::Corrupt {
        id: record.id.to_string(),
        reason: e.to_string(),
    })
}

fn decode(id: &str, json: &str) -> Result<EntitlementRecord, StoreError> {
    let record = serde_json::from_str(json).map_err(|e| StoreError::Corrupt {
        id: id.to_string(),
        reason: e.to_string(),
    })?;
    checked(record)
}

fn record_key(id: Uuid) -> String {
    format!("entitlement:{}", id)
}

fn meta_key(id: Uuid) -> String {
    format!("entitlement:{}:meta", id)
}

fn natural_key(key: &EntitlementKey) -> String {
    format!(
        "entitlement:key:{}:{}:{}",
        key.item_type, key.item_id, key.user_id
    )
}

fn status_key(status: EntitlementStatus) -> String {
    format!("entitlements:status:{}", status)
}

/// Redis-backed [`EntitlementStore`]
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    insert_script: Script,
    update_script: Script,
}

impl RedisStore {
    /// Create a new storage instance
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        info!("Entitlement store connected to Redis at {}", redis_url);

        Ok(Self {
            conn,
            insert_script: Script::new(INSERT_SCRIPT),
            update_script: Script::new(UPDATE_SCRIPT),
        })
    }

    async fn load_many(&self, ids: &[String]) -> Result<Vec<EntitlementRecord>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.clone();
        let keys: Vec<String> = ids.iter().map(|id| format!("entitlement:{}", id)).collect();
        let blobs: Vec<Option<String>> = conn.mget(&keys).await?;

        ids.iter()
            .zip(blobs)
            .filter_map(|(id, blob)| blob.map(|json| decode(id, &json)))
            .collect()
    }
}

#[async_trait]
impl EntitlementStore for RedisStore {
    async fn get(&self, id: Uuid) -> Result<Option<EntitlementRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(record_key(id)).await?;

        match json {
            Some(data) => Ok(Some(decode(&id.to_string(), &data)?)),
            None => Ok(None),
        }
    }

    async fn find_by_key(
        &self,
        key: &EntitlementKey,
    ) -> Result<Option<EntitlementRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let id: Option<String> = conn.get(natural_key(key)).await?;

        match id {
            Some(raw) => {
                let id = Uuid::parse_str(&raw).map_err(|e| StoreError::Corrupt {
                    id: natural_key(key),
                    reason: format!("bad id {:?}: {}", raw, e),
                })?;
                self.get(id).await
            }
            None => Ok(None),
        }
    }

    async fn insert(&self, record: &EntitlementRecord) -> Result<(), StoreError> {
        let json = encode(record)?;
        let mut conn = self.conn.clone();

        let mut invocation = self.insert_script.prepare_invoke();
        invocation
            .key(natural_key(&record.key))
            .key(record_key(record.id))
            .key(meta_key(record.id))
            .key(BY_CREATED)
            .key(status_key(record.status))
            .arg(record.id.to_string())
            .arg(json)
            .arg(record.created_at.timestamp_millis())
            .arg(record.version)
            .arg(record.status.as_str());

        let created: i64 = invocation.invoke_async(&mut conn).await?;
        if created == 0 {
            debug!("Duplicate insert for {}", record.key);
            return Err(StoreError::Duplicate(record.key.clone()));
        }

        debug!("Inserted entitlement {} for {}", record.id, record.key);
        Ok(())
    }

    async fn update(
        &self,
        record: &EntitlementRecord,
        expected_version: u64,
    ) -> Result<(), StoreError> {
        let json = encode(record)?;
        let mut conn = self.conn.clone();

        let mut invocation = self.update_script.prepare_invoke();
        invocation
            .key(record_key(record.id))
            .key(meta_key(record.id))
            .key(status_key(EntitlementStatus::Pending))
            .key(status_key(EntitlementStatus::Approved))
            .key(status_key(EntitlementStatus::Rejected))
            .key(status_key(record.status))
            .arg(expected_version)
            .arg(json)
            .arg(record.version)
            .arg(record.status.as_str())
            .arg(record.id.to_string());

        let reply: Vec<i64> = invocation.invoke_async(&mut conn).await?;

        match reply.as_slice() {
            [1, _] => {
                debug!(
                    "Updated entitlement {} to version {} ({})",
                    record.id, record.version, record.status
                );
                Ok(())
            }
            [0, actual] => Err(StoreError::VersionConflict {
                id: record.id,
                expected: expected_version,
                actual: *actual as u64,
            }),
            [-1, _] => Err(StoreError::NotFound(record.id)),
            other => Err(StoreError::Backend(format!(
                "unexpected update script reply: {:?}",
                other
            ))),
        }
    }

    async fn list(
        &self,
        status: Option<EntitlementStatus>,
    ) -> Result<Vec<EntitlementRecord>, StoreError> {
        let mut conn = self.conn.clone();

        let ids: Vec<String> = match status {
            Some(status) => conn.smembers(status_key(status)).await?,
            None => conn.zrevrange(BY_CREATED, 0, -1).await?,
        };

        let mut records = self.load_many(&ids).await?;
        // Sets carry no order and the status may have moved on since SMEMBERS
        records.retain(|r| status.map_or(true, |s| r.status == s));
        sort_newest_first(&mut records);

        Ok(records)
    }

    async fn count_by_status(&self) -> Result<StatusCounts, StoreError> {
        let mut conn = self.conn.clone();

        Ok(StatusCounts {
            pending: conn.scard(status_key(EntitlementStatus::Pending)).await?,
            approved: conn.scard(status_key(EntitlementStatus::Approved)).await?,
            rejected: conn.scard(status_key(EntitlementStatus::Rejected)).await?,
        })
    }
}
