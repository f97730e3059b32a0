//! Read-only collaborators: the content catalog and the user directory
//!
//! Items and users are owned elsewhere. The memory implementations back
//! tests and local development (optionally seeded from a JSON file); the
//! Redis implementations read JSON documents published by the content
//! platform:
//! - item:{item_type}:{item_id} → JSON item
//! - user:{user_id} → JSON user

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;
use unlock_common::{Error, Item, User};

/// Catalog lookups
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get_item(&self, item_type: &str, item_id: &str) -> Result<Option<Item>, Error>;
}

/// Identity lookups
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>, Error>;
}

/// Seed file contents
#[derive(Debug, Default, Deserialize)]
pub struct DirectorySeed {
    #[serde(default)]
    pub items: Vec<Item>,

    #[serde(default)]
    pub users: Vec<User>,
}

impl DirectorySeed {
    /// Load a seed file
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed file: {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("Invalid seed file: {}", path.display()))
    }
}

/// Memory-backed catalog
#[derive(Default)]
pub struct MemoryCatalog {
    items: HashMap<(String, String), Item>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: impl IntoIterator<Item = Item>) -> Self {
        let items = items
            .into_iter()
            .map(|item| ((item.item_type.clone(), item.id.clone()), item))
            .collect();
        Self { items }
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn get_item(&self, item_type: &str, item_id: &str) -> Result<Option<Item>, Error> {
        Ok(self
            .items
            .get(&(item_type.to_string(), item_id.to_string()))
            .cloned())
    }
}

/// Memory-backed user directory
#[derive(Default)]
pub struct MemoryDirectory {
    users: HashMap<String, User>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let users = users.into_iter().map(|u| (u.id.clone(), u)).collect();
        Self { users }
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>, Error> {
        Ok(self.users.get(user_id).cloned())
    }
}

/// Redis-backed catalog and directory
#[derive(Clone)]
pub struct RedisDirectory {
    conn: ConnectionManager,
}

impl RedisDirectory {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        info!("Directory connected to Redis at {}", redis_url);

        Ok(Self { conn })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>, Error> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;

        match json {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Catalog for RedisDirectory {
    async fn get_item(&self, item_type: &str, item_id: &str) -> Result<Option<Item>, Error> {
        self.get_json(&format!("item:{}:{}", item_type, item_id))
            .await
    }
}

#[async_trait]
impl UserDirectory for RedisDirectory {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>, Error> {
        self.get_json(&format!("user:{}", user_id)).await
    }
}
