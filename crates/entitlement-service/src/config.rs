//! Configuration management for the Entitlement Service
//!
//! Loads configuration from environment variables with sensible defaults.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::moderation::{DEFAULT_MAX_PAGE_SIZE, DEFAULT_PAGE_SIZE};
use crate::submission::DEFAULT_MAX_ATTEMPTS;

/// Where entitlement records live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => anyhow::bail!("Invalid STORE_BACKEND: {} (expected redis/memory)", other),
        }
    }
}

/// Where audit entries go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditTarget {
    Log,
    Redis,
}

impl FromStr for AuditTarget {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "log" => Ok(Self::Log),
            "redis" => Ok(Self::Redis),
            other => anyhow::bail!("Invalid AUDIT_SINK: {} (expected log/redis)", other),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Redis connection URL
    pub redis_url: String,

    /// API server host
    pub api_host: String,

    /// API server port
    pub api_port: u16,

    /// Storage backend for records, catalog and users
    pub store_backend: StoreBackend,

    /// Read-transition-write attempts per submission
    pub submit_max_attempts: u32,

    /// Default review queue page size
    pub queue_page_size: usize,

    /// Upper bound on a requested page size
    pub queue_max_page_size: usize,

    pub audit_sink: AuditTarget,

    /// Upper bound on a single audit write
    pub audit_timeout: Duration,

    /// JSON file with items and users for the memory backend
    pub catalog_seed: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenvy::dotenv().ok();

        let config = Config {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),

            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),

            api_port: env::var("API_PORT")
                .unwrap_or_else(|_| "8090".to_string())
                .parse()
                .context("Invalid API_PORT")?,

            store_backend: env::var("STORE_BACKEND")
                .unwrap_or_else(|_| "redis".to_string())
                .parse()?,

            submit_max_attempts: env::var("SUBMIT_MAX_ATTEMPTS")
                .unwrap_or_else(|_| DEFAULT_MAX_ATTEMPTS.to_string())
                .parse()
                .context("Invalid SUBMIT_MAX_ATTEMPTS")?,

            queue_page_size: env::var("QUEUE_PAGE_SIZE")
                .unwrap_or_else(|_| DEFAULT_PAGE_SIZE.to_string())
                .parse()
                .context("Invalid QUEUE_PAGE_SIZE")?,

            queue_max_page_size: env::var("QUEUE_MAX_PAGE_SIZE")
                .unwrap_or_else(|_| DEFAULT_MAX_PAGE_SIZE.to_string())
                .parse()
                .context("Invalid QUEUE_MAX_PAGE_SIZE")?,

            audit_sink: env::var("AUDIT_SINK")
                .unwrap_or_else(|_| "log".to_string())
                .parse()?,

            audit_timeout: Duration::from_millis(
                env::var("AUDIT_TIMEOUT_MS")
                    .unwrap_or_else(|_| "500".to_string())
                    .parse()
                    .context("Invalid AUDIT_TIMEOUT_MS")?,
            ),

            catalog_seed: env::var("CATALOG_SEED").ok().map(PathBuf::from),
        };

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.api_port == 0 {
            anyhow::bail!("API_PORT must be greater than 0");
        }

        if self.submit_max_attempts == 0 {
            anyhow::bail!("SUBMIT_MAX_ATTEMPTS must be at least 1");
        }

        if self.queue_page_size == 0 || self.queue_page_size > self.queue_max_page_size {
            anyhow::bail!("QUEUE_PAGE_SIZE must be between 1 and QUEUE_MAX_PAGE_SIZE");
        }

        if self.catalog_seed.is_some() && self.store_backend != StoreBackend::Memory {
            tracing::warn!("CATALOG_SEED is ignored unless STORE_BACKEND=memory");
        }

        Ok(())
    }

    /// Get the API server address
    pub fn api_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }
}
