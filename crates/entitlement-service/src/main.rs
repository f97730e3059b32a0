//! Entitlement Service
//!
//! REST API for proof submission, moderation and access lookups

use anyhow::{Context, Result};
use entitlement_service::{
    audit::{AuditSink, RedisAuditLog, TracingAuditSink},
    config::{AuditTarget, StoreBackend},
    create_router,
    directory::{DirectorySeed, MemoryCatalog, MemoryDirectory, RedisDirectory},
    AppState, Backends, Config, MemoryStore, RedisStore,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "entitlement_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    info!("Starting Entitlement Service");
    info!("Store backend: {:?}", config.store_backend);

    let backends = build_backends(&config).await?;
    let state = AppState::from_config(backends, &config);
    let app = create_router(state);

    let addr = config.api_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    info!("Entitlement Service running on http://{}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

async fn build_backends(config: &Config) -> Result<Backends> {
    let audit: Arc<dyn AuditSink> = match config.audit_sink {
        AuditTarget::Log => Arc::new(TracingAuditSink),
        AuditTarget::Redis => {
            info!("Audit log: Redis at {}", config.redis_url);
            Arc::new(
                RedisAuditLog::new(&config.redis_url)
                    .await
                    .context("Failed to initialize audit log")?,
            )
        }
    };

    match config.store_backend {
        StoreBackend::Redis => {
            info!("Redis URL: {}", config.redis_url);
            let store = RedisStore::new(&config.redis_url)
                .await
                .context("Failed to initialize storage")?;
            let directory = Arc::new(
                RedisDirectory::new(&config.redis_url)
                    .await
                    .context("Failed to initialize directory")?,
            );

            Ok(Backends {
                store: Arc::new(store),
                catalog: directory.clone(),
                users: directory,
                audit,
            })
        }
        StoreBackend::Memory => {
            warn!("Using in-memory storage; records are lost on restart");
            let seed = match &config.catalog_seed {
                Some(path) => {
                    info!("Seeding catalog from {}", path.display());
                    DirectorySeed::from_file(path)?
                }
                None => DirectorySeed::default(),
            };

            Ok(Backends {
                store: Arc::new(MemoryStore::new()),
                catalog: Arc::new(MemoryCatalog::with_items(seed.items)),
                users: Arc::new(MemoryDirectory::with_users(seed.users)),
                audit,
            })
        }
    }
}
