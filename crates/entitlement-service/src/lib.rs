//! Entitlement Service
//!
//! Gates downloadable assets behind a manually verified payment. Buyers
//! submit proof of payment, moderators approve or reject it, and content
//! pages ask for the derived access status of a user on an item.
//!
//! ## Endpoints
//!
//! - `GET /api/access/{item_type}/{item_id}` - Derived access for the caller
//! - `POST /api/access/{item_type}/{item_id}/submissions` - Submit proof of payment
//! - `GET /api/entitlements/{item_type}/{item_id}` - Caller's own record
//! - `GET /api/moderation/queue` - Review queue
//! - `GET /api/moderation/entitlements/{id}` - Single record
//! - `POST /api/moderation/entitlements/{id}/decision` - Approve or reject
//! - `GET /api/moderation/stats` - Counts per status
//! - `GET /health` - Health check

pub mod access;
pub mod audit;
pub mod config;
pub mod directory;
pub mod handlers;
pub mod models;
pub mod moderation;
pub mod storage;
pub mod submission;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use handlers::{AppState, Backends};
pub use storage::{EntitlementStore, MemoryStore, RedisStore};

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let shared_state = Arc::new(state);

    Router::new()
        .route("/health", get(handlers::health_handler))
        // Buyer-facing
        .route(
            "/api/access/{item_type}/{item_id}",
            get(handlers::access_handler),
        )
        .route(
            "/api/access/{item_type}/{item_id}/submissions",
            post(handlers::submit_proof_handler),
        )
        .route(
            "/api/entitlements/{item_type}/{item_id}",
            get(handlers::own_entitlement_handler),
        )
        // Moderation
        .route("/api/moderation/queue", get(handlers::queue_handler))
        .route("/api/moderation/stats", get(handlers::stats_handler))
        .route(
            "/api/moderation/entitlements/{id}",
            get(handlers::get_entitlement_handler),
        )
        .route(
            "/api/moderation/entitlements/{id}/decision",
            post(handlers::decide_handler),
        )
        .with_state(shared_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
