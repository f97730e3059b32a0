//! API request handlers for the Entitlement Service

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use unlock_common::{Actor, EntitlementRecord, Error, Role};
use uuid::Uuid;

use crate::{
    access::AccessService,
    audit::AuditSink,
    config::Config,
    directory::{Catalog, UserDirectory},
    models::{
        AccessView, DecisionRequest, QueueEntry, QueueFilter, QueuePage, QueueStats,
        SubmissionOutcome, SubmitProofRequest,
    },
    moderation::ModerationService,
    storage::EntitlementStore,
    submission::SubmissionService,
};

/// Header carrying the verified user id, set by the auth gateway
pub const USER_ID_HEADER: &str = "x-user-id";

/// Comma-separated role names, set by the auth gateway
pub const USER_ROLES_HEADER: &str = "x-user-roles";

/// Storage and collaborator handles
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn EntitlementStore>,
    pub catalog: Arc<dyn Catalog>,
    pub users: Arc<dyn UserDirectory>,
    pub audit: Arc<dyn AuditSink>,
}

/// Shared application state
pub struct AppState {
    pub submissions: SubmissionService,
    pub moderation: ModerationService,
    pub access: AccessService,
}

impl AppState {
    /// Build services with default tuning
    pub fn new(backends: Backends) -> Self {
        Self {
            submissions: SubmissionService::new(
                backends.store.clone(),
                backends.catalog.clone(),
                backends.audit.clone(),
            ),
            moderation: ModerationService::new(
                backends.store.clone(),
                backends.catalog.clone(),
                backends.users.clone(),
                backends.audit.clone(),
            ),
            access: AccessService::new(backends.store, backends.catalog),
        }
    }

    /// Build services tuned from configuration
    pub fn from_config(backends: Backends, config: &Config) -> Self {
        let audit_timeout: Duration = config.audit_timeout;
        Self {
            submissions: SubmissionService::new(
                backends.store.clone(),
                backends.catalog.clone(),
                backends.audit.clone(),
            )
            .with_max_attempts(config.submit_max_attempts)
            .with_audit_timeout(audit_timeout),
            moderation: ModerationService::new(
                backends.store.clone(),
                backends.catalog.clone(),
                backends.users.clone(),
                backends.audit.clone(),
            )
            .with_page_sizes(config.queue_page_size, config.queue_max_page_size)
            .with_audit_timeout(audit_timeout),
            access: AccessService::new(backends.store, backends.catalog),
        }
    }
}

/// API Error type
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
    /// Whether the same request may succeed if sent again
    pub retryable: bool,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
            "kind": self.kind,
            "retryable": self.retryable,
        });

        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::ItemNotFound { .. } | Error::RecordNotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidSubmission(_) => StatusCode::BAD_REQUEST,
            Error::MissingRejectionNote => StatusCode::UNPROCESSABLE_ENTITY,
            Error::InvalidTransition { .. }
            | Error::StaleDecision { .. }
            | Error::ConcurrentModificationRetryExceeded { .. } => StatusCode::CONFLICT,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::CorruptRecord { .. } | Error::JsonSerialization(_) => {
                error!("Internal error: {}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        ApiError {
            status,
            kind: err.kind(),
            retryable: err.is_retryable(),
            message: err.to_string(),
        }
    }
}

/// Caller identity taken from gateway headers
#[derive(Debug, Clone)]
pub struct Caller(pub Actor);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError {
                status: StatusCode::UNAUTHORIZED,
                kind: "unauthenticated",
                message: format!("Missing {} header", USER_ID_HEADER),
                retryable: false,
            })?;

        let roles = parts
            .headers
            .get(USER_ROLES_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').filter_map(Role::parse).collect::<Vec<_>>())
            .unwrap_or_default();

        Ok(Caller(Actor::new(user_id, roles)))
    }
}

/// Health check endpoint
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "entitlement-service"
    }))
}

/// Derived access for the caller
pub async fn access_handler(
    State(state): State<Arc<AppState>>,
    Caller(actor): Caller,
    Path((item_type, item_id)): Path<(String, String)>,
) -> Result<Json<AccessView>, ApiError> {
    let view = state.access.view(&actor, &item_type, &item_id).await?;
    Ok(Json(view))
}

/// Submit proof of payment
pub async fn submit_proof_handler(
    State(state): State<Arc<AppState>>,
    Caller(actor): Caller,
    Path((item_type, item_id)): Path<(String, String)>,
    Json(payload): Json<SubmitProofRequest>,
) -> Result<(StatusCode, Json<SubmissionOutcome>), ApiError> {
    info!(
        "Submission from {} for {}/{}",
        actor.user_id, item_type, item_id
    );

    let outcome = state
        .submissions
        .submit_proof(&actor, &item_type, &item_id, payload)
        .await?;

    let status = if outcome.changed {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)))
}

/// The caller's own record
pub async fn own_entitlement_handler(
    State(state): State<Arc<AppState>>,
    Caller(actor): Caller,
    Path((item_type, item_id)): Path<(String, String)>,
) -> Result<Json<EntitlementRecord>, ApiError> {
    let record = state
        .access
        .own_entitlement(&actor, &item_type, &item_id)
        .await?;
    Ok(Json(record))
}

/// Review queue
pub async fn queue_handler(
    State(state): State<Arc<AppState>>,
    Caller(actor): Caller,
    Query(filter): Query<QueueFilter>,
) -> Result<Json<QueuePage>, ApiError> {
    let page = state.moderation.list_pending(&actor, filter).await?;
    Ok(Json(page))
}

/// Single record for the decision screen
pub async fn get_entitlement_handler(
    State(state): State<Arc<AppState>>,
    Caller(actor): Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<QueueEntry>, ApiError> {
    let entry = state.moderation.get_record(&actor, id).await?;
    Ok(Json(entry))
}

/// Approve or reject
pub async fn decide_handler(
    State(state): State<Arc<AppState>>,
    Caller(actor): Caller,
    Path(id): Path<Uuid>,
    Json(payload): Json<DecisionRequest>,
) -> Result<Json<EntitlementRecord>, ApiError> {
    info!(
        "Decision {:?} on {} by {} at version {}",
        payload.decision, id, actor.user_id, payload.expected_version
    );

    let record = state
        .moderation
        .decide(
            &actor,
            id,
            payload.decision,
            payload.notes,
            payload.expected_version,
        )
        .await?;
    Ok(Json(record))
}

/// Counts per status
pub async fn stats_handler(
    State(state): State<Arc<AppState>>,
    Caller(actor): Caller,
) -> Result<Json<QueueStats>, ApiError> {
    let counts = state.moderation.stats(&actor).await?;
    Ok(Json(counts.into()))
}
