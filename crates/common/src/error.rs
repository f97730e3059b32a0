use thiserror::Error;

use crate::models::EntitlementStatus;
use crate::state_machine::{Action, TransitionError};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Item not found: {item_type}/{item_id}")]
    ItemNotFound { item_type: String, item_id: String },

    #[error("Entitlement record not found: {0}")]
    RecordNotFound(String),

    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("Rejection requires a non-empty note")]
    MissingRejectionNote,

    #[error("Cannot {action} an entitlement in state {from}")]
    InvalidTransition {
        from: EntitlementStatus,
        action: Action,
    },

    #[error("Stale decision: expected version {expected}, record is at {actual}")]
    StaleDecision { expected: u64, actual: u64 },

    #[error("Concurrent modification: gave up after {attempts} attempts")]
    ConcurrentModificationRetryExceeded { attempts: u32 },

    #[error("Actor {0} lacks the moderator capability")]
    Forbidden(String),

    #[error("Corrupt entitlement record {id}: {reason}")]
    CorruptRecord { id: String, reason: String },

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("Transient error: {0}")]
    Transient(String),
}

impl Error {
    /// Stable machine-readable kind for API payloads and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ItemNotFound { .. } => "item_not_found",
            Error::RecordNotFound(_) => "record_not_found",
            Error::InvalidSubmission(_) => "invalid_submission",
            Error::MissingRejectionNote => "missing_rejection_note",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::StaleDecision { .. } => "stale_decision",
            Error::ConcurrentModificationRetryExceeded { .. } => {
                "concurrent_modification_retry_exceeded"
            }
            Error::Forbidden(_) => "forbidden",
            Error::CorruptRecord { .. } => "corrupt_record",
            Error::JsonSerialization(_) => "serialization",
            Error::Transient(_) => "transient",
        }
    }

    /// Whether the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transient(_) | Error::ConcurrentModificationRetryExceeded { .. }
        )
    }
}

impl From<TransitionError> for Error {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::InvalidTransition { from, action } => {
                Error::InvalidTransition { from, action }
            }
            TransitionError::MissingRejectionNote => Error::MissingRejectionNote,
            TransitionError::NotModerator(actor) => Error::Forbidden(actor),
            TransitionError::MissingProof => {
                Error::InvalidSubmission("proof_url is required for paid items".to_string())
            }
            TransitionError::FreeItem => {
                Error::InvalidSubmission("free items do not take submissions".to_string())
            }
            TransitionError::NotOwner => {
                Error::InvalidSubmission("record belongs to another user".to_string())
            }
            TransitionError::NoRecord => Error::RecordNotFound("<none>".to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
