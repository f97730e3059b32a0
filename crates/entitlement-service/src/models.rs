//! Request and response models for the entitlement service

use serde::{Deserialize, Serialize};
use unlock_common::{
    AccessStatus, EntitlementRecord, EntitlementStatus, Item, SubmissionSource, User, Verdict,
};

use crate::storage::StatusCounts;

fn default_source() -> SubmissionSource {
    SubmissionSource::Manual
}

/// Buyer proof-of-payment submission
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitProofRequest {
    /// Reference to the uploaded payment screenshot
    #[serde(default)]
    pub proof_url: Option<String>,

    #[serde(default = "default_source")]
    pub source: SubmissionSource,
}

/// Result of a submission
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionOutcome {
    /// Derived access after the submission
    pub status: AccessStatus,

    /// Current record; absent for free items
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<EntitlementRecord>,

    /// Whether anything was written
    pub changed: bool,
}

/// What a content page needs to render an item
#[derive(Debug, Clone, Serialize)]
pub struct AccessView {
    pub item_id: String,

    pub item_type: String,

    pub title: String,

    pub price: u64,

    pub status: AccessStatus,

    /// Only present once access is granted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_url: Option<String>,

    /// Moderator remarks on a rejected submission
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_note: Option<String>,
}

/// Review queue filter
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueFilter {
    /// Defaults to `pending`
    #[serde(default)]
    pub status: Option<EntitlementStatus>,

    /// Case-insensitive match on item title, buyer name or email
    #[serde(default, alias = "q")]
    pub search: Option<String>,

    #[serde(default)]
    pub offset: Option<usize>,

    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemSummary {
    pub title: String,
    pub price: u64,
}

impl From<&Item> for ItemSummary {
    fn from(item: &Item) -> Self {
        Self {
            title: item.title.clone(),
            price: item.price,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BuyerSummary {
    pub name: String,
    pub email: String,
}

impl From<&User> for BuyerSummary {
    fn from(user: &User) -> Self {
        Self {
            name: user.name.clone(),
            email: user.email.clone(),
        }
    }
}

/// Record joined with catalog and directory data
#[derive(Debug, Clone, Serialize)]
pub struct QueueEntry {
    pub record: EntitlementRecord,

    /// Missing if the item was removed from the catalog
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<ItemSummary>,

    /// Missing if the user is unknown to the directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer: Option<BuyerSummary>,
}

/// One page of the review queue
#[derive(Debug, Clone, Serialize)]
pub struct QueuePage {
    pub entries: Vec<QueueEntry>,

    /// Matches before pagination
    pub total: usize,

    pub offset: usize,

    pub limit: usize,
}

/// Moderator decision
#[derive(Debug, Clone, Deserialize)]
pub struct DecisionRequest {
    pub decision: Verdict,

    #[serde(default)]
    pub notes: Option<String>,

    /// Version the moderator reviewed
    pub expected_version: u64,
}

/// Queue statistics
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    #[serde(flatten)]
    pub counts: StatusCounts,

    pub total: usize,
}

impl From<StatusCounts> for QueueStats {
    fn from(counts: StatusCounts) -> Self {
        Self {
            total: counts.total(),
            counts,
        }
    }
}
