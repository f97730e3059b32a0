//! Domain models for the entitlement engine
//!
//! Items and users belong to external collaborators and are read-only here.
//! [`EntitlementRecord`] is the only entity this crate owns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Natural key of an entitlement: one record per (user, item, item type)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntitlementKey {
    pub user_id: String,
    pub item_id: String,
    /// Catalog kind, e.g. "project". Ids are only unique within a kind.
    pub item_type: String,
}

impl EntitlementKey {
    pub fn new(
        user_id: impl Into<String>,
        item_id: impl Into<String>,
        item_type: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            item_id: item_id.into(),
            item_type: item_type.into(),
        }
    }
}

impl fmt::Display for EntitlementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.item_type, self.item_id, self.user_id)
    }
}

/// Persisted entitlement status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementStatus {
    /// Proof submitted, waiting for a moderator
    Pending,
    /// Payment verified
    Approved,
    /// Payment refused, see `metadata.notes`
    Rejected,
}

impl EntitlementStatus {
    pub const ALL: [EntitlementStatus; 3] = [Self::Pending, Self::Approved, Self::Rejected];

    /// Whether a moderator has ruled on the record
    pub fn is_decided(self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for EntitlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntitlementStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(Error::InvalidSubmission(format!(
                "unknown entitlement status: {}",
                other
            ))),
        }
    }
}

/// Provenance of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionSource {
    /// Buyer uploaded proof of an out-of-band payment
    Manual,
    /// Claim on a zero-priced item
    Free,
}

/// Fixed-shape metadata carried by every record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementMetadata {
    /// Reference to the uploaded payment evidence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_url: Option<String>,

    /// Reviewer remarks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    /// Most recent buyer submission
    pub submitted_at: DateTime<Utc>,

    /// Most recent moderation decision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,

    pub source: SubmissionSource,

    /// Moderator who last decided
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer_id: Option<String>,
}

/// One user's entitlement to one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementRecord {
    /// Surrogate id used by moderation
    pub id: Uuid,

    #[serde(flatten)]
    pub key: EntitlementKey,

    pub status: EntitlementStatus,

    pub metadata: EntitlementMetadata,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Optimistic concurrency token, bumped on every write
    pub version: u64,
}

impl EntitlementRecord {
    /// Fresh `pending` record for a first submission
    pub fn new_pending(
        key: EntitlementKey,
        proof_url: Option<String>,
        source: SubmissionSource,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            status: EntitlementStatus::Pending,
            metadata: EntitlementMetadata {
                proof_url,
                notes: None,
                submitted_at: now,
                verified_at: None,
                source,
                reviewer_id: None,
            },
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Validate the record-level invariants.
    ///
    /// Called on every record loaded from storage so that a hand-edited or
    /// corrupted blob never reaches the state machine.
    pub fn check_invariants(&self) -> Result<()> {
        let decided = self.status.is_decided();

        if self.version == 0 {
            return Err(self.corrupt("version must start at 1"));
        }
        if self.metadata.verified_at.is_some() != decided {
            return Err(self.corrupt("verified_at must be set exactly when decided"));
        }
        if self.metadata.reviewer_id.is_some() != decided {
            return Err(self.corrupt("reviewer_id must be set exactly when decided"));
        }
        if self.status == EntitlementStatus::Rejected && !has_text(&self.metadata.notes) {
            return Err(self.corrupt("rejected record without notes"));
        }

        Ok(())
    }

    fn corrupt(&self, reason: &str) -> Error {
        Error::CorruptRecord {
            id: self.id.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Purchasable catalog unit, owned by the content repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,

    pub item_type: String,

    pub title: String,

    /// Price in currency minor units; 0 means free
    pub price: u64,

    /// Protected asset (e.g. a drive link), withheld until unlocked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_url: Option<String>,
}

impl Item {
    pub fn is_free(&self) -> bool {
        self.price == 0
    }
}

/// Role granted by the identity service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Moderator,
    Admin,
}

impl Role {
    /// Parse a role name, ignoring unknown roles
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" | "user" => Some(Self::Student),
            "moderator" => Some(Self::Moderator),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// Buyer profile, owned by the user directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,

    pub name: String,

    pub email: String,

    #[serde(default)]
    pub roles: BTreeSet<Role>,
}

/// Verified caller identity and capabilities
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub roles: BTreeSet<Role>,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            user_id: user_id.into(),
            roles: roles.into_iter().collect(),
        }
    }

    pub fn buyer(user_id: impl Into<String>) -> Self {
        Self::new(user_id, [Role::Student])
    }

    pub fn moderator(user_id: impl Into<String>) -> Self {
        Self::new(user_id, [Role::Moderator])
    }

    /// Admins implicitly hold the moderator capability
    pub fn is_moderator(&self) -> bool {
        self.roles.contains(&Role::Moderator) || self.roles.contains(&Role::Admin)
    }
}

/// Effective access as seen by content pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessStatus {
    Free,
    Locked,
    Pending,
    Unlocked,
}

impl AccessStatus {
    /// Whether the protected asset may be handed out
    pub fn grants_asset(self) -> bool {
        matches!(self, Self::Free | Self::Unlocked)
    }
}

impl fmt::Display for AccessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Free => "free",
            Self::Locked => "locked",
            Self::Pending => "pending",
            Self::Unlocked => "unlocked",
        };
        f.write_str(s)
    }
}

/// True if the option holds something other than whitespace
pub fn has_text(value: &Option<String>) -> bool {
    value.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false)
}
