//! Read projection: derived access status

use crate::models::{AccessStatus, EntitlementRecord, EntitlementStatus, Item};

/// Effective access for one user on one item.
///
/// Free items are `Free` no matter what is stored; a stray record for a
/// zero-priced item never changes the answer.
pub fn access_status(item: &Item, record: Option<&EntitlementRecord>) -> AccessStatus {
    if item.is_free() {
        return AccessStatus::Free;
    }

    match record.map(|r| r.status) {
        None => AccessStatus::Locked,
        Some(EntitlementStatus::Pending) => AccessStatus::Pending,
        Some(EntitlementStatus::Approved) => AccessStatus::Unlocked,
        Some(EntitlementStatus::Rejected) => AccessStatus::Locked,
    }
}
