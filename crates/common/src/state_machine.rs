//! Entitlement state machine
//!
//! Pure transition logic. Given the stored record (if any), a command and
//! the acting identity, [`transition`] decides what should be persisted.
//! Nothing here touches storage or the clock; callers pass `now` in.
//!
//! ```text
//! (none)   --submit--> pending
//! pending  --submit--> pending   (proof replaced)
//! pending  --approve-> approved
//! pending  --reject--> rejected  (note required)
//! approved --submit--> approved  (no-op)
//! rejected --submit--> pending   (decision cleared)
//! ```

use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

use crate::models::{
    has_text, Actor, EntitlementKey, EntitlementRecord, EntitlementStatus, SubmissionSource,
};

/// Action kind, used for errors and audit entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Submit,
    Approve,
    Reject,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Submit => "submit",
            Action::Approve => "approve",
            Action::Reject => "reject",
        };
        f.write_str(s)
    }
}

/// Moderator verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approve,
    Reject,
}

impl Verdict {
    pub fn action(self) -> Action {
        match self {
            Verdict::Approve => Action::Approve,
            Verdict::Reject => Action::Reject,
        }
    }

    fn target(self) -> EntitlementStatus {
        match self {
            Verdict::Approve => EntitlementStatus::Approved,
            Verdict::Reject => EntitlementStatus::Rejected,
        }
    }
}

/// Buyer submission payload
#[derive(Debug, Clone)]
pub struct Submission {
    pub key: EntitlementKey,
    pub proof_url: Option<String>,
    pub source: SubmissionSource,
    /// Price of the item at submission time
    pub item_price: u64,
}

/// Moderator decision payload
#[derive(Debug, Clone)]
pub struct Decision {
    pub verdict: Verdict,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Command {
    Submit(Submission),
    Decide(Decision),
}

impl Command {
    pub fn action(&self) -> Action {
        match self {
            Command::Submit(_) => Action::Submit,
            Command::Decide(d) => d.verdict.action(),
        }
    }
}

/// What the caller has to persist
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// No record existed; insert this one
    Insert(EntitlementRecord),
    /// Replace the stored record, conditioned on `expected_version`
    Update {
        record: EntitlementRecord,
        expected_version: u64,
    },
    /// Idempotent no-op; nothing to write
    Unchanged(EntitlementRecord),
}

impl Transition {
    pub fn record(&self) -> &EntitlementRecord {
        match self {
            Transition::Insert(r) | Transition::Unchanged(r) => r,
            Transition::Update { record, .. } => record,
        }
    }

    pub fn into_record(self) -> EntitlementRecord {
        match self {
            Transition::Insert(r) | Transition::Unchanged(r) => r,
            Transition::Update { record, .. } => record,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("cannot {action} an entitlement in state {from}")]
    InvalidTransition {
        from: EntitlementStatus,
        action: Action,
    },

    #[error("rejection requires a non-empty note")]
    MissingRejectionNote,

    #[error("actor {0} lacks the moderator capability")]
    NotModerator(String),

    #[error("paid items require a proof reference")]
    MissingProof,

    #[error("free items do not go through submission")]
    FreeItem,

    #[error("submission targets another user's entitlement")]
    NotOwner,

    #[error("no entitlement record to decide on")]
    NoRecord,
}

/// Apply `command` to `current` on behalf of `actor`.
pub fn transition(
    current: Option<&EntitlementRecord>,
    command: &Command,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<Transition, TransitionError> {
    match command {
        Command::Submit(submission) => submit(current, submission, actor, now),
        Command::Decide(decision) => match current {
            Some(record) => decide(record, decision, actor, now),
            None => Err(TransitionError::NoRecord),
        },
    }
}

fn submit(
    current: Option<&EntitlementRecord>,
    submission: &Submission,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<Transition, TransitionError> {
    if submission.key.user_id != actor.user_id {
        return Err(TransitionError::NotOwner);
    }
    if let Some(record) = current {
        if record.key != submission.key {
            return Err(TransitionError::NotOwner);
        }
    }
    if submission.item_price == 0 {
        return Err(TransitionError::FreeItem);
    }
    // Repeat calls by an approved buyer succeed whatever they carry
    if let Some(record) = current.filter(|r| r.status == EntitlementStatus::Approved) {
        return Ok(Transition::Unchanged(record.clone()));
    }
    if submission.source != SubmissionSource::Manual || !has_text(&submission.proof_url) {
        return Err(TransitionError::MissingProof);
    }

    let proof_url = submission.proof_url.as_ref().map(|s| s.trim().to_string());

    let Some(record) = current else {
        return Ok(Transition::Insert(EntitlementRecord::new_pending(
            submission.key.clone(),
            proof_url,
            submission.source,
            now,
        )));
    };

    match record.status {
        EntitlementStatus::Approved => Ok(Transition::Unchanged(record.clone())),
        EntitlementStatus::Pending | EntitlementStatus::Rejected => {
            let mut next = record.clone();
            next.status = EntitlementStatus::Pending;
            next.metadata.proof_url = proof_url;
            next.metadata.submitted_at = now;
            next.metadata.source = submission.source;
            // Reopening wipes the previous decision
            next.metadata.verified_at = None;
            next.metadata.reviewer_id = None;
            next.metadata.notes = None;
            next.updated_at = now;
            next.version = record.version + 1;

            Ok(Transition::Update {
                record: next,
                expected_version: record.version,
            })
        }
    }
}

fn decide(
    record: &EntitlementRecord,
    decision: &Decision,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<Transition, TransitionError> {
    if !actor.is_moderator() {
        return Err(TransitionError::NotModerator(actor.user_id.clone()));
    }
    if decision.verdict == Verdict::Reject && !has_text(&decision.notes) {
        return Err(TransitionError::MissingRejectionNote);
    }
    if record.status != EntitlementStatus::Pending {
        return Err(TransitionError::InvalidTransition {
            from: record.status,
            action: decision.verdict.action(),
        });
    }

    let mut next = record.clone();
    next.status = decision.verdict.target();
    next.metadata.notes = decision
        .notes
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    next.metadata.verified_at = Some(now);
    next.metadata.reviewer_id = Some(actor.user_id.clone());
    next.updated_at = now;
    next.version = record.version + 1;

    Ok(Transition::Update {
        record: next,
        expected_version: record.version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn key() -> EntitlementKey {
        EntitlementKey::new("u1", "p1", "project")
    }

    fn submit_cmd(proof: Option<&str>) -> Command {
        Command::Submit(Submission {
            key: key(),
            proof_url: proof.map(str::to_string),
            source: SubmissionSource::Manual,
            item_price: 2000,
        })
    }

    fn decide_cmd(verdict: Verdict, notes: Option<&str>) -> Command {
        Command::Decide(Decision {
            verdict,
            notes: notes.map(str::to_string),
        })
    }

    fn buyer() -> Actor {
        Actor::buyer("u1")
    }

    fn admin() -> Actor {
        Actor::new("admin1", [Role::Admin])
    }

    fn apply(current: Option<&EntitlementRecord>, cmd: &Command, actor: &Actor) -> EntitlementRecord {
        transition(current, cmd, actor, Utc::now())
            .expect("transition should succeed")
            .into_record()
    }

    #[test]
    fn test_first_submission_inserts_pending() {
        let t = transition(None, &submit_cmd(Some("https://proof/1")), &buyer(), Utc::now()).unwrap();

        let Transition::Insert(record) = t else {
            panic!("expected insert, got {:?}", t);
        };
        assert_eq!(record.status, EntitlementStatus::Pending);
        assert_eq!(record.version, 1);
        assert_eq!(record.metadata.proof_url.as_deref(), Some("https://proof/1"));
        record.check_invariants().unwrap();
    }

    #[test]
    fn test_submission_requires_proof() {
        for proof in [None, Some(""), Some("   ")] {
            let err = transition(None, &submit_cmd(proof), &buyer(), Utc::now()).unwrap_err();
            assert_eq!(err, TransitionError::MissingProof);
        }
    }

    #[test]
    fn test_free_item_rejected_by_machine() {
        let cmd = Command::Submit(Submission {
            key: key(),
            proof_url: Some("https://proof/1".to_string()),
            source: SubmissionSource::Manual,
            item_price: 0,
        });
        let err = transition(None, &cmd, &buyer(), Utc::now()).unwrap_err();
        assert_eq!(err, TransitionError::FreeItem);
    }

    #[test]
    fn test_cannot_submit_for_someone_else() {
        let err = transition(
            None,
            &submit_cmd(Some("https://proof/1")),
            &Actor::buyer("u2"),
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err, TransitionError::NotOwner);
    }

    #[test]
    fn test_resubmit_while_pending_replaces_proof() {
        let first = apply(None, &submit_cmd(Some("https://proof/1")), &buyer());
        let t = transition(Some(&first), &submit_cmd(Some("https://proof/2")), &buyer(), Utc::now())
            .unwrap();

        let Transition::Update { record, expected_version } = t else {
            panic!("expected update");
        };
        assert_eq!(expected_version, 1);
        assert_eq!(record.version, 2);
        assert_eq!(record.status, EntitlementStatus::Pending);
        assert_eq!(record.metadata.proof_url.as_deref(), Some("https://proof/2"));
        assert_eq!(record.id, first.id);
    }

    #[test]
    fn test_approve_sets_reviewer_and_bumps_version() {
        let pending = apply(None, &submit_cmd(Some("https://proof/1")), &buyer());
        let approved = apply(Some(&pending), &decide_cmd(Verdict::Approve, None), &admin());

        assert_eq!(approved.status, EntitlementStatus::Approved);
        assert_eq!(approved.version, 2);
        assert_eq!(approved.metadata.reviewer_id.as_deref(), Some("admin1"));
        assert!(approved.metadata.verified_at.is_some());
        assert!(approved.metadata.notes.is_none());
        approved.check_invariants().unwrap();
    }

    #[test]
    fn test_submit_after_approval_is_noop() {
        let pending = apply(None, &submit_cmd(Some("https://proof/1")), &buyer());
        let approved = apply(Some(&pending), &decide_cmd(Verdict::Approve, None), &admin());

        let t = transition(Some(&approved), &submit_cmd(Some("https://proof/9")), &buyer(), Utc::now())
            .unwrap();
        assert_eq!(t, Transition::Unchanged(approved.clone()));

        // No proof needed for the no-op
        for proof in [None, Some("  ")] {
            let t = transition(Some(&approved), &submit_cmd(proof), &buyer(), Utc::now()).unwrap();
            assert_eq!(t, Transition::Unchanged(approved.clone()));
        }
    }

    #[test]
    fn test_reject_requires_note() {
        let pending = apply(None, &submit_cmd(Some("https://proof/1")), &buyer());

        for notes in [None, Some(""), Some(" \t ")] {
            let err = transition(
                Some(&pending),
                &decide_cmd(Verdict::Reject, notes),
                &admin(),
                Utc::now(),
            )
            .unwrap_err();
            assert_eq!(err, TransitionError::MissingRejectionNote);
        }
    }

    #[test]
    fn test_rejected_resubmission_reopens() {
        let pending = apply(None, &submit_cmd(Some("https://proof/1")), &buyer());
        let rejected = apply(
            Some(&pending),
            &decide_cmd(Verdict::Reject, Some("amount does not match")),
            &admin(),
        );
        assert_eq!(rejected.metadata.notes.as_deref(), Some("amount does not match"));
        rejected.check_invariants().unwrap();

        let reopened = apply(Some(&rejected), &submit_cmd(Some("https://proof/2")), &buyer());
        assert_eq!(reopened.status, EntitlementStatus::Pending);
        assert_eq!(reopened.version, 3);
        assert!(reopened.metadata.verified_at.is_none());
        assert!(reopened.metadata.reviewer_id.is_none());
        assert!(reopened.metadata.notes.is_none());
        reopened.check_invariants().unwrap();
    }

    #[test]
    fn test_decision_requires_moderator() {
        let pending = apply(None, &submit_cmd(Some("https://proof/1")), &buyer());
        let err = transition(
            Some(&pending),
            &decide_cmd(Verdict::Approve, None),
            &buyer(),
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err, TransitionError::NotModerator("u1".to_string()));
    }

    #[test]
    fn test_cannot_decide_twice() {
        let pending = apply(None, &submit_cmd(Some("https://proof/1")), &buyer());
        let approved = apply(Some(&pending), &decide_cmd(Verdict::Approve, None), &admin());

        let err = transition(
            Some(&approved),
            &decide_cmd(Verdict::Reject, Some("changed my mind")),
            &admin(),
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            TransitionError::InvalidTransition {
                from: EntitlementStatus::Approved,
                action: Action::Reject,
            }
        );
    }

    #[test]
    fn test_decide_without_record() {
        let err = transition(None, &decide_cmd(Verdict::Approve, None), &admin(), Utc::now())
            .unwrap_err();
        assert_eq!(err, TransitionError::NoRecord);
    }
}
