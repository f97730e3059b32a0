//! Concurrent submissions and decisions against the shared store

use entitlement_service::{
    audit::{AuditSink, MemoryAuditLog},
    directory::{MemoryCatalog, MemoryDirectory},
    models::SubmitProofRequest,
    moderation::ModerationService,
    storage::StatusCounts,
    submission::SubmissionService,
    EntitlementStore, MemoryStore,
};
use std::sync::Arc;
use unlock_common::{Actor, EntitlementStatus, Error, Item, Role, SubmissionSource, Verdict};

struct Harness {
    store: Arc<MemoryStore>,
    submissions: Arc<SubmissionService>,
    moderation: Arc<ModerationService>,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let catalog = Arc::new(MemoryCatalog::with_items([Item {
        id: "p1".to_string(),
        item_type: "project".to_string(),
        title: "Realtime Chat App".to_string(),
        price: 2000,
        asset_url: Some("https://drive.example/p1".to_string()),
    }]));
    let audit: Arc<dyn AuditSink> = Arc::new(MemoryAuditLog::new());

    Harness {
        submissions: Arc::new(
            SubmissionService::new(store.clone(), catalog.clone(), audit.clone())
                .with_max_attempts(32),
        ),
        moderation: Arc::new(ModerationService::new(
            store.clone(),
            catalog,
            Arc::new(MemoryDirectory::new()),
            audit,
        )),
        store,
    }
}

fn proof(n: usize) -> SubmitProofRequest {
    SubmitProofRequest {
        proof_url: Some(format!("https://proof/{}", n)),
        source: SubmissionSource::Manual,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_create_one_record() {
    let h = harness();
    let buyer = Actor::buyer("u1");

    let handles: Vec<_> = (0..16)
        .map(|n| {
            let submissions = h.submissions.clone();
            let buyer = buyer.clone();
            tokio::spawn(async move {
                submissions
                    .submit_proof(&buyer, "project", "p1", proof(n))
                    .await
            })
        })
        .collect();

    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(
            outcome.record.unwrap().status,
            EntitlementStatus::Pending
        );
    }

    assert_eq!(h.store.len().await, 1);
    let counts = h.store.count_by_status().await.unwrap();
    assert_eq!(
        counts,
        StatusCounts {
            pending: 1,
            approved: 0,
            rejected: 0
        }
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_decisions_have_one_winner() {
    let h = harness();
    let outcome = h
        .submissions
        .submit_proof(&Actor::buyer("u1"), "project", "p1", proof(0))
        .await
        .unwrap();
    let record = outcome.record.unwrap();

    let approve = {
        let moderation = h.moderation.clone();
        let id = record.id;
        tokio::spawn(async move {
            moderation
                .decide(&Actor::moderator("admin1"), id, Verdict::Approve, None, 1)
                .await
        })
    };
    let reject = {
        let moderation = h.moderation.clone();
        let id = record.id;
        tokio::spawn(async move {
            moderation
                .decide(
                    &Actor::new("admin2", [Role::Admin]),
                    id,
                    Verdict::Reject,
                    Some("blurry".to_string()),
                    1,
                )
                .await
        })
    };

    let results = [approve.await.unwrap(), reject.await.unwrap()];
    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(Error::StaleDecision { expected: 1, .. }))));

    let stored = h.store.get(record.id).await.unwrap().unwrap();
    assert_eq!(stored.version, 2);
    assert_eq!(stored.status, winners[0].status);
}
