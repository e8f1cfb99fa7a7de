mod common;

use common::*;
use slot_ledger::domain::error::PipelineError;
use slot_ledger::domain::id::{PlanId, TransactionId, UserId};
use slot_ledger::domain::ledger::Ledger;
use slot_ledger::domain::notify::NoticeKind;
use slot_ledger::domain::subscription::SubscriptionStatus;
use slot_ledger::domain::user::NewUser;
use slot_ledger::services::webhook_processor::ProcessResult;
use std::collections::HashSet;
use std::time::Duration;

// ── 1. concurrent_duplicate_deliveries ─────────────────────────────────────
// 20 tasks deliver the same paid event. Exactly one grants and claims.

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicate_deliveries() {
    let h = harness();
    let user = h.user("dup@example.com").await;
    h.stock(NETFLIX, 5).await;
    let body = serde_json::to_vec(&direct_payload("tx-dup", "pix.paid", user.id, NETFLIX)).unwrap();

    let mut handles = Vec::new();
    for _ in 0..20 {
        let processor = h.state.processor.clone();
        let body = body.clone();
        handles.push(tokio::spawn(async move {
            processor.process(&body, None).await.unwrap()
        }));
    }

    let mut processed = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.unwrap() {
            ProcessResult::Processed(_) => processed += 1,
            ProcessResult::Duplicate(_) => duplicates += 1,
        }
    }

    assert_eq!(processed, 1, "exactly 1 delivery owns the side effects");
    assert_eq!(duplicates, 19);
    assert_eq!(h.assigned(NETFLIX).await.len(), 1, "exactly 1 slot claimed");

    h.notifier.wait_for(NoticeKind::Granted, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.notifier.count(NoticeKind::Granted), 1, "exactly 1 grant");
}

// ── 2. concurrent_pending_to_paid_advance ──────────────────────────────────
// A pending record and 10 concurrent paid events: one CAS winner.

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_pending_to_paid_advance() {
    let h = harness();
    let user = h.user("cas@example.com").await;
    h.stock(NETFLIX, 5).await;
    h.deliver(&direct_payload("tx-cas", "pix.created", user.id, NETFLIX))
        .await
        .unwrap();

    let body = serde_json::to_vec(&direct_payload("tx-cas", "pix.paid", user.id, NETFLIX)).unwrap();
    let mut handles = Vec::new();
    for _ in 0..10 {
        let processor = h.state.processor.clone();
        let body = body.clone();
        handles.push(tokio::spawn(async move {
            processor.process(&body, None).await.unwrap()
        }));
    }

    let mut processed = 0;
    for handle in handles {
        if let ProcessResult::Processed(_) = handle.await.unwrap() {
            processed += 1;
        }
    }

    assert_eq!(processed, 1);
    assert_eq!(h.assigned(NETFLIX).await.len(), 1);
}

// ── 3. no_double_allocation ────────────────────────────────────────────────
// K=3 slots, M=10 distinct users claiming at once.

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn no_double_allocation() {
    let h = harness();
    h.stock(NETFLIX, 3).await;

    let mut handles = Vec::new();
    for i in 0..10 {
        let user = h.user(&format!("claim{i}@example.com")).await;
        let allocator = h.state.allocator.clone();
        handles.push(tokio::spawn(async move {
            allocator
                .claim(&service_id(NETFLIX), user.id, None, 1)
                .await
        }));
    }

    let mut slot_ids = HashSet::new();
    let mut none_available = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(slot) => assert!(slot_ids.insert(slot.id), "slot handed out twice"),
            Err(PipelineError::NoSlotAvailable(_)) => none_available += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(slot_ids.len(), 3);
    assert_eq!(none_available, 7);
    assert_eq!(h.assigned(NETFLIX).await.len(), 3);
}

// ── 4. same_user_concurrent_claims_respect_cap ─────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_user_concurrent_claims_respect_cap() {
    let h = harness();
    let user = h.user("greedy@example.com").await;
    h.stock(NETFLIX, 5).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let allocator = h.state.allocator.clone();
        handles.push(tokio::spawn(async move {
            allocator
                .claim(&service_id(NETFLIX), user.id, None, 1)
                .await
        }));
    }

    let mut claimed = 0;
    let mut already = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => claimed += 1,
            Err(PipelineError::AlreadyAssigned { .. }) => already += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(claimed, 1);
    assert_eq!(already, 7);
}

// ── 5. concurrent_grants_leave_one_active ──────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_grants_leave_one_active() {
    let h = harness();
    let user = h.user("grants@example.com").await;
    let plan = PlanId::new("games-basic").unwrap();

    let mut handles = Vec::new();
    for i in 0..10 {
        let entitlements = h.state.entitlements.clone();
        let plan = plan.clone();
        handles.push(tokio::spawn(async move {
            let tx = TransactionId::new(format!("grant-{i}")).unwrap();
            entitlements.grant(user.id, &plan, Some(&tx), 1).await.unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let mut active = 0;
    for i in 0..10 {
        let tx = TransactionId::new(format!("grant-{i}")).unwrap();
        let sub = h
            .ledger
            .subscription_for_transaction(&tx)
            .await
            .unwrap()
            .unwrap();
        if sub.status == SubscriptionStatus::Active {
            active += 1;
        }
    }
    assert_eq!(active, 1, "exactly one active subscription");
}

// ── 6. concurrent_reconcile_runs_once ──────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reconcile_runs_once() {
    let h = harness();
    let user = h.user("recon@example.com").await;
    h.deliver(&direct_payload("tx-recon", "pix.paid", user.id, NETFLIX))
        .await
        .unwrap();
    h.stock(NETFLIX, 5).await;

    let mut handles = Vec::new();
    for _ in 0..6 {
        let processor = h.state.processor.clone();
        handles.push(tokio::spawn(async move {
            processor
                .reconcile(&TransactionId::new("tx-recon").unwrap(), None)
                .await
        }));
    }

    let mut ok = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(PipelineError::Conflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(ok, 1);
    assert_eq!(conflicts, 5);
    assert_eq!(h.assigned(NETFLIX).await.len(), 1);
}

// ── 7. concurrent_provisioning_same_email ──────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_provisioning_same_email() {
    let h = harness();

    let mut handles = Vec::new();
    for i in 0..10 {
        let ledger = h.ledger.clone();
        let email = if i % 2 == 0 { "Same@Example.com" } else { "same@example.com " };
        handles.push(tokio::spawn(async move {
            ledger
                .provision_user(&NewUser::placeholder(email, None))
                .await
                .unwrap()
        }));
    }

    let mut created = 0;
    let mut ids: HashSet<UserId> = HashSet::new();
    for handle in handles {
        let provisioned = handle.await.unwrap();
        if provisioned.created {
            created += 1;
        }
        ids.insert(provisioned.user.id);
    }

    assert_eq!(created, 1);
    assert_eq!(ids.len(), 1);
}
