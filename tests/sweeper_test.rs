mod common;

use chrono::{Duration, Utc};
use common::*;
use slot_ledger::domain::id::{PlanId, UserId};
use slot_ledger::domain::ledger::Ledger;
use slot_ledger::domain::notify::NoticeKind;
use slot_ledger::domain::slot::{ClaimResult, ProfileSlot, SlotClaim, SlotStatus};
use slot_ledger::domain::subscription::NewSubscription;
use slot_ledger::infra::config::Config;
use slot_ledger::services::sweeper::run_sweeper;
use uuid::Uuid;

async fn claim_days_ago(h: &Harness, user_id: UserId, days: i64) -> ProfileSlot {
    let claim = SlotClaim {
        service_id: service_id(NETFLIX),
        user_id,
        transaction_id: None,
        at: Utc::now() - Duration::days(days),
        cap: 1,
    };
    match h.ledger.claim_slot(&claim).await.unwrap() {
        ClaimResult::Claimed(slot) => slot,
        other => panic!("expected a claim, got {other:?}"),
    }
}

async fn seed_subscription(h: &Harness, user_id: UserId, expires_in: Duration) -> Uuid {
    let id = Uuid::now_v7();
    let now = Utc::now();
    h.ledger
        .replace_active_subscription(&NewSubscription {
            id,
            user_id,
            plan_id: PlanId::new("games-basic").unwrap(),
            started_at: now - Duration::days(30),
            expires_at: Some(now + expires_in),
            transaction_id: None,
        })
        .await
        .unwrap();
    id
}

// ── 1. stale_slot_released_fresh_kept ──────────────────────────────────────

#[tokio::test]
async fn stale_slot_released_fresh_kept() {
    let h = harness();
    h.stock(NETFLIX, 2).await;
    let old_user = h.user("old@example.com").await;
    let new_user = h.user("new@example.com").await;
    let stale = claim_days_ago(&h, old_user.id, 31).await;
    let fresh = claim_days_ago(&h, new_user.id, 29).await;

    let report = h.state.sweeper.sweep(Utc::now()).await.unwrap();
    assert_eq!(report.released_slots, vec![stale.id]);

    let slot = h.ledger.get_slot(stale.id).await.unwrap().unwrap();
    assert_eq!(slot.status, SlotStatus::Available);
    assert_eq!(slot.assigned_to, None);
    assert_eq!(slot.assigned_at, None);
    assert_eq!(slot.transaction_id, None);

    let kept = h.ledger.get_slot(fresh.id).await.unwrap().unwrap();
    assert_eq!(kept.assigned_to, Some(new_user.id));

    // Second run at the same instant changes nothing.
    let again = h.state.sweeper.sweep(Utc::now()).await.unwrap();
    assert!(again.released_slots.is_empty());
    assert_eq!(h.assigned(NETFLIX).await.len(), 1);
}

// ── 2. configured_window_is_used ───────────────────────────────────────────

#[tokio::test]
async fn configured_window_is_used() {
    let h = harness_with(Config {
        slot_window_days: 7,
        ..Config::default()
    });
    h.stock(NETFLIX, 1).await;
    let user = h.user("week@example.com").await;
    let slot = claim_days_ago(&h, user.id, 8).await;

    let report = h.state.sweeper.sweep(Utc::now()).await.unwrap();
    assert_eq!(report.released_slots, vec![slot.id]);
}

// ── 3. lapsed_subscriptions_expire ─────────────────────────────────────────

#[tokio::test]
async fn lapsed_subscriptions_expire() {
    let h = harness();
    let lapsed = h.user("lapsed@example.com").await;
    let current = h.user("current@example.com").await;
    let lapsed_id = seed_subscription(&h, lapsed.id, -Duration::days(1)).await;
    seed_subscription(&h, current.id, Duration::days(20)).await;

    let report = h.state.sweeper.sweep(Utc::now()).await.unwrap();
    assert_eq!(report.expired_subscriptions, vec![lapsed_id]);
    assert!(h.ledger.active_subscription(lapsed.id).await.unwrap().is_none());
    assert!(h.ledger.active_subscription(current.id).await.unwrap().is_some());

    let again = h.state.sweeper.sweep(Utc::now()).await.unwrap();
    assert!(again.expired_subscriptions.is_empty());
}

// ── 4. expiring_notice_sent_once ───────────────────────────────────────────

#[tokio::test]
async fn expiring_notice_sent_once() {
    let h = harness();
    let soon = h.user("soon@example.com").await;
    let later = h.user("later@example.com").await;
    seed_subscription(&h, soon.id, Duration::days(2)).await;
    seed_subscription(&h, later.id, Duration::days(10)).await;

    let first = h.state.sweeper.sweep(Utc::now()).await.unwrap();
    assert_eq!(first.expiry_notices, 1);
    assert_eq!(h.notifier.wait_for(NoticeKind::Expiring, 1).await, 1);
    let notice = h
        .notifier
        .notices()
        .into_iter()
        .find(|n| n.kind == NoticeKind::Expiring)
        .unwrap();
    assert_eq!(notice.user_id, soon.id);
    assert_eq!(notice.email.as_deref(), Some("soon@example.com"));

    let second = h.state.sweeper.sweep(Utc::now()).await.unwrap();
    assert_eq!(second.expiry_notices, 0);
}

// ── 5. run_sweeper_stops_on_shutdown ───────────────────────────────────────

#[tokio::test]
async fn run_sweeper_stops_on_shutdown() {
    let h = harness();
    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(run_sweeper(
        h.state.sweeper.clone(),
        std::time::Duration::from_secs(3600),
        rx,
    ));

    tx.send(true).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(2), handle)
        .await
        .expect("sweeper exits promptly")
        .unwrap();
}

// ── 6. run_sweeper_sweeps_on_interval ──────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn run_sweeper_sweeps_on_interval() {
    let h = harness();
    h.stock(NETFLIX, 1).await;
    let user = h.user("tick@example.com").await;
    claim_days_ago(&h, user.id, 40).await;

    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(run_sweeper(
        h.state.sweeper.clone(),
        std::time::Duration::from_secs(60),
        rx,
    ));

    tokio::time::sleep(std::time::Duration::from_secs(61)).await;
    for _ in 0..10 {
        if h.assigned(NETFLIX).await.is_empty() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(h.assigned(NETFLIX).await.is_empty());

    tx.send(true).unwrap();
    handle.await.unwrap();
}
