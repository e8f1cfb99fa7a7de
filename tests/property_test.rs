use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use slot_ledger::domain::catalog::{Catalog, Product, Resolution, Target};
use slot_ledger::domain::id::{PlanId, UserId};
use slot_ledger::domain::money::MoneyAmount;
use slot_ledger::domain::subscription::{NewSubscription, add_months};
use slot_ledger::domain::transaction::TransactionStatus;

fn arb_status() -> impl Strategy<Value = TransactionStatus> {
    prop_oneof![
        Just(TransactionStatus::Pending),
        Just(TransactionStatus::Paid),
        Just(TransactionStatus::Failed),
        Just(TransactionStatus::Refunded),
        Just(TransactionStatus::Unknown),
    ]
}

fn arb_instant() -> impl Strategy<Value = DateTime<Utc>> {
    // 2020-01-01 .. 2040-01-01
    (1_577_836_800i64..2_208_988_800i64).prop_map(|s| Utc.timestamp_opt(s, 0).unwrap())
}

const CATALOG: &str = r#"{
  "plans": [
    { "id": "games", "name": "Games", "duration_months": 1, "product_ids": ["p-games"], "keywords": ["game"] },
    { "id": "streaming", "name": "Streaming", "duration_months": 1 }
  ],
  "services": [
    { "id": "svc-netflix", "name": "Netflix", "plan_id": "streaming",
      "product_ids": ["p-netflix"], "keywords": ["netflix"] }
  ]
}"#;

proptest! {
    /// Failed and refunded never move again.
    #[test]
    fn terminal_states_reject_all_transitions(target in arb_status()) {
        use TransactionStatus::*;
        for terminal in [Failed, Refunded] {
            prop_assert!(!terminal.can_transition_to(&target));
        }
    }

    /// No status transitions to itself, so a replay is always a duplicate.
    #[test]
    fn replays_never_transition(status in arb_status()) {
        prop_assert!(!status.can_transition_to(&status));
    }

    /// Any walk is bounded: unknown → pending → paid → refunded is the longest chain.
    #[test]
    fn random_walk_is_bounded(
        start in arb_status(),
        steps in prop::collection::vec(arb_status(), 1..30)
    ) {
        let mut current = start;
        let mut transitions = 0u32;
        for next in &steps {
            if current.can_transition_to(next) {
                current = *next;
                transitions += 1;
            }
        }
        prop_assert!(transitions <= 3, "got {transitions} transitions in walk: {steps:?}");
    }

    /// Paid is never reachable twice in one walk, so fulfilment runs at most once.
    #[test]
    fn paid_is_entered_at_most_once(
        start in arb_status(),
        steps in prop::collection::vec(arb_status(), 1..30)
    ) {
        let mut current = start;
        let mut entered_paid = 0u32;
        for next in &steps {
            if current.can_transition_to(next) {
                current = *next;
                if current == TransactionStatus::Paid {
                    entered_paid += 1;
                }
            }
        }
        prop_assert!(entered_paid <= 1);
    }

    #[test]
    fn status_roundtrip(status in arb_status()) {
        let roundtripped = TransactionStatus::try_from(status.as_str()).unwrap();
        prop_assert_eq!(roundtripped, status);
    }

    /// Event lookup ignores case and surrounding whitespace.
    #[test]
    fn event_mapping_ignores_case(upper in any::<bool>(), pad in 0usize..3) {
        let event = if upper { "PIX.PAID" } else { "pix.paid" };
        let padded = format!("{}{event}{}", " ".repeat(pad), " ".repeat(pad));
        prop_assert_eq!(TransactionStatus::from_event(&padded), TransactionStatus::Paid);
    }

    /// Anything outside the table is unknown, never paid.
    #[test]
    fn unmapped_events_are_unknown(event in "[a-z]{3,10}\\.[a-z]{3,10}x") {
        prop_assert_eq!(TransactionStatus::from_event(&event), TransactionStatus::Unknown);
    }

    /// Renewal never produces an expiry earlier than `now + months` nor earlier
    /// than the previous expiry.
    #[test]
    fn renewed_expiry_is_monotonic(
        now in arb_instant(),
        offset_days in -400i64..400,
        months in 1u32..24
    ) {
        let sub = NewSubscription {
            id: uuid::Uuid::now_v7(),
            user_id: UserId::new(),
            plan_id: PlanId::new("games").unwrap(),
            started_at: now - Duration::days(400),
            expires_at: Some(now + Duration::days(offset_days)),
            transaction_id: None,
        }
        .into_subscription();

        let renewed = sub.renewed_expiry(now, months).unwrap();
        prop_assert!(renewed >= add_months(now, months).unwrap());
        prop_assert!(renewed > sub.expires_at.unwrap());
    }

    /// An exact product id wins over any keyword-only product in the same order.
    #[test]
    fn exact_product_beats_keyword(keyword_first in any::<bool>()) {
        let catalog = Catalog::from_json(CATALOG).unwrap();
        let keyword = Product { id: None, name: Some("Netflix premium".into()) };
        let exact = Product { id: Some("p-games".into()), name: None };
        let products = if keyword_first {
            vec![keyword, exact]
        } else {
            vec![exact, keyword]
        };
        prop_assert_eq!(
            catalog.resolve_products(&products),
            Resolution::Exact(Target::Game(PlanId::new("games").unwrap()))
        );
    }

    #[test]
    fn money_amount_roundtrip(cents in 0i64..=i64::MAX) {
        let amount = MoneyAmount::new(cents).unwrap();
        prop_assert_eq!(amount.cents(), cents);
    }

    #[test]
    fn negative_amounts_rejected(cents in i64::MIN..0) {
        prop_assert!(MoneyAmount::new(cents).is_err());
    }

    /// Major units round to the nearest minor unit.
    #[test]
    fn from_major_rounds_to_cents(cents in 0i64..10_000_000) {
        let major = cents as f64 / 100.0;
        prop_assert_eq!(MoneyAmount::from_major(major).unwrap().cents(), cents);
    }
}
