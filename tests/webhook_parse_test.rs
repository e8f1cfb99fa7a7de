mod common;

use common::*;
use serde_json::{Value, json};
use slot_ledger::domain::catalog::{Resolution, Target};
use slot_ledger::domain::error::PipelineError;
use slot_ledger::domain::id::{PlanId, ServiceId, UserId};
use slot_ledger::domain::money::Currency;
use slot_ledger::domain::transaction::{TransactionKind, TransactionStatus};
use slot_ledger::domain::webhook::{IncomingEvent, PayloadShape};

fn parse(payload: &Value) -> Result<IncomingEvent, PipelineError> {
    IncomingEvent::parse(&serde_json::to_vec(payload).unwrap(), &catalog())
}

fn rejected(payload: &Value) -> String {
    match parse(payload) {
        Err(PipelineError::Validation(msg)) => msg,
        other => panic!("expected validation error, got {other:?}"),
    }
}

// ── 1. shape_detection ─────────────────────────────────────────────────────

#[test]
fn shape_detection() {
    let user = UserId::new();
    assert_eq!(
        PayloadShape::detect(&direct_payload("t1", "pix.paid", user, NETFLIX)),
        PayloadShape::Direct
    );
    assert_eq!(
        PayloadShape::detect(&gateway_payload("t1", "pix.paid", "a@b.com", &[])),
        PayloadShape::Gateway
    );
}

// ── 2. direct_payload ──────────────────────────────────────────────────────

#[test]
fn direct_payload_names_user_and_service() {
    let user = UserId::new();
    let event = parse(&direct_payload("tx-1", "PIX.PAID", user, NETFLIX)).unwrap();

    assert_eq!(event.transaction_id.as_str(), "tx-1");
    assert_eq!(event.kind, TransactionKind::StreamingPurchase);
    assert_eq!(event.status, TransactionStatus::Paid);
    assert_eq!(event.user_id, Some(user));
    assert_eq!(event.email, None);
    assert_eq!(event.money.amount().cents(), 1990);
    assert_eq!(event.money.currency(), Currency::Brl);
    assert_eq!(
        event.resolution,
        Resolution::Exact(Target::Streaming(ServiceId::new(NETFLIX).unwrap()))
    );

    let new = event.new_transaction();
    assert_eq!(new.service_id, Some(ServiceId::new(NETFLIX).unwrap()));
    assert_eq!(new.plan_id, None);
    assert_eq!(new.customer_email, "");
}

#[test]
fn direct_payload_accepts_numeric_id_and_string_amount() {
    let user = UserId::new();
    let event = parse(&json!({
        "service_id": DISNEY,
        "user_id": user.to_string(),
        "event": "pix.paid",
        "transaction_id": 98765,
        "amount": "29,90",
        "currency": "USD"
    }))
    .unwrap();

    assert_eq!(event.transaction_id.as_str(), "98765");
    assert_eq!(event.money.amount().cents(), 2990);
    assert_eq!(event.money.currency(), Currency::Usd);
}

#[test]
fn direct_payload_rejections() {
    let user = UserId::new();

    let mut unknown_service = direct_payload("t", "pix.paid", user, NETFLIX);
    unknown_service["service_id"] = json!("svc-nope");
    assert!(rejected(&unknown_service).contains("unknown service_id"));

    let mut bad_user = direct_payload("t", "pix.paid", user, NETFLIX);
    bad_user["user_id"] = json!("not-a-uuid");
    assert!(rejected(&bad_user).contains("invalid user id"));

    let mut blank_id = direct_payload("t", "pix.paid", user, NETFLIX);
    blank_id["transaction_id"] = json!("   ");
    rejected(&blank_id);

    let mut negative = direct_payload("t", "pix.paid", user, NETFLIX);
    negative["amount"] = json!(-1.0);
    rejected(&negative);

    let mut blank_event = direct_payload("t", "pix.paid", user, NETFLIX);
    blank_event["event"] = json!("");
    rejected(&blank_event);

    let mut bad_currency = direct_payload("t", "pix.paid", user, NETFLIX);
    bad_currency["currency"] = json!("xyz");
    assert!(rejected(&bad_currency).contains("unknown currency"));
}

// ── 3. gateway_payload ─────────────────────────────────────────────────────

#[test]
fn gateway_payload_resolves_products() {
    let event = parse(&gateway_payload(
        "pay-1",
        "purchase.approved",
        "  Maria@Example.com ",
        &[(Some("prod_unknown"), Some("Mystery box")), (Some("prod_disney"), None)],
    ))
    .unwrap();

    assert_eq!(event.status, TransactionStatus::Paid);
    assert_eq!(event.kind, TransactionKind::StreamingPurchase);
    assert_eq!(event.email.as_deref(), Some("Maria@Example.com"));
    assert_eq!(event.name.as_deref(), Some("Maria Silva"));
    assert_eq!(event.user_id, None);
    assert_eq!(
        event.resolution,
        Resolution::Exact(Target::Streaming(ServiceId::new(DISNEY).unwrap()))
    );
}

#[test]
fn gateway_payload_without_products_uses_default_plan() {
    let event = parse(&gateway_payload("pay-2", "pix.paid", "a@b.com", &[])).unwrap();
    assert_eq!(event.kind, TransactionKind::GamePurchase);
    assert_eq!(
        event.resolution,
        Resolution::Exact(Target::Game(PlanId::new("games-basic").unwrap()))
    );
    assert_eq!(
        event.new_transaction().plan_id,
        Some(PlanId::new("games-basic").unwrap())
    );
}

#[test]
fn gateway_payload_keyword_match_is_fallback() {
    let event = parse(&gateway_payload(
        "pay-3",
        "pix.paid",
        "a@b.com",
        &[(None, Some("Combo NETFLIX 4K"))],
    ))
    .unwrap();
    assert!(event.resolution.is_fallback());
    assert_eq!(
        event.resolution.target(),
        Some(&Target::Streaming(ServiceId::new(NETFLIX).unwrap()))
    );
}

#[test]
fn gateway_payload_unmatched_products_stay_unresolved() {
    let event = parse(&gateway_payload(
        "pay-4",
        "pix.paid",
        "a@b.com",
        &[(Some("prod_x"), Some("Something else"))],
    ))
    .unwrap();
    assert_eq!(event.resolution, Resolution::Unresolved);
    assert_eq!(event.kind, TransactionKind::GamePurchase);
    let new = event.new_transaction();
    assert_eq!((new.plan_id, new.service_id), (None, None));
}

#[test]
fn gateway_payload_rejections() {
    let mut no_at = gateway_payload("p", "pix.paid", "a@b.com", &[]);
    no_at["customer"]["email"] = json!("nobody");
    assert!(rejected(&no_at).contains("customer.email"));

    let mut blank_email = gateway_payload("p", "pix.paid", "a@b.com", &[]);
    blank_email["customer"]["email"] = json!(" ");
    rejected(&blank_email);

    let mut no_payment = gateway_payload("p", "pix.paid", "a@b.com", &[]);
    no_payment.as_object_mut().unwrap().remove("payment");
    assert!(rejected(&no_payment).contains("malformed payload"));

    let mut nan_amount = gateway_payload("p", "pix.paid", "a@b.com", &[]);
    nan_amount["payment"]["amount"] = json!("abc");
    assert!(rejected(&nan_amount).contains("not a number"));
}

// ── 4. malformed_bodies ────────────────────────────────────────────────────

#[test]
fn malformed_bodies() {
    let catalog = catalog();
    for body in [&b"not json"[..], &b"[1,2,3]"[..], &b"\"text\""[..], &b""[..]] {
        let err = IncomingEvent::parse(body, &catalog).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)), "{body:?}");
    }
}

// ── 5. unmapped_events ─────────────────────────────────────────────────────

#[test]
fn unmapped_events_parse_as_unknown() {
    let event = parse(&gateway_payload("p", "subscription.paused", "a@b.com", &[])).unwrap();
    assert_eq!(event.status, TransactionStatus::Unknown);
    assert_eq!(event.event, "subscription.paused");
}
