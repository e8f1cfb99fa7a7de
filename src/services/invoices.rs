use {
    crate::domain::catalog::Catalog,
    crate::domain::error::PipelineError,
    crate::domain::id::{PlanId, TransactionId, UserId},
    crate::domain::ledger::Ledger,
    crate::domain::money::{Currency, Money, MoneyAmount},
    crate::domain::transaction::{NewTransaction, Recorded, TransactionKind, TransactionStatus},
    serde_json::json,
};

/// Issue a pending manual invoice for `plan_id`. Returns the user's existing
/// pending invoice for the same plan instead of creating a second one.
///
/// A later webhook carrying the invoice id as `payment.id` pays it.
pub async fn create_invoice(
    ledger: &dyn Ledger,
    catalog: &Catalog,
    user_id: UserId,
    plan_id: &PlanId,
) -> Result<Recorded, PipelineError> {
    let plan = catalog
        .plan(plan_id)
        .ok_or_else(|| PipelineError::NotFound(format!("plan {plan_id}")))?;
    let user = ledger
        .get_user(user_id)
        .await?
        .ok_or_else(|| PipelineError::NotFound(format!("user {user_id}")))?;

    let amount = MoneyAmount::new(plan.price_cents.unwrap_or(0))?;
    let invoice = NewTransaction {
        id: TransactionId::new_invoice(),
        kind: TransactionKind::ManualInvoice,
        event: "invoice.created".into(),
        status: TransactionStatus::Pending,
        customer_email: user.email.clone(),
        money: Money::new(amount, Currency::default()),
        user_id: Some(user_id),
        plan_id: Some(plan_id.clone()),
        service_id: None,
        raw_payload: json!({ "source": "manual_invoice", "plan_id": plan_id }),
    };

    let recorded = ledger.create_invoice(&invoice).await?;
    match &recorded {
        Recorded::Created(tx) => tracing::info!(
            transaction_id = %tx.id,
            user_id = %user_id,
            plan_id = %plan_id,
            amount = %tx.money.amount(),
            "invoice created"
        ),
        Recorded::Existing(tx) => tracing::info!(
            transaction_id = %tx.id,
            user_id = %user_id,
            plan_id = %plan_id,
            "pending invoice already exists"
        ),
    }
    Ok(recorded)
}
