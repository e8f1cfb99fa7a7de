use {
    super::advisory_lock,
    crate::domain::{
        error::PipelineError,
        id::{PlanId, ServiceId, TransactionId, UserId},
        money::{Currency, Money, MoneyAmount},
        transaction::{
            Fulfillment, NewTransaction, Recorded, Transaction, TransactionKind,
            TransactionStatus,
        },
    },
    chrono::{DateTime, Utc},
    sqlx::PgPool,
    uuid::Uuid,
};

const COLUMNS: &str = "id, kind, event, status, customer_email, amount, currency, user_id, \
                       plan_id, service_id, fulfillment, raw_payload, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: String,
    kind: String,
    event: String,
    status: String,
    customer_email: String,
    amount: i64,
    currency: String,
    user_id: Option<Uuid>,
    plan_id: Option<String>,
    service_id: Option<String>,
    fulfillment: Option<serde_json::Value>,
    raw_payload: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = PipelineError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(Transaction {
            id: TransactionId::new(row.id)?,
            kind: TransactionKind::try_from(row.kind.as_str())?,
            event: row.event,
            status: TransactionStatus::try_from(row.status.as_str())?,
            customer_email: row.customer_email,
            money: Money::new(
                MoneyAmount::new(row.amount)?,
                Currency::try_from(row.currency.as_str())?,
            ),
            user_id: row.user_id.map(UserId::from_uuid),
            plan_id: row.plan_id.map(PlanId::new).transpose()?,
            service_id: row.service_id.map(ServiceId::new).transpose()?,
            fulfillment: row.fulfillment.map(serde_json::from_value).transpose()?,
            raw_payload: row.raw_payload,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

async fn insert(
    executor: impl sqlx::PgExecutor<'_>,
    tx: &NewTransaction,
) -> Result<Option<Transaction>, PipelineError> {
    let row = sqlx::query_as::<_, TransactionRow>(&format!(
        r#"
        INSERT INTO transactions
            (id, kind, event, status, customer_email, amount, currency,
             user_id, plan_id, service_id, raw_payload)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (id) DO NOTHING
        RETURNING {COLUMNS}
        "#
    ))
    .bind(tx.id.as_str())
    .bind(tx.kind.as_str())
    .bind(&tx.event)
    .bind(tx.status.as_str())
    .bind(&tx.customer_email)
    .bind(tx.money.amount().cents())
    .bind(tx.money.currency().as_str())
    .bind(tx.user_id.map(|u| u.as_uuid()))
    .bind(tx.plan_id.as_ref().map(|p| p.as_str()))
    .bind(tx.service_id.as_ref().map(|s| s.as_str()))
    .bind(&tx.raw_payload)
    .fetch_optional(executor)
    .await?;

    row.map(Transaction::try_from).transpose()
}

/// Insert-if-absent. The conflict target is the primary key, so concurrent
/// first deliveries of one id race on the insert and exactly one wins.
pub async fn record(pool: &PgPool, tx: &NewTransaction) -> Result<Recorded, PipelineError> {
    if let Some(created) = insert(pool, tx).await? {
        return Ok(Recorded::Created(created));
    }
    let existing = find(pool, &tx.id).await?.ok_or_else(|| {
        PipelineError::NotFound(format!("transaction {} vanished after conflict", tx.id))
    })?;
    Ok(Recorded::Existing(existing))
}

pub async fn find(pool: &PgPool, id: &TransactionId) -> Result<Option<Transaction>, PipelineError> {
    let row = sqlx::query_as::<_, TransactionRow>(&format!(
        "SELECT {COLUMNS} FROM transactions WHERE id = $1"
    ))
    .bind(id.as_str())
    .fetch_optional(pool)
    .await?;

    row.map(Transaction::try_from).transpose()
}

pub async fn advance(
    pool: &PgPool,
    id: &TransactionId,
    from: TransactionStatus,
    to: TransactionStatus,
    event: &str,
    raw_payload: &serde_json::Value,
) -> Result<Option<Transaction>, PipelineError> {
    let row = sqlx::query_as::<_, TransactionRow>(&format!(
        r#"
        UPDATE transactions
        SET status = $3, event = $4, raw_payload = $5, updated_at = now()
        WHERE id = $1 AND status = $2
        RETURNING {COLUMNS}
        "#
    ))
    .bind(id.as_str())
    .bind(from.as_str())
    .bind(to.as_str())
    .bind(event)
    .bind(raw_payload)
    .fetch_optional(pool)
    .await?;

    row.map(Transaction::try_from).transpose()
}

pub async fn attach_user(
    pool: &PgPool,
    id: &TransactionId,
    user_id: UserId,
) -> Result<(), PipelineError> {
    sqlx::query("UPDATE transactions SET user_id = $2, updated_at = now() WHERE id = $1")
        .bind(id.as_str())
        .bind(user_id.as_uuid())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_fulfillment(
    pool: &PgPool,
    id: &TransactionId,
    fulfillment: &Fulfillment,
) -> Result<(), PipelineError> {
    let result =
        sqlx::query("UPDATE transactions SET fulfillment = $2, updated_at = now() WHERE id = $1")
            .bind(id.as_str())
            .bind(serde_json::to_value(fulfillment)?)
            .execute(pool)
            .await?;

    if result.rows_affected() == 0 {
        return Err(PipelineError::NotFound(format!("transaction {id}")));
    }
    Ok(())
}

pub async fn begin_reconciliation(
    pool: &PgPool,
    id: &TransactionId,
    settled_before: DateTime<Utc>,
) -> Result<Option<Transaction>, PipelineError> {
    let row = sqlx::query_as::<_, TransactionRow>(&format!(
        r#"
        UPDATE transactions
        SET fulfillment = $2, updated_at = now()
        WHERE id = $1
          AND status = 'paid'
          AND (
            fulfillment->>'outcome' = ANY($3)
            OR ((fulfillment IS NULL OR fulfillment->>'outcome' = 'recorded')
                AND updated_at <= $4)
          )
        RETURNING {COLUMNS}
        "#
    ))
    .bind(id.as_str())
    .bind(serde_json::to_value(Fulfillment::Reconciling)?)
    .bind(Fulfillment::RECONCILABLE)
    .bind(settled_before)
    .fetch_optional(pool)
    .await?;

    row.map(Transaction::try_from).transpose()
}

/// Pending invoices are deduplicated per (user, plan). The advisory lock
/// serializes concurrent requests for the same pair.
pub async fn create_invoice(pool: &PgPool, tx: &NewTransaction) -> Result<Recorded, PipelineError> {
    let user_id = tx
        .user_id
        .ok_or_else(|| PipelineError::Validation("invoice requires a user".into()))?;
    let plan_id = tx
        .plan_id
        .as_ref()
        .ok_or_else(|| PipelineError::Validation("invoice requires a plan".into()))?;

    let mut db = pool.begin().await?;
    advisory_lock(&mut db, &format!("invoice:{user_id}:{plan_id}")).await?;

    let pending = sqlx::query_as::<_, TransactionRow>(&format!(
        r#"
        SELECT {COLUMNS} FROM transactions
        WHERE kind = 'manual_invoice' AND status = 'pending'
          AND user_id = $1 AND plan_id = $2
        ORDER BY created_at
        LIMIT 1
        "#
    ))
    .bind(user_id.as_uuid())
    .bind(plan_id.as_str())
    .fetch_optional(&mut *db)
    .await?;

    if let Some(row) = pending {
        db.commit().await?;
        return Ok(Recorded::Existing(Transaction::try_from(row)?));
    }

    let created = insert(&mut *db, tx).await?.ok_or_else(|| {
        PipelineError::Validation(format!("invoice id {} already in use", tx.id))
    })?;
    db.commit().await?;
    Ok(Recorded::Created(created))
}
