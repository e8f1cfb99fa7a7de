use {
    super::advisory_lock,
    crate::domain::{
        error::PipelineError,
        id::{PlanId, TransactionId, UserId},
        subscription::{NewSubscription, Replaced, Subscription, SubscriptionStatus},
    },
    chrono::{DateTime, Utc},
    sqlx::PgPool,
    uuid::Uuid,
};

const COLUMNS: &str = "id, user_id, plan_id, status, started_at, expires_at, transaction_id, \
                       cancel_reason, expiry_notice_sent, updated_at";

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    user_id: Uuid,
    plan_id: String,
    status: String,
    started_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    transaction_id: Option<String>,
    cancel_reason: Option<String>,
    expiry_notice_sent: bool,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = PipelineError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Subscription {
            id: row.id,
            user_id: UserId::from_uuid(row.user_id),
            plan_id: PlanId::new(row.plan_id)?,
            status: SubscriptionStatus::try_from(row.status.as_str())?,
            started_at: row.started_at,
            expires_at: row.expires_at,
            transaction_id: row.transaction_id.map(TransactionId::new).transpose()?,
            cancel_reason: row.cancel_reason,
            expiry_notice_sent: row.expiry_notice_sent,
            updated_at: row.updated_at,
        })
    }
}

fn convert(rows: Vec<SubscriptionRow>) -> Result<Vec<Subscription>, PipelineError> {
    rows.into_iter().map(Subscription::try_from).collect()
}

/// Cancel-then-insert in one database transaction. The per-user advisory
/// lock orders concurrent grants; the partial unique index on active rows
/// backs it up.
pub async fn replace_active(pool: &PgPool, new: &NewSubscription) -> Result<Replaced, PipelineError> {
    let mut db = pool.begin().await?;
    advisory_lock(&mut db, &format!("subscription:{}", new.user_id)).await?;

    let cancelled = sqlx::query_as::<_, SubscriptionRow>(&format!(
        r#"
        UPDATE subscriptions
        SET status = 'cancelled', cancel_reason = 'replaced', updated_at = now()
        WHERE user_id = $1 AND status = 'active'
        RETURNING {COLUMNS}
        "#
    ))
    .bind(new.user_id.as_uuid())
    .fetch_all(&mut *db)
    .await?;

    let created = sqlx::query_as::<_, SubscriptionRow>(&format!(
        r#"
        INSERT INTO subscriptions
            (id, user_id, plan_id, status, started_at, expires_at, transaction_id, updated_at)
        VALUES ($1, $2, $3, 'active', $4, $5, $6, $4)
        RETURNING {COLUMNS}
        "#
    ))
    .bind(new.id)
    .bind(new.user_id.as_uuid())
    .bind(new.plan_id.as_str())
    .bind(new.started_at)
    .bind(new.expires_at)
    .bind(new.transaction_id.as_ref().map(|t| t.as_str()))
    .fetch_one(&mut *db)
    .await?;

    db.commit().await?;

    Ok(Replaced {
        cancelled: convert(cancelled)?,
        created: created.try_into()?,
    })
}

pub async fn active(pool: &PgPool, user_id: UserId) -> Result<Option<Subscription>, PipelineError> {
    let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
        "SELECT {COLUMNS} FROM subscriptions WHERE user_id = $1 AND status = 'active'"
    ))
    .bind(user_id.as_uuid())
    .fetch_optional(pool)
    .await?;
    row.map(Subscription::try_from).transpose()
}

pub async fn for_transaction(
    pool: &PgPool,
    transaction_id: &TransactionId,
) -> Result<Option<Subscription>, PipelineError> {
    let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
        r#"
        SELECT {COLUMNS} FROM subscriptions
        WHERE transaction_id = $1
        ORDER BY started_at DESC
        LIMIT 1
        "#
    ))
    .bind(transaction_id.as_str())
    .fetch_optional(pool)
    .await?;
    row.map(Subscription::try_from).transpose()
}

pub async fn extend(
    pool: &PgPool,
    id: Uuid,
    expected: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
) -> Result<Option<Subscription>, PipelineError> {
    let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
        r#"
        UPDATE subscriptions
        SET expires_at = $3, expiry_notice_sent = FALSE, updated_at = now()
        WHERE id = $1 AND status = 'active' AND expires_at IS NOT DISTINCT FROM $2
        RETURNING {COLUMNS}
        "#
    ))
    .bind(id)
    .bind(expected)
    .bind(expires_at)
    .fetch_optional(pool)
    .await?;
    row.map(Subscription::try_from).transpose()
}

pub async fn latest_expired(
    pool: &PgPool,
    user_id: UserId,
) -> Result<Option<Subscription>, PipelineError> {
    let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
        r#"
        SELECT {COLUMNS} FROM subscriptions
        WHERE user_id = $1 AND status = 'expired'
        ORDER BY expires_at DESC NULLS LAST
        LIMIT 1
        "#
    ))
    .bind(user_id.as_uuid())
    .fetch_optional(pool)
    .await?;
    row.map(Subscription::try_from).transpose()
}

/// Takes the same per-user lock as `replace_active`, so a grant and a
/// revival of the same user never both end up active.
pub async fn reactivate(
    pool: &PgPool,
    expired: &Subscription,
    expires_at: DateTime<Utc>,
) -> Result<Option<Subscription>, PipelineError> {
    let mut db = pool.begin().await?;
    advisory_lock(&mut db, &format!("subscription:{}", expired.user_id)).await?;

    let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
        r#"
        UPDATE subscriptions s
        SET status = 'active', expires_at = $3, expiry_notice_sent = FALSE, updated_at = now()
        WHERE s.id = $1
          AND s.status = 'expired'
          AND s.expires_at IS NOT DISTINCT FROM $2
          AND NOT EXISTS (
            SELECT 1 FROM subscriptions a
            WHERE a.user_id = s.user_id AND a.status = 'active'
          )
        RETURNING {COLUMNS}
        "#
    ))
    .bind(expired.id)
    .bind(expired.expires_at)
    .bind(expires_at)
    .fetch_optional(&mut *db)
    .await?;

    db.commit().await?;
    row.map(Subscription::try_from).transpose()
}

pub async fn cancel(
    pool: &PgPool,
    id: Uuid,
    reason: &str,
) -> Result<Option<Subscription>, PipelineError> {
    let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
        r#"
        UPDATE subscriptions
        SET status = 'cancelled', cancel_reason = $2, updated_at = now()
        WHERE id = $1 AND status = 'active'
        RETURNING {COLUMNS}
        "#
    ))
    .bind(id)
    .bind(reason)
    .fetch_optional(pool)
    .await?;
    row.map(Subscription::try_from).transpose()
}

pub async fn expire_lapsed(
    pool: &PgPool,
    now: DateTime<Utc>,
) -> Result<Vec<Subscription>, PipelineError> {
    let rows = sqlx::query_as::<_, SubscriptionRow>(&format!(
        r#"
        UPDATE subscriptions
        SET status = 'expired', updated_at = $1
        WHERE status = 'active' AND expires_at <= $1
        RETURNING {COLUMNS}
        "#
    ))
    .bind(now)
    .fetch_all(pool)
    .await?;
    convert(rows)
}

pub async fn flag_expiring(
    pool: &PgPool,
    now: DateTime<Utc>,
    before: DateTime<Utc>,
) -> Result<Vec<Subscription>, PipelineError> {
    let rows = sqlx::query_as::<_, SubscriptionRow>(&format!(
        r#"
        UPDATE subscriptions
        SET expiry_notice_sent = TRUE, updated_at = $1
        WHERE status = 'active'
          AND NOT expiry_notice_sent
          AND expires_at > $1
          AND expires_at <= $2
        RETURNING {COLUMNS}
        "#
    ))
    .bind(now)
    .bind(before)
    .fetch_all(pool)
    .await?;
    convert(rows)
}
