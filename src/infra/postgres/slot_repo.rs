use {
    super::advisory_lock,
    crate::domain::{
        error::PipelineError,
        id::{ServiceId, SlotId, TransactionId, UserId},
        slot::{ClaimResult, NewSlot, ProfileSlot, SlotClaim, SlotStatus},
    },
    chrono::{DateTime, Utc},
    sqlx::PgPool,
    uuid::Uuid,
};

const COLUMNS: &str = "id, service_id, account_id, label, status, assigned_to, assigned_at, \
                       transaction_id, created_at";

#[derive(sqlx::FromRow)]
struct SlotRow {
    id: Uuid,
    service_id: String,
    account_id: String,
    label: Option<String>,
    status: String,
    assigned_to: Option<Uuid>,
    assigned_at: Option<DateTime<Utc>>,
    transaction_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<SlotRow> for ProfileSlot {
    type Error = PipelineError;

    fn try_from(row: SlotRow) -> Result<Self, Self::Error> {
        Ok(ProfileSlot {
            id: SlotId::from_uuid(row.id),
            service_id: ServiceId::new(row.service_id)?,
            account_id: row.account_id,
            label: row.label,
            status: SlotStatus::try_from(row.status.as_str())?,
            assigned_to: row.assigned_to.map(UserId::from_uuid),
            assigned_at: row.assigned_at,
            transaction_id: row.transaction_id.map(TransactionId::new).transpose()?,
            created_at: row.created_at,
        })
    }
}

fn convert(rows: Vec<SlotRow>) -> Result<Vec<ProfileSlot>, PipelineError> {
    rows.into_iter().map(ProfileSlot::try_from).collect()
}

/// Release every assigned slot matching `predicate`, returning each slot as
/// it was while assigned. The row lock in the CTE re-checks the predicate
/// after waiting, so concurrent releases never touch the same row twice.
fn release_sql(predicate: &str) -> String {
    format!(
        r#"
        WITH target AS (
            SELECT id, assigned_to, assigned_at, transaction_id
            FROM profile_slots
            WHERE status = 'assigned' AND {predicate}
            FOR UPDATE
        )
        UPDATE profile_slots s
        SET status = 'available', assigned_to = NULL, assigned_at = NULL,
            transaction_id = NULL, updated_at = now()
        FROM target t
        WHERE s.id = t.id
        RETURNING s.id, s.service_id, s.account_id, s.label, 'assigned' AS status,
                  t.assigned_to, t.assigned_at, t.transaction_id, s.created_at
        "#
    )
}

pub async fn insert(pool: &PgPool, slot: &NewSlot) -> Result<ProfileSlot, PipelineError> {
    let row = sqlx::query_as::<_, SlotRow>(&format!(
        r#"
        INSERT INTO profile_slots (id, service_id, account_id, label, status)
        VALUES ($1, $2, $3, $4, 'available')
        RETURNING {COLUMNS}
        "#
    ))
    .bind(slot.id.as_uuid())
    .bind(slot.service_id.as_str())
    .bind(&slot.account_id)
    .bind(slot.label.as_deref())
    .fetch_one(pool)
    .await?;
    row.try_into()
}

/// The per-(service, user) advisory lock serializes the cap check for one
/// user; SKIP LOCKED lets claims from different users take different rows
/// without waiting on each other.
pub async fn claim(pool: &PgPool, claim: &SlotClaim) -> Result<ClaimResult, PipelineError> {
    let mut db = pool.begin().await?;
    advisory_lock(
        &mut db,
        &format!("slot:{}:{}", claim.service_id, claim.user_id),
    )
    .await?;

    let held = sqlx::query_as::<_, SlotRow>(&format!(
        r#"
        SELECT {COLUMNS} FROM profile_slots
        WHERE service_id = $1 AND assigned_to = $2 AND status = 'assigned'
        "#
    ))
    .bind(claim.service_id.as_str())
    .bind(claim.user_id.as_uuid())
    .fetch_all(&mut *db)
    .await?;

    if held.len() >= claim.cap as usize {
        db.commit().await?;
        return Ok(ClaimResult::AtCapacity(convert(held)?));
    }

    let claimed = sqlx::query_as::<_, SlotRow>(&format!(
        r#"
        UPDATE profile_slots
        SET status = 'assigned', assigned_to = $2, assigned_at = $3,
            transaction_id = $4, updated_at = now()
        WHERE id = (
            SELECT id FROM profile_slots
            WHERE service_id = $1 AND status = 'available'
            ORDER BY created_at, id
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING {COLUMNS}
        "#
    ))
    .bind(claim.service_id.as_str())
    .bind(claim.user_id.as_uuid())
    .bind(claim.at)
    .bind(claim.transaction_id.as_ref().map(|t| t.as_str()))
    .fetch_optional(&mut *db)
    .await?;

    db.commit().await?;

    match claimed {
        Some(row) => Ok(ClaimResult::Claimed(row.try_into()?)),
        None => Ok(ClaimResult::NoneAvailable),
    }
}

pub async fn release(pool: &PgPool, id: SlotId) -> Result<Option<ProfileSlot>, PipelineError> {
    let rows = sqlx::query_as::<_, SlotRow>(&release_sql("id = $1"))
        .bind(id.as_uuid())
        .fetch_all(pool)
        .await?;
    Ok(convert(rows)?.pop())
}

pub async fn release_for_user(
    pool: &PgPool,
    service_id: &ServiceId,
    user_id: UserId,
) -> Result<Vec<ProfileSlot>, PipelineError> {
    let rows = sqlx::query_as::<_, SlotRow>(&release_sql("service_id = $1 AND assigned_to = $2"))
        .bind(service_id.as_str())
        .bind(user_id.as_uuid())
        .fetch_all(pool)
        .await?;
    convert(rows)
}

pub async fn release_assigned_before(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
) -> Result<Vec<ProfileSlot>, PipelineError> {
    let rows = sqlx::query_as::<_, SlotRow>(&release_sql("assigned_at < $1"))
        .bind(cutoff)
        .fetch_all(pool)
        .await?;
    convert(rows)
}

pub async fn find(pool: &PgPool, id: SlotId) -> Result<Option<ProfileSlot>, PipelineError> {
    let row = sqlx::query_as::<_, SlotRow>(&format!(
        "SELECT {COLUMNS} FROM profile_slots WHERE id = $1"
    ))
    .bind(id.as_uuid())
    .fetch_optional(pool)
    .await?;
    row.map(ProfileSlot::try_from).transpose()
}

pub async fn list(
    pool: &PgPool,
    service_id: &ServiceId,
    status: Option<SlotStatus>,
) -> Result<Vec<ProfileSlot>, PipelineError> {
    let rows = sqlx::query_as::<_, SlotRow>(&format!(
        r#"
        SELECT {COLUMNS} FROM profile_slots
        WHERE service_id = $1 AND ($2::TEXT IS NULL OR status = $2)
        ORDER BY created_at, id
        "#
    ))
    .bind(service_id.as_str())
    .bind(status.map(|s| s.as_str()))
    .fetch_all(pool)
    .await?;
    convert(rows)
}
