use {
    crate::domain::{
        error::PipelineError,
        id::UserId,
        user::{NewUser, Provisioned, User, normalize_email},
    },
    chrono::{DateTime, Utc},
    sqlx::PgPool,
    uuid::Uuid,
};

const COLUMNS: &str = "id, email, name, needs_password_setup, is_founder, created_at";

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    name: Option<String>,
    needs_password_setup: bool,
    is_founder: bool,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: UserId::from_uuid(row.id),
            email: row.email,
            name: row.name,
            needs_password_setup: row.needs_password_setup,
            is_founder: row.is_founder,
            created_at: row.created_at,
        }
    }
}

pub async fn find(pool: &PgPool, id: UserId) -> Result<Option<User>, PipelineError> {
    let row = sqlx::query_as::<_, UserRow>(&format!("SELECT {COLUMNS} FROM users WHERE id = $1"))
        .bind(id.as_uuid())
        .fetch_optional(pool)
        .await?;
    Ok(row.map(User::from))
}

/// Insert the placeholder, or return whoever already owns the email.
pub async fn provision(pool: &PgPool, user: &NewUser) -> Result<Provisioned, PipelineError> {
    let email = normalize_email(&user.email);

    let inserted = sqlx::query_as::<_, UserRow>(&format!(
        r#"
        INSERT INTO users (id, email, name, needs_password_setup)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (email) DO NOTHING
        RETURNING {COLUMNS}
        "#
    ))
    .bind(user.id.as_uuid())
    .bind(&email)
    .bind(user.name.as_deref())
    .bind(user.needs_password_setup)
    .fetch_optional(pool)
    .await?;

    if let Some(row) = inserted {
        return Ok(Provisioned {
            user: row.into(),
            created: true,
        });
    }

    let existing =
        sqlx::query_as::<_, UserRow>(&format!("SELECT {COLUMNS} FROM users WHERE email = $1"))
            .bind(&email)
            .fetch_one(pool)
            .await?;
    Ok(Provisioned {
        user: existing.into(),
        created: false,
    })
}

pub async fn set_founder(
    pool: &PgPool,
    id: UserId,
    founder: bool,
) -> Result<Option<User>, PipelineError> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "UPDATE users SET is_founder = $2 WHERE id = $1 RETURNING {COLUMNS}"
    ))
    .bind(id.as_uuid())
    .bind(founder)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(User::from))
}
