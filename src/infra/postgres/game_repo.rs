use {
    super::advisory_lock,
    crate::domain::{
        error::PipelineError,
        game::{GameSelection, SelectionResult},
        id::UserId,
    },
    chrono::{DateTime, Utc},
    sqlx::PgPool,
    uuid::Uuid,
};

#[derive(sqlx::FromRow)]
struct SelectionRow {
    user_id: Uuid,
    game_id: String,
    selected_at: DateTime<Utc>,
}

impl From<SelectionRow> for GameSelection {
    fn from(row: SelectionRow) -> Self {
        GameSelection {
            user_id: UserId::from_uuid(row.user_id),
            game_id: row.game_id,
            selected_at: row.selected_at,
        }
    }
}

pub async fn add(
    pool: &PgPool,
    user_id: UserId,
    game_id: &str,
    max_games: Option<u32>,
    at: DateTime<Utc>,
) -> Result<SelectionResult, PipelineError> {
    let mut db = pool.begin().await?;
    advisory_lock(&mut db, &format!("games:{user_id}")).await?;

    let existing = sqlx::query_as::<_, SelectionRow>(
        "SELECT user_id, game_id, selected_at FROM game_selections WHERE user_id = $1 AND game_id = $2",
    )
    .bind(user_id.as_uuid())
    .bind(game_id)
    .fetch_optional(&mut *db)
    .await?;

    if let Some(row) = existing {
        db.commit().await?;
        return Ok(SelectionResult::AlreadySelected(row.into()));
    }

    if let Some(max_games) = max_games {
        let held: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM game_selections WHERE user_id = $1")
                .bind(user_id.as_uuid())
                .fetch_one(&mut *db)
                .await?;
        if held >= i64::from(max_games) {
            db.commit().await?;
            return Ok(SelectionResult::LimitReached { max_games });
        }
    }

    let row = sqlx::query_as::<_, SelectionRow>(
        r#"
        INSERT INTO game_selections (user_id, game_id, selected_at)
        VALUES ($1, $2, $3)
        RETURNING user_id, game_id, selected_at
        "#,
    )
    .bind(user_id.as_uuid())
    .bind(game_id)
    .bind(at)
    .fetch_one(&mut *db)
    .await?;

    db.commit().await?;
    Ok(SelectionResult::Added(row.into()))
}

pub async fn list(pool: &PgPool, user_id: UserId) -> Result<Vec<GameSelection>, PipelineError> {
    let rows = sqlx::query_as::<_, SelectionRow>(
        "SELECT user_id, game_id, selected_at FROM game_selections WHERE user_id = $1 ORDER BY selected_at",
    )
    .bind(user_id.as_uuid())
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(GameSelection::from).collect())
}

pub async fn remove(pool: &PgPool, user_id: UserId, game_id: &str) -> Result<bool, PipelineError> {
    let result = sqlx::query("DELETE FROM game_selections WHERE user_id = $1 AND game_id = $2")
        .bind(user_id.as_uuid())
        .bind(game_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
