use crate::{from_millis, to_millis, Database};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteExecutor};
use thoughtmates_core::{AffinityRecord, CoreError, DatabaseError, MatchStore, UserId};

const UPSERT_MATCH: &str = "
    INSERT INTO matches (user_id, matched_user_id, score, updated_at)
    VALUES (?, ?, ?, ?)
    ON CONFLICT(user_id, matched_user_id)
    DO UPDATE SET score = excluded.score, updated_at = excluded.updated_at";

async fn upsert_match<'e, E>(
    executor: E,
    user_id: UserId,
    other_user_id: UserId,
    score: f32,
    updated_at: i64,
) -> Result<(), sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(UPSERT_MATCH)
        .bind(user_id)
        .bind(other_user_id)
        .bind(score as f64)
        .bind(updated_at)
        .execute(executor)
        .await?;
    Ok(())
}

fn record_from_row(row: &SqliteRow) -> Result<AffinityRecord, CoreError> {
    let score: f64 = row.try_get("score")?;
    Ok(AffinityRecord {
        user_id: row.try_get("user_id")?,
        other_user_id: row.try_get("matched_user_id")?,
        score: score as f32,
        updated_at: from_millis(row.try_get("updated_at")?),
    })
}

#[async_trait]
impl MatchStore for Database {
    async fn upsert(
        &self,
        user_id: UserId,
        other_user_id: UserId,
        score: f32,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        upsert_match(&self.pool, user_id, other_user_id, score, to_millis(now)).await?;
        Ok(())
    }

    async fn upsert_symmetric(
        &self,
        a: UserId,
        b: UserId,
        score: f32,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let updated_at = to_millis(now);
        let mut tx = self.pool.begin().await?;

        upsert_match(&mut *tx, a, b, score, updated_at).await?;
        upsert_match(&mut *tx, b, a, score, updated_at).await?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::TransactionFailed {
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn remove_symmetric(&self, a: UserId, b: UserId) -> Result<u64, CoreError> {
        let result = sqlx::query(
            "DELETE FROM matches
             WHERE (user_id = ?1 AND matched_user_id = ?2)
                OR (user_id = ?2 AND matched_user_id = ?1)",
        )
        .bind(a)
        .bind(b)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn get_match(
        &self,
        user_id: UserId,
        other_user_id: UserId,
    ) -> Result<Option<AffinityRecord>, CoreError> {
        let row = sqlx::query(
            "SELECT user_id, matched_user_id, score, updated_at FROM matches
             WHERE user_id = ? AND matched_user_id = ?",
        )
        .bind(user_id)
        .bind(other_user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn top_matches(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<AffinityRecord>, CoreError> {
        let rows = sqlx::query(
            "SELECT user_id, matched_user_id, score, updated_at FROM matches
             WHERE user_id = ?
             ORDER BY score DESC, updated_at DESC, matched_user_id ASC
             LIMIT ?",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }
}
