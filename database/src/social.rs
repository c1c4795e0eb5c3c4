use crate::users::{user_from_row, USER_COLUMNS};
use crate::{to_millis, Database};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use thoughtmates_core::{CoreError, SocialStore, User, UserId};

impl Database {
    async fn fetch_users(&self, sql: &str, user_id: UserId) -> Result<Vec<User>, CoreError> {
        let rows = sqlx::query(sql).bind(user_id).fetch_all(&self.pool).await?;
        rows.iter().map(user_from_row).collect()
    }
}

#[async_trait]
impl SocialStore for Database {
    async fn follow(&self, follower: UserId, following: UserId) -> Result<bool, CoreError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO follows (follower_id, following_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(follower)
        .bind(following)
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn unfollow(&self, follower: UserId, following: UserId) -> Result<bool, CoreError> {
        let result = sqlx::query("DELETE FROM follows WHERE follower_id = ? AND following_id = ?")
            .bind(follower)
            .bind(following)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn is_following(&self, follower: UserId, following: UserId) -> Result<bool, CoreError> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM follows WHERE follower_id = ? AND following_id = ?) AS edge",
        )
        .bind(follower)
        .bind(following)
        .fetch_one(&self.pool)
        .await?;
        let edge: i64 = row.try_get("edge")?;
        Ok(edge != 0)
    }

    async fn followers(&self, user_id: UserId) -> Result<Vec<User>, CoreError> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM follows f JOIN users u ON u.id = f.follower_id
             WHERE f.following_id = ? ORDER BY f.created_at DESC"
        );
        self.fetch_users(&sql, user_id).await
    }

    async fn following(&self, user_id: UserId) -> Result<Vec<User>, CoreError> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM follows f JOIN users u ON u.id = f.following_id
             WHERE f.follower_id = ? ORDER BY f.created_at DESC"
        );
        self.fetch_users(&sql, user_id).await
    }
}
