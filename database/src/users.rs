use crate::{from_millis, is_unique_violation, to_millis, Database};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use thoughtmates_core::{CoreError, User, UserId, UserStore};

pub(crate) const USER_COLUMNS: &str = "u.id, u.username, u.avatar_url, u.bio, u.created_at";

pub(crate) fn user_from_row(row: &SqliteRow) -> Result<User, CoreError> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        avatar_url: row.try_get("avatar_url")?,
        bio: row.try_get("bio")?,
        created_at: from_millis(row.try_get("created_at")?),
    })
}

#[async_trait]
impl UserStore for Database {
    async fn create_user(
        &self,
        username: &str,
        avatar_url: Option<&str>,
        bio: &str,
    ) -> Result<User, CoreError> {
        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO users (username, avatar_url, bio, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(username)
        .bind(avatar_url)
        .bind(bio)
        .bind(to_millis(created_at))
        .execute(&self.pool)
        .await;

        let result = match result {
            Ok(result) => result,
            Err(e) if is_unique_violation(&e) => {
                return Err(CoreError::invalid_input(format!(
                    "username '{username}' is already taken"
                )))
            }
            Err(e) => return Err(e.into()),
        };

        Ok(User {
            id: result.last_insert_rowid(),
            username: username.to_string(),
            avatar_url: avatar_url.map(str::to_string),
            bio: bio.to_string(),
            created_at: from_millis(to_millis(created_at)),
        })
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>, CoreError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = ?"))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn update_bio(&self, user_id: UserId, bio: &str) -> Result<bool, CoreError> {
        let result = sqlx::query("UPDATE users SET bio = ? WHERE id = ?")
            .bind(bio)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn all_users(&self) -> Result<Vec<User>, CoreError> {
        let rows = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users u ORDER BY u.id"))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(user_from_row).collect()
    }

    async fn users_with_content(
        &self,
        exclude: UserId,
        limit: usize,
    ) -> Result<Vec<UserId>, CoreError> {
        let rows = sqlx::query(
            "SELECT user_id FROM thoughts WHERE user_id != ?
             GROUP BY user_id
             ORDER BY MAX(created_at) DESC, user_id
             LIMIT ?",
        )
        .bind(exclude)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get("user_id").map_err(CoreError::from))
            .collect()
    }
}
