use crate::users::{user_from_row, USER_COLUMNS};
use crate::{decode_vector, encode_vector, from_millis, to_millis, Database};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use thoughtmates_core::{
    Comment, CommentId, ContentId, ContentItem, ContentSnapshot, ContentStore, ContentView,
    CoreError, DatabaseError, DeleteOutcome, User, UserId, Vector, ViewerFlags,
};
use tracing::warn;

const CONTENT_COLUMNS: &str = "t.id, t.user_id, t.body, t.vector, t.created_at";

// ?1 is the viewer (NULL when anonymous)
const SNAPSHOT_SELECT: &str = "
    SELECT t.id, t.user_id, t.body, t.created_at, u.username,
        (SELECT COUNT(*) FROM likes l WHERE l.thought_id = t.id) AS like_count,
        (SELECT COUNT(*) FROM comments c WHERE c.thought_id = t.id) AS comment_count,
        EXISTS(SELECT 1 FROM likes l WHERE l.thought_id = t.id AND l.user_id = ?1) AS is_liked,
        EXISTS(SELECT 1 FROM saved_thoughts s WHERE s.thought_id = t.id AND s.user_id = ?1) AS is_saved
    FROM thoughts t
    JOIN users u ON u.id = t.user_id";

const COMMENT_SELECT: &str = "
    SELECT c.id, c.thought_id, c.user_id, u.username, c.body, c.created_at
    FROM comments c
    JOIN users u ON u.id = c.user_id";

fn content_from_row(row: &SqliteRow) -> Result<ContentItem, CoreError> {
    let id: ContentId = row.try_get("id")?;
    let raw_vector: String = row.try_get("vector")?;

    Ok(ContentItem {
        id,
        user_id: row.try_get("user_id")?,
        body: row.try_get("body")?,
        vector: decode_vector(id, &raw_vector)?,
        created_at: from_millis(row.try_get("created_at")?),
    })
}

fn snapshot_from_row(
    row: &SqliteRow,
    viewer: Option<UserId>,
) -> Result<ContentSnapshot, CoreError> {
    let like_count: i64 = row.try_get("like_count")?;
    let comment_count: i64 = row.try_get("comment_count")?;
    let is_liked: i64 = row.try_get("is_liked")?;
    let is_saved: i64 = row.try_get("is_saved")?;

    Ok(ContentSnapshot {
        content: ContentView {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            body: row.try_get("body")?,
            created_at: from_millis(row.try_get("created_at")?),
        },
        username: row.try_get("username")?,
        like_count: like_count.max(0) as u64,
        comment_count: comment_count.max(0) as u64,
        viewer: viewer.map(|_| ViewerFlags {
            is_liked: is_liked != 0,
            is_saved: is_saved != 0,
        }),
    })
}

fn comment_from_row(row: &SqliteRow) -> Result<Comment, CoreError> {
    Ok(Comment {
        id: row.try_get("id")?,
        content_id: row.try_get("thought_id")?,
        user_id: row.try_get("user_id")?,
        username: row.try_get("username")?,
        body: row.try_get("body")?,
        created_at: from_millis(row.try_get("created_at")?),
    })
}

impl Database {
    async fn fetch_snapshots(
        &self,
        filter: &str,
        viewer: Option<UserId>,
        arg: Option<i64>,
    ) -> Result<Vec<ContentSnapshot>, CoreError> {
        let sql = format!("{SNAPSHOT_SELECT} {filter} ORDER BY t.created_at DESC, t.id DESC");
        let rows = sqlx::query(&sql)
            .bind(viewer)
            .bind(arg)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| snapshot_from_row(row, viewer))
            .collect()
    }

    async fn owner_of(&self, table: &str, id: i64) -> Result<Option<UserId>, CoreError> {
        let row = sqlx::query(&format!("SELECT user_id FROM {table} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.try_get("user_id")).transpose()?)
    }

    async fn owned_delete(
        &self,
        table: &str,
        id: i64,
        owner: UserId,
    ) -> Result<DeleteOutcome, CoreError> {
        match self.owner_of(table, id).await? {
            None => Ok(DeleteOutcome::NotFound),
            Some(user_id) if user_id != owner => Ok(DeleteOutcome::NotOwner),
            Some(_) => {
                let sql = format!("DELETE FROM {table} WHERE id = ? AND user_id = ?");
                let result = sqlx::query(&sql)
                    .bind(id)
                    .bind(owner)
                    .execute(&self.pool)
                    .await?;
                // Lost a race with another delete
                if result.rows_affected() == 0 {
                    Ok(DeleteOutcome::NotFound)
                } else {
                    Ok(DeleteOutcome::Deleted)
                }
            }
        }
    }
}

#[async_trait]
impl ContentStore for Database {
    async fn insert_content(
        &self,
        user_id: UserId,
        body: &str,
        vector: &Vector,
        created_at: DateTime<Utc>,
    ) -> Result<ContentItem, CoreError> {
        let millis = to_millis(created_at);
        let result = sqlx::query(
            "INSERT INTO thoughts (user_id, body, vector, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(body)
        .bind(encode_vector(vector)?)
        .bind(millis)
        .execute(&self.pool)
        .await?;

        Ok(ContentItem {
            id: result.last_insert_rowid(),
            user_id,
            body: body.to_string(),
            vector: vector.clone(),
            created_at: from_millis(millis),
        })
    }

    async fn get_content(&self, content_id: ContentId) -> Result<Option<ContentItem>, CoreError> {
        let row = sqlx::query(&format!("SELECT {CONTENT_COLUMNS} FROM thoughts t WHERE t.id = ?"))
            .bind(content_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(content_from_row).transpose()
    }

    async fn user_content(&self, user_id: UserId) -> Result<Vec<ContentItem>, CoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {CONTENT_COLUMNS} FROM thoughts t WHERE t.user_id = ?
             ORDER BY t.created_at DESC, t.id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(content_from_row).collect()
    }

    async fn user_content_count(&self, user_id: UserId) -> Result<u64, CoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM thoughts WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn content_excluding_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ContentItem>, CoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {CONTENT_COLUMNS} FROM thoughts t WHERE t.user_id != ?
             ORDER BY t.created_at DESC, t.id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        // One bad row must not hide every other thought from a search pool
        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            match content_from_row(row) {
                Ok(item) => items.push(item),
                Err(CoreError::Database(e @ DatabaseError::MalformedVector { .. })) => {
                    warn!("Leaving thought out of search pool: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(items)
    }

    async fn delete_content(
        &self,
        content_id: ContentId,
        owner: UserId,
    ) -> Result<DeleteOutcome, CoreError> {
        self.owned_delete("thoughts", content_id, owner).await
    }

    async fn snapshots_since(
        &self,
        since: DateTime<Utc>,
        viewer: Option<UserId>,
    ) -> Result<Vec<ContentSnapshot>, CoreError> {
        self.fetch_snapshots("WHERE t.created_at >= ?2", viewer, Some(to_millis(since)))
            .await
    }

    async fn all_snapshots(
        &self,
        viewer: Option<UserId>,
    ) -> Result<Vec<ContentSnapshot>, CoreError> {
        self.fetch_snapshots("WHERE ?2 IS NULL", viewer, None).await
    }

    async fn following_snapshots(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ContentSnapshot>, CoreError> {
        self.fetch_snapshots(
            "WHERE t.user_id IN (SELECT following_id FROM follows WHERE follower_id = ?2)",
            Some(user_id),
            Some(user_id),
        )
        .await
    }

    async fn saved_snapshots(&self, user_id: UserId) -> Result<Vec<ContentSnapshot>, CoreError> {
        self.fetch_snapshots(
            "WHERE t.id IN (SELECT thought_id FROM saved_thoughts WHERE user_id = ?2)",
            Some(user_id),
            Some(user_id),
        )
        .await
    }

    async fn like(&self, content_id: ContentId, user_id: UserId) -> Result<bool, CoreError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO likes (thought_id, user_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(content_id)
        .bind(user_id)
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn unlike(&self, content_id: ContentId, user_id: UserId) -> Result<bool, CoreError> {
        let result = sqlx::query("DELETE FROM likes WHERE thought_id = ? AND user_id = ?")
            .bind(content_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn like_count(&self, content_id: ContentId) -> Result<u64, CoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM likes WHERE thought_id = ?")
            .bind(content_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn likers(&self, content_id: ContentId) -> Result<Vec<User>, CoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM likes l
             JOIN users u ON u.id = l.user_id
             WHERE l.thought_id = ?
             ORDER BY l.created_at ASC, u.id ASC"
        ))
        .bind(content_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(user_from_row).collect()
    }

    async fn save(&self, user_id: UserId, content_id: ContentId) -> Result<bool, CoreError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO saved_thoughts (user_id, thought_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(content_id)
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn unsave(&self, user_id: UserId, content_id: ContentId) -> Result<bool, CoreError> {
        let result = sqlx::query("DELETE FROM saved_thoughts WHERE user_id = ? AND thought_id = ?")
            .bind(user_id)
            .bind(content_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_comment(
        &self,
        content_id: ContentId,
        user_id: UserId,
        body: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Comment, CoreError> {
        let result = sqlx::query(
            "INSERT INTO comments (thought_id, user_id, body, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(content_id)
        .bind(user_id)
        .bind(body)
        .bind(to_millis(created_at))
        .execute(&self.pool)
        .await?;

        let comment_id = result.last_insert_rowid();
        self.get_comment(comment_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("comment {comment_id}")))
    }

    async fn get_comment(&self, comment_id: CommentId) -> Result<Option<Comment>, CoreError> {
        let row = sqlx::query(&format!("{COMMENT_SELECT} WHERE c.id = ?"))
            .bind(comment_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(comment_from_row).transpose()
    }

    async fn comments(&self, content_id: ContentId) -> Result<Vec<Comment>, CoreError> {
        let rows = sqlx::query(&format!(
            "{COMMENT_SELECT} WHERE c.thought_id = ? ORDER BY c.created_at ASC, c.id ASC"
        ))
        .bind(content_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(comment_from_row).collect()
    }

    async fn delete_comment(
        &self,
        comment_id: CommentId,
        owner: UserId,
    ) -> Result<DeleteOutcome, CoreError> {
        self.owned_delete("comments", comment_id, owner).await
    }
}
