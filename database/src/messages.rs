use crate::{from_millis, to_millis, Database};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use thoughtmates_core::{
    Conversation, ConversationId, ConversationSummary, CoreError, DatabaseError, Message,
    MessageStore, UserId,
};

const CONVERSATION_COLUMNS: &str = "c.id, c.user1_id, c.user2_id, c.last_message_at, c.created_at";
const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, body, is_read, created_at";

fn conversation_from_row(row: &SqliteRow) -> Result<Conversation, CoreError> {
    Ok(Conversation {
        id: row.try_get("id")?,
        user1_id: row.try_get("user1_id")?,
        user2_id: row.try_get("user2_id")?,
        last_message_at: from_millis(row.try_get("last_message_at")?),
        created_at: from_millis(row.try_get("created_at")?),
    })
}

fn message_from_row(row: &SqliteRow) -> Result<Message, CoreError> {
    let is_read: i64 = row.try_get("is_read")?;
    Ok(Message {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        sender_id: row.try_get("sender_id")?,
        body: row.try_get("body")?,
        is_read: is_read != 0,
        created_at: from_millis(row.try_get("created_at")?),
    })
}

#[async_trait]
impl MessageStore for Database {
    async fn conversation_between(&self, a: UserId, b: UserId) -> Result<Conversation, CoreError> {
        let (user1, user2) = if a < b { (a, b) } else { (b, a) };
        let now = to_millis(Utc::now());

        sqlx::query(
            "INSERT OR IGNORE INTO conversations (user1_id, user2_id, last_message_at, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(user1)
        .bind(user2)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations c
             WHERE c.user1_id = ? AND c.user2_id = ?"
        ))
        .bind(user1)
        .bind(user2)
        .fetch_one(&self.pool)
        .await?;

        conversation_from_row(&row)
    }

    async fn get_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<Conversation>, CoreError> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations c WHERE c.id = ?"
        ))
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(conversation_from_row).transpose()
    }

    async fn user_conversations(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ConversationSummary>, CoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS},
                u.id AS other_user_id,
                u.username AS other_username,
                (SELECT m.body FROM messages m WHERE m.conversation_id = c.id
                 ORDER BY m.created_at DESC, m.id DESC LIMIT 1) AS last_message,
                (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id
                 AND m.sender_id != ?1 AND m.is_read = 0) AS unread_count
             FROM conversations c
             JOIN users u ON u.id = CASE WHEN c.user1_id = ?1 THEN c.user2_id ELSE c.user1_id END
             WHERE c.user1_id = ?1 OR c.user2_id = ?1
             ORDER BY c.last_message_at DESC, c.id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<ConversationSummary, CoreError> {
                let unread: i64 = row.try_get("unread_count")?;
                Ok(ConversationSummary {
                    conversation: conversation_from_row(row)?,
                    other_user_id: row.try_get("other_user_id")?,
                    other_username: row.try_get("other_username")?,
                    last_message: row.try_get("last_message")?,
                    unread_count: unread.max(0) as u64,
                })
            })
            .collect()
    }

    async fn insert_message(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        body: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Message, CoreError> {
        let millis = to_millis(created_at);
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO messages (conversation_id, sender_id, body, is_read, created_at)
             VALUES (?, ?, ?, 0, ?)",
        )
        .bind(conversation_id)
        .bind(sender_id)
        .bind(body)
        .bind(millis)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversations SET last_message_at = ? WHERE id = ?")
            .bind(millis)
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::TransactionFailed {
                reason: e.to_string(),
            })?;

        Ok(Message {
            id: result.last_insert_rowid(),
            conversation_id,
            sender_id,
            body: body.to_string(),
            is_read: false,
            created_at: from_millis(millis),
        })
    }

    async fn conversation_messages(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
    ) -> Result<Vec<Message>, CoreError> {
        sqlx::query(
            "UPDATE messages SET is_read = 1
             WHERE conversation_id = ? AND sender_id != ? AND is_read = 0",
        )
        .bind(conversation_id)
        .bind(reader)
        .execute(&self.pool)
        .await?;

        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_id = ? ORDER BY created_at ASC, id ASC"
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    async fn unread_count(&self, user_id: UserId) -> Result<u64, CoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages m
             JOIN conversations c ON c.id = m.conversation_id
             WHERE (c.user1_id = ?1 OR c.user2_id = ?1)
               AND m.sender_id != ?1 AND m.is_read = 0",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn delete_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
