//! Postgres-backed message store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{ConversationEntry, Message, MessageKind, NewMessage};

use super::{page_offset, MessageStore};

#[derive(Clone)]
pub struct PgMessageStore {
    pool: Pool<Postgres>,
}

impl PgMessageStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn row_to_message(row: &PgRow) -> AppResult<Message> {
    let kind: String = row.try_get("kind")?;
    Ok(Message {
        id: row.try_get("id")?,
        sender_id: row.try_get("sender_id")?,
        receiver_id: row.try_get("receiver_id")?,
        content: row.try_get("content")?,
        kind: MessageKind::parse(&kind)?,
        media_url: row.try_get("media_url")?,
        file_name: row.try_get("file_name")?,
        file_size: row.try_get("file_size")?,
        content_type: row.try_get("content_type")?,
        created_at: row.try_get("created_at")?,
        is_edited: row.try_get("is_edited")?,
        edited_at: row.try_get("edited_at")?,
        is_deleted: row.try_get("is_deleted")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, content, kind, media_url, file_name, \
     file_size, content_type, created_at, is_edited, edited_at, is_deleted, deleted_at";

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn create(&self, new: NewMessage) -> AppResult<Message> {
        new.validate()?;
        let id = Uuid::new_v4();
        let created_at: DateTime<Utc> = Utc::now();

        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!(
            "INSERT INTO messages (id, sender_id, receiver_id, content, kind, media_url, \
             file_name, file_size, content_type, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(id)
        .bind(new.sender_id)
        .bind(new.receiver_id)
        .bind(&new.content)
        .bind(new.kind.as_str())
        .bind(new.media.as_ref().map(|m| m.url.as_str()))
        .bind(new.media.as_ref().map(|m| m.file_name.as_str()))
        .bind(new.media.as_ref().map(|m| m.file_size))
        .bind(new.media.as_ref().map(|m| m.content_type.as_str()))
        .bind(created_at)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(media) = &new.media {
            sqlx::query(
                "INSERT INTO attachments (id, message_id, kind, url, file_name, file_size, \
                 content_type, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(Uuid::new_v4())
            .bind(id)
            .bind(media.kind.as_str())
            .bind(&media.url)
            .bind(&media.file_name)
            .bind(media.file_size)
            .bind(&media.content_type)
            .bind(created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        row_to_message(&row)
    }

    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Message>> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1 AND is_deleted = FALSE"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_message).transpose()
    }

    async fn get_conversation(
        &self,
        user_a: Uuid,
        user_b: Uuid,
        page: u32,
        page_size: u32,
    ) -> AppResult<Vec<Message>> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE is_deleted = FALSE \
               AND ((sender_id = $1 AND receiver_id = $2) OR (sender_id = $2 AND receiver_id = $1)) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $3 OFFSET $4"
        ))
        .bind(user_a)
        .bind(user_b)
        .bind(i64::from(page_size))
        .bind(page_offset(page, page_size))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_message).collect()
    }

    async fn edit(&self, id: Uuid, editor: Uuid, content: String) -> AppResult<Message> {
        let row = sqlx::query("SELECT sender_id FROM messages WHERE id = $1 AND is_deleted = FALSE")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound)?;
        let sender_id: Uuid = row.try_get("sender_id")?;
        if sender_id != editor {
            return Err(AppError::Forbidden(
                "only the sender may edit a message".into(),
            ));
        }

        let row = sqlx::query(&format!(
            "UPDATE messages SET content = $1, is_edited = TRUE, edited_at = $2 \
             WHERE id = $3 AND is_deleted = FALSE \
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(&content)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound)?;
        row_to_message(&row)
    }

    async fn soft_delete(&self, id: Uuid, requested_by: Uuid) -> AppResult<()> {
        let row = sqlx::query(
            "SELECT sender_id, receiver_id FROM messages WHERE id = $1 AND is_deleted = FALSE",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound)?;
        let sender_id: Uuid = row.try_get("sender_id")?;
        let receiver_id: Uuid = row.try_get("receiver_id")?;
        if requested_by != sender_id && requested_by != receiver_id {
            return Err(AppError::Forbidden(
                "only a participant may delete a message".into(),
            ));
        }

        sqlx::query(
            "UPDATE messages SET is_deleted = TRUE, deleted_at = $1 \
             WHERE id = $2 AND is_deleted = FALSE",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_conversation(&self, user_a: Uuid, user_b: Uuid) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE messages SET is_deleted = TRUE, deleted_at = $1 \
             WHERE is_deleted = FALSE \
               AND ((sender_id = $2 AND receiver_id = $3) OR (sender_id = $3 AND receiver_id = $2))",
        )
        .bind(Utc::now())
        .bind(user_a)
        .bind(user_b)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_conversations(
        &self,
        user: Uuid,
        page: u32,
        page_size: u32,
    ) -> AppResult<Vec<ConversationEntry>> {
        // Latest non-deleted message per counterpart, then page over the
        // groups ordered by that message's timestamp.
        let rows = sqlx::query(&format!(
            "SELECT * FROM ( \
               SELECT DISTINCT ON (counterpart) {MESSAGE_COLUMNS}, counterpart FROM ( \
                 SELECT m.*, CASE WHEN m.sender_id = $1 THEN m.receiver_id ELSE m.sender_id END \
                        AS counterpart \
                 FROM messages m \
                 WHERE m.is_deleted = FALSE AND (m.sender_id = $1 OR m.receiver_id = $1) \
               ) pair \
               ORDER BY counterpart, created_at DESC, id DESC \
             ) latest \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2 OFFSET $3"
        ))
        .bind(user)
        .bind(i64::from(page_size))
        .bind(page_offset(page, page_size))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let message = row_to_message(row)?;
                let counterpart_id: Uuid = row.try_get("counterpart")?;
                Ok(ConversationEntry {
                    counterpart_id,
                    last_activity: message.created_at,
                    last_message: message,
                })
            })
            .collect()
    }
}
