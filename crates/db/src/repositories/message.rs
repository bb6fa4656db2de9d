use sqlx::{sqlite::SqliteRow, Row};

use kiosk_core::domain::conversation::ConversationId;
use kiosk_core::domain::message::{DedupKey, Message, MessageId, MessageKind, SenderType};

use super::{
    decode_timestamp, encode_timestamp, AppendOutcome, MessageRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlMessageRepository {
    pool: DbPool,
}

impl SqlMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MessageRepository for SqlMessageRepository {
    async fn exists(&self, dedup_key: &DedupKey) -> Result<bool, RepositoryError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM message WHERE dedup_key = ?")
            .bind(&dedup_key.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn append(&self, message: Message) -> Result<AppendOutcome, RepositoryError> {
        // The unique dedup_key column is the authoritative claim on an inbound event.
        let result = sqlx::query(
            "INSERT INTO message (
                id,
                conversation_id,
                sender_type,
                message_type,
                content,
                dedup_key,
                media_ref,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(dedup_key) DO NOTHING",
        )
        .bind(&message.id.0)
        .bind(&message.conversation_id.0)
        .bind(message.sender.as_str())
        .bind(message.kind.as_str())
        .bind(&message.content)
        .bind(message.dedup_key.as_ref().map(|key| key.0.as_str()))
        .bind(message.media_ref.as_deref())
        .bind(encode_timestamp(&message.created_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(AppendOutcome::Duplicate);
        }
        Ok(AppendOutcome::Appended)
    }

    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, sender_type, message_type, content, dedup_key, media_ref, created_at
             FROM message
             WHERE conversation_id = ?
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(&conversation_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }
}

fn message_from_row(row: SqliteRow) -> Result<Message, RepositoryError> {
    let sender: String = row.try_get("sender_type")?;
    let kind: String = row.try_get("message_type")?;
    let dedup_key: Option<String> = row.try_get("dedup_key")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Message {
        id: MessageId(row.try_get("id")?),
        conversation_id: ConversationId(row.try_get("conversation_id")?),
        sender: SenderType::parse(&sender)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown sender type `{sender}`")))?,
        kind: MessageKind::parse(&kind)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown message type `{kind}`")))?,
        content: row.try_get("content")?,
        dedup_key: dedup_key.map(DedupKey),
        media_ref: row.try_get("media_ref")?,
        created_at: decode_timestamp("created_at", &created_at)?,
    })
}
