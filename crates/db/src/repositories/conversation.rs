use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use tracing::warn;

use kiosk_core::channel::Channel;
use kiosk_core::domain::business::BusinessId;
use kiosk_core::domain::conversation::{
    Conversation, ConversationId, ConversationMetadata, ConversationStatus,
};
use kiosk_core::domain::customer::CustomerId;

use super::{
    decode_timestamp, encode_timestamp, is_unique_violation, ConversationRepository,
    RepositoryError,
};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const CONVERSATION_COLUMNS: &str =
    "id, business_id, customer_id, channel, status, metadata, last_message_at, created_at";

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {CONVERSATION_COLUMNS} FROM conversation WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;

        row.map(conversation_from_row).transpose()
    }

    async fn find_active(
        &self,
        business_id: &BusinessId,
        customer_id: &CustomerId,
        channel: Channel,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversation
             WHERE business_id = ? AND customer_id = ? AND channel = ? AND status = 'active'"
        ))
        .bind(&business_id.0)
        .bind(&customer_id.0)
        .bind(channel.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(conversation_from_row).transpose()
    }

    async fn find_or_open(
        &self,
        business_id: &BusinessId,
        customer_id: &CustomerId,
        channel: Channel,
    ) -> Result<Conversation, RepositoryError> {
        if let Some(existing) = self.find_active(business_id, customer_id, channel).await? {
            return Ok(existing);
        }

        let conversation = Conversation::open(business_id.clone(), customer_id.clone(), channel);
        let inserted = sqlx::query(
            "INSERT INTO conversation (
                id,
                business_id,
                customer_id,
                channel,
                status,
                metadata,
                last_message_at,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&conversation.id.0)
        .bind(&conversation.business_id.0)
        .bind(&conversation.customer_id.0)
        .bind(conversation.channel.as_str())
        .bind(conversation.status.as_str())
        .bind(conversation.metadata.to_json().to_string())
        .bind(encode_timestamp(&conversation.last_message_at))
        .bind(encode_timestamp(&conversation.created_at))
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(conversation),
            // A concurrent opener won the partial unique index; use its row.
            Err(error) if is_unique_violation(&error) => self
                .find_active(business_id, customer_id, channel)
                .await?
                .ok_or_else(|| {
                    RepositoryError::Conflict(format!(
                        "active conversation for {}/{} vanished after conflict",
                        business_id.0, customer_id.0
                    ))
                }),
            Err(error) => Err(error.into()),
        }
    }

    async fn latest_business_for_sender(
        &self,
        channel: Channel,
        channel_user_id: &str,
    ) -> Result<Option<BusinessId>, RepositoryError> {
        let business: Option<String> = sqlx::query_scalar(
            "SELECT conversation.business_id
             FROM conversation
             JOIN customer ON customer.id = conversation.customer_id
             WHERE customer.channel_user_id = ? AND conversation.channel = ?
             ORDER BY conversation.last_message_at DESC, conversation.id ASC
             LIMIT 1",
        )
        .bind(channel_user_id)
        .bind(channel.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(business.map(BusinessId))
    }

    async fn save(&self, conversation: &Conversation) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        write_conversation(&mut conn, conversation).await
    }
}

/// Persists status, metadata, and activity time of an existing conversation.
pub(crate) async fn write_conversation(
    conn: &mut SqliteConnection,
    conversation: &Conversation,
) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        "UPDATE conversation
         SET status = ?, metadata = ?, last_message_at = ?
         WHERE id = ?",
    )
    .bind(conversation.status.as_str())
    .bind(conversation.metadata.to_json().to_string())
    .bind(encode_timestamp(&conversation.last_message_at))
    .bind(&conversation.id.0)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::Conflict(format!(
            "conversation {} does not exist",
            conversation.id.0
        )));
    }
    Ok(())
}

fn conversation_from_row(row: SqliteRow) -> Result<Conversation, RepositoryError> {
    let id = ConversationId(row.try_get("id")?);
    let channel: String = row.try_get("channel")?;
    let status: String = row.try_get("status")?;
    let metadata: String = row.try_get("metadata")?;
    let last_message_at: String = row.try_get("last_message_at")?;
    let created_at: String = row.try_get("created_at")?;

    let metadata = decode_metadata(&id, &metadata);

    Ok(Conversation {
        business_id: BusinessId(row.try_get("business_id")?),
        customer_id: CustomerId(row.try_get("customer_id")?),
        channel: Channel::parse(&channel)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown channel `{channel}`")))?,
        status: ConversationStatus::parse(&status).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown conversation status `{status}`"))
        })?,
        metadata,
        last_message_at: decode_timestamp("last_message_at", &last_message_at)?,
        created_at: decode_timestamp("created_at", &created_at)?,
        id,
    })
}

/// Unreadable metadata falls back to browsing with whatever cart survives.
fn decode_metadata(id: &ConversationId, raw: &str) -> ConversationMetadata {
    let value = match serde_json::from_str::<Value>(raw) {
        Ok(value) => value,
        Err(error) => {
            warn!(
                event_name = "db.conversation.metadata_unparseable",
                conversation_id = %id.0,
                error = %error,
                "conversation metadata is not JSON; resetting"
            );
            return ConversationMetadata::default();
        }
    };

    match ConversationMetadata::from_json(&value) {
        Ok(metadata) => metadata,
        Err(error) => {
            warn!(
                event_name = "db.conversation.metadata_recovered",
                conversation_id = %id.0,
                error = %error,
                "conversation metadata invalid; recovering to browsing"
            );
            ConversationMetadata::recover(&value)
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use kiosk_core::channel::Channel;
    use kiosk_core::domain::business::BusinessId;
    use kiosk_core::domain::conversation::{ConversationState, ConversationStatus};
    use kiosk_core::domain::customer::CustomerId;

    use super::SqlConversationRepository;
    use crate::migrations;
    use crate::repositories::ConversationRepository;
    use crate::{connect_with_settings, DbPool};

    #[tokio::test]
    async fn find_or_open_reuses_the_active_conversation() {
        let pool = setup_pool().await;
        seed_customer(&pool, "biz-a", "cust-1", "2348000000001").await;
        let repo = SqlConversationRepository::new(pool.clone());
        let (business, customer) = ids("biz-a", "cust-1");

        let first = repo.find_or_open(&business, &customer, Channel::WhatsApp).await.expect("open");
        let again = repo.find_or_open(&business, &customer, Channel::WhatsApp).await.expect("reuse");
        let other = repo.find_or_open(&business, &customer, Channel::Telegram).await.expect("other");

        assert_eq!(first.id, again.id);
        assert_ne!(first.id, other.id);
        assert_eq!(first.state(), &ConversationState::Browsing);

        pool.close().await;
    }

    #[tokio::test]
    async fn closed_conversation_is_replaced_by_a_new_active_one() {
        let pool = setup_pool().await;
        seed_customer(&pool, "biz-a", "cust-1", "2348000000001").await;
        let repo = SqlConversationRepository::new(pool.clone());
        let (business, customer) = ids("biz-a", "cust-1");

        let mut first =
            repo.find_or_open(&business, &customer, Channel::WhatsApp).await.expect("open");
        first.status = ConversationStatus::Closed;
        repo.save(&first).await.expect("close");

        let next = repo.find_or_open(&business, &customer, Channel::WhatsApp).await.expect("reopen");
        assert_ne!(next.id, first.id);

        pool.close().await;
    }

    #[tokio::test]
    async fn metadata_round_trips_and_invalid_state_recovers() {
        let pool = setup_pool().await;
        seed_customer(&pool, "biz-a", "cust-1", "2348000000001").await;
        let repo = SqlConversationRepository::new(pool.clone());
        let (business, customer) = ids("biz-a", "cust-1");

        let mut conversation =
            repo.find_or_open(&business, &customer, Channel::WhatsApp).await.expect("open");
        conversation.metadata.state = ConversationState::CheckoutMethod;
        conversation.metadata.needs_assistance = true;
        repo.save(&conversation).await.expect("save");

        let stored = repo.find_by_id(&conversation.id).await.expect("find").expect("exists");
        assert_eq!(stored.metadata, conversation.metadata);

        sqlx::query(
            "UPDATE conversation SET metadata = '{\"state\":\"teleporting\",\"cart\":[]}' WHERE id = ?",
        )
        .bind(&conversation.id.0)
        .execute(&pool)
        .await
        .expect("corrupt metadata");
        let recovered = repo.find_by_id(&conversation.id).await.expect("find").expect("exists");
        assert_eq!(recovered.state(), &ConversationState::Browsing);

        sqlx::query("UPDATE conversation SET metadata = 'not json' WHERE id = ?")
            .bind(&conversation.id.0)
            .execute(&pool)
            .await
            .expect("corrupt metadata");
        let reset = repo.find_by_id(&conversation.id).await.expect("find").expect("exists");
        assert_eq!(reset.state(), &ConversationState::Browsing);
        assert!(reset.cart().is_empty());

        pool.close().await;
    }

    #[tokio::test]
    async fn latest_business_follows_most_recent_activity_on_the_channel() {
        let pool = setup_pool().await;
        seed_customer(&pool, "biz-a", "cust-a", "2348000000001").await;
        seed_customer(&pool, "biz-b", "cust-b", "2348000000001").await;
        let repo = SqlConversationRepository::new(pool.clone());

        let (biz_a, cust_a) = ids("biz-a", "cust-a");
        let (biz_b, cust_b) = ids("biz-b", "cust-b");
        let mut older = repo.find_or_open(&biz_a, &cust_a, Channel::WhatsApp).await.expect("open");
        older.last_message_at = Utc::now() - Duration::hours(2);
        repo.save(&older).await.expect("save");
        repo.find_or_open(&biz_b, &cust_b, Channel::WhatsApp).await.expect("open");

        let latest = repo
            .latest_business_for_sender(Channel::WhatsApp, "2348000000001")
            .await
            .expect("lookup");
        assert_eq!(latest, Some(biz_b));
        assert_eq!(
            repo.latest_business_for_sender(Channel::Telegram, "2348000000001")
                .await
                .expect("lookup"),
            None
        );

        pool.close().await;
    }

    fn ids(business: &str, customer: &str) -> (BusinessId, CustomerId) {
        (BusinessId(business.to_owned()), CustomerId(customer.to_owned()))
    }

    async fn seed_customer(pool: &DbPool, business: &str, customer: &str, sender: &str) {
        sqlx::query(
            "INSERT OR IGNORE INTO business (id, name, created_at) VALUES (?, ?, '2026-03-01T09:00:00Z')",
        )
        .bind(business)
        .bind(business)
        .execute(pool)
        .await
        .expect("insert business");
        sqlx::query(
            "INSERT INTO customer (id, business_id, channel_user_id, created_at)
             VALUES (?, ?, ?, '2026-03-01T09:00:00Z')",
        )
        .bind(customer)
        .bind(business)
        .bind(sender)
        .execute(pool)
        .await
        .expect("insert customer");
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }
}
