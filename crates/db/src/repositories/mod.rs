use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use kiosk_core::channel::Channel;
use kiosk_core::domain::business::{Business, BusinessId};
use kiosk_core::domain::conversation::Conversation;
use kiosk_core::domain::customer::{Customer, CustomerId};
use kiosk_core::domain::message::{DedupKey, Message};
use kiosk_core::domain::conversation::ConversationId;
use kiosk_core::domain::order::{Order, OrderId};
use kiosk_core::domain::product::{Product, ProductId};

pub mod business;
pub mod conversation;
pub mod customer;
pub mod memory;
pub mod message;
pub mod order;
pub mod product;

pub use business::SqlBusinessRepository;
pub use conversation::SqlConversationRepository;
pub use customer::SqlCustomerRepository;
pub use memory::InMemoryStore;
pub use message::SqlMessageRepository;
pub use order::SqlOrderRepository;
pub use product::SqlProductRepository;

use crate::DbPool;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("write conflict: {0}")]
    Conflict(String),
}

/// Result of appending a message that may carry a dedup key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    Duplicate,
}

#[async_trait]
pub trait BusinessRepository: Send + Sync {
    async fn find_by_id(&self, id: &BusinessId) -> Result<Option<Business>, RepositoryError>;
    /// Up to `limit` businesses ordered by creation time.
    async fn list(&self, limit: u32) -> Result<Vec<Business>, RepositoryError>;
    async fn save(&self, business: Business) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError>;
    async fn list_active(&self, business_id: &BusinessId) -> Result<Vec<Product>, RepositoryError>;
    async fn save(&self, product: Product) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait CustomerRepository: Send + Sync {
    async fn find_by_id(&self, id: &CustomerId) -> Result<Option<Customer>, RepositoryError>;
    /// Every business's profile for one channel-native sender, newest first.
    async fn list_by_channel_user(
        &self,
        channel_user_id: &str,
    ) -> Result<Vec<Customer>, RepositoryError>;
    /// Returns the stored profile for `(business, channel_user_id)`, inserting
    /// `candidate` when none exists.
    async fn find_or_create(&self, candidate: Customer) -> Result<Customer, RepositoryError>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find_by_id(&self, id: &ConversationId)
        -> Result<Option<Conversation>, RepositoryError>;
    async fn find_active(
        &self,
        business_id: &BusinessId,
        customer_id: &CustomerId,
        channel: Channel,
    ) -> Result<Option<Conversation>, RepositoryError>;
    /// Returns the active conversation for the triple, opening one if needed.
    async fn find_or_open(
        &self,
        business_id: &BusinessId,
        customer_id: &CustomerId,
        channel: Channel,
    ) -> Result<Conversation, RepositoryError>;
    /// Business of the most recently active conversation on `channel` held by
    /// any customer profile with this channel-native id.
    async fn latest_business_for_sender(
        &self,
        channel: Channel,
        channel_user_id: &str,
    ) -> Result<Option<BusinessId>, RepositoryError>;
    async fn save(&self, conversation: &Conversation) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn exists(&self, dedup_key: &DedupKey) -> Result<bool, RepositoryError>;
    /// Appends a message. A message whose dedup key is already stored is not
    /// written and reports `Duplicate`.
    async fn append(&self, message: Message) -> Result<AppendOutcome, RepositoryError>;
    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, RepositoryError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError>;
    /// Orders of one customer whose id starts with `reference` (dashes ignored).
    async fn find_by_reference(
        &self,
        business_id: &BusinessId,
        customer_id: &CustomerId,
        reference: &str,
    ) -> Result<Vec<Order>, RepositoryError>;
    async fn list_recent_for_customer(
        &self,
        customer_id: &CustomerId,
        limit: u32,
    ) -> Result<Vec<Order>, RepositoryError>;
    /// Inserts the order with all of its items and writes the conversation
    /// (with its cart already cleared) as one unit.
    async fn finalize(
        &self,
        order: &Order,
        conversation: &Conversation,
    ) -> Result<(), RepositoryError>;
    /// Marks a pending order confirmed and paid, credits the customer's
    /// aggregates, and writes the conversation as one unit.
    async fn settle_payment(
        &self,
        order: &Order,
        conversation: &Conversation,
    ) -> Result<(), RepositoryError>;
    /// Cancels a pending order and writes the conversation as one unit.
    async fn cancel(&self, order: &Order, conversation: &Conversation)
        -> Result<(), RepositoryError>;
}

/// Every repository the conversation engine needs, behind trait objects.
#[derive(Clone)]
pub struct Repositories {
    pub businesses: Arc<dyn BusinessRepository>,
    pub products: Arc<dyn ProductRepository>,
    pub customers: Arc<dyn CustomerRepository>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub orders: Arc<dyn OrderRepository>,
}

impl Repositories {
    pub fn sql(pool: DbPool) -> Self {
        Self {
            businesses: Arc::new(SqlBusinessRepository::new(pool.clone())),
            products: Arc::new(SqlProductRepository::new(pool.clone())),
            customers: Arc::new(SqlCustomerRepository::new(pool.clone())),
            conversations: Arc::new(SqlConversationRepository::new(pool.clone())),
            messages: Arc::new(SqlMessageRepository::new(pool.clone())),
            orders: Arc::new(SqlOrderRepository::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        Self::from_store(Arc::new(InMemoryStore::default()))
    }

    pub fn from_store(store: Arc<InMemoryStore>) -> Self {
        Self {
            businesses: store.clone(),
            products: store.clone(),
            customers: store.clone(),
            conversations: store.clone(),
            messages: store.clone(),
            orders: store,
        }
    }
}

pub(crate) fn encode_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("invalid {field} timestamp `{value}`: {e}")))
}

pub(crate) fn decode_decimal(field: &str, value: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(value.trim())
        .map_err(|e| RepositoryError::Decode(format!("invalid {field} amount `{value}`: {e}")))
}

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Lowercase alphanumeric prefix used for order reference lookups.
pub(crate) fn normalize_reference(reference: &str) -> String {
    reference.chars().filter(char::is_ascii_alphanumeric).collect::<String>().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{decode_decimal, decode_timestamp, encode_timestamp, normalize_reference};

    #[test]
    fn timestamps_sort_lexically_in_time_order() {
        let earlier = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("earlier");
        let later = earlier + chrono::Duration::microseconds(1_500);

        let (a, b) = (encode_timestamp(&earlier), encode_timestamp(&later));
        assert!(a < b);
        assert_eq!(decode_timestamp("created_at", &a).expect("decode"), earlier);
    }

    #[test]
    fn decimals_decode_from_text() {
        assert_eq!(decode_decimal("price", " 350.50 ").expect("decimal"), Decimal::new(35050, 2));
        assert!(decode_decimal("price", "three").is_err());
    }

    #[test]
    fn references_drop_punctuation() {
        assert_eq!(normalize_reference("#0F8C-2A1E"), "0f8c2a1e");
        assert_eq!(normalize_reference("%_"), "");
    }
}
