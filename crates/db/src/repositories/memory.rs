use std::collections::HashMap;

use tokio::sync::RwLock;

use kiosk_core::channel::Channel;
use kiosk_core::domain::business::{Business, BusinessId};
use kiosk_core::domain::conversation::{Conversation, ConversationId, ConversationStatus};
use kiosk_core::domain::customer::{Customer, CustomerId};
use kiosk_core::domain::message::{DedupKey, Message};
use kiosk_core::domain::order::{Order, OrderId, OrderStatus, PaymentStatus};
use kiosk_core::domain::product::{Product, ProductId};

use super::{
    normalize_reference, AppendOutcome, BusinessRepository, ConversationRepository,
    CustomerRepository, MessageRepository, OrderRepository, ProductRepository, RepositoryError,
};

#[derive(Default)]
struct MemoryState {
    businesses: Vec<Business>,
    products: Vec<Product>,
    customers: Vec<Customer>,
    conversations: HashMap<String, Conversation>,
    messages: Vec<Message>,
    orders: Vec<Order>,
}

impl MemoryState {
    fn write_conversation(&mut self, conversation: &Conversation) -> Result<(), RepositoryError> {
        match self.conversations.get_mut(&conversation.id.0) {
            Some(stored) => {
                *stored = conversation.clone();
                Ok(())
            }
            None => Err(RepositoryError::Conflict(format!(
                "conversation {} does not exist",
                conversation.id.0
            ))),
        }
    }

    fn order_index(&self, id: &OrderId) -> Option<usize> {
        self.orders.iter().position(|order| order.id == *id)
    }
}

/// One shared store behind every repository trait, so multi-entity writes
/// apply under a single lock the way the SQL transactions do.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<MemoryState>,
}

#[async_trait::async_trait]
impl BusinessRepository for InMemoryStore {
    async fn find_by_id(&self, id: &BusinessId) -> Result<Option<Business>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.businesses.iter().find(|business| business.id == *id).cloned())
    }

    async fn list(&self, limit: u32) -> Result<Vec<Business>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.businesses.iter().take(limit as usize).cloned().collect())
    }

    async fn save(&self, business: Business) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        match state.businesses.iter_mut().find(|stored| stored.id == business.id) {
            Some(stored) => *stored = business,
            None => state.businesses.push(business),
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ProductRepository for InMemoryStore {
    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.products.iter().find(|product| product.id == *id).cloned())
    }

    async fn list_active(&self, business_id: &BusinessId) -> Result<Vec<Product>, RepositoryError> {
        let state = self.state.read().await;
        let mut products = state
            .products
            .iter()
            .filter(|product| product.business_id == *business_id && product.active)
            .cloned()
            .collect::<Vec<_>>();
        products.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(products)
    }

    async fn save(&self, product: Product) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        match state.products.iter_mut().find(|stored| stored.id == product.id) {
            Some(stored) => *stored = product,
            None => state.products.push(product),
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CustomerRepository for InMemoryStore {
    async fn find_by_id(&self, id: &CustomerId) -> Result<Option<Customer>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.customers.iter().find(|customer| customer.id == *id).cloned())
    }

    async fn list_by_channel_user(
        &self,
        channel_user_id: &str,
    ) -> Result<Vec<Customer>, RepositoryError> {
        let state = self.state.read().await;
        let mut customers = state
            .customers
            .iter()
            .filter(|customer| customer.channel_user_id == channel_user_id)
            .cloned()
            .collect::<Vec<_>>();
        customers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(customers)
    }

    async fn find_or_create(&self, candidate: Customer) -> Result<Customer, RepositoryError> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.customers.iter_mut().find(|customer| {
            customer.business_id == candidate.business_id
                && customer.channel_user_id == candidate.channel_user_id
        }) {
            if existing.display_name.is_none() {
                existing.display_name = candidate.display_name;
            }
            return Ok(existing.clone());
        }

        state.customers.push(candidate.clone());
        Ok(candidate)
    }
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryStore {
    async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.conversations.get(&id.0).cloned())
    }

    async fn find_active(
        &self,
        business_id: &BusinessId,
        customer_id: &CustomerId,
        channel: Channel,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .conversations
            .values()
            .find(|conversation| {
                conversation.business_id == *business_id
                    && conversation.customer_id == *customer_id
                    && conversation.channel == channel
                    && conversation.status == ConversationStatus::Active
            })
            .cloned())
    }

    async fn find_or_open(
        &self,
        business_id: &BusinessId,
        customer_id: &CustomerId,
        channel: Channel,
    ) -> Result<Conversation, RepositoryError> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.conversations.values().find(|conversation| {
            conversation.business_id == *business_id
                && conversation.customer_id == *customer_id
                && conversation.channel == channel
                && conversation.status == ConversationStatus::Active
        }) {
            return Ok(existing.clone());
        }

        let conversation = Conversation::open(business_id.clone(), customer_id.clone(), channel);
        state.conversations.insert(conversation.id.0.clone(), conversation.clone());
        Ok(conversation)
    }

    async fn latest_business_for_sender(
        &self,
        channel: Channel,
        channel_user_id: &str,
    ) -> Result<Option<BusinessId>, RepositoryError> {
        let state = self.state.read().await;
        let customers = state
            .customers
            .iter()
            .filter(|customer| customer.channel_user_id == channel_user_id)
            .map(|customer| &customer.id)
            .collect::<Vec<_>>();

        Ok(state
            .conversations
            .values()
            .filter(|conversation| {
                conversation.channel == channel && customers.contains(&&conversation.customer_id)
            })
            .max_by_key(|conversation| conversation.last_message_at)
            .map(|conversation| conversation.business_id.clone()))
    }

    async fn save(&self, conversation: &Conversation) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.write_conversation(conversation)
    }
}

#[async_trait::async_trait]
impl MessageRepository for InMemoryStore {
    async fn exists(&self, dedup_key: &DedupKey) -> Result<bool, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.messages.iter().any(|message| message.dedup_key.as_ref() == Some(dedup_key)))
    }

    async fn append(&self, message: Message) -> Result<AppendOutcome, RepositoryError> {
        let mut state = self.state.write().await;
        if let Some(key) = &message.dedup_key {
            if state.messages.iter().any(|stored| stored.dedup_key.as_ref() == Some(key)) {
                return Ok(AppendOutcome::Duplicate);
            }
        }
        state.messages.push(message);
        Ok(AppendOutcome::Appended)
    }

    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .iter()
            .filter(|message| message.conversation_id == *conversation_id)
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl OrderRepository for InMemoryStore {
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.orders.iter().find(|order| order.id == *id).cloned())
    }

    async fn find_by_reference(
        &self,
        business_id: &BusinessId,
        customer_id: &CustomerId,
        reference: &str,
    ) -> Result<Vec<Order>, RepositoryError> {
        let prefix = normalize_reference(reference);
        if prefix.is_empty() {
            return Ok(Vec::new());
        }

        let state = self.state.read().await;
        let mut matches = state
            .orders
            .iter()
            .filter(|order| order.business_id == *business_id && order.customer_id == *customer_id)
            .filter(|order| normalize_reference(&order.id.0).starts_with(&prefix))
            .cloned()
            .collect::<Vec<_>>();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matches.truncate(5);
        Ok(matches)
    }

    async fn list_recent_for_customer(
        &self,
        customer_id: &CustomerId,
        limit: u32,
    ) -> Result<Vec<Order>, RepositoryError> {
        let state = self.state.read().await;
        let mut orders = state
            .orders
            .iter()
            .filter(|order| order.customer_id == *customer_id)
            .cloned()
            .collect::<Vec<_>>();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        orders.truncate(limit as usize);
        Ok(orders)
    }

    async fn finalize(
        &self,
        order: &Order,
        conversation: &Conversation,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if state.order_index(&order.id).is_some() {
            return Err(RepositoryError::Conflict(format!("order {} already exists", order.id.0)));
        }
        state.write_conversation(conversation)?;
        state.orders.push(order.clone());
        Ok(())
    }

    async fn settle_payment(
        &self,
        order: &Order,
        conversation: &Conversation,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let index = state
            .order_index(&order.id)
            .filter(|index| {
                let stored = &state.orders[*index];
                stored.status == OrderStatus::Pending
                    && stored.payment_status == PaymentStatus::Unpaid
            })
            .ok_or_else(|| {
                RepositoryError::Conflict(format!(
                    "order {} is no longer awaiting payment",
                    order.id.0
                ))
            })?;
        if !state.conversations.contains_key(&conversation.id.0) {
            return Err(RepositoryError::Conflict(format!(
                "conversation {} does not exist",
                conversation.id.0
            )));
        }
        let customer = state
            .customers
            .iter_mut()
            .find(|customer| customer.id == order.customer_id)
            .ok_or_else(|| {
                RepositoryError::Conflict(format!("customer {} does not exist", order.customer_id.0))
            })?;

        customer.record_paid_order(order.total_amount);
        let stored = &mut state.orders[index];
        stored.status = order.status;
        stored.payment_status = order.payment_status;
        stored.updated_at = order.updated_at;
        state.write_conversation(conversation)
    }

    async fn cancel(
        &self,
        order: &Order,
        conversation: &Conversation,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let index = state
            .order_index(&order.id)
            .filter(|index| state.orders[*index].status == OrderStatus::Pending)
            .ok_or_else(|| {
                RepositoryError::Conflict(format!("order {} is no longer pending", order.id.0))
            })?;
        state.write_conversation(conversation)?;

        let stored = &mut state.orders[index];
        stored.status = OrderStatus::Cancelled;
        stored.updated_at = order.updated_at;
        Ok(())
    }
}
