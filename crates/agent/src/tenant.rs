use std::sync::Arc;

use async_trait::async_trait;
use kiosk_core::channel::InboundMessage;
use kiosk_core::domain::business::{Business, BusinessId};
use kiosk_db::repositories::{
    BusinessRepository, ConversationRepository, CustomerRepository, RepositoryError,
};
use tracing::debug;

/// How an inbound message was bound to a business.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TenantResolution {
    /// Bound through a deep-link token; the customer gets a one-time acknowledgment.
    Connected(Business),
    /// Bound through the sender's most recent conversation on this channel.
    Returning(Business),
    /// The only business in the system.
    SingleTenant(Business),
    Unresolved,
}

impl TenantResolution {
    pub fn business(&self) -> Option<&Business> {
        match self {
            Self::Connected(business) | Self::Returning(business) | Self::SingleTenant(business) => {
                Some(business)
            }
            Self::Unresolved => None,
        }
    }

    pub fn source(&self) -> &'static str {
        match self {
            Self::Connected(_) => "deep_link",
            Self::Returning(_) => "history",
            Self::SingleTenant(_) => "single_tenant",
            Self::Unresolved => "unresolved",
        }
    }
}

#[async_trait]
pub trait TenantResolver: Send + Sync {
    async fn resolve(&self, inbound: &InboundMessage) -> Result<TenantResolution, RepositoryError>;
}

/// Resolves deep link, then sender history, then the single-tenant default.
/// Never writes.
pub struct DirectoryTenantResolver {
    businesses: Arc<dyn BusinessRepository>,
    customers: Arc<dyn CustomerRepository>,
    conversations: Arc<dyn ConversationRepository>,
    single_tenant_fallback: bool,
}

impl DirectoryTenantResolver {
    pub fn new(
        businesses: Arc<dyn BusinessRepository>,
        customers: Arc<dyn CustomerRepository>,
        conversations: Arc<dyn ConversationRepository>,
        single_tenant_fallback: bool,
    ) -> Self {
        Self { businesses, customers, conversations, single_tenant_fallback }
    }

    async fn from_history(
        &self,
        inbound: &InboundMessage,
    ) -> Result<Option<Business>, RepositoryError> {
        let latest = self
            .conversations
            .latest_business_for_sender(inbound.channel, &inbound.sender_id)
            .await?;
        let business_id = match latest {
            Some(business_id) => Some(business_id),
            None => self
                .customers
                .list_by_channel_user(&inbound.sender_id)
                .await?
                .into_iter()
                .next()
                .map(|customer| customer.business_id),
        };
        match business_id {
            Some(business_id) => self.businesses.find_by_id(&business_id).await,
            None => Ok(None),
        }
    }
}

#[async_trait]
impl TenantResolver for DirectoryTenantResolver {
    async fn resolve(&self, inbound: &InboundMessage) -> Result<TenantResolution, RepositoryError> {
        if let Some(token) = inbound.text().and_then(deep_link_token) {
            match self.businesses.find_by_id(&BusinessId(token.to_owned())).await? {
                Some(business) => return Ok(TenantResolution::Connected(business)),
                None => debug!(
                    event_name = "engine.tenant.unknown_deep_link",
                    correlation_id = %inbound.correlation_id(),
                    token,
                    "deep link names no business"
                ),
            }
        }

        if let Some(business) = self.from_history(inbound).await? {
            return Ok(TenantResolution::Returning(business));
        }

        if self.single_tenant_fallback {
            let mut businesses = self.businesses.list(2).await?;
            if businesses.len() == 1 {
                if let Some(business) = businesses.pop() {
                    return Ok(TenantResolution::SingleTenant(business));
                }
            }
        }

        Ok(TenantResolution::Unresolved)
    }
}

/// Business id of a `/start <business id> ...` message. Only the leading
/// run of ASCII letters, digits and `-` counts; anything after it is ignored.
pub fn deep_link_token(text: &str) -> Option<&str> {
    let mut parts = text.split_whitespace();
    let command = parts.next()?;
    if !command.eq_ignore_ascii_case("/start") {
        return None;
    }
    let word = parts.next()?;
    let end = word
        .find(|character: char| !(character.is_ascii_alphanumeric() || character == '-'))
        .unwrap_or(word.len());
    let token = &word[..end];
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use kiosk_core::channel::{Channel, InboundContent, InboundMessage};
    use kiosk_core::domain::business::{Business, BusinessId, PaymentSettings};
    use kiosk_core::domain::customer::Customer;
    use kiosk_db::Repositories;

    use super::{deep_link_token, DirectoryTenantResolver, TenantResolution, TenantResolver};

    fn business(id: &str, day: u32) -> Business {
        Business {
            id: BusinessId(id.to_owned()),
            name: format!("Store {id}"),
            payment: PaymentSettings::default(),
            created_at: Utc.with_ymd_and_hms(2026, 1, day, 8, 0, 0).single().expect("date"),
        }
    }

    fn inbound(channel: Channel, sender: &str, text: &str) -> InboundMessage {
        InboundMessage {
            channel,
            sender_id: sender.to_owned(),
            reply_to: sender.to_owned(),
            display_name: None,
            dedup_key: None,
            business_address: None,
            content: InboundContent::Text(text.to_owned()),
            received_at: Utc::now(),
        }
    }

    fn resolver(repos: &Repositories, fallback: bool) -> DirectoryTenantResolver {
        DirectoryTenantResolver::new(
            repos.businesses.clone(),
            repos.customers.clone(),
            repos.conversations.clone(),
            fallback,
        )
    }

    fn id(resolution: &TenantResolution) -> Option<&str> {
        resolution.business().map(|business| business.id.0.as_str())
    }

    #[test]
    fn deep_link_takes_the_leading_business_id() {
        assert_eq!(deep_link_token("/start store-b"), Some("store-b"));
        assert_eq!(deep_link_token("/START store-b"), Some("store-b"));
        assert_eq!(deep_link_token("/start store-b please"), Some("store-b"));
        assert_eq!(deep_link_token("/start store-b!"), Some("store-b"));
        assert_eq!(deep_link_token("/start"), None);
        assert_eq!(deep_link_token("/start !store"), None);
        assert_eq!(deep_link_token("start store-b"), None);
    }

    #[tokio::test]
    async fn deep_link_wins_over_history() {
        let repos = Repositories::in_memory();
        repos.businesses.save(business("store-a", 1)).await.expect("save");
        repos.businesses.save(business("store-b", 2)).await.expect("save");
        let customer = repos
            .customers
            .find_or_create(Customer::new(BusinessId("store-a".to_owned()), "telegram:7", None))
            .await
            .expect("customer");
        repos
            .conversations
            .find_or_open(&customer.business_id, &customer.id, Channel::Telegram)
            .await
            .expect("conversation");

        let resolver = resolver(&repos, true);
        let linked =
            resolver.resolve(&inbound(Channel::Telegram, "telegram:7", "/start store-b")).await.expect("resolve");
        assert!(matches!(linked, TenantResolution::Connected(_)));
        assert_eq!(id(&linked), Some("store-b"));

        let returning =
            resolver.resolve(&inbound(Channel::Telegram, "telegram:7", "hello")).await.expect("resolve");
        assert_eq!(returning.source(), "history");
        assert_eq!(id(&returning), Some("store-a"));

        let unknown_link = resolver
            .resolve(&inbound(Channel::Telegram, "telegram:7", "/start nowhere"))
            .await
            .expect("resolve");
        assert_eq!(id(&unknown_link), Some("store-a"));
    }

    #[tokio::test]
    async fn single_business_is_the_default_only_when_enabled() {
        let repos = Repositories::in_memory();
        repos.businesses.save(business("only", 1)).await.expect("save");

        let message = inbound(Channel::WhatsApp, "2348000000001", "hi");
        let resolved = resolver(&repos, true).resolve(&message).await.expect("resolve");
        assert!(matches!(resolved, TenantResolution::SingleTenant(_)));

        let refused = resolver(&repos, false).resolve(&message).await.expect("resolve");
        assert_eq!(refused, TenantResolution::Unresolved);
    }

    #[tokio::test]
    async fn ambiguous_sender_is_unresolved_and_nothing_is_written() {
        let repos = Repositories::in_memory();
        repos.businesses.save(business("store-a", 1)).await.expect("save");
        repos.businesses.save(business("store-b", 2)).await.expect("save");

        let resolution = resolver(&repos, true)
            .resolve(&inbound(Channel::WhatsApp, "2348000000002", "hi"))
            .await
            .expect("resolve");

        assert_eq!(resolution, TenantResolution::Unresolved);
        assert!(repos.customers.list_by_channel_user("2348000000002").await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn profile_without_conversation_on_this_channel_still_resolves() {
        let repos = Repositories::in_memory();
        repos.businesses.save(business("store-a", 1)).await.expect("save");
        repos.businesses.save(business("store-b", 2)).await.expect("save");
        repos
            .customers
            .find_or_create(Customer::new(BusinessId("store-b".to_owned()), "2348000000003", None))
            .await
            .expect("customer");

        let resolution = resolver(&repos, true)
            .resolve(&inbound(Channel::WhatsApp, "2348000000003", "hello"))
            .await
            .expect("resolve");
        assert_eq!(id(&resolution), Some("store-b"));
    }
}
