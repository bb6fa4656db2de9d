//! Tool calls from a phone voice assistant.
//!
//! The assistant talks to the caller and calls back with `tool-calls`
//! events. Each call is answered with a JSON string the assistant reads
//! back: the catalog, the caller's latest order, or an order started in
//! the caller's WhatsApp cart.

use std::sync::Arc;

use kiosk_core::channel::Channel;
use kiosk_core::domain::business::{Business, BusinessId};
use kiosk_core::domain::order::Order;
use kiosk_db::repositories::{Repositories, RepositoryError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::oracle::OrderedItem;
use crate::runtime::{ConversationEngine, StagedCart};

pub const ORDER_INITIATED: &str = "Order initiated. Please confirm via WhatsApp.";
pub const NO_ORDER_FOR_NUMBER: &str = "No order found for this number.";

#[derive(Clone, Debug, Default, Deserialize)]
pub struct VoiceWebhook {
    #[serde(default)]
    pub message: Option<VoiceEvent>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub function: ToolFunction,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ToolFunction {
    pub name: String,
    /// Either a JSON object or a string holding one.
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub tool_call_id: String,
    pub result: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum VoiceReply {
    Results { results: Vec<ToolResult> },
    Ack { ok: bool },
}

#[derive(Debug, Default, Deserialize)]
struct OrderStatusArgs {
    phone_number: Option<String>,
    reference: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PlaceOrderArgs {
    phone_number: Option<String>,
    #[serde(default)]
    items: Vec<OrderedItem>,
}

pub struct VoiceDesk {
    repos: Repositories,
    engine: Arc<ConversationEngine>,
    single_tenant_fallback: bool,
    default_country_code: Option<String>,
}

impl VoiceDesk {
    pub fn new(
        repos: Repositories,
        engine: Arc<ConversationEngine>,
        single_tenant_fallback: bool,
        default_country_code: Option<String>,
    ) -> Self {
        Self { repos, engine, single_tenant_fallback, default_country_code }
    }

    /// Answers every tool call in the event. Other event types are acknowledged.
    pub async fn handle(&self, business_hint: Option<&str>, webhook: VoiceWebhook) -> VoiceReply {
        let Some(event) = webhook.message.filter(|event| event.kind == "tool-calls") else {
            return VoiceReply::Ack { ok: true };
        };

        let business = match self.resolve_business(business_hint).await {
            Ok(business) => business,
            Err(error) => {
                warn!(
                    event_name = "voice.business.lookup_failed",
                    correlation_id = "voice",
                    error = %error,
                    "business lookup failed"
                );
                None
            }
        };

        let mut results = Vec::with_capacity(event.tool_calls.len());
        for call in event.tool_calls {
            let result = match &business {
                Some(business) => self.run_tool(business, &call).await,
                None => json!({ "error": "No store is linked to this voice line." }),
            };
            info!(
                event_name = "voice.tool.handled",
                correlation_id = %call.id,
                tool = %call.function.name,
                failed = result.get("error").is_some(),
                "voice tool call answered"
            );
            results.push(ToolResult { tool_call_id: call.id, result: result.to_string() });
        }
        VoiceReply::Results { results }
    }

    async fn resolve_business(&self, hint: Option<&str>) -> Result<Option<Business>, RepositoryError> {
        if let Some(id) = hint.map(str::trim).filter(|id| !id.is_empty()) {
            return self.repos.businesses.find_by_id(&BusinessId(id.to_owned())).await;
        }
        if !self.single_tenant_fallback {
            return Ok(None);
        }
        let mut businesses = self.repos.businesses.list(2).await?;
        Ok(if businesses.len() == 1 { businesses.pop() } else { None })
    }

    async fn run_tool(&self, business: &Business, call: &ToolCall) -> Value {
        let outcome = match call.function.name.as_str() {
            "get_catalog" => self.catalog(business).await,
            "check_order_status" => match arguments::<OrderStatusArgs>(&call.function.arguments) {
                Ok(args) => self.order_status(business, args).await,
                Err(error) => return invalid_arguments(&error),
            },
            "place_order" => match arguments::<PlaceOrderArgs>(&call.function.arguments) {
                Ok(args) => self.place_order(business, args, &call.id).await,
                Err(error) => return invalid_arguments(&error),
            },
            other => return json!({ "error": format!("Unknown tool `{other}`.") }),
        };
        outcome.unwrap_or_else(|error| {
            warn!(
                event_name = "voice.tool.failed",
                correlation_id = %call.id,
                tool = %call.function.name,
                error = %error,
                "voice tool call failed"
            );
            json!({ "error": "Lookup failed. Please try again." })
        })
    }

    async fn catalog(&self, business: &Business) -> Result<Value, String> {
        let products =
            self.repos.products.list_active(&business.id).await.map_err(|e| e.to_string())?;
        let products = products
            .iter()
            .map(|product| {
                json!({
                    "name": product.name,
                    "price": product.price.to_string(),
                    "unit": product.unit,
                    "description": product.description,
                })
            })
            .collect::<Vec<_>>();
        Ok(json!({ "products": products }))
    }

    async fn order_status(&self, business: &Business, args: OrderStatusArgs) -> Result<Value, String> {
        let Some(phone) = args.phone_number.as_deref().and_then(|raw| self.caller_id(raw)) else {
            return Ok(json!({ "error": "A phone number is required." }));
        };
        let customers =
            self.repos.customers.list_by_channel_user(&phone).await.map_err(|e| e.to_string())?;
        let Some(customer) = customers.into_iter().find(|customer| customer.business_id == business.id)
        else {
            return Ok(json!({ "error": NO_ORDER_FOR_NUMBER }));
        };

        let orders = match args.reference.as_deref().filter(|reference| !reference.trim().is_empty()) {
            Some(reference) => self
                .repos
                .orders
                .find_by_reference(&business.id, &customer.id, reference)
                .await
                .map_err(|e| e.to_string())?,
            None => self
                .repos
                .orders
                .list_recent_for_customer(&customer.id, 1)
                .await
                .map_err(|e| e.to_string())?,
        };
        Ok(match orders.first() {
            Some(order) => json!({ "order": order_summary(order) }),
            None => json!({ "error": NO_ORDER_FOR_NUMBER }),
        })
    }

    async fn place_order(
        &self,
        business: &Business,
        args: PlaceOrderArgs,
        correlation_id: &str,
    ) -> Result<Value, String> {
        let Some(phone) = args.phone_number.as_deref().and_then(|raw| self.caller_id(raw)) else {
            return Ok(json!({ "success": false, "error": "A phone number is required." }));
        };
        if args.items.is_empty() {
            return Ok(json!({ "success": false, "error": "Tell me which items to order." }));
        }

        let staged = self
            .engine
            .stage_items(business, Channel::WhatsApp, &phone, &args.items, correlation_id)
            .await
            .map_err(|e| e.to_string())?;
        Ok(match staged {
            StagedCart::Added { summary } => {
                json!({ "success": true, "message": ORDER_INITIATED, "cart": summary })
            }
            StagedCart::NothingMatched => json!({
                "success": false,
                "error": "None of those items are in our catalog.",
            }),
            StagedCart::CheckoutInProgress => json!({
                "success": false,
                "error": "A checkout is already in progress on WhatsApp. Finish or cancel it there first.",
            }),
        })
    }

    /// WhatsApp sender id for a spoken or typed phone number.
    fn caller_id(&self, raw: &str) -> Option<String> {
        normalize_phone(raw, self.default_country_code.as_deref())
    }
}

/// Digits only, with a leading trunk `0` replaced by the country code.
pub fn normalize_phone(raw: &str, default_country_code: Option<&str>) -> Option<String> {
    let digits = raw.chars().filter(char::is_ascii_digit).collect::<String>();
    if digits.is_empty() {
        return None;
    }
    match (digits.strip_prefix('0'), default_country_code) {
        (Some(national), Some(code)) => Some(format!("{code}{national}")),
        _ => Some(digits),
    }
}

fn order_summary(order: &Order) -> Value {
    json!({
        "reference": order.short_ref(),
        "status": order.status.as_str(),
        "payment_status": order.payment_status.as_str(),
        "total": order.total_amount.to_string(),
        "created_at": order.created_at.to_rfc3339(),
    })
}

fn arguments<T>(raw: &Value) -> Result<T, serde_json::Error>
where
    T: DeserializeOwned + Default,
{
    match raw {
        Value::Null => Ok(T::default()),
        Value::String(text) if text.trim().is_empty() => Ok(T::default()),
        Value::String(text) => serde_json::from_str(text),
        other => serde_json::from_value(other.clone()),
    }
}

fn invalid_arguments(error: &serde_json::Error) -> Value {
    json!({ "error": format!("Invalid tool arguments: {error}") })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use kiosk_core::channel::{Channel, ChannelRegistry};
    use kiosk_core::domain::business::{Business, BusinessId, PaymentSettings};
    use kiosk_core::domain::conversation::ConversationState;
    use kiosk_core::domain::product::{Product, ProductId};
    use kiosk_db::Repositories;
    use rust_decimal::Decimal;
    use serde_json::{json, Value};

    use super::{normalize_phone, VoiceDesk, VoiceReply, VoiceWebhook, NO_ORDER_FOR_NUMBER, ORDER_INITIATED};
    use crate::oracle::BoundedOracle;
    use crate::runtime::ConversationEngine;

    async fn desk() -> (VoiceDesk, Repositories) {
        let repos = Repositories::in_memory();
        repos
            .businesses
            .save(Business {
                id: BusinessId("mama".to_owned()),
                name: "Mama's Store".to_owned(),
                payment: PaymentSettings::default(),
                created_at: Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).single().expect("date"),
            })
            .await
            .expect("business");
        repos
            .products
            .save(Product {
                id: ProductId("mama-sugar".to_owned()),
                business_id: BusinessId("mama".to_owned()),
                name: "Sugar 1kg".to_owned(),
                description: Some("Fine white sugar".to_owned()),
                price: Decimal::new(350, 0),
                unit: Some("bag".to_owned()),
                stock_quantity: None,
                image_url: None,
                active: true,
            })
            .await
            .expect("product");

        let engine = ConversationEngine::new(
            repos.clone(),
            ChannelRegistry::default(),
            BoundedOracle::disabled(),
            true,
        );
        let desk = VoiceDesk::new(repos.clone(), Arc::new(engine), true, Some("94".to_owned()));
        (desk, repos)
    }

    fn tool_calls(calls: Value) -> VoiceWebhook {
        serde_json::from_value(json!({ "message": { "type": "tool-calls", "toolCalls": calls } }))
            .expect("webhook")
    }

    fn results(reply: VoiceReply) -> Vec<(String, Value)> {
        let VoiceReply::Results { results } = reply else {
            panic!("expected tool results");
        };
        results
            .into_iter()
            .map(|result| {
                (result.tool_call_id, serde_json::from_str(&result.result).expect("result json"))
            })
            .collect()
    }

    #[test]
    fn phone_numbers_are_normalized_to_sender_ids() {
        assert_eq!(normalize_phone("077 123 4567", Some("94")).as_deref(), Some("94771234567"));
        assert_eq!(normalize_phone("+94 77 123 4567", Some("94")).as_deref(), Some("94771234567"));
        assert_eq!(normalize_phone("0771234567", None).as_deref(), Some("0771234567"));
        assert_eq!(normalize_phone("call me", Some("94")), None);
    }

    #[tokio::test]
    async fn catalog_tool_lists_active_products() {
        let (desk, _) = desk().await;

        let reply = desk
            .handle(None, tool_calls(json!([{ "id": "call-1", "function": { "name": "get_catalog", "arguments": "{}" } }])))
            .await;

        let results = results(reply);
        assert_eq!(results[0].0, "call-1");
        assert_eq!(results[0].1["products"][0]["name"], "Sugar 1kg");
        assert_eq!(results[0].1["products"][0]["price"], "350");
    }

    #[tokio::test]
    async fn place_order_stages_the_whatsapp_cart_and_status_finds_nothing_yet() {
        let (desk, repos) = desk().await;

        let reply = desk
            .handle(
                Some("mama"),
                tool_calls(json!([
                    { "id": "call-1", "function": { "name": "place_order", "arguments":
                        { "phone_number": "077 123 4567", "items": [{ "product_name": "sugar 1kg", "quantity": 2 }] } } },
                    { "id": "call-2", "function": { "name": "check_order_status", "arguments":
                        "{\"phone_number\": \"0771234567\"}" } }
                ])),
            )
            .await;

        let results = results(reply);
        assert_eq!(results[0].1["success"], true);
        assert_eq!(results[0].1["message"], ORDER_INITIATED);
        assert_eq!(results[1].1["error"], NO_ORDER_FOR_NUMBER);

        let customer = repos
            .customers
            .list_by_channel_user("94771234567")
            .await
            .expect("customers")
            .remove(0);
        let conversation = repos
            .conversations
            .find_active(&customer.business_id, &customer.id, Channel::WhatsApp)
            .await
            .expect("lookup")
            .expect("conversation");
        assert_eq!(conversation.state(), &ConversationState::CartBuilding);
        assert_eq!(conversation.cart().items()[0].quantity, 2);
    }

    #[tokio::test]
    async fn unknown_tools_and_bad_arguments_are_reported_per_call() {
        let (desk, _) = desk().await;

        let reply = desk
            .handle(
                None,
                tool_calls(json!([
                    { "id": "a", "function": { "name": "refund", "arguments": {} } },
                    { "id": "b", "function": { "name": "place_order", "arguments": "{not json" } },
                    { "id": "c", "function": { "name": "place_order", "arguments":
                        { "phone_number": "0771234567", "items": [{ "product_name": "Caviar" }] } } }
                ])),
            )
            .await;

        let results = results(reply);
        assert!(results[0].1["error"].as_str().is_some_and(|error| error.contains("refund")));
        assert!(results[1].1["error"].as_str().is_some_and(|error| error.starts_with("Invalid tool arguments")));
        assert_eq!(results[2].1["success"], false);
    }

    #[tokio::test]
    async fn unknown_business_and_other_events_are_handled() {
        let (desk, _) = desk().await;

        let reply = desk
            .handle(
                Some("papa"),
                tool_calls(json!([{ "id": "a", "function": { "name": "get_catalog" } }])),
            )
            .await;
        assert!(results(reply)[0].1["error"].is_string());

        let reply = desk.handle(None, VoiceWebhook::default()).await;
        assert_eq!(reply, VoiceReply::Ack { ok: true });
    }
}
