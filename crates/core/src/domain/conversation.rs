use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::channel::Channel;
use crate::domain::business::BusinessId;
use crate::domain::cart::{Cart, CartItem};
use crate::domain::customer::CustomerId;
use crate::domain::order::{DeliveryMethod, OrderId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Closed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Dialogue position. Each variant carries exactly the checkout fields that
/// are meaningful in that position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConversationState {
    Browsing,
    CartBuilding,
    CheckoutMethod,
    CheckoutAddress { delivery_method: DeliveryMethod },
    CheckoutPayment { delivery_method: DeliveryMethod, contact_details: String },
    AwaitingReceipt { order_id: OrderId },
}

impl ConversationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Browsing => "browsing",
            Self::CartBuilding => "cart_building",
            Self::CheckoutMethod => "checkout_method",
            Self::CheckoutAddress { .. } => "checkout_address",
            Self::CheckoutPayment { .. } => "checkout_payment",
            Self::AwaitingReceipt { .. } => "awaiting_receipt",
        }
    }

    /// `browsing` and `cart_building` accept the same catalog and cart commands.
    pub fn is_shopping(&self) -> bool {
        matches!(self, Self::Browsing | Self::CartBuilding)
    }

    pub fn pending_order(&self) -> Option<&OrderId> {
        match self {
            Self::AwaitingReceipt { order_id } => Some(order_id),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("conversation metadata is not a JSON object")]
    NotAnObject,
    #[error("conversation metadata is malformed: {0}")]
    Malformed(String),
    #[error("unknown conversation state `{0}`")]
    UnknownState(String),
    #[error("state `{state}` requires field `{field}`")]
    MissingField { state: &'static str, field: &'static str },
}

/// Typed view of the persisted conversation metadata record.
///
/// Keys this engine does not own are carried in `extra` and written back
/// untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationMetadata {
    pub state: ConversationState,
    pub cart: Cart,
    pub needs_assistance: bool,
    extra: Map<String, Value>,
}

impl Default for ConversationMetadata {
    fn default() -> Self {
        Self {
            state: ConversationState::Browsing,
            cart: Cart::default(),
            needs_assistance: false,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    state: Option<String>,
    #[serde(default)]
    cart: Vec<CartItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delivery_method: Option<DeliveryMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    contact_details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current_order_id: Option<OrderId>,
    #[serde(default)]
    needs_assistance: bool,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl ConversationMetadata {
    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    /// Strict decode: the state tag must be known and carry its fields.
    pub fn from_json(value: &Value) -> Result<Self, MetadataError> {
        let stored = decode_stored(value)?;
        let state = match stored.state.as_deref().unwrap_or("browsing") {
            "browsing" => ConversationState::Browsing,
            "cart_building" => ConversationState::CartBuilding,
            "checkout_method" => ConversationState::CheckoutMethod,
            "checkout_address" => ConversationState::CheckoutAddress {
                delivery_method: stored.delivery_method.ok_or(MetadataError::MissingField {
                    state: "checkout_address",
                    field: "deliveryMethod",
                })?,
            },
            "checkout_payment" => ConversationState::CheckoutPayment {
                delivery_method: stored.delivery_method.ok_or(MetadataError::MissingField {
                    state: "checkout_payment",
                    field: "deliveryMethod",
                })?,
                contact_details: stored.contact_details.clone().ok_or(
                    MetadataError::MissingField {
                        state: "checkout_payment",
                        field: "contactDetails",
                    },
                )?,
            },
            "awaiting_receipt" => ConversationState::AwaitingReceipt {
                order_id: stored.current_order_id.clone().ok_or(MetadataError::MissingField {
                    state: "awaiting_receipt",
                    field: "currentOrderId",
                })?,
            },
            other => return Err(MetadataError::UnknownState(other.to_owned())),
        };

        Ok(Self {
            state,
            cart: Cart::from_items(stored.cart),
            needs_assistance: stored.needs_assistance,
            extra: stored.extra,
        })
    }

    /// Lenient decode used when strict decoding fails: keeps the cart and
    /// unknown keys when they parse, and restarts the dialogue at `browsing`.
    pub fn recover(value: &Value) -> Self {
        let stored = decode_stored(value).unwrap_or_default();
        Self {
            state: ConversationState::Browsing,
            cart: Cart::from_items(stored.cart),
            needs_assistance: stored.needs_assistance,
            extra: stored.extra,
        }
    }

    pub fn to_json(&self) -> Value {
        let (delivery_method, contact_details, current_order_id) = match &self.state {
            ConversationState::CheckoutAddress { delivery_method } => {
                (Some(*delivery_method), None, None)
            }
            ConversationState::CheckoutPayment { delivery_method, contact_details } => {
                (Some(*delivery_method), Some(contact_details.clone()), None)
            }
            ConversationState::AwaitingReceipt { order_id } => (None, None, Some(order_id.clone())),
            _ => (None, None, None),
        };
        let stored = StoredMetadata {
            state: Some(self.state.as_str().to_owned()),
            cart: self.cart.items().to_vec(),
            delivery_method,
            contact_details,
            current_order_id,
            needs_assistance: self.needs_assistance,
            extra: self.extra.clone(),
        };

        serde_json::to_value(stored).unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

fn decode_stored(value: &Value) -> Result<StoredMetadata, MetadataError> {
    match value {
        Value::Null => Ok(StoredMetadata::default()),
        Value::Object(_) => serde_json::from_value(value.clone())
            .map_err(|error| MetadataError::Malformed(error.to_string())),
        _ => Err(MetadataError::NotAnObject),
    }
}

/// The persistent session for one (business, customer, channel) triple.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub business_id: BusinessId,
    pub customer_id: CustomerId,
    pub channel: Channel,
    pub status: ConversationStatus,
    pub metadata: ConversationMetadata,
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn open(business_id: BusinessId, customer_id: CustomerId, channel: Channel) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::generate(),
            business_id,
            customer_id,
            channel,
            status: ConversationStatus::Active,
            metadata: ConversationMetadata::default(),
            last_message_at: now,
            created_at: now,
        }
    }

    pub fn state(&self) -> &ConversationState {
        &self.metadata.state
    }

    pub fn cart(&self) -> &Cart {
        &self.metadata.cart
    }
}
