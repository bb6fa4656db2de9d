//! Domain model, checkout flow, channel port, and configuration for the kiosk bot.

pub mod audit;
pub mod channel;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;

pub use channel::{
    Channel, ChannelError, ChannelRegistry, ChannelSender, ImageData, InboundContent,
    InboundMessage, MediaRef, OutboundBody, OutboundMessage,
};
pub use domain::business::{Business, BusinessId, PaymentSettings};
pub use domain::cart::{Cart, CartItem, ItemMatch, RemoveOutcome};
pub use domain::conversation::{
    Conversation, ConversationId, ConversationMetadata, ConversationState, ConversationStatus,
};
pub use domain::customer::{Customer, CustomerId};
pub use domain::message::{DedupKey, Message, MessageKind, SenderType};
pub use domain::order::{
    DeliveryMethod, Order, OrderId, OrderItem, OrderStatus, PaymentMethod, PaymentStatus,
};
pub use domain::product::{Catalog, Product, ProductId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
