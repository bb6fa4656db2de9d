use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::business::BusinessId;
use crate::domain::cart::Cart;
use crate::domain::conversation::ConversationId;
use crate::domain::customer::CustomerId;
use crate::domain::product::ProductId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl OrderId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Short customer-facing reference; `track` resolves it as an id prefix.
    pub fn short_ref(&self) -> String {
        self.0.chars().filter(|c| *c != '-').take(8).collect::<String>().to_uppercase()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Fulfilled,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Fulfilled => "fulfilled",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "fulfilled" => Some(Self::Fulfilled),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::Paid => "paid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "unpaid" => Some(Self::Unpaid),
            "paid" => Some(Self::Paid),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    Delivery,
    Pickup,
}

impl DeliveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivery => "delivery",
            Self::Pickup => "pickup",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "delivery" => Some(Self::Delivery),
            "pickup" => Some(Self::Pickup),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Delivery => "Delivery",
            Self::Pickup => "Pickup",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    BankTransfer,
    CashOnDelivery,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::BankTransfer => "bank_transfer",
            Self::CashOnDelivery => "cash_on_delivery",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "card" => Some(Self::Card),
            "bank_transfer" => Some(Self::BankTransfer),
            "cash_on_delivery" => Some(Self::CashOnDelivery),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Card => "Card",
            Self::BankTransfer => "Bank Transfer",
            Self::CashOnDelivery => "Cash on Delivery",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub business_id: BusinessId,
    pub customer_id: CustomerId,
    pub conversation_id: Option<ConversationId>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub delivery_method: DeliveryMethod,
    pub contact_details: String,
    pub notes: String,
    pub total_amount: Decimal,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Inputs collected by the checkout flow before an order can be placed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Checkout<'a> {
    pub order_id: OrderId,
    pub business_id: BusinessId,
    pub customer_id: CustomerId,
    pub conversation_id: ConversationId,
    pub cart: &'a Cart,
    pub delivery_method: DeliveryMethod,
    pub contact_details: String,
    pub payment_method: PaymentMethod,
}

impl Order {
    /// Snapshots the cart into a pending, unpaid order.
    pub fn place(checkout: Checkout<'_>) -> Result<Self, DomainError> {
        if checkout.cart.is_empty() {
            return Err(DomainError::InvariantViolation(
                "cannot place an order from an empty cart".to_owned(),
            ));
        }

        let items = checkout
            .cart
            .items()
            .iter()
            .map(|line| OrderItem {
                product_id: line.product_id.clone(),
                product_name: line.product_name.clone(),
                quantity: line.quantity,
                unit_price: line.unit_price,
                total_price: line.line_total(),
            })
            .collect::<Vec<_>>();
        let total_amount = items.iter().map(|item| item.total_price).sum();
        let now = Utc::now();

        Ok(Self {
            id: checkout.order_id,
            business_id: checkout.business_id,
            customer_id: checkout.customer_id,
            conversation_id: Some(checkout.conversation_id),
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            payment_method: checkout.payment_method,
            delivery_method: checkout.delivery_method,
            contact_details: checkout.contact_details,
            notes: format!(
                "Method: {}, Pay: {}",
                checkout.delivery_method.label(),
                checkout.payment_method.label()
            ),
            total_amount,
            items,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn short_ref(&self) -> String {
        self.id.short_ref()
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self.status, next),
            (OrderStatus::Pending, OrderStatus::Confirmed)
                | (OrderStatus::Pending, OrderStatus::Cancelled)
                | (OrderStatus::Confirmed, OrderStatus::Fulfilled)
                | (OrderStatus::Confirmed, OrderStatus::Cancelled)
        )
    }

    pub fn transition_to(&mut self, next: OrderStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            self.updated_at = Utc::now();
            return Ok(());
        }

        Err(DomainError::InvalidOrderTransition { from: self.status, to: next })
    }

    /// Records verified payment evidence: pending/unpaid becomes confirmed/paid.
    pub fn confirm_payment(&mut self) -> Result<(), DomainError> {
        if self.payment_status == PaymentStatus::Paid {
            return Err(DomainError::InvariantViolation(format!(
                "order {} is already paid",
                self.id.0
            )));
        }
        self.transition_to(OrderStatus::Confirmed)?;
        self.payment_status = PaymentStatus::Paid;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{
        Checkout, DeliveryMethod, Order, OrderId, OrderStatus, PaymentMethod, PaymentStatus,
    };
    use crate::domain::business::BusinessId;
    use crate::domain::cart::{Cart, ItemMatch};
    use crate::domain::conversation::ConversationId;
    use crate::domain::customer::CustomerId;
    use crate::domain::product::{Product, ProductId};
    use crate::errors::DomainError;

    fn product(id: &str, price: i64) -> Product {
        Product {
            id: ProductId(id.to_owned()),
            business_id: BusinessId("biz-1".to_owned()),
            name: id.to_owned(),
            description: None,
            price: Decimal::new(price, 0),
            unit: None,
            stock_quantity: None,
            image_url: None,
            active: true,
        }
    }

    fn place(cart: &Cart, payment_method: PaymentMethod) -> Result<Order, DomainError> {
        Order::place(Checkout {
            order_id: OrderId("0f8c2a1e-7b44-4c55-9d1a-2b3c4d5e6f70".to_owned()),
            business_id: BusinessId("biz-1".to_owned()),
            customer_id: CustomerId("cust-1".to_owned()),
            conversation_id: ConversationId("conv-1".to_owned()),
            cart,
            delivery_method: DeliveryMethod::Delivery,
            contact_details: "12 Market Road, 0801".to_owned(),
            payment_method,
        })
    }

    #[test]
    fn placed_order_snapshots_cart_and_totals() {
        let mut cart = Cart::default();
        cart.add_items(&[
            ItemMatch { product: product("sugar", 350), quantity: 2 },
            ItemMatch { product: product("salt", 120), quantity: 1 },
        ]);

        let order = place(&cart, PaymentMethod::BankTransfer).expect("order");

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.payment_status, PaymentStatus::Unpaid);
        assert_eq!(order.items.len(), 2);
        assert_eq!(order.total_amount, Decimal::new(820, 0));
        let item_sum: Decimal = order
            .items
            .iter()
            .map(|item| item.unit_price * Decimal::from(item.quantity))
            .sum();
        assert_eq!(order.total_amount, item_sum);
        assert_eq!(order.notes, "Method: Delivery, Pay: Bank Transfer");
    }

    #[test]
    fn empty_cart_cannot_be_placed() {
        let error = place(&Cart::default(), PaymentMethod::Card).expect_err("empty cart");
        assert!(matches!(error, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn payment_confirmation_moves_pending_to_confirmed_and_paid() {
        let mut cart = Cart::default();
        cart.add_items(&[ItemMatch { product: product("sugar", 350), quantity: 1 }]);
        let mut order = place(&cart, PaymentMethod::BankTransfer).expect("order");

        order.confirm_payment().expect("confirm");
        assert_eq!(order.status, OrderStatus::Confirmed);
        assert_eq!(order.payment_status, PaymentStatus::Paid);

        assert!(order.confirm_payment().is_err());
    }

    #[test]
    fn cancelled_order_cannot_be_confirmed() {
        let mut cart = Cart::default();
        cart.add_items(&[ItemMatch { product: product("sugar", 350), quantity: 1 }]);
        let mut order = place(&cart, PaymentMethod::BankTransfer).expect("order");

        order.transition_to(OrderStatus::Cancelled).expect("pending -> cancelled");
        let error = order.confirm_payment().expect_err("cancelled -> confirmed");
        assert!(matches!(error, DomainError::InvalidOrderTransition { .. }));
    }

    #[test]
    fn short_ref_is_an_uppercase_id_prefix() {
        let id = OrderId("0f8c2a1e-7b44-4c55-9d1a-2b3c4d5e6f70".to_owned());
        assert_eq!(id.short_ref(), "0F8C2A1E");
    }
}
