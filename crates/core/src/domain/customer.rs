use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::business::BusinessId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomerId(pub String);

impl CustomerId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// A customer profile scoped to exactly one business.
///
/// The same real-world sender talking to two businesses owns two `Customer`
/// rows; `channel_user_id` is only unique together with `business_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub business_id: BusinessId,
    pub channel_user_id: String,
    pub display_name: Option<String>,
    pub order_count: u32,
    pub total_spent: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Customer {
    pub fn new(
        business_id: BusinessId,
        channel_user_id: impl Into<String>,
        display_name: Option<String>,
    ) -> Self {
        Self {
            id: CustomerId::generate(),
            business_id,
            channel_user_id: channel_user_id.into(),
            display_name,
            order_count: 0,
            total_spent: Decimal::ZERO,
            created_at: Utc::now(),
        }
    }

    pub fn record_paid_order(&mut self, amount: Decimal) {
        self.order_count = self.order_count.saturating_add(1);
        self.total_spent += amount;
    }
}
