use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use kiosk_core::channel::Channel;
use kiosk_core::domain::business::BusinessId;
use kiosk_core::domain::customer::CustomerId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub business_id: BusinessId,
    pub customer_id: CustomerId,
    pub channel: Channel,
}

/// Serializes conversation read-modify-write cycles per
/// (business, customer, channel). Different keys never contend.
#[derive(Clone, Default)]
pub struct ConversationLocks {
    slots: Arc<Mutex<HashMap<ConversationKey, Arc<AsyncMutex<()>>>>>,
}

impl ConversationLocks {
    pub async fn acquire(&self, key: ConversationKey) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = match self.slots.lock() {
                Ok(slots) => slots,
                Err(poisoned) => poisoned.into_inner(),
            };
            // Slots nobody holds or waits on can go.
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            slots.entry(key).or_default().clone()
        };
        slot.lock_owned().await
    }

    pub fn len(&self) -> usize {
        match self.slots.lock() {
            Ok(slots) => slots.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
