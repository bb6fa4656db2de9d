use crate::domain::conversation::ConversationState;
use crate::domain::order::{DeliveryMethod, OrderId, PaymentMethod};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlowEvent {
    ItemsRecognized,
    ItemRemoved,
    CartViewed,
    CheckoutRequested,
    DeliveryMethodChosen(DeliveryMethod),
    ContactDetailsProvided(String),
    /// The order id is allocated by the caller so the next state can reference it.
    PaymentMethodChosen { method: PaymentMethod, order_id: OrderId },
    ReceiptAccepted,
    ReceiptRejected,
    CancelRequested,
    TrackRequested,
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct FlowContext {
    pub cart_is_empty: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlowAction {
    MergeCart,
    UpdateCart,
    ShowCart,
    ReplyCartEmpty,
    PromptDeliveryMethod,
    PromptContactDetails,
    PromptPaymentMethod,
    /// Persist the order and clear the cart as one unit.
    FinalizeOrder,
    SendPaymentLink,
    SendBankDetails,
    ConfirmCashOnDelivery,
    MarkOrderPaid,
    RequestClearerReceipt,
    CancelPendingOrder,
    ClearCart,
    LookupOrder,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub from: ConversationState,
    pub to: ConversationState,
    pub event: FlowEvent,
    pub actions: Vec<FlowAction>,
}

impl TransitionOutcome {
    pub fn has(&self, action: &FlowAction) -> bool {
        self.actions.contains(action)
    }
}
