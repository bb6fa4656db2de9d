use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::conversation::ConversationState;
use crate::domain::order::PaymentMethod;
use crate::flows::states::{FlowAction, FlowContext, FlowEvent, TransitionOutcome};

pub trait FlowDefinition {
    fn initial_state(&self) -> ConversationState;
    fn transition(
        &self,
        current: &ConversationState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// Cart building, checkout, and receipt reconciliation.
#[derive(Clone, Debug, Default)]
pub struct CheckoutFlow;

impl FlowDefinition for CheckoutFlow {
    fn initial_state(&self) -> ConversationState {
        ConversationState::Browsing
    }

    fn transition(
        &self,
        current: &ConversationState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_checkout(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> ConversationState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &ConversationState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &ConversationState,
        event: &FlowEvent,
        context: &FlowContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit.conversation_id.clone(),
                        audit.correlation_id.clone(),
                        "flow.transition_applied",
                        AuditCategory::Flow,
                        audit.actor.clone(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", outcome.from.as_str())
                    .with_metadata("to", outcome.to.as_str())
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit.conversation_id.clone(),
                        audit.correlation_id.clone(),
                        "flow.transition_rejected",
                        AuditCategory::Flow,
                        audit.actor.clone(),
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<CheckoutFlow> {
    fn default() -> Self {
        Self::new(CheckoutFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("cart is empty in state {state}")]
    EmptyCart { state: &'static str },
    #[error("contact details must not be blank")]
    BlankContactDetails,
    #[error("invalid transition from {state} using event {event:?}")]
    InvalidTransition { state: &'static str, event: FlowEvent },
}

fn transition_checkout(
    current: &ConversationState,
    event: &FlowEvent,
    context: &FlowContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use ConversationState::{
        AwaitingReceipt, Browsing, CartBuilding, CheckoutAddress, CheckoutMethod, CheckoutPayment,
    };
    use FlowAction::{
        CancelPendingOrder, ClearCart, ConfirmCashOnDelivery, FinalizeOrder, LookupOrder,
        MarkOrderPaid, MergeCart, PromptContactDetails, PromptDeliveryMethod, PromptPaymentMethod,
        ReplyCartEmpty, RequestClearerReceipt, SendBankDetails, SendPaymentLink, ShowCart,
        UpdateCart,
    };
    use FlowEvent::{
        CancelRequested, CartViewed, CheckoutRequested, ContactDetailsProvided,
        DeliveryMethodChosen, ItemRemoved, ItemsRecognized, PaymentMethodChosen, ReceiptAccepted,
        ReceiptRejected, TrackRequested,
    };

    let (to, actions) = match (current, event) {
        (_, CancelRequested) => match current {
            AwaitingReceipt { .. } => (Browsing, vec![CancelPendingOrder, ClearCart]),
            _ => (Browsing, vec![ClearCart]),
        },
        (_, TrackRequested) => (current.clone(), vec![LookupOrder]),
        (Browsing | CartBuilding, ItemsRecognized) => (CartBuilding, vec![MergeCart]),
        (Browsing | CartBuilding, ItemRemoved) => (CartBuilding, vec![UpdateCart]),
        (Browsing | CartBuilding, CartViewed) => (current.clone(), vec![ShowCart]),
        (Browsing | CartBuilding, CheckoutRequested) => {
            if context.cart_is_empty {
                (current.clone(), vec![ReplyCartEmpty])
            } else {
                (CheckoutMethod, vec![PromptDeliveryMethod])
            }
        }
        (CheckoutMethod, DeliveryMethodChosen(delivery_method)) => (
            CheckoutAddress { delivery_method: *delivery_method },
            vec![PromptContactDetails],
        ),
        (CheckoutAddress { delivery_method }, ContactDetailsProvided(details)) => {
            let details = details.trim();
            if details.is_empty() {
                return Err(FlowTransitionError::BlankContactDetails);
            }
            (
                CheckoutPayment {
                    delivery_method: *delivery_method,
                    contact_details: details.to_owned(),
                },
                vec![PromptPaymentMethod],
            )
        }
        (CheckoutPayment { .. }, PaymentMethodChosen { method, order_id }) => {
            if context.cart_is_empty {
                return Err(FlowTransitionError::EmptyCart { state: current.as_str() });
            }
            match method {
                PaymentMethod::Card => (Browsing, vec![FinalizeOrder, SendPaymentLink]),
                PaymentMethod::BankTransfer => (
                    AwaitingReceipt { order_id: order_id.clone() },
                    vec![FinalizeOrder, SendBankDetails],
                ),
                PaymentMethod::CashOnDelivery => {
                    (Browsing, vec![FinalizeOrder, ConfirmCashOnDelivery])
                }
            }
        }
        (AwaitingReceipt { .. }, ReceiptAccepted) => (Browsing, vec![MarkOrderPaid, ClearCart]),
        (AwaitingReceipt { .. }, ReceiptRejected) => {
            (current.clone(), vec![RequestClearerReceipt])
        }
        _ => {
            return Err(FlowTransitionError::InvalidTransition {
                state: current.as_str(),
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: current.clone(), to, event: event.clone(), actions })
}
