use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use kiosk_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use kiosk_core::channel::{
    Channel, ChannelRegistry, InboundContent, InboundMessage, MediaRef, OutboundMessage,
};
use kiosk_core::domain::business::Business;
use kiosk_core::domain::conversation::{Conversation, ConversationId, ConversationState};
use kiosk_core::domain::customer::Customer;
use kiosk_core::domain::message::{Message, MessageKind};
use kiosk_core::domain::order::{
    Checkout, DeliveryMethod, Order, OrderId, OrderStatus, PaymentMethod,
};
use kiosk_core::domain::product::Catalog;
use kiosk_core::errors::{ApplicationError, DomainError};
use kiosk_core::flows::{
    CheckoutFlow, FlowAction, FlowContext, FlowEngine, FlowEvent, FlowTransitionError,
    TransitionOutcome,
};
use kiosk_db::repositories::{AppendOutcome, Repositories, RepositoryError};
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::guardrails::{GuardrailDecision, GuardrailIntent, GuardrailPolicy};
use crate::intent::{Intent, IntentClassifier, KeywordIntentClassifier};
use crate::locks::{ConversationKey, ConversationLocks};
use crate::matching::{find_removal_target, match_locally, match_oracle_items, RemovalTarget};
use crate::oracle::{BoundedOracle, OrderedItem, ReceiptVerification};
use crate::replies;
use crate::responder::Responder;
use crate::tenant::{DirectoryTenantResolver, TenantResolution, TenantResolver};

const ACTOR: &str = "conversation-engine";
/// Headroom over the oracle vision bound for media download and persistence.
const JOB_TIMEOUT_MARGIN: Duration = Duration::from_secs(15);

/// What happened to one inbound delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InboundOutcome {
    Processed,
    /// Already handled under the same dedup key; nothing was written or sent.
    Duplicate,
    /// No business could be resolved; guidance was sent and nothing was written.
    Refused,
    /// Nothing to act on, e.g. blank text.
    Ignored,
    /// Handling failed; the customer got a generic failure reply.
    Failed,
}

impl InboundOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Duplicate => "duplicate",
            Self::Refused => "refused",
            Self::Ignored => "ignored",
            Self::Failed => "failed",
        }
    }
}

/// Result of putting items into a customer's cart from outside a chat turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StagedCart {
    /// Items were added; carries the cart summary shown to the customer.
    Added { summary: String },
    NothingMatched,
    /// The conversation is mid-checkout and does not accept new items.
    CheckoutInProgress,
}

/// Logs audit events as structured tracing records.
#[derive(Clone, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        info!(
            event_name = "audit.event",
            audit_event = %event.event_type,
            category = ?event.category,
            outcome = ?event.outcome,
            correlation_id = %event.correlation_id,
            conversation_id = event.conversation_id.as_ref().map(|id| id.0.as_str()).unwrap_or("none"),
            actor = %event.actor,
            metadata = ?event.metadata,
            "audit event recorded"
        );
    }
}

/// Drives one conversation turn per inbound message: tenant resolution,
/// dedup, intent, cart and checkout, and replies. Image analysis runs in
/// tracked background tasks.
pub struct ConversationEngine {
    repos: Repositories,
    tenants: Arc<dyn TenantResolver>,
    classifier: Arc<dyn IntentClassifier>,
    guardrails: GuardrailPolicy,
    oracle: BoundedOracle,
    flow: FlowEngine<CheckoutFlow>,
    locks: ConversationLocks,
    responder: Responder,
    audit: Arc<dyn AuditSink>,
    background: Mutex<Vec<JoinHandle<()>>>,
    job_timeout: Duration,
}

struct Turn {
    business: Business,
    customer: Customer,
    conversation: Conversation,
    inbound: InboundMessage,
    correlation_id: String,
    connected: bool,
    replies: Vec<String>,
    persisted: bool,
    job: Option<VisionJob>,
}

impl Turn {
    fn reply(&mut self, text: impl Into<String>) {
        self.replies.push(text.into());
    }

    fn key(&self) -> ConversationKey {
        conversation_key(&self.conversation)
    }
}

enum Session {
    Open(Box<Turn>, OwnedMutexGuard<()>),
    Done(InboundOutcome),
}

#[derive(Clone, Debug)]
enum VisionKind {
    Receipt { order_id: OrderId },
    Identify,
}

#[derive(Clone, Debug)]
struct VisionJob {
    kind: VisionKind,
    media: MediaRef,
    business: Business,
    conversation_id: ConversationId,
    key: ConversationKey,
    inbound: InboundMessage,
    correlation_id: String,
}

impl ConversationEngine {
    /// Engine with the keyword classifier, default guardrails, tracing audit
    /// sink, and a tenant resolver over the given repositories.
    pub fn new(
        repos: Repositories,
        channels: ChannelRegistry,
        oracle: BoundedOracle,
        single_tenant_fallback: bool,
    ) -> Self {
        let tenants = Arc::new(DirectoryTenantResolver::new(
            repos.businesses.clone(),
            repos.customers.clone(),
            repos.conversations.clone(),
            single_tenant_fallback,
        ));
        let job_timeout = oracle.vision_timeout() + JOB_TIMEOUT_MARGIN;
        Self {
            responder: Responder::new(repos.messages.clone(), channels),
            repos,
            tenants,
            classifier: Arc::new(KeywordIntentClassifier),
            guardrails: GuardrailPolicy::default(),
            oracle,
            flow: FlowEngine::default(),
            locks: ConversationLocks::default(),
            audit: Arc::new(TracingAuditSink),
            background: Mutex::new(Vec::new()),
            job_timeout,
        }
    }

    /// Upper bound on one background image task, download included.
    pub fn with_job_timeout(mut self, job_timeout: Duration) -> Self {
        self.job_timeout = job_timeout;
        self
    }

    pub fn with_tenant_resolver(mut self, tenants: Arc<dyn TenantResolver>) -> Self {
        self.tenants = tenants;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_guardrails(mut self, guardrails: GuardrailPolicy) -> Self {
        self.guardrails = guardrails;
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub async fn handle_inbound(self: &Arc<Self>, inbound: InboundMessage) -> InboundOutcome {
        let correlation_id = inbound.correlation_id();
        let (mut turn, guard) = match self.open_session(&inbound, &correlation_id).await {
            Ok(Session::Open(turn, guard)) => (turn, guard),
            Ok(Session::Done(outcome)) => return outcome,
            Err(error) => {
                self.report_failure(&inbound, None, &correlation_id, error).await;
                return InboundOutcome::Failed;
            }
        };

        if let Err(error) = self.run_turn(&mut turn).await {
            drop(guard);
            let conversation_id = turn.conversation.id.clone();
            self.report_failure(&inbound, Some(&conversation_id), &correlation_id, error).await;
            return InboundOutcome::Failed;
        }

        for text in std::mem::take(&mut turn.replies) {
            let outbound = OutboundMessage::text_reply(&turn.inbound, text);
            // Delivery failures are logged by the responder; state is already committed.
            let _ = self.responder.reply(&turn.conversation.id, outbound, &correlation_id).await;
        }
        drop(guard);

        if let Some(job) = turn.job.take() {
            self.spawn_vision_job(job);
        }

        info!(
            event_name = "engine.turn.completed",
            correlation_id = %correlation_id,
            conversation_id = %turn.conversation.id.0,
            business_id = %turn.business.id.0,
            state = turn.conversation.state().as_str(),
            "inbound message handled"
        );
        InboundOutcome::Processed
    }

    /// Adds `items` to the active cart of `sender_id` on `channel`, under the
    /// same conversation lock chat turns use.
    pub async fn stage_items(
        &self,
        business: &Business,
        channel: Channel,
        sender_id: &str,
        items: &[OrderedItem],
        correlation_id: &str,
    ) -> Result<StagedCart, ApplicationError> {
        let catalog = self.catalog(business).await?;
        let matches = match_oracle_items(items, &catalog);
        if matches.is_empty() {
            return Ok(StagedCart::NothingMatched);
        }

        let customer = self
            .repos
            .customers
            .find_or_create(Customer::new(business.id.clone(), sender_id, None))
            .await
            .map_err(persistence)?;
        let _guard = self
            .locks
            .acquire(ConversationKey {
                business_id: business.id.clone(),
                customer_id: customer.id.clone(),
                channel,
            })
            .await;
        let mut conversation = self
            .repos
            .conversations
            .find_or_open(&business.id, &customer.id, channel)
            .await
            .map_err(persistence)?;

        let context = FlowContext { cart_is_empty: conversation.cart().is_empty() };
        let audit = AuditContext::new(Some(conversation.id.clone()), correlation_id, ACTOR);
        let outcome = match self.flow.apply_with_audit(
            conversation.state(),
            &FlowEvent::ItemsRecognized,
            &context,
            self.audit.as_ref(),
            &audit,
        ) {
            Ok(outcome) => outcome,
            Err(FlowTransitionError::InvalidTransition { .. }) => {
                return Ok(StagedCart::CheckoutInProgress)
            }
            Err(error) => return Err(flow_error(error)),
        };

        conversation.metadata.state = outcome.to.clone();
        let added = if outcome.has(&FlowAction::MergeCart) {
            conversation.metadata.cart.add_items(&matches)
        } else {
            Vec::new()
        };
        conversation.last_message_at = Utc::now();
        self.repos.conversations.save(&conversation).await.map_err(persistence)?;

        info!(
            event_name = "engine.cart.staged",
            correlation_id,
            conversation_id = %conversation.id.0,
            business_id = %business.id.0,
            items = added.len(),
            "items staged into cart"
        );
        Ok(StagedCart::Added { summary: replies::items_added(&added, conversation.cart()) })
    }

    /// Waits for every background image task started so far.
    pub async fn drain_background(&self) {
        loop {
            let handles = {
                let mut tasks = match self.background.lock() {
                    Ok(tasks) => tasks,
                    Err(poisoned) => poisoned.into_inner(),
                };
                std::mem::take(&mut *tasks)
            };
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(error) = handle.await {
                    warn!(
                        event_name = "engine.vision.task_aborted",
                        error = %error,
                        "background image task ended abnormally"
                    );
                }
            }
        }
    }

    async fn open_session(
        &self,
        inbound: &InboundMessage,
        correlation_id: &str,
    ) -> Result<Session, ApplicationError> {
        if inbound.text().is_some_and(|text| text.trim().is_empty()) {
            return Ok(Session::Done(InboundOutcome::Ignored));
        }

        if let Some(dedup_key) = &inbound.dedup_key {
            if self.repos.messages.exists(dedup_key).await.map_err(persistence)? {
                info!(
                    event_name = "engine.inbound.duplicate",
                    correlation_id,
                    "duplicate delivery discarded"
                );
                return Ok(Session::Done(InboundOutcome::Duplicate));
            }
        }

        let resolution = self.tenants.resolve(inbound).await.map_err(persistence)?;
        let connected = matches!(resolution, TenantResolution::Connected(_));
        let Some(business) = resolution.business().cloned() else {
            info!(
                event_name = "engine.tenant.unresolved",
                correlation_id,
                channel = %inbound.channel,
                "sender could not be bound to a business"
            );
            let _ = self
                .responder
                .send(OutboundMessage::text_reply(inbound, replies::UNRESOLVED_TENANT), correlation_id)
                .await;
            return Ok(Session::Done(InboundOutcome::Refused));
        };

        let customer = self
            .repos
            .customers
            .find_or_create(Customer::new(
                business.id.clone(),
                inbound.sender_id.clone(),
                inbound.display_name.clone(),
            ))
            .await
            .map_err(persistence)?;

        let guard = self
            .locks
            .acquire(ConversationKey {
                business_id: business.id.clone(),
                customer_id: customer.id.clone(),
                channel: inbound.channel,
            })
            .await;

        let conversation = self
            .repos
            .conversations
            .find_or_open(&business.id, &customer.id, inbound.channel)
            .await
            .map_err(persistence)?;

        let (kind, content, media_ref) = match &inbound.content {
            InboundContent::Text(text) => (MessageKind::Text, text.clone(), None),
            InboundContent::Image { media, caption } => (
                MessageKind::Image,
                caption.clone().unwrap_or_else(|| "[image]".to_owned()),
                Some(media.0.clone()),
            ),
        };
        let claim = Message::inbound(
            conversation.id.clone(),
            kind,
            content,
            inbound.dedup_key.clone(),
            media_ref,
        );
        if self.repos.messages.append(claim).await.map_err(persistence)? == AppendOutcome::Duplicate {
            info!(
                event_name = "engine.inbound.duplicate",
                correlation_id,
                conversation_id = %conversation.id.0,
                "concurrent duplicate delivery discarded"
            );
            return Ok(Session::Done(InboundOutcome::Duplicate));
        }

        info!(
            event_name = "engine.inbound.accepted",
            correlation_id,
            conversation_id = %conversation.id.0,
            business_id = %business.id.0,
            tenant_source = resolution.source(),
            kind = kind.as_str(),
            "inbound message claimed"
        );

        let turn = Turn {
            business,
            customer,
            conversation,
            inbound: inbound.clone(),
            correlation_id: correlation_id.to_owned(),
            connected,
            replies: Vec::new(),
            persisted: false,
            job: None,
        };
        Ok(Session::Open(Box::new(turn), guard))
    }

    async fn run_turn(&self, turn: &mut Turn) -> Result<(), ApplicationError> {
        turn.conversation.last_message_at = Utc::now();

        if turn.connected {
            turn.reply(replies::connected(&turn.business));
        } else {
            match turn.inbound.content.clone() {
                InboundContent::Text(text) => self.handle_text(turn, &text).await?,
                InboundContent::Image { media, .. } => self.handle_image(turn, media),
            }
        }

        if !turn.persisted {
            self.repos.conversations.save(&turn.conversation).await.map_err(persistence)?;
        }
        Ok(())
    }

    async fn handle_text(&self, turn: &mut Turn, text: &str) -> Result<(), ApplicationError> {
        let intent = self.classifier.classify(text);
        info!(
            event_name = "engine.intent.classified",
            correlation_id = %turn.correlation_id,
            intent = intent.as_str(),
            state = turn.conversation.state().as_str(),
            "text intent classified"
        );

        match intent {
            Intent::Cancel => self.cancel(turn).await,
            Intent::Track(reference) => self.track(turn, reference).await,
            intent if turn.conversation.state().is_shopping() => self.shop(turn, intent, text).await,
            _ => self.checkout_step(turn, text).await,
        }
    }

    async fn shop(&self, turn: &mut Turn, intent: Intent, text: &str) -> Result<(), ApplicationError> {
        match intent {
            Intent::RemoveItem => self.remove_item(turn, text).await,
            Intent::Catalog => {
                let catalog = self.catalog(&turn.business).await?;
                turn.reply(replies::catalog(&catalog));
                Ok(())
            }
            Intent::ViewCart => {
                let outcome = self.transition(turn, FlowEvent::CartViewed)?;
                if outcome.has(&FlowAction::ShowCart) {
                    turn.reply(replies::cart_summary(turn.conversation.cart()));
                }
                Ok(())
            }
            Intent::History => {
                let orders = self
                    .repos
                    .orders
                    .list_recent_for_customer(&turn.customer.id, replies::HISTORY_LIMIT)
                    .await
                    .map_err(persistence)?;
                turn.reply(replies::history(&orders));
                Ok(())
            }
            Intent::Assistance => {
                turn.conversation.metadata.needs_assistance = true;
                self.audit.emit(
                    AuditEvent::new(
                        Some(turn.conversation.id.clone()),
                        turn.correlation_id.clone(),
                        "conversation.assistance_requested",
                        AuditCategory::Flow,
                        ACTOR,
                        AuditOutcome::Success,
                    )
                    .with_metadata("customer_id", turn.customer.id.0.clone()),
                );
                turn.reply(replies::assistance(&turn.business));
                Ok(())
            }
            Intent::Checkout => {
                let outcome = self.transition(turn, FlowEvent::CheckoutRequested)?;
                for action in &outcome.actions {
                    match action {
                        FlowAction::ReplyCartEmpty => turn.reply(replies::CART_EMPTY_AT_CHECKOUT),
                        FlowAction::PromptDeliveryMethod => {
                            turn.reply(replies::checkout_started(turn.conversation.cart()))
                        }
                        _ => {}
                    }
                }
                turn.conversation.metadata.state = outcome.to;
                Ok(())
            }
            Intent::Greeting => {
                turn.reply(replies::welcome(&turn.business));
                Ok(())
            }
            _ => self.add_from_text(turn, text).await,
        }
    }

    async fn add_from_text(&self, turn: &mut Turn, text: &str) -> Result<(), ApplicationError> {
        let addition = GuardrailIntent::AddItems { text: text.to_owned() };
        if let GuardrailDecision::Deny { reason_code, user_message, .. } =
            self.guardrails.evaluate(&addition)
        {
            info!(
                event_name = "engine.guardrail.denied",
                correlation_id = %turn.correlation_id,
                action = addition.action_key(),
                reason_code,
                "cart addition blocked"
            );
            turn.reply(user_message);
            return Ok(());
        }

        let catalog = self.catalog(&turn.business).await?;
        let mut matches = Vec::new();
        if !catalog.is_empty() {
            let items = self.oracle.classify_order_items(text, &catalog.summary()).await;
            matches = match_oracle_items(&items, &catalog);
            if matches.is_empty() {
                matches = match_locally(text, &catalog);
            }
        }

        if !matches.is_empty() {
            let outcome = self.transition(turn, FlowEvent::ItemsRecognized)?;
            turn.conversation.metadata.state = outcome.to.clone();
            if outcome.has(&FlowAction::MergeCart) {
                let added = turn.conversation.metadata.cart.add_items(&matches);
                turn.reply(replies::items_added(&added, turn.conversation.cart()));
            }
            return Ok(());
        }

        let freeform = GuardrailIntent::FreeformReply { text: text.to_owned() };
        let reply = match self.guardrails.evaluate(&freeform) {
            GuardrailDecision::Deny { user_message, .. } => user_message,
            GuardrailDecision::Allow => self
                .oracle
                .freeform_reply(text, &turn.business.name, &catalog.summary())
                .await
                .unwrap_or_else(|| replies::NOT_UNDERSTOOD.to_owned()),
        };
        turn.reply(reply);
        Ok(())
    }

    async fn remove_item(&self, turn: &mut Turn, text: &str) -> Result<(), ApplicationError> {
        if turn.conversation.cart().is_empty() {
            turn.reply(replies::CART_ALREADY_EMPTY);
            return Ok(());
        }

        let catalog = self.catalog(&turn.business).await?;
        match find_removal_target(text, turn.conversation.cart(), &catalog) {
            RemovalTarget::Unspecified => turn.reply(replies::SPECIFY_REMOVAL),
            RemovalTarget::NotInCart { product_name } => turn.reply(replies::not_in_cart(&product_name)),
            RemovalTarget::InCart { product_id, quantity } => {
                let outcome = self.transition(turn, FlowEvent::ItemRemoved)?;
                turn.conversation.metadata.state = outcome.to.clone();
                if !outcome.has(&FlowAction::UpdateCart) {
                    return Ok(());
                }
                let removed = turn.conversation.metadata.cart.remove_item(&product_id, quantity);
                let mut reply = replies::item_removed(&removed, quantity);
                reply.push_str("\n\n");
                reply.push_str(&replies::cart_summary(turn.conversation.cart()));
                turn.reply(reply);
            }
        }
        Ok(())
    }

    async fn checkout_step(&self, turn: &mut Turn, text: &str) -> Result<(), ApplicationError> {
        match turn.conversation.state().clone() {
            ConversationState::CheckoutMethod => match self.classifier.delivery_method(text) {
                Some(method) => {
                    let outcome = self.transition(turn, FlowEvent::DeliveryMethodChosen(method))?;
                    if outcome.has(&FlowAction::PromptContactDetails) {
                        turn.reply(replies::contact_prompt(method));
                    }
                    turn.conversation.metadata.state = outcome.to;
                }
                None => turn.reply(replies::CHOOSE_DELIVERY_METHOD),
            },
            ConversationState::CheckoutAddress { delivery_method } => {
                match self.try_transition(turn, FlowEvent::ContactDetailsProvided(text.to_owned())) {
                    Ok(outcome) => {
                        if outcome.has(&FlowAction::PromptPaymentMethod) {
                            turn.reply(replies::CHOOSE_PAYMENT_METHOD);
                        }
                        turn.conversation.metadata.state = outcome.to;
                    }
                    Err(FlowTransitionError::BlankContactDetails) => {
                        turn.reply(replies::contact_prompt(delivery_method));
                    }
                    Err(error) => return Err(flow_error(error)),
                }
            }
            ConversationState::CheckoutPayment { delivery_method, contact_details } => {
                match self.classifier.payment_method(text) {
                    Some(method) => {
                        self.place_order(turn, method, delivery_method, contact_details).await?;
                    }
                    None => turn.reply(replies::CHOOSE_PAYMENT_METHOD),
                }
            }
            ConversationState::AwaitingReceipt { .. } => turn.reply(replies::UPLOAD_RECEIPT),
            ConversationState::Browsing | ConversationState::CartBuilding => {}
        }
        Ok(())
    }

    async fn place_order(
        &self,
        turn: &mut Turn,
        payment_method: PaymentMethod,
        delivery_method: DeliveryMethod,
        contact_details: String,
    ) -> Result<(), ApplicationError> {
        let order_id = OrderId::generate();
        let event = FlowEvent::PaymentMethodChosen { method: payment_method, order_id: order_id.clone() };
        let outcome = match self.try_transition(turn, event) {
            Ok(outcome) => outcome,
            Err(FlowTransitionError::EmptyCart { .. }) => {
                turn.conversation.metadata.state = ConversationState::Browsing;
                turn.reply(replies::CART_EMPTY_AT_CHECKOUT);
                return Ok(());
            }
            Err(error) => return Err(flow_error(error)),
        };
        if !outcome.has(&FlowAction::FinalizeOrder) {
            return Err(ApplicationError::Domain(DomainError::InvariantViolation(format!(
                "payment choice from {} did not finalize an order",
                outcome.from.as_str()
            ))));
        }

        let order = Order::place(Checkout {
            order_id,
            business_id: turn.business.id.clone(),
            customer_id: turn.customer.id.clone(),
            conversation_id: turn.conversation.id.clone(),
            cart: turn.conversation.cart(),
            delivery_method,
            contact_details,
            payment_method,
        })?;

        turn.conversation.metadata.cart.clear();
        turn.conversation.metadata.state = outcome.to.clone();
        self.repos.orders.finalize(&order, &turn.conversation).await.map_err(persistence)?;
        turn.persisted = true;

        self.audit_order("order.finalized", &order, &turn.correlation_id);
        info!(
            event_name = "engine.order.finalized",
            correlation_id = %turn.correlation_id,
            order_id = %order.id.0,
            conversation_id = %turn.conversation.id.0,
            total = %order.total_amount,
            payment_method = payment_method.as_str(),
            "order placed from cart"
        );

        for action in &outcome.actions {
            match action {
                FlowAction::SendPaymentLink => turn.reply(replies::card_payment(&order, &turn.business)),
                FlowAction::SendBankDetails => turn.reply(replies::bank_transfer(&order, &turn.business)),
                FlowAction::ConfirmCashOnDelivery => turn.reply(replies::cash_on_delivery(&order)),
                _ => {}
            }
        }
        Ok(())
    }

    async fn cancel(&self, turn: &mut Turn) -> Result<(), ApplicationError> {
        let outcome = self.transition(turn, FlowEvent::CancelRequested)?;
        let pending = turn.conversation.state().pending_order().cloned();
        if outcome.has(&FlowAction::ClearCart) {
            turn.conversation.metadata.cart.clear();
        }
        turn.conversation.metadata.state = outcome.to.clone();

        let mut cancelled = None;
        if let (true, Some(order_id)) = (outcome.has(&FlowAction::CancelPendingOrder), pending) {
            let order = self.repos.orders.find_by_id(&order_id).await.map_err(persistence)?;
            if let Some(mut order) = order.filter(|order| order.status == OrderStatus::Pending) {
                order.transition_to(OrderStatus::Cancelled)?;
                match self.repos.orders.cancel(&order, &turn.conversation).await {
                    Ok(()) => {
                        turn.persisted = true;
                        self.audit_order("order.cancelled", &order, &turn.correlation_id);
                        cancelled = Some(order);
                    }
                    Err(RepositoryError::Conflict(reason)) => warn!(
                        event_name = "engine.order.cancel_skipped",
                        correlation_id = %turn.correlation_id,
                        order_id = %order.id.0,
                        reason = %reason,
                        "pending order changed before it could be cancelled"
                    ),
                    Err(error) => return Err(persistence(error)),
                }
            }
        }

        turn.reply(replies::cancelled(cancelled.as_ref()));
        Ok(())
    }

    async fn track(&self, turn: &mut Turn, reference: Option<String>) -> Result<(), ApplicationError> {
        let outcome = self.transition(turn, FlowEvent::TrackRequested)?;
        if !outcome.has(&FlowAction::LookupOrder) {
            return Ok(());
        }
        let Some(reference) = reference else {
            turn.reply(replies::TRACK_NEEDS_REFERENCE);
            return Ok(());
        };

        let found = self
            .repos
            .orders
            .find_by_reference(&turn.business.id, &turn.customer.id, &reference)
            .await
            .map_err(persistence)?;
        match found.first() {
            Some(order) => turn.reply(replies::order_status(order)),
            None => turn.reply(replies::order_not_found(&reference)),
        }
        Ok(())
    }

    fn handle_image(&self, turn: &mut Turn, media: MediaRef) {
        let kind = match turn.conversation.state().pending_order().cloned() {
            Some(order_id) => {
                turn.reply(replies::VERIFYING_RECEIPT);
                VisionKind::Receipt { order_id }
            }
            None => {
                turn.reply(replies::ANALYSING_PHOTO);
                VisionKind::Identify
            }
        };
        turn.job = Some(VisionJob {
            kind,
            media,
            business: turn.business.clone(),
            conversation_id: turn.conversation.id.clone(),
            key: turn.key(),
            inbound: turn.inbound.clone(),
            correlation_id: turn.correlation_id.clone(),
        });
    }

    fn spawn_vision_job(self: &Arc<Self>, job: VisionJob) {
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move { engine.run_vision_job(job).await });
        let mut tasks = match self.background.lock() {
            Ok(tasks) => tasks,
            Err(poisoned) => poisoned.into_inner(),
        };
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    async fn run_vision_job(&self, job: VisionJob) {
        let limit = self.job_timeout;
        let reply = match tokio::time::timeout(limit, self.vision_task(&job)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(error)) => {
                error!(
                    event_name = "engine.vision.failed",
                    correlation_id = %job.correlation_id,
                    conversation_id = %job.conversation_id.0,
                    error = %error,
                    "background image task failed"
                );
                Some(replies::GENERIC_FAILURE.to_owned())
            }
            Err(_) => {
                warn!(
                    event_name = "engine.vision.timeout",
                    correlation_id = %job.correlation_id,
                    timeout_ms = limit.as_millis() as u64,
                    "background image task timed out"
                );
                Some(replies::IMAGE_ANALYSIS_TIMED_OUT.to_owned())
            }
        };

        if let Some(text) = reply {
            let outbound = OutboundMessage::text_reply(&job.inbound, text);
            let _ = self.responder.reply(&job.conversation_id, outbound, &job.correlation_id).await;
        }
    }

    async fn vision_task(&self, job: &VisionJob) -> Result<Option<String>, ApplicationError> {
        let sender = self.responder.channels().get(job.inbound.channel)?;
        let image = match sender.fetch_media(&job.media).await {
            Ok(image) => image,
            Err(error) => {
                warn!(
                    event_name = "engine.vision.download_failed",
                    correlation_id = %job.correlation_id,
                    error = %error,
                    "image could not be downloaded"
                );
                return Ok(Some(replies::IMAGE_DOWNLOAD_FAILED.to_owned()));
            }
        };

        match &job.kind {
            VisionKind::Receipt { order_id } => {
                let verification = self.oracle.verify_receipt_image(&image).await;
                self.settle_receipt(job, order_id, verification).await
            }
            VisionKind::Identify => {
                let catalog = self.catalog(&job.business).await?;
                if catalog.is_empty() {
                    return Ok(Some(replies::EMPTY_CATALOG_FOR_PHOTO.to_owned()));
                }
                let identification =
                    self.oracle.identify_product_in_image(&image, &catalog.summary()).await;
                let reply = match identification {
                    Some(found) if found.match_found => {
                        match found.product_id.as_ref().and_then(|id| catalog.get(id)) {
                            Some(product) => replies::product_card(product),
                            None => replies::no_product_match(found.reason.as_deref()),
                        }
                    }
                    Some(missed) => replies::no_product_match(missed.reason.as_deref()),
                    None => replies::PHOTO_CHECK_UNAVAILABLE.to_owned(),
                };
                Ok(Some(reply))
            }
        }
    }

    /// Applies a receipt verdict under the conversation lock. A conversation
    /// that moved on while the image was analysed is left alone.
    async fn settle_receipt(
        &self,
        job: &VisionJob,
        order_id: &OrderId,
        verification: Option<ReceiptVerification>,
    ) -> Result<Option<String>, ApplicationError> {
        let _guard = self.locks.acquire(job.key.clone()).await;
        let conversation =
            self.repos.conversations.find_by_id(&job.conversation_id).await.map_err(persistence)?;
        let Some(mut conversation) = conversation else {
            return Ok(None);
        };
        if conversation.state().pending_order() != Some(order_id) {
            info!(
                event_name = "engine.receipt.stale",
                correlation_id = %job.correlation_id,
                order_id = %order_id.0,
                "conversation no longer awaits this receipt"
            );
            return Ok(None);
        }

        let Some(receipt) = verification else {
            return Ok(Some(replies::RECEIPT_CHECK_UNAVAILABLE.to_owned()));
        };
        let audit = AuditContext::new(Some(conversation.id.clone()), job.correlation_id.clone(), ACTOR);
        let context = FlowContext { cart_is_empty: conversation.cart().is_empty() };

        if !receipt.is_valid {
            let outcome = self
                .flow
                .apply_with_audit(conversation.state(), &FlowEvent::ReceiptRejected, &context, self.audit.as_ref(), &audit)
                .map_err(flow_error)?;
            let reply = outcome.has(&FlowAction::RequestClearerReceipt).then(|| replies::RECEIPT_UNCLEAR.to_owned());
            return Ok(reply);
        }

        let outcome = self
            .flow
            .apply_with_audit(conversation.state(), &FlowEvent::ReceiptAccepted, &context, self.audit.as_ref(), &audit)
            .map_err(flow_error)?;
        let order = self.repos.orders.find_by_id(order_id).await.map_err(persistence)?;
        let Some(mut order) = order else {
            return Err(ApplicationError::Persistence(format!("order {} is missing", order_id.0)));
        };

        if outcome.has(&FlowAction::ClearCart) {
            conversation.metadata.cart.clear();
        }
        conversation.metadata.state = outcome.to.clone();
        conversation.last_message_at = Utc::now();

        if order.status != OrderStatus::Pending || !outcome.has(&FlowAction::MarkOrderPaid) {
            self.repos.conversations.save(&conversation).await.map_err(persistence)?;
            return Ok(Some(replies::order_status(&order)));
        }
        order.confirm_payment()?;
        self.repos.orders.settle_payment(&order, &conversation).await.map_err(persistence)?;

        self.audit_order("order.paid", &order, &job.correlation_id);
        info!(
            event_name = "engine.order.paid",
            correlation_id = %job.correlation_id,
            order_id = %order.id.0,
            total = %order.total_amount,
            "receipt accepted and order confirmed"
        );
        Ok(Some(replies::payment_verified(&order, &receipt)))
    }

    async fn catalog(&self, business: &Business) -> Result<Catalog, ApplicationError> {
        let products = self.repos.products.list_active(&business.id).await.map_err(persistence)?;
        Ok(Catalog::new(products))
    }

    fn transition(&self, turn: &Turn, event: FlowEvent) -> Result<TransitionOutcome, ApplicationError> {
        self.try_transition(turn, event).map_err(flow_error)
    }

    fn try_transition(
        &self,
        turn: &Turn,
        event: FlowEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        let context = FlowContext { cart_is_empty: turn.conversation.cart().is_empty() };
        let audit = AuditContext::new(
            Some(turn.conversation.id.clone()),
            turn.correlation_id.clone(),
            ACTOR,
        );
        self.flow.apply_with_audit(turn.conversation.state(), &event, &context, self.audit.as_ref(), &audit)
    }

    fn audit_order(&self, event_type: &str, order: &Order, correlation_id: &str) {
        self.audit.emit(
            AuditEvent::new(
                order.conversation_id.clone(),
                correlation_id,
                event_type,
                AuditCategory::Order,
                ACTOR,
                AuditOutcome::Success,
            )
            .with_metadata("order_id", order.id.0.clone())
            .with_metadata("status", order.status.as_str())
            .with_metadata("payment_status", order.payment_status.as_str())
            .with_metadata("total", order.total_amount.to_string()),
        );
    }

    async fn report_failure(
        &self,
        inbound: &InboundMessage,
        conversation_id: Option<&ConversationId>,
        correlation_id: &str,
        error: ApplicationError,
    ) {
        let interface = error.into_interface(correlation_id);
        error!(
            event_name = "engine.turn.failed",
            correlation_id,
            error = %interface,
            "inbound message could not be handled"
        );
        let outbound = OutboundMessage::text_reply(inbound, interface.user_message());
        let _ = match conversation_id {
            Some(conversation_id) => self.responder.reply(conversation_id, outbound, correlation_id).await,
            None => self.responder.send(outbound, correlation_id).await,
        };
    }
}

fn conversation_key(conversation: &Conversation) -> ConversationKey {
    ConversationKey {
        business_id: conversation.business_id.clone(),
        customer_id: conversation.customer_id.clone(),
        channel: conversation.channel,
    }
}

fn persistence(error: RepositoryError) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}

fn flow_error(error: FlowTransitionError) -> ApplicationError {
    ApplicationError::Domain(DomainError::FlowTransition(error))
}
