use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use kiosk_agent::voice::{VoiceReply, VoiceWebhook};
use kiosk_agent::{ConversationEngine, InboundOutcome, VoiceDesk};
use kiosk_channels::{
    telegram, verify_handshake, verify_secret_token, verify_signature, whatsapp, HandshakeQuery,
};
use kiosk_core::channel::{Channel, InboundMessage};
use kiosk_core::config::ChannelsConfig;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const VOICE_SECRET_HEADER: &str = "x-vapi-secret";

#[derive(Clone)]
pub struct WebhookState {
    engine: Arc<ConversationEngine>,
    voice: Arc<VoiceDesk>,
    channels: Arc<ChannelsConfig>,
}

impl WebhookState {
    pub fn new(engine: Arc<ConversationEngine>, voice: Arc<VoiceDesk>, channels: ChannelsConfig) -> Self {
        Self { engine, voice, channels: Arc::new(channels) }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct VoiceQuery {
    pub business: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WebhookAck {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhooks/whatsapp", get(whatsapp_handshake).post(whatsapp_inbound))
        .route("/webhooks/telegram", get(telegram_handshake).post(telegram_inbound))
        .route("/webhooks/voice", post(voice_tool_calls))
        .with_state(state)
}

async fn whatsapp_handshake(
    State(state): State<WebhookState>,
    Query(query): Query<HandshakeQuery>,
) -> Response {
    handshake_response(Channel::WhatsApp, &query, state.channels.whatsapp.verify_token.as_ref())
}

async fn telegram_handshake(
    State(state): State<WebhookState>,
    Query(query): Query<HandshakeQuery>,
) -> Response {
    handshake_response(Channel::Telegram, &query, state.channels.telegram.verify_token.as_ref())
}

fn handshake_response(
    channel: Channel,
    query: &HandshakeQuery,
    expected: Option<&SecretString>,
) -> Response {
    match verify_handshake(query, expected) {
        Some(challenge) => {
            info!(
                event_name = "webhook.handshake.accepted",
                channel = channel.as_str(),
                correlation_id = "handshake",
                "webhook subscription verified"
            );
            (StatusCode::OK, challenge).into_response()
        }
        None => {
            warn!(
                event_name = "webhook.handshake.rejected",
                channel = channel.as_str(),
                correlation_id = "handshake",
                "webhook subscription check failed"
            );
            (StatusCode::FORBIDDEN, "verification failed").into_response()
        }
    }
}

/// Authenticated deliveries are always acknowledged with 200, whatever
/// happened while handling them.
async fn whatsapp_inbound(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<WebhookAck>) {
    let signature = header(&headers, whatsapp::SIGNATURE_HEADER);
    if !verify_signature(state.channels.whatsapp.app_secret.as_ref(), signature, &body) {
        return unauthorized(Channel::WhatsApp, "invalid signature");
    }

    match whatsapp::parse_envelope(&body) {
        Ok(messages) => {
            for message in messages {
                dispatch(&state.engine, message).await;
            }
        }
        Err(error) => undecodable(Channel::WhatsApp, &error.to_string()),
    }
    acknowledged()
}

async fn telegram_inbound(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<WebhookAck>) {
    let secret = header(&headers, telegram::SECRET_HEADER);
    if !verify_secret_token(state.channels.telegram.webhook_secret.as_ref(), secret) {
        return unauthorized(Channel::Telegram, "invalid secret token");
    }

    match telegram::parse_update(&body) {
        Ok(Some(message)) => dispatch(&state.engine, message).await,
        Ok(None) => {}
        Err(error) => undecodable(Channel::Telegram, &error.to_string()),
    }
    acknowledged()
}

/// Voice tool calls need a configured secret; without one the route is closed.
async fn voice_tool_calls(
    State(state): State<WebhookState>,
    Query(query): Query<VoiceQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let voice = &state.channels.voice;
    if !voice.is_enabled() {
        warn!(
            event_name = "webhook.inbound.rejected",
            channel = "voice",
            correlation_id = "unauthenticated",
            reason = "voice webhook is not configured",
            "voice tool call refused"
        );
        let ack = WebhookAck { ok: false, error: Some("voice webhook is not configured") };
        return (StatusCode::FORBIDDEN, Json(ack)).into_response();
    }
    if !verify_secret_token(voice.secret.as_ref(), header(&headers, VOICE_SECRET_HEADER)) {
        let (status, ack) = rejected("voice", "invalid secret");
        return (status, ack).into_response();
    }

    let webhook = match serde_json::from_slice::<VoiceWebhook>(&body) {
        Ok(webhook) => webhook,
        Err(error) => {
            undecodable_body("voice", &error.to_string());
            let ack = WebhookAck { ok: false, error: Some("undecodable body") };
            return (StatusCode::BAD_REQUEST, Json(ack)).into_response();
        }
    };
    let reply: VoiceReply = state.voice.handle(query.business.as_deref(), webhook).await;
    (StatusCode::OK, Json(reply)).into_response()
}

async fn dispatch(engine: &Arc<ConversationEngine>, message: InboundMessage) {
    let channel = message.channel;
    let correlation_id = message.correlation_id();
    let outcome = engine.handle_inbound(message).await;
    if outcome == InboundOutcome::Duplicate {
        info!(
            event_name = "webhook.inbound.duplicate",
            channel = channel.as_str(),
            correlation_id = %correlation_id,
            "duplicate delivery dropped"
        );
        return;
    }
    info!(
        event_name = "webhook.inbound.handled",
        channel = channel.as_str(),
        correlation_id = %correlation_id,
        outcome = outcome.as_str(),
        "webhook delivery handled"
    );
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn acknowledged() -> (StatusCode, Json<WebhookAck>) {
    (StatusCode::OK, Json(WebhookAck { ok: true, error: None }))
}

fn unauthorized(channel: Channel, reason: &'static str) -> (StatusCode, Json<WebhookAck>) {
    rejected(channel.as_str(), reason)
}

fn rejected(channel: &str, reason: &'static str) -> (StatusCode, Json<WebhookAck>) {
    warn!(
        event_name = "webhook.inbound.rejected",
        channel,
        correlation_id = "unauthenticated",
        reason,
        "webhook delivery failed authentication"
    );
    (StatusCode::UNAUTHORIZED, Json(WebhookAck { ok: false, error: Some(reason) }))
}

fn undecodable(channel: Channel, error: &str) {
    undecodable_body(channel.as_str(), error)
}

fn undecodable_body(channel: &str, error: &str) {
    warn!(
        event_name = "webhook.inbound.undecodable",
        channel,
        correlation_id = "undecodable",
        error = %error,
        "webhook body could not be decoded"
    );
}
