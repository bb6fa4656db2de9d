//! Messaging provider adapters.
//!
//! - **WhatsApp** (`whatsapp`) - Cloud API webhook envelopes, signed with
//!   `X-Hub-Signature-256`; replies through the Graph API
//! - **Telegram** (`telegram`) - Bot API updates, optionally guarded by the
//!   secret-token header; replies through `sendMessage` / `sendPhoto`
//! - **Handshake** (`handshake`) - subscription challenge and signature checks
//!
//! Parsing is pure: a webhook body becomes zero or more `InboundMessage`s and
//! everything else is left to the conversation engine.

use std::sync::Arc;
use std::time::Duration;

use kiosk_core::channel::{ChannelError, ChannelRegistry};
use kiosk_core::config::ChannelsConfig;

pub mod handshake;
pub mod telegram;
pub mod whatsapp;

pub use handshake::{verify_handshake, verify_secret_token, verify_signature, HandshakeQuery};
pub use telegram::TelegramClient;
pub use whatsapp::WhatsAppClient;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Senders for every channel that has credentials.
pub fn registry_from_config(config: &ChannelsConfig) -> Result<ChannelRegistry, ChannelError> {
    let mut registry = ChannelRegistry::default();
    if let Some(client) = WhatsAppClient::from_config(&config.whatsapp, DEFAULT_TIMEOUT)? {
        registry = registry.with(Arc::new(client));
    }
    if let Some(client) = TelegramClient::from_config(&config.telegram, DEFAULT_TIMEOUT)? {
        registry = registry.with(Arc::new(client));
    }
    Ok(registry)
}

pub(crate) fn transport_error(error: reqwest::Error) -> ChannelError {
    ChannelError::Transport(error.without_url().to_string())
}

pub(crate) async fn api_error(response: reqwest::Response) -> ChannelError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    ChannelError::Api { status, body }
}
