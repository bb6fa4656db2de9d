use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::message::DedupKey;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    WhatsApp,
    Telegram,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WhatsApp => "whatsapp",
            Self::Telegram => "telegram",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "whatsapp" => Some(Self::WhatsApp),
            "telegram" => Some(Self::Telegram),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider-side handle for an attachment (WhatsApp media id, Telegram file id).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef(pub String);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundContent {
    Text(String),
    Image { media: MediaRef, caption: Option<String> },
}

/// A single customer message normalized from a channel webhook envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub channel: Channel,
    /// Channel-native sender identity used as the customer key.
    pub sender_id: String,
    /// Destination for replies (phone number or chat id).
    pub reply_to: String,
    pub display_name: Option<String>,
    pub dedup_key: Option<DedupKey>,
    /// Receiving business address, e.g. the WhatsApp phone number id.
    pub business_address: Option<String>,
    pub content: InboundContent,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            InboundContent::Text(text) => Some(text.as_str()),
            InboundContent::Image { .. } => None,
        }
    }

    pub fn correlation_id(&self) -> String {
        match &self.dedup_key {
            Some(key) => key.0.clone(),
            None => format!("{}:{}:{}", self.channel, self.sender_id, self.received_at.timestamp_millis()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundBody {
    Text(String),
    Image { url: String, caption: Option<String> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub channel: Channel,
    pub recipient: String,
    pub business_address: Option<String>,
    pub body: OutboundBody,
}

impl OutboundMessage {
    pub fn text_reply(inbound: &InboundMessage, text: impl Into<String>) -> Self {
        Self {
            channel: inbound.channel,
            recipient: inbound.reply_to.clone(),
            business_address: inbound.business_address.clone(),
            body: OutboundBody::Text(text.into()),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ImageData {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for ImageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageData")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel `{0}` is not configured")]
    NotConfigured(Channel),
    #[error("channel transport failure: {0}")]
    Transport(String),
    #[error("channel api rejected request with status {status}: {body}")]
    Api { status: u16, body: String },
    #[error("channel response could not be decoded: {0}")]
    Decode(String),
}

/// Outbound side of a messaging provider.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn channel(&self) -> Channel;

    async fn send(&self, message: &OutboundMessage) -> Result<(), ChannelError>;

    async fn fetch_media(&self, media: &MediaRef) -> Result<ImageData, ChannelError>;
}

#[derive(Clone, Default)]
pub struct ChannelRegistry {
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
}

impl ChannelRegistry {
    pub fn with(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.senders.insert(sender.channel(), sender);
        self
    }

    pub fn get(&self, channel: Channel) -> Result<&Arc<dyn ChannelSender>, ChannelError> {
        self.senders.get(&channel).ok_or(ChannelError::NotConfigured(channel))
    }
}

/// Records outbound traffic and serves canned media.
#[derive(Clone)]
pub struct InMemoryChannelSender {
    channel: Channel,
    sent: Arc<Mutex<Vec<OutboundMessage>>>,
    media: Arc<Mutex<HashMap<String, ImageData>>>,
}

impl InMemoryChannelSender {
    pub fn new(channel: Channel) -> Self {
        Self { channel, sent: Arc::default(), media: Arc::default() }
    }

    pub fn with_media(self, media: MediaRef, image: ImageData) -> Self {
        match self.media.lock() {
            Ok(mut stored) => stored.insert(media.0, image),
            Err(poisoned) => poisoned.into_inner().insert(media.0, image),
        };
        self
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|message| match message.body {
                OutboundBody::Text(text) => Some(text),
                OutboundBody::Image { caption, .. } => caption,
            })
            .collect()
    }
}

#[async_trait]
impl ChannelSender for InMemoryChannelSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), ChannelError> {
        match self.sent.lock() {
            Ok(mut sent) => sent.push(message.clone()),
            Err(poisoned) => poisoned.into_inner().push(message.clone()),
        }
        Ok(())
    }

    async fn fetch_media(&self, media: &MediaRef) -> Result<ImageData, ChannelError> {
        let stored = match self.media.lock() {
            Ok(stored) => stored.get(&media.0).cloned(),
            Err(poisoned) => poisoned.into_inner().get(&media.0).cloned(),
        };
        stored.ok_or_else(|| ChannelError::Api { status: 404, body: format!("unknown media {}", media.0) })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{
        Channel, ChannelError, ChannelRegistry, ChannelSender, ImageData, InMemoryChannelSender,
        InboundContent, InboundMessage, MediaRef, OutboundMessage,
    };
    use crate::domain::message::DedupKey;
    use std::sync::Arc;

    fn inbound() -> InboundMessage {
        InboundMessage {
            channel: Channel::WhatsApp,
            sender_id: "2348000000001".to_owned(),
            reply_to: "2348000000001".to_owned(),
            display_name: None,
            dedup_key: Some(DedupKey("whatsapp:wamid.1".to_owned())),
            business_address: Some("1098765".to_owned()),
            content: InboundContent::Text("hi".to_owned()),
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn in_memory_sender_records_replies_to_the_originating_address() {
        let sender = InMemoryChannelSender::new(Channel::WhatsApp);
        sender.send(&OutboundMessage::text_reply(&inbound(), "welcome")).await.expect("send");

        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, "2348000000001");
        assert_eq!(sent[0].business_address.as_deref(), Some("1098765"));
        assert_eq!(sender.sent_texts(), vec!["welcome".to_owned()]);
    }

    #[tokio::test]
    async fn media_lookup_fails_for_unknown_reference() {
        let sender = InMemoryChannelSender::new(Channel::Telegram).with_media(
            MediaRef("file-1".to_owned()),
            ImageData { mime_type: "image/jpeg".to_owned(), bytes: vec![1, 2, 3] },
        );

        assert_eq!(sender.fetch_media(&MediaRef("file-1".to_owned())).await.expect("media").bytes, vec![1, 2, 3]);
        assert!(sender.fetch_media(&MediaRef("file-2".to_owned())).await.is_err());
    }

    #[test]
    fn registry_reports_unconfigured_channels() {
        let registry =
            ChannelRegistry::default().with(Arc::new(InMemoryChannelSender::new(Channel::Telegram)));

        assert!(registry.get(Channel::Telegram).is_ok());
        assert!(matches!(
            registry.get(Channel::WhatsApp),
            Err(ChannelError::NotConfigured(Channel::WhatsApp))
        ));
    }

    #[test]
    fn correlation_id_prefers_dedup_key() {
        assert_eq!(inbound().correlation_id(), "whatsapp:wamid.1");
    }
}
