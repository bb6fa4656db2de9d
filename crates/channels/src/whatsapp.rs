use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use kiosk_core::channel::{
    Channel, ChannelError, ChannelSender, ImageData, InboundContent, InboundMessage, MediaRef,
    OutboundBody, OutboundMessage,
};
use kiosk_core::config::WhatsAppConfig;
use kiosk_core::domain::message::DedupKey;
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::{api_error, transport_error};

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

#[derive(Debug, Default, Deserialize)]
struct Envelope {
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Default, Deserialize)]
struct Entry {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Default, Deserialize)]
struct Change {
    #[serde(default)]
    value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
struct ChangeValue {
    metadata: Option<Metadata>,
    #[serde(default)]
    contacts: Vec<Contact>,
    #[serde(default)]
    messages: Vec<WireMessage>,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    phone_number_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Contact {
    wa_id: Option<String>,
    profile: Option<Profile>,
}

#[derive(Debug, Deserialize)]
struct Profile {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    id: String,
    from: String,
    timestamp: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    text: Option<TextBody>,
    image: Option<MediaBody>,
}

#[derive(Debug, Deserialize)]
struct TextBody {
    body: String,
}

#[derive(Debug, Deserialize)]
struct MediaBody {
    id: String,
    caption: Option<String>,
}

/// Normalizes a Cloud API webhook body. Status callbacks and unsupported
/// message types yield nothing.
pub fn parse_envelope(body: &[u8]) -> Result<Vec<InboundMessage>, ChannelError> {
    let envelope: Envelope = serde_json::from_slice(body)
        .map_err(|error| ChannelError::Decode(format!("whatsapp envelope: {error}")))?;

    let mut inbound = Vec::new();
    for value in envelope.entry.into_iter().flat_map(|entry| entry.changes).map(|change| change.value) {
        let business_address = value.metadata.and_then(|metadata| metadata.phone_number_id);
        for message in value.messages {
            let content = match (message.kind.as_str(), message.text, message.image) {
                ("text", Some(text), _) => InboundContent::Text(text.body),
                ("image", _, Some(image)) => InboundContent::Image {
                    media: MediaRef(image.id),
                    caption: image.caption.filter(|caption| !caption.trim().is_empty()),
                },
                (kind, _, _) => {
                    debug!(
                        event_name = "channel.whatsapp.unsupported_message",
                        message_kind = kind,
                        "unsupported whatsapp message skipped"
                    );
                    continue;
                }
            };
            let display_name = value
                .contacts
                .iter()
                .find(|contact| contact.wa_id.as_deref() == Some(message.from.as_str()))
                .and_then(|contact| contact.profile.as_ref())
                .and_then(|profile| profile.name.clone());

            inbound.push(InboundMessage {
                channel: Channel::WhatsApp,
                sender_id: message.from.clone(),
                reply_to: message.from,
                display_name,
                dedup_key: Some(DedupKey(format!("whatsapp:{}", message.id))),
                business_address: business_address.clone(),
                content,
                received_at: parse_timestamp(message.timestamp.as_deref()),
            });
        }
    }
    Ok(inbound)
}

fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|raw| raw.parse::<i64>().ok())
        .and_then(|seconds| Utc.timestamp_opt(seconds, 0).single())
        .unwrap_or_else(Utc::now)
}

/// Cloud API sender: messages go out from the number that received the
/// conversation, media is resolved through the Graph API.
pub struct WhatsAppClient {
    http: reqwest::Client,
    api_base_url: String,
    access_token: SecretString,
    default_phone_number_id: Option<String>,
}

impl WhatsAppClient {
    /// `None` when no access token is configured.
    pub fn from_config(config: &WhatsAppConfig, timeout: Duration) -> Result<Option<Self>, ChannelError> {
        let Some(access_token) = config.access_token.clone() else {
            return Ok(None);
        };
        let http = reqwest::Client::builder().timeout(timeout).build().map_err(transport_error)?;
        Ok(Some(Self {
            http,
            api_base_url: config.api_base_url.trim_end_matches('/').to_owned(),
            access_token,
            default_phone_number_id: config.phone_number_id.clone(),
        }))
    }

    fn request_body(message: &OutboundMessage) -> Value {
        match &message.body {
            OutboundBody::Text(text) => json!({
                "messaging_product": "whatsapp",
                "recipient_type": "individual",
                "to": message.recipient,
                "type": "text",
                "text": { "preview_url": false, "body": text },
            }),
            OutboundBody::Image { url, caption } => json!({
                "messaging_product": "whatsapp",
                "recipient_type": "individual",
                "to": message.recipient,
                "type": "image",
                "image": { "link": url, "caption": caption },
            }),
        }
    }
}

#[async_trait]
impl ChannelSender for WhatsAppClient {
    fn channel(&self) -> Channel {
        Channel::WhatsApp
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), ChannelError> {
        let phone_number_id = message
            .business_address
            .as_deref()
            .or(self.default_phone_number_id.as_deref())
            .ok_or(ChannelError::NotConfigured(Channel::WhatsApp))?;

        let response = self
            .http
            .post(format!("{}/{phone_number_id}/messages", self.api_base_url))
            .bearer_auth(self.access_token.expose_secret())
            .json(&Self::request_body(message))
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(())
    }

    async fn fetch_media(&self, media: &MediaRef) -> Result<ImageData, ChannelError> {
        #[derive(Deserialize)]
        struct MediaMetadata {
            url: String,
            mime_type: Option<String>,
        }

        let response = self
            .http
            .get(format!("{}/{}", self.api_base_url, media.0))
            .bearer_auth(self.access_token.expose_secret())
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        let metadata: MediaMetadata = response
            .json()
            .await
            .map_err(|error| ChannelError::Decode(format!("whatsapp media metadata: {error}")))?;

        let download = self
            .http
            .get(&metadata.url)
            .bearer_auth(self.access_token.expose_secret())
            .send()
            .await
            .map_err(transport_error)?;
        if !download.status().is_success() {
            return Err(api_error(download).await);
        }
        let mime_type = download
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
            .or(metadata.mime_type)
            .unwrap_or_else(|| "image/jpeg".to_owned());
        let bytes = download.bytes().await.map_err(transport_error)?;
        Ok(ImageData { mime_type, bytes: bytes.to_vec() })
    }
}

#[cfg(test)]
mod tests {
    use kiosk_core::channel::{InboundContent, MediaRef, OutboundBody, OutboundMessage, Channel};

    use super::{parse_envelope, WhatsAppClient};

    const TEXT_ENVELOPE: &str = r#"{
      "object": "whatsapp_business_account",
      "entry": [{
        "id": "102290129340398",
        "changes": [{
          "field": "messages",
          "value": {
            "messaging_product": "whatsapp",
            "metadata": { "display_phone_number": "15550783881", "phone_number_id": "106540352242922" },
            "contacts": [{ "profile": { "name": "Ada Obi" }, "wa_id": "2348000000001" }],
            "messages": [{
              "from": "2348000000001",
              "id": "wamid.HBgLMjM0ODAwMDAwMDAxFQIAEhgg",
              "timestamp": "1760860800",
              "type": "text",
              "text": { "body": "I want 2 sugar" }
            }]
          }
        }]
      }]
    }"#;

    #[test]
    fn text_message_is_normalized() {
        let inbound = parse_envelope(TEXT_ENVELOPE.as_bytes()).expect("parse");

        assert_eq!(inbound.len(), 1);
        let message = &inbound[0];
        assert_eq!(message.channel, Channel::WhatsApp);
        assert_eq!(message.sender_id, "2348000000001");
        assert_eq!(message.reply_to, "2348000000001");
        assert_eq!(message.display_name.as_deref(), Some("Ada Obi"));
        assert_eq!(message.business_address.as_deref(), Some("106540352242922"));
        assert_eq!(
            message.dedup_key.as_ref().map(|key| key.as_str()),
            Some("whatsapp:wamid.HBgLMjM0ODAwMDAwMDAxFQIAEhgg")
        );
        assert_eq!(message.text(), Some("I want 2 sugar"));
        assert_eq!(message.received_at.timestamp(), 1_760_860_800);
    }

    #[test]
    fn image_message_keeps_media_id_and_caption() {
        let body = r#"{"entry":[{"changes":[{"value":{
            "metadata": { "phone_number_id": "106540352242922" },
            "messages": [{ "from": "2348000000001", "id": "wamid.2", "type": "image",
                           "image": { "id": "1479537139650973", "mime_type": "image/jpeg", "caption": "receipt" } }]
        }}]}]}"#;

        let inbound = parse_envelope(body.as_bytes()).expect("parse");

        assert_eq!(
            inbound[0].content,
            InboundContent::Image {
                media: MediaRef("1479537139650973".to_owned()),
                caption: Some("receipt".to_owned())
            }
        );
        assert_eq!(inbound[0].display_name, None);
    }

    #[test]
    fn status_callbacks_and_unsupported_types_yield_nothing() {
        let statuses = r#"{"entry":[{"changes":[{"value":{
            "statuses": [{ "id": "wamid.1", "status": "delivered" }]
        }}]}]}"#;
        let sticker = r#"{"entry":[{"changes":[{"value":{
            "messages": [{ "from": "1", "id": "wamid.3", "type": "sticker", "sticker": { "id": "9" } }]
        }}]}]}"#;

        assert!(parse_envelope(statuses.as_bytes()).expect("parse").is_empty());
        assert!(parse_envelope(sticker.as_bytes()).expect("parse").is_empty());
        assert!(parse_envelope(b"{}").expect("parse").is_empty());
        assert!(parse_envelope(b"not json").is_err());
    }

    #[test]
    fn outbound_text_targets_recipient() {
        let message = OutboundMessage {
            channel: Channel::WhatsApp,
            recipient: "2348000000001".to_owned(),
            business_address: Some("106540352242922".to_owned()),
            body: OutboundBody::Text("Welcome!".to_owned()),
        };

        let body = WhatsAppClient::request_body(&message);

        assert_eq!(body["to"], "2348000000001");
        assert_eq!(body["type"], "text");
        assert_eq!(body["text"]["body"], "Welcome!");
    }
}
