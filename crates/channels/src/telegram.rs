use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use kiosk_core::channel::{
    Channel, ChannelError, ChannelSender, ImageData, InboundContent, InboundMessage, MediaRef,
    OutboundBody, OutboundMessage,
};
use kiosk_core::config::TelegramConfig;
use kiosk_core::domain::message::DedupKey;
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::{api_error, transport_error};

pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Debug, Deserialize)]
struct Update {
    message: Option<WireMessage>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    message_id: i64,
    date: Option<i64>,
    from: Option<User>,
    chat: Chat,
    text: Option<String>,
    caption: Option<String>,
    photo: Option<Vec<PhotoSize>>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
    first_name: Option<String>,
    last_name: Option<String>,
    username: Option<String>,
}

impl User {
    fn display_name(&self) -> Option<String> {
        let full = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if full.is_empty() {
            self.username.clone()
        } else {
            Some(full)
        }
    }
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct PhotoSize {
    file_id: String,
    file_size: Option<u64>,
    width: Option<u32>,
    height: Option<u32>,
}

impl PhotoSize {
    fn area(&self) -> u64 {
        u64::from(self.width.unwrap_or(0)) * u64::from(self.height.unwrap_or(0))
    }
}

/// Normalizes a Bot API update. Non-message updates and messages without text
/// or a photo yield `None`.
pub fn parse_update(body: &[u8]) -> Result<Option<InboundMessage>, ChannelError> {
    let update: Update = serde_json::from_slice(body)
        .map_err(|error| ChannelError::Decode(format!("telegram update: {error}")))?;
    let Some(message) = update.message else {
        return Ok(None);
    };

    let content = match (message.photo, message.text) {
        (Some(photos), _) if !photos.is_empty() => {
            // Sizes arrive smallest first; prefer the reported byte size when present.
            let largest = photos
                .into_iter()
                .max_by_key(|photo| (photo.file_size.unwrap_or(0), photo.area()))
                .map(|photo| photo.file_id);
            match largest {
                Some(file_id) => InboundContent::Image {
                    media: MediaRef(file_id),
                    caption: message.caption.filter(|caption| !caption.trim().is_empty()),
                },
                None => return Ok(None),
            }
        }
        (_, Some(text)) => InboundContent::Text(text),
        _ => {
            debug!(
                event_name = "channel.telegram.unsupported_message",
                chat_id = message.chat.id,
                "unsupported telegram message skipped"
            );
            return Ok(None);
        }
    };

    let sender = message.from.as_ref().map(|user| user.id).unwrap_or(message.chat.id);
    Ok(Some(InboundMessage {
        channel: Channel::Telegram,
        sender_id: format!("telegram:{sender}"),
        reply_to: message.chat.id.to_string(),
        display_name: message.from.as_ref().and_then(User::display_name),
        dedup_key: Some(DedupKey(format!("telegram:{}:{}", message.chat.id, message.message_id))),
        business_address: None,
        content,
        received_at: parse_date(message.date),
    }))
}

fn parse_date(date: Option<i64>) -> DateTime<Utc> {
    date.and_then(|seconds| Utc.timestamp_opt(seconds, 0).single()).unwrap_or_else(Utc::now)
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct File {
    file_path: Option<String>,
}

/// Bot API sender. Replies go to the chat id carried on the inbound message.
pub struct TelegramClient {
    http: reqwest::Client,
    api_base_url: String,
    bot_token: SecretString,
}

impl TelegramClient {
    /// `None` when no bot token is configured.
    pub fn from_config(config: &TelegramConfig, timeout: Duration) -> Result<Option<Self>, ChannelError> {
        let Some(bot_token) = config.bot_token.clone() else {
            return Ok(None);
        };
        let http = reqwest::Client::builder().timeout(timeout).build().map_err(transport_error)?;
        Ok(Some(Self {
            http,
            api_base_url: config.api_base_url.trim_end_matches('/').to_owned(),
            bot_token,
        }))
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base_url, self.bot_token.expose_secret())
    }

    fn request(message: &OutboundMessage) -> (&'static str, Value) {
        match &message.body {
            OutboundBody::Text(text) => {
                ("sendMessage", json!({ "chat_id": message.recipient, "text": text }))
            }
            OutboundBody::Image { url, caption } => (
                "sendPhoto",
                json!({ "chat_id": message.recipient, "photo": url, "caption": caption }),
            ),
        }
    }
}

#[async_trait]
impl ChannelSender for TelegramClient {
    fn channel(&self) -> Channel {
        Channel::Telegram
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), ChannelError> {
        let (method, body) = Self::request(message);
        let response = self
            .http
            .post(self.method_url(method))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(())
    }

    async fn fetch_media(&self, media: &MediaRef) -> Result<ImageData, ChannelError> {
        let response = self
            .http
            .get(self.method_url("getFile"))
            .query(&[("file_id", media.0.as_str())])
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        let file: ApiResponse<File> = response
            .json()
            .await
            .map_err(|error| ChannelError::Decode(format!("telegram getFile: {error}")))?;
        let file_path = match file {
            ApiResponse { ok: true, result: Some(File { file_path: Some(path) }), .. } => path,
            ApiResponse { description, .. } => {
                return Err(ChannelError::Api {
                    status: 200,
                    body: description.unwrap_or_else(|| "file has no download path".to_owned()),
                })
            }
        };

        let download = self
            .http
            .get(format!(
                "{}/file/bot{}/{file_path}",
                self.api_base_url,
                self.bot_token.expose_secret()
            ))
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
            .filter(|value| value.starts_with("image/"))
            .unwrap_or("image/jpeg")
            .to_owned();
        let bytes = download.bytes().await.map_err(transport_error)?;
        Ok(ImageData { mime_type, bytes: bytes.to_vec() })
    }
}
