use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::conversation::ConversationId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

/// Channel-native message identifier, namespaced by channel.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey(pub String);

impl DedupKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderType {
    Customer,
    Bot,
    Staff,
}

impl SenderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Bot => "bot",
            Self::Staff => "staff",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "customer" => Some(Self::Customer),
            "bot" => Some(Self::Bot),
            "staff" => Some(Self::Staff),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            _ => None,
        }
    }
}

/// Append-only conversation log entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender: SenderType,
    pub kind: MessageKind,
    pub content: String,
    pub dedup_key: Option<DedupKey>,
    pub media_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn inbound(
        conversation_id: ConversationId,
        kind: MessageKind,
        content: impl Into<String>,
        dedup_key: Option<DedupKey>,
        media_ref: Option<String>,
    ) -> Self {
        Self {
            id: MessageId(Uuid::new_v4().to_string()),
            conversation_id,
            sender: SenderType::Customer,
            kind,
            content: content.into(),
            dedup_key,
            media_ref,
            created_at: Utc::now(),
        }
    }

    pub fn bot_reply(conversation_id: ConversationId, content: impl Into<String>) -> Self {
        Self {
            id: MessageId(Uuid::new_v4().to_string()),
            conversation_id,
            sender: SenderType::Bot,
            kind: MessageKind::Text,
            content: content.into(),
            dedup_key: None,
            media_ref: None,
            created_at: Utc::now(),
        }
    }
}
