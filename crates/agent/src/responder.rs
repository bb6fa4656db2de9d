use std::sync::Arc;

use kiosk_core::channel::{ChannelError, ChannelRegistry, OutboundBody, OutboundMessage};
use kiosk_core::domain::conversation::ConversationId;
use kiosk_core::domain::message::Message;
use kiosk_db::repositories::MessageRepository;
use tracing::warn;

/// Records bot replies in the conversation log and delivers them over the
/// originating channel.
#[derive(Clone)]
pub struct Responder {
    messages: Arc<dyn MessageRepository>,
    channels: ChannelRegistry,
}

impl Responder {
    pub fn new(messages: Arc<dyn MessageRepository>, channels: ChannelRegistry) -> Self {
        Self { messages, channels }
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    /// Logs the reply, then sends it. A failed log write does not stop delivery.
    pub async fn reply(
        &self,
        conversation_id: &ConversationId,
        outbound: OutboundMessage,
        correlation_id: &str,
    ) -> Result<(), ChannelError> {
        let content = match &outbound.body {
            OutboundBody::Text(text) => text.clone(),
            OutboundBody::Image { url, caption } => {
                caption.clone().unwrap_or_else(|| url.clone())
            }
        };
        if let Err(error) =
            self.messages.append(Message::bot_reply(conversation_id.clone(), content)).await
        {
            warn!(
                event_name = "engine.reply.log_failed",
                correlation_id,
                conversation_id = %conversation_id.0,
                error = %error,
                "bot reply could not be recorded"
            );
        }
        self.send(outbound, correlation_id).await
    }

    /// Sends without recording; used when no conversation exists.
    pub async fn send(&self, outbound: OutboundMessage, correlation_id: &str) -> Result<(), ChannelError> {
        let result = match self.channels.get(outbound.channel) {
            Ok(sender) => sender.send(&outbound).await,
            Err(error) => Err(error),
        };
        if let Err(error) = &result {
            warn!(
                event_name = "engine.reply.send_failed",
                correlation_id,
                channel = %outbound.channel,
                error = %error,
                "reply could not be delivered"
            );
        }
        result
    }
}
