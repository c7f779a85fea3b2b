use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{MessageId, ParseMode, ReplyParameters};
use teloxide::{ApiError, RequestError};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Plain,
    /// Telegram MarkdownV2, text must already be escaped
    Markdown,
}

/// Why a message could not be delivered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("chat migrated to {0}")]
    Migrated(ChatId),
    #[error("bot has no access to the chat")]
    Unauthorized,
    #[error("network error: {0}")]
    Network(String),
    #[error("{0}")]
    Other(String),
}

impl From<RequestError> for DeliveryError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::MigrateToChatId(new_id) => DeliveryError::Migrated(new_id),
            RequestError::Api(
                ApiError::BotBlocked
                | ApiError::BotKicked
                | ApiError::BotKickedFromSupergroup
                | ApiError::UserDeactivated
                | ApiError::CantInitiateConversation
                | ApiError::CantTalkWithBots,
            ) => DeliveryError::Unauthorized,
            // 403s whose wording teloxide does not know yet
            RequestError::Api(ApiError::Unknown(ref text)) if is_forbidden(text) => {
                DeliveryError::Unauthorized
            }
            RequestError::Network(_) | RequestError::Io(_) => {
                DeliveryError::Network(err.to_string())
            }
            other => DeliveryError::Other(other.to_string()),
        }
    }
}

fn is_forbidden(description: &str) -> bool {
    description.starts_with("Forbidden:") || description.starts_with("Unauthorized:")
}

#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send `text` to the chat, as a reply to `reply_to` if given.
    async fn send(
        &self,
        chat_id: ChatId,
        text: &str,
        format: Format,
        reply_to: Option<MessageId>,
    ) -> Result<(), DeliveryError>;
}

#[async_trait]
impl Messenger for Bot {
    async fn send(
        &self,
        chat_id: ChatId,
        text: &str,
        format: Format,
        reply_to: Option<MessageId>,
    ) -> Result<(), DeliveryError> {
        let mut request = self.send_message(chat_id, text);

        if format == Format::Markdown {
            request = request.parse_mode(ParseMode::MarkdownV2);
        }

        if let Some(reply_to) = reply_to {
            request = request.reply_parameters(ReplyParameters::new(reply_to));
        }

        request.await?;
        Ok(())
    }
}
