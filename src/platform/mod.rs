pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

/// A text message received from the platform, already validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundUpdate {
    pub chat_id: i64,
    pub text: String,
}

/// Why an inbound payload could not be turned into an [`InboundUpdate`].
#[derive(Debug, thiserror::Error)]
pub enum InvalidUpdate {
    #[error("malformed update payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("update carries no message")]
    NoMessage,
    #[error("message has no chat id")]
    NoChat,
    #[error("message has no text")]
    NoText,
}

// Loose mirror of the Bot API update; every field may be absent.
#[derive(Debug, Deserialize)]
struct RawUpdate {
    message: Option<RawMessage>,
    edited_message: Option<RawMessage>,
    channel_post: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    chat: Option<RawChat>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawChat {
    id: Option<i64>,
}

impl InboundUpdate {
    /// Validate a raw webhook body.
    pub fn parse(body: &[u8]) -> Result<Self, InvalidUpdate> {
        let raw: RawUpdate = serde_json::from_slice(body)?;
        let message = raw
            .message
            .or(raw.edited_message)
            .or(raw.channel_post)
            .ok_or(InvalidUpdate::NoMessage)?;

        let chat_id = message
            .chat
            .and_then(|c| c.id)
            .ok_or(InvalidUpdate::NoChat)?;
        let text = message.text.ok_or(InvalidUpdate::NoText)?;

        Ok(Self { chat_id, text })
    }
}

/// Outbound side of the messaging platform.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Deliver one message. `text` must already fit the platform limit.
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()>;

    /// Show a "typing..." indicator in the chat.
    async fn send_typing(&self, chat_id: i64) -> Result<()>;
}
