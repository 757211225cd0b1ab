use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

use crate::{
    Result,
    update::{ChatId, MessageId},
};

/// Text formatting applied by the platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMode {
    #[default]
    Plain,
    /// Legacy markdown.
    Markdown,
    MarkdownV2,
    Html,
}

/// One inline-keyboard button carrying opaque callback data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineButton {
    pub label: String,
    pub data: String,
}

impl InlineButton {
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}

/// A text message to send, with an optional single row of buttons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub chat: ChatId,
    pub text: String,
    pub parse_mode: ParseMode,
    pub reply_to: Option<MessageId>,
    pub buttons: Vec<InlineButton>,
}

impl OutgoingMessage {
    pub fn text(chat: ChatId, text: impl Into<String>) -> Self {
        Self {
            chat,
            text: text.into(),
            parse_mode: ParseMode::Plain,
            reply_to: None,
            buttons: Vec::new(),
        }
    }

    #[must_use]
    pub fn parse_mode(mut self, mode: ParseMode) -> Self {
        self.parse_mode = mode;
        self
    }

    #[must_use]
    pub fn reply_to(mut self, message: MessageId) -> Self {
        self.reply_to = Some(message);
        self
    }

    #[must_use]
    pub fn buttons(mut self, buttons: Vec<InlineButton>) -> Self {
        self.buttons = buttons;
        self
    }
}

/// Send side of the chat platform.
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Send a message, returning the id the platform assigned to it.
    async fn send(&self, message: OutgoingMessage) -> Result<MessageId>;

    /// Replace the button row attached to a previously sent message.
    async fn edit_buttons(
        &self,
        chat: ChatId,
        message: MessageId,
        buttons: Vec<InlineButton>,
    ) -> Result<()>;

    /// Acknowledge a button press, optionally showing a short toast.
    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()>;

    /// The bot's own username. Also serves as the credential check.
    async fn bot_username(&self) -> Result<Option<String>>;
}
