use std::{future::Future, time::Duration};

use {
    async_trait::async_trait,
    teloxide::{
        ApiError, RequestError,
        payloads::{AnswerCallbackQuerySetters, EditMessageReplyMarkupSetters, SendMessageSetters},
        prelude::*,
        types::{
            ChatId as TgChatId, InlineKeyboardButton, InlineKeyboardMarkup,
            MessageId as TgMessageId, ParseMode as TgParseMode, ReplyParameters,
        },
    },
    tokio::sync::OnceCell,
    tracing::{debug, warn},
};

use tobym_channels::{
    ChatId, Error as ChannelError, InlineButton, MessageId, Outbound, OutgoingMessage, ParseMode,
    Result as ChannelResult,
};

const TELEGRAM_RETRY_AFTER_MAX_RETRIES: usize = 4;

/// Sends through the Bot API.
pub struct TelegramOutbound {
    bot: Bot,
    username: OnceCell<Option<String>>,
}

impl TelegramOutbound {
    pub fn new(bot: Bot) -> Self {
        Self {
            bot,
            username: OnceCell::new(),
        }
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    async fn run_telegram_request_with_retry<T, F, Fut>(
        &self,
        chat: Option<ChatId>,
        operation: &'static str,
        mut request: F,
    ) -> Result<T, RequestError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RequestError>>,
    {
        let chat_id = chat.map(|c| c.0);
        let mut retries = 0usize;

        loop {
            match request().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let Some(wait) = retry_after_duration(&err) else {
                        return Err(err);
                    };

                    if retries >= TELEGRAM_RETRY_AFTER_MAX_RETRIES {
                        warn!(
                            chat_id = ?chat_id,
                            operation,
                            retries,
                            retry_after_secs = wait.as_secs(),
                            "telegram rate limit persisted after retries"
                        );
                        return Err(err);
                    }

                    retries += 1;
                    warn!(
                        chat_id = ?chat_id,
                        operation,
                        retries,
                        max_retries = TELEGRAM_RETRY_AFTER_MAX_RETRIES,
                        retry_after_secs = wait.as_secs(),
                        "telegram rate limited, waiting before retry"
                    );
                    tokio::time::sleep(wait).await;
                },
            }
        }
    }
}

#[async_trait]
impl Outbound for TelegramOutbound {
    async fn send(&self, message: OutgoingMessage) -> ChannelResult<MessageId> {
        let chat_id = TgChatId(message.chat.0);
        let parse_mode = telegram_parse_mode(message.parse_mode);
        let reply = message
            .reply_to
            .map(|id| ReplyParameters::new(TgMessageId(id.0)).allow_sending_without_reply());
        let keyboard = keyboard(&message.buttons);

        let sent = self
            .run_telegram_request_with_retry(Some(message.chat), "send message", || {
                let mut req = self.bot.send_message(chat_id, message.text.as_str());
                if let Some(mode) = parse_mode {
                    req = req.parse_mode(mode);
                }
                if let Some(rp) = &reply {
                    req = req.reply_parameters(rp.clone());
                }
                if let Some(markup) = &keyboard {
                    req = req.reply_markup(markup.clone());
                }
                async move { req.await }
            })
            .await
            .map_err(|e| ChannelError::external("telegram sendMessage", e))?;

        debug!(chat_id = message.chat.0, message_id = sent.id.0, "telegram message sent");
        Ok(MessageId(sent.id.0))
    }

    async fn edit_buttons(
        &self,
        chat: ChatId,
        message: MessageId,
        buttons: Vec<InlineButton>,
    ) -> ChannelResult<()> {
        let markup = keyboard(&buttons)
            .unwrap_or_else(|| InlineKeyboardMarkup::new(Vec::<Vec<InlineKeyboardButton>>::new()));
        let result = self
            .run_telegram_request_with_retry(Some(chat), "edit reply markup", || {
                let req = self
                    .bot
                    .edit_message_reply_markup(TgChatId(chat.0), TgMessageId(message.0))
                    .reply_markup(markup.clone());
                async move { req.await }
            })
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_message_not_modified_error(&e) => {
                debug!(chat_id = chat.0, message_id = message.0, "reply markup unchanged");
                Ok(())
            },
            Err(e) => Err(ChannelError::external("telegram editMessageReplyMarkup", e)),
        }
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> ChannelResult<()> {
        self.run_telegram_request_with_retry(None, "answer callback", || {
            let mut req = self.bot.answer_callback_query(callback_id);
            if let Some(text) = text {
                req = req.text(text);
            }
            async move { req.await }
        })
        .await
        .map_err(|e| ChannelError::external("telegram answerCallbackQuery", e))?;
        Ok(())
    }

    async fn bot_username(&self) -> ChannelResult<Option<String>> {
        let username = self
            .username
            .get_or_try_init(|| async {
                let me = self.bot.get_me().await?;
                Ok::<_, RequestError>(me.username.clone())
            })
            .await
            .map_err(|e| ChannelError::external("telegram getMe", e))?;
        Ok(username.clone())
    }
}

#[allow(deprecated)]
fn telegram_parse_mode(mode: ParseMode) -> Option<TgParseMode> {
    match mode {
        ParseMode::Plain => None,
        ParseMode::Markdown => Some(TgParseMode::Markdown),
        ParseMode::MarkdownV2 => Some(TgParseMode::MarkdownV2),
        ParseMode::Html => Some(TgParseMode::Html),
    }
}

/// One row of callback buttons, or `None` when there are no buttons.
fn keyboard(buttons: &[InlineButton]) -> Option<InlineKeyboardMarkup> {
    if buttons.is_empty() {
        return None;
    }
    let row = buttons
        .iter()
        .map(|b| InlineKeyboardButton::callback(b.label.clone(), b.data.clone()))
        .collect::<Vec<_>>();
    Some(InlineKeyboardMarkup::new(vec![row]))
}

fn retry_after_duration(error: &RequestError) -> Option<Duration> {
    match error {
        RequestError::RetryAfter(wait) => Some(wait.duration()),
        _ => None,
    }
}

fn is_message_not_modified_error(error: &RequestError) -> bool {
    matches!(error, RequestError::Api(ApiError::MessageNotModified))
}
