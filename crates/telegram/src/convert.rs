//! teloxide → channel model conversion.

use teloxide::types::{
    self as tg, ChatKind as TgChatKind, MaybeInaccessibleMessage, MessageOrigin, PublicChatKind,
    UpdateKind as TgUpdateKind,
};

use tobym_channels::{
    CallbackQuery, Chat, ChatId, ChatKind, Error, Message, MessageId, Update, UpdateKind, User,
    UserId,
};

/// Decode a raw Bot API update, as posted to a webhook.
pub fn parse_update(body: &[u8]) -> tobym_channels::Result<tg::Update> {
    serde_json::from_slice(body).map_err(Error::invalid_input)
}

/// Convert an update. Kinds the bot does not handle yield `None`.
pub fn update(update: &tg::Update) -> Option<Update> {
    let kind = match &update.kind {
        TgUpdateKind::Message(msg) => UpdateKind::Message(message(msg)),
        TgUpdateKind::CallbackQuery(query) => UpdateKind::CallbackQuery(callback_query(query)),
        _ => return None,
    };
    Some(Update {
        id: i64::from(update.id.0),
        kind,
    })
}

pub fn message(msg: &tg::Message) -> Message {
    Message {
        id: MessageId(msg.id.0),
        chat: chat(&msg.chat),
        from: msg.from.as_ref().map(user),
        date: msg.date.timestamp(),
        text: msg.text().map(str::to_string),
        reply_to: msg.reply_to_message().map(|reply| Box::new(message(reply))),
        forwarded_from_chat: matches!(
            msg.forward_origin(),
            Some(MessageOrigin::Chat { .. } | MessageOrigin::Channel { .. })
        ),
        has_photo: msg.photo().is_some(),
    }
}

fn chat(chat: &tg::Chat) -> Chat {
    let kind = match &chat.kind {
        TgChatKind::Private(_) => ChatKind::Private,
        TgChatKind::Public(public) => match public.kind {
            PublicChatKind::Channel { .. } => ChatKind::Channel,
            PublicChatKind::Group { .. } => ChatKind::Group,
            PublicChatKind::Supergroup { .. } => ChatKind::Supergroup,
        },
    };
    Chat {
        id: ChatId(chat.id.0),
        kind,
        title: chat.title().map(str::to_string),
    }
}

fn user(user: &tg::User) -> User {
    User {
        id: UserId(user.id.0),
        is_bot: user.is_bot,
        first_name: user.first_name.clone(),
        username: user.username.clone(),
    }
}

fn callback_query(query: &tg::CallbackQuery) -> CallbackQuery {
    let message = match &query.message {
        Some(MaybeInaccessibleMessage::Regular(msg)) => Some(message(msg)),
        _ => None,
    };
    CallbackQuery {
        id: query.id.to_string(),
        from: user(&query.from),
        message,
        data: query.data.clone(),
    }
}
