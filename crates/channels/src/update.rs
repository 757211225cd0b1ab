use serde::{Deserialize, Serialize};

/// Chat identifier as issued by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

/// Message identifier, unique within a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i32);

/// User identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub kind: ChatKind,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub is_bot: bool,
    pub first_name: String,
    pub username: Option<String>,
}

impl User {
    /// `@username` when available, otherwise the first name.
    pub fn display_name(&self) -> String {
        match &self.username {
            Some(username) => format!("@{username}"),
            None => self.first_name.clone(),
        }
    }
}

/// A chat message, reduced to what plugins need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub chat: Chat,
    pub from: Option<User>,
    /// Unix timestamp, seconds.
    pub date: i64,
    pub text: Option<String>,
    pub reply_to: Option<Box<Message>>,
    /// Set when the message was forwarded from a channel or group.
    pub forwarded_from_chat: bool,
    pub has_photo: bool,
}

/// A parsed `/name@mention args` bot command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command<'a> {
    pub name: &'a str,
    pub mention: Option<&'a str>,
    pub args: &'a str,
}

impl Message {
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn is_private(&self) -> bool {
        self.chat.kind == ChatKind::Private
    }

    /// Parse the message text as a bot command.
    ///
    /// Returns `None` unless the text starts with `/` followed by a
    /// non-empty name.
    pub fn command(&self) -> Option<Command<'_>> {
        let text = self.text()?.strip_prefix('/')?;
        let (head, args) = match text.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (text, ""),
        };
        let (name, mention) = match head.split_once('@') {
            Some((name, mention)) => (name, Some(mention)),
            None => (head, None),
        };
        if name.is_empty() {
            return None;
        }
        Some(Command {
            name,
            mention,
            args,
        })
    }

    /// True when the text mentions `@username`.
    pub fn mentions(&self, username: &str) -> bool {
        let Some(text) = self.text() else {
            return false;
        };
        let needle = format!("@{username}");
        text.match_indices(&needle).any(|(idx, _)| {
            text[idx + needle.len()..]
                .chars()
                .next()
                .is_none_or(|c| !(c.is_alphanumeric() || c == '_'))
        })
    }

    /// Private chats are always addressed to the bot; elsewhere the text
    /// must mention it.
    pub fn is_addressed_to(&self, bot_username: Option<&str>) -> bool {
        self.is_private() || bot_username.is_some_and(|name| self.mentions(name))
    }
}

/// Inline-keyboard button press.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    /// The bot message carrying the keyboard, when still accessible.
    pub message: Option<Message>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpdateKind {
    Message(Message),
    CallbackQuery(CallbackQuery),
}

/// One inbound event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub id: i64,
    pub kind: UpdateKind,
}

impl Update {
    pub fn message(&self) -> Option<&Message> {
        match &self.kind {
            UpdateKind::Message(msg) => Some(msg),
            UpdateKind::CallbackQuery(_) => None,
        }
    }

    pub fn callback_query(&self) -> Option<&CallbackQuery> {
        match &self.kind {
            UpdateKind::CallbackQuery(query) => Some(query),
            UpdateKind::Message(_) => None,
        }
    }

    /// Chat the update belongs to, if any.
    pub fn chat_id(&self) -> Option<ChatId> {
        match &self.kind {
            UpdateKind::Message(msg) => Some(msg.chat.id),
            UpdateKind::CallbackQuery(query) => query.message.as_ref().map(|m| m.chat.id),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn text_message(kind: ChatKind, text: &str) -> Message {
        Message {
            id: MessageId(1),
            chat: Chat {
                id: ChatId(42),
                kind,
                title: None,
            },
            from: None,
            date: 0,
            text: Some(text.to_string()),
            reply_to: None,
            forwarded_from_chat: false,
            has_photo: false,
        }
    }

    #[rstest]
    #[case("/help", "help", None, "")]
    #[case("/help short", "help", None, "short")]
    #[case("/help@tobym_bot", "help", Some("tobym_bot"), "")]
    #[case("/time@tobym_bot  10:30 ", "time", Some("tobym_bot"), "10:30")]
    #[case("/set_timezones Europe/Berlin UTC", "set_timezones", None, "Europe/Berlin UTC")]
    fn parses_commands(
        #[case] text: &str,
        #[case] name: &str,
        #[case] mention: Option<&str>,
        #[case] args: &str,
    ) {
        let msg = text_message(ChatKind::Group, text);
        let cmd = msg.command().expect("command");
        assert_eq!(cmd.name, name);
        assert_eq!(cmd.mention, mention);
        assert_eq!(cmd.args, args);
    }

    #[rstest]
    #[case("hello")]
    #[case("/")]
    #[case("/@bot")]
    #[case(" /help")]
    fn rejects_non_commands(#[case] text: &str) {
        assert!(text_message(ChatKind::Group, text).command().is_none());
    }

    #[test]
    fn mention_requires_word_boundary() {
        let msg = text_message(ChatKind::Group, "hey @tobym_bot!");
        assert!(msg.mentions("tobym_bot"));
        let msg = text_message(ChatKind::Group, "hey @tobym_bot_two");
        assert!(!msg.mentions("tobym_bot"));
    }

    #[test]
    fn private_chats_are_always_addressed() {
        let msg = text_message(ChatKind::Private, "/help");
        assert!(msg.is_addressed_to(None));
        let msg = text_message(ChatKind::Group, "/help");
        assert!(!msg.is_addressed_to(Some("tobym_bot")));
        let msg = text_message(ChatKind::Group, "/help@tobym_bot");
        assert!(msg.is_addressed_to(Some("tobym_bot")));
    }

    #[test]
    fn update_serializes_with_kind_tag() {
        let update = Update {
            id: 7,
            kind: UpdateKind::Message(text_message(ChatKind::Private, "hi")),
        };
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["kind"]["kind"], "message");
        assert_eq!(update.chat_id(), Some(ChatId(42)));
    }
}
