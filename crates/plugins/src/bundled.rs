//! Feature plugins shipped with the bot.

pub mod help;
pub mod monitor;
pub mod notifier;
pub mod timezone;
pub mod version;
pub mod vote;

use std::sync::Arc;

use {
    tobym_channels::{Command, Message, Outbound},
    tobym_store::Store,
};

use crate::plugin::Plugin;

/// Default base URL printed in notify-token instructions.
pub const DEFAULT_APP_URL: &str = "http://127.0.0.1";

/// Shared handles the bundled plugins are built from.
#[derive(Clone)]
pub struct PluginContext {
    pub outbound: Arc<dyn Outbound>,
    pub store: Arc<Store>,
    pub version: String,
    pub app_url: String,
}

/// The bundled plugins in dispatch order.
pub fn default_plugins(ctx: &PluginContext) -> Vec<Arc<dyn Plugin>> {
    let version = Arc::new(version::VersionPlugin::new(
        Arc::clone(&ctx.outbound),
        ctx.version.clone(),
    ));
    let monitor = Arc::new(monitor::MonitorPlugin::new(
        Arc::clone(&ctx.outbound),
        Arc::clone(&ctx.store),
    ));
    let notifier = Arc::new(notifier::NotifierPlugin::new(
        Arc::clone(&ctx.outbound),
        Arc::clone(&ctx.store),
        ctx.app_url.clone(),
    ));
    let vote = Arc::new(vote::VotePlugin::new(
        Arc::clone(&ctx.outbound),
        Arc::clone(&ctx.store),
    ));
    let timezone = Arc::new(timezone::TimezonePlugin::new(
        Arc::clone(&ctx.outbound),
        Arc::clone(&ctx.store),
    ));

    let help = Arc::new(help::HelpPlugin::new(Arc::clone(&ctx.outbound)));

    vec![help, version, monitor, notifier, vote, timezone]
}

/// The message's command, if the message is a command addressed to this bot.
///
/// A message is addressed when it comes from a private chat or mentions the
/// bot. `/cmd@other_bot` is never ours.
pub(crate) async fn addressed_command<'a>(
    outbound: &dyn Outbound,
    msg: &'a Message,
) -> tobym_channels::Result<Option<Command<'a>>> {
    let Some(cmd) = msg.command() else {
        return Ok(None);
    };
    let username = outbound.bot_username().await?;
    if let Some(mention) = cmd.mention
        && username.as_deref() != Some(mention)
    {
        return Ok(None);
    }
    if !msg.is_addressed_to(username.as_deref()) {
        return Ok(None);
    }
    Ok(Some(cmd))
}

#[cfg(test)]
pub(crate) mod test_support {
    use tobym_channels::{
        CallbackQuery, Chat, ChatId, ChatKind, Message, MessageId, Update, UpdateKind, User,
        UserId,
    };

    pub const BOT: &str = "tobym_test_bot";

    pub fn user(id: u64) -> User {
        User {
            id: UserId(id),
            is_bot: false,
            first_name: format!("user{id}"),
            username: None,
        }
    }

    pub fn message(chat: i64, kind: ChatKind, id: i32, text: &str) -> Message {
        Message {
            id: MessageId(id),
            chat: Chat {
                id: ChatId(chat),
                kind,
                title: None,
            },
            from: Some(user(7)),
            date: 1_700_000_000,
            text: Some(text.to_string()),
            reply_to: None,
            forwarded_from_chat: false,
            has_photo: false,
        }
    }

    pub fn private(chat: i64, text: &str) -> Update {
        message_update(message(chat, ChatKind::Private, 10, text))
    }

    pub fn group(chat: i64, text: &str) -> Update {
        message_update(message(chat, ChatKind::Supergroup, 10, text))
    }

    pub fn message_update(msg: Message) -> Update {
        Update {
            id: 1,
            kind: UpdateKind::Message(msg),
        }
    }

    pub fn callback(from: u64, message: Option<Message>, data: &str) -> Update {
        Update {
            id: 2,
            kind: UpdateKind::CallbackQuery(CallbackQuery {
                id: format!("cb-{from}"),
                from: user(from),
                message,
                data: Some(data.to_string()),
            }),
        }
    }
}
