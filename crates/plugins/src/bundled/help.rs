use std::{
    fmt::Write as _,
    sync::{Arc, OnceLock},
};

use {
    async_trait::async_trait,
    tobym_channels::{Message, Outbound, OutgoingMessage, Update},
    tokio_util::sync::CancellationToken,
    tracing::debug,
};

use crate::{
    bundled::addressed_command,
    plugin::{CommandDescription, DescribeCommands, ListCommands, Outcome, Plugin},
};

/// Lists every command the bot answers.
///
/// The listing is filled in by the registry before plugins are initialized.
/// Until then only the help command itself is listed.
pub struct HelpPlugin {
    outbound: Arc<dyn Outbound>,
    commands: OnceLock<Vec<CommandDescription>>,
}

impl HelpPlugin {
    pub fn new(outbound: Arc<dyn Outbound>) -> Self {
        Self {
            outbound,
            commands: OnceLock::new(),
        }
    }

    /// The help command's own entry.
    pub fn own_commands() -> Vec<CommandDescription> {
        vec![CommandDescription::new("help", "Show usage", "")]
    }

    /// Help requested by `msg`: `Some(short)` or `None` when not a help request.
    async fn requested(&self, msg: &Message) -> anyhow::Result<Option<bool>> {
        // `/help_short` works even when the bot is not mentioned.
        if let Some(cmd) = msg.command()
            && cmd.name == "help_short"
        {
            let ours = match cmd.mention {
                Some(mention) => {
                    self.outbound.bot_username().await?.as_deref() == Some(mention)
                },
                None => true,
            };
            return Ok(ours.then_some(true));
        }
        Ok(match addressed_command(self.outbound.as_ref(), msg).await? {
            Some(cmd) if cmd.name == "help" => Some(cmd.args == "short"),
            _ => None,
        })
    }
}

/// Render the command list.
///
/// `suffix` is appended to each command (`@botname` outside private chats).
pub fn render(commands: &[CommandDescription], suffix: &str, short: bool) -> String {
    let mut text = String::new();
    for cmd in commands {
        let _ = writeln!(text, "/{}{} - {}", cmd.command, suffix, cmd.help);
        if !short && !cmd.details.is_empty() {
            let _ = writeln!(text, "    {}", cmd.details);
        }
    }
    text.trim_end().to_string()
}

#[async_trait]
impl Plugin for HelpPlugin {
    fn name(&self) -> &str {
        "help"
    }

    async fn handle_update(
        &self,
        _cancel: &CancellationToken,
        update: &Update,
    ) -> anyhow::Result<Outcome> {
        let Some(msg) = update.message() else {
            return Ok(Outcome::Continue);
        };
        let Some(short) = self.requested(msg).await? else {
            return Ok(Outcome::Continue);
        };

        let suffix = if msg.is_private() {
            String::new()
        } else {
            self.outbound
                .bot_username()
                .await?
                .map(|name| format!("@{name}"))
                .unwrap_or_default()
        };
        let text = match self.commands.get() {
            Some(commands) => render(commands, &suffix, short),
            None => render(&Self::own_commands(), &suffix, short),
        };
        self.outbound
            .send(OutgoingMessage::text(msg.chat.id, text))
            .await?;
        Ok(Outcome::Claimed)
    }

    fn command_descriptions(&self) -> Option<&dyn DescribeCommands> {
        Some(self)
    }

    fn command_listing(&self) -> Option<&dyn ListCommands> {
        Some(self)
    }
}

impl DescribeCommands for HelpPlugin {
    fn commands(&self) -> Vec<CommandDescription> {
        Self::own_commands()
    }
}

impl ListCommands for HelpPlugin {
    fn set_commands(&self, commands: Vec<CommandDescription>) {
        if self.commands.set(commands).is_err() {
            debug!("command listing already set, keeping the first one");
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            PluginRegistry,
            bundled::{DEFAULT_APP_URL, PluginContext, default_plugins, test_support::*},
        },
        tobym_channels::{ParseMode, testing::RecordingOutbound},
    };

    fn commands() -> Vec<CommandDescription> {
        vec![
            CommandDescription::new("help", "Show usage", ""),
            CommandDescription::new("time", "Show time", "/time 10:30 converts a time"),
            CommandDescription::new("version", "Show bot version", ""),
        ]
    }

    fn plugin() -> (Arc<RecordingOutbound>, HelpPlugin) {
        let outbound = Arc::new(RecordingOutbound::new(BOT));
        let plugin = HelpPlugin::new(outbound.clone());
        plugin.set_commands(commands());
        (outbound, plugin)
    }

    #[tokio::test]
    async fn help_short_in_private_lists_each_command_once() {
        let (outbound, plugin) = plugin();
        let outcome = plugin
            .handle_update(&CancellationToken::new(), &private(1, "/help_short"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Claimed);

        let sent = outbound.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].parse_mode, ParseMode::Plain);
        let lines: Vec<&str> = sent[0].text.lines().collect();
        assert_eq!(lines, vec![
            "/help - Show usage",
            "/time - Show time",
            "/version - Show bot version",
        ]);
    }

    #[tokio::test]
    async fn full_help_includes_details() {
        let (outbound, plugin) = plugin();
        plugin
            .handle_update(&CancellationToken::new(), &private(1, "/help"))
            .await
            .unwrap();
        let text = &outbound.sent()[0].text;
        assert!(text.contains("/time - Show time\n    /time 10:30 converts a time"));
    }

    #[tokio::test]
    async fn help_with_short_argument() {
        let (outbound, plugin) = plugin();
        plugin
            .handle_update(&CancellationToken::new(), &private(1, "/help short"))
            .await
            .unwrap();
        assert!(!outbound.sent()[0].text.contains("converts"));
    }

    #[tokio::test]
    async fn group_listing_carries_bot_suffix() {
        let (outbound, plugin) = plugin();
        plugin
            .handle_update(&CancellationToken::new(), &group(1, "/help_short"))
            .await
            .unwrap();
        assert!(
            outbound.sent()[0]
                .text
                .starts_with("/help@tobym_test_bot - Show usage")
        );
    }

    #[tokio::test]
    async fn unaddressed_group_help_is_ignored() {
        let (outbound, plugin) = plugin();
        let outcome = plugin
            .handle_update(&CancellationToken::new(), &group(1, "/help"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Continue);
        let outcome = plugin
            .handle_update(&CancellationToken::new(), &group(1, "/help_short@other_bot"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Continue);
        assert!(outbound.sent().is_empty());
    }

    #[tokio::test]
    async fn lists_commands_of_plugins_registered_after_the_defaults() {
        struct Extra;

        #[async_trait]
        impl Plugin for Extra {
            fn name(&self) -> &str {
                "extra"
            }

            async fn handle_update(
                &self,
                _cancel: &CancellationToken,
                _update: &Update,
            ) -> anyhow::Result<Outcome> {
                Ok(Outcome::Continue)
            }

            fn command_descriptions(&self) -> Option<&dyn DescribeCommands> {
                Some(self)
            }
        }

        impl DescribeCommands for Extra {
            fn commands(&self) -> Vec<CommandDescription> {
                vec![CommandDescription::new("extra", "Do the extra thing", "")]
            }
        }

        let outbound = Arc::new(RecordingOutbound::new(BOT));
        let store = Arc::new(tobym_store::Store::in_memory().await.unwrap());
        let mut registry = PluginRegistry::new();
        for plugin in default_plugins(&PluginContext {
            outbound: outbound.clone(),
            store,
            version: "1.0.0".into(),
            app_url: DEFAULT_APP_URL.into(),
        }) {
            registry.register(plugin);
        }
        registry.register(Arc::new(Extra));
        registry.init_all().await.unwrap();

        let report = registry
            .dispatch(&CancellationToken::new(), &private(1, "/help_short"))
            .await;
        assert_eq!(report.claimed_by.as_deref(), Some("help"));

        let sent = outbound.sent();
        let text = &sent.last().unwrap().text;
        let listed: Vec<&str> = text
            .lines()
            .filter_map(|line| line.split(' ').next())
            .collect();
        let expected: Vec<String> = registry
            .commands()
            .into_iter()
            .map(|c| format!("/{}", c.command))
            .collect();
        assert_eq!(listed, expected);
        assert_eq!(listed.first(), Some(&"/help"));
        assert_eq!(listed.last(), Some(&"/extra"));
        registry.close_all(registry.len()).await;
    }

    #[tokio::test]
    async fn unpublished_listing_shows_help_only() {
        let outbound = Arc::new(RecordingOutbound::new(BOT));
        let plugin = HelpPlugin::new(outbound.clone());
        plugin
            .handle_update(&CancellationToken::new(), &private(1, "/help_short"))
            .await
            .unwrap();
        assert_eq!(outbound.sent()[0].text, "/help - Show usage");
    }
}
