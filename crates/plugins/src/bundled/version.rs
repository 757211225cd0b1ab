use std::sync::Arc;

use {
    async_trait::async_trait,
    tobym_channels::{Outbound, OutgoingMessage, ParseMode, Update},
    tokio_util::sync::CancellationToken,
};

use crate::{
    bundled::addressed_command,
    plugin::{CommandDescription, DescribeCommands, Outcome, Plugin},
};

/// Answers `/version` with the running build.
pub struct VersionPlugin {
    outbound: Arc<dyn Outbound>,
    version: String,
}

impl VersionPlugin {
    pub fn new(outbound: Arc<dyn Outbound>, version: impl Into<String>) -> Self {
        Self {
            outbound,
            version: version.into(),
        }
    }
}

#[async_trait]
impl Plugin for VersionPlugin {
    fn name(&self) -> &str {
        "version"
    }

    async fn handle_update(
        &self,
        _cancel: &CancellationToken,
        update: &Update,
    ) -> anyhow::Result<Outcome> {
        let Some(msg) = update.message() else {
            return Ok(Outcome::Continue);
        };
        match addressed_command(self.outbound.as_ref(), msg).await? {
            Some(cmd) if cmd.name == "version" => {},
            _ => return Ok(Outcome::Continue),
        }
        self.outbound
            .send(
                OutgoingMessage::text(msg.chat.id, format!("`{}`", self.version))
                    .parse_mode(ParseMode::MarkdownV2),
            )
            .await?;
        Ok(Outcome::Claimed)
    }

    fn command_descriptions(&self) -> Option<&dyn DescribeCommands> {
        Some(self)
    }
}

impl DescribeCommands for VersionPlugin {
    fn commands(&self) -> Vec<CommandDescription> {
        vec![CommandDescription::new("version", "Show bot version", "")]
    }
}
