use {
    anyhow::Result, async_trait::async_trait, serde::Serialize, tobym_channels::Update,
    tokio_util::sync::CancellationToken,
};

/// What a plugin did with an update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Outcome {
    /// Let later plugins see the update.
    #[default]
    Continue,
    /// The update is fully handled; stop the chain.
    Claimed,
}

impl Outcome {
    pub fn is_claimed(self) -> bool {
        self == Self::Claimed
    }
}

/// A chat command as listed by `/help`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandDescription {
    /// Command name without the leading slash.
    pub command: String,
    pub help: String,
    /// Extra usage notes, shown only in the full listing.
    pub details: String,
}

impl CommandDescription {
    pub fn new(
        command: impl Into<String>,
        help: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            help: help.into(),
            details: details.into(),
        }
    }
}

/// HTTP routes a plugin mounts on the bot's web server.
pub trait WebRoutes: Send + Sync {
    /// Prefix the routes are nested under, e.g. `/notify`.
    fn mount_path(&self) -> &str;

    fn routes(&self) -> axum::Router;
}

/// Commands a plugin answers, for the help listing.
pub trait DescribeCommands: Send + Sync {
    fn commands(&self) -> Vec<CommandDescription>;
}

/// Receives the commands of the whole chain once registration is over.
pub trait ListCommands: Send + Sync {
    fn set_commands(&self, commands: Vec<CommandDescription>);
}

/// One unit of feature logic.
///
/// Plugins are consulted in registration order for every update. The first
/// one to return [`Outcome::Claimed`] stops the chain; errors are logged by
/// the registry and the chain continues.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Called once before the first update. An error aborts startup.
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn handle_update(&self, cancel: &CancellationToken, update: &Update) -> Result<Outcome>;

    /// Called once on shutdown for every plugin whose `init` succeeded.
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn web_routes(&self) -> Option<&dyn WebRoutes> {
        None
    }

    fn command_descriptions(&self) -> Option<&dyn DescribeCommands> {
        None
    }

    fn command_listing(&self) -> Option<&dyn ListCommands> {
        None
    }
}
