use std::sync::Arc;

use {
    tobym_channels::Update,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    plugin::{CommandDescription, Outcome, Plugin},
};

/// Result of running one update through the chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Name of the plugin that claimed the update, if any.
    pub claimed_by: Option<String>,
    /// Plugins that returned an error for this update.
    pub errors: usize,
}

/// Ordered plugin chain.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a plugin. Order of registration is order of dispatch.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        debug!(plugin = plugin.name(), position = self.plugins.len(), "plugin registered");
        self.plugins.push(plugin);
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Initialize plugins in order, stopping at the first failure.
    ///
    /// On success returns the number of plugins initialized. On failure the
    /// error carries how many succeeded before it, so the caller can close
    /// exactly those.
    pub async fn init_all(&self) -> Result<usize> {
        self.publish_commands();
        for (initialized, plugin) in self.plugins.iter().enumerate() {
            if let Err(source) = plugin.init().await {
                warn!(plugin = plugin.name(), error = %source, "plugin init failed");
                return Err(Error::Init {
                    plugin: plugin.name().to_string(),
                    initialized,
                    source,
                });
            }
            debug!(plugin = plugin.name(), "plugin initialized");
        }
        info!(count = self.plugins.len(), "plugins initialized");
        Ok(self.plugins.len())
    }

    /// Close the first `count` plugins in registration order.
    ///
    /// Every plugin is closed even if an earlier one fails; the failures are
    /// returned with the plugin name.
    pub async fn close_all(&self, count: usize) -> Vec<(String, anyhow::Error)> {
        let mut errors = Vec::new();
        for plugin in self.plugins.iter().take(count) {
            if let Err(e) = plugin.close().await {
                warn!(plugin = plugin.name(), error = %e, "plugin close failed");
                errors.push((plugin.name().to_string(), e));
            }
        }
        errors
    }

    /// Offer `update` to each plugin in order until one claims it.
    pub async fn dispatch(&self, cancel: &CancellationToken, update: &Update) -> DispatchReport {
        let mut report = DispatchReport::default();
        for plugin in &self.plugins {
            if cancel.is_cancelled() {
                debug!(update_id = update.id, "dispatch cancelled");
                break;
            }
            match plugin.handle_update(cancel, update).await {
                Ok(Outcome::Claimed) => {
                    debug!(plugin = plugin.name(), update_id = update.id, "update claimed");
                    report.claimed_by = Some(plugin.name().to_string());
                    break;
                },
                Ok(Outcome::Continue) => {},
                Err(e) => {
                    report.errors += 1;
                    warn!(
                        plugin = plugin.name(),
                        update_id = update.id,
                        chat_id = ?update.chat_id(),
                        error = %e,
                        "plugin failed to handle update"
                    );
                },
            }
        }
        report
    }

    /// Command descriptions of every describing plugin, in registration order.
    pub fn commands(&self) -> Vec<CommandDescription> {
        self.plugins
            .iter()
            .filter_map(|p| p.command_descriptions().map(|d| d.commands()))
            .flatten()
            .collect()
    }

    /// Hand [`Self::commands`] to every plugin that lists commands.
    pub fn publish_commands(&self) {
        let commands = self.commands();
        for plugin in &self.plugins {
            if let Some(listing) = plugin.command_listing() {
                debug!(
                    plugin = plugin.name(),
                    count = commands.len(),
                    "command listing published"
                );
                listing.set_commands(commands.clone());
            }
        }
    }

    /// `(mount_path, router)` for every plugin exposing HTTP routes.
    pub fn web_routes(&self) -> Vec<(String, axum::Router)> {
        self.plugins
            .iter()
            .filter_map(|p| p.web_routes())
            .map(|w| (w.mount_path().to_string(), w.routes()))
            .collect()
    }
}
