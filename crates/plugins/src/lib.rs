//! Plugin system: the per-update handler contract, the ordered registry that
//! dispatches updates through it, and the bundled feature plugins.

pub mod bundled;
pub mod error;
pub mod plugin;
pub mod registry;

pub use {
    bundled::{PluginContext, default_plugins},
    error::{Error, Result},
    plugin::{CommandDescription, DescribeCommands, ListCommands, Outcome, Plugin, WebRoutes},
    registry::{DispatchReport, PluginRegistry},
};
