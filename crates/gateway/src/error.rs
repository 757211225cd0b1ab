use thiserror::Error;

/// Errors raised while building, starting, or stopping a [`crate::BotService`].
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// Operation not allowed in the current lifecycle state.
    #[error("cannot {operation} while {state}")]
    Lifecycle {
        operation: &'static str,
        state: &'static str,
    },

    #[error(transparent)]
    Store(#[from] tobym_store::Error),

    #[error(transparent)]
    Channel(#[from] tobym_channels::Error),

    #[error(transparent)]
    Telegram(#[from] tobym_telegram::Error),

    #[error(transparent)]
    Plugin(#[from] tobym_plugins::Error),

    #[error("plugin {plugin} failed to close: {source}")]
    PluginClose {
        plugin: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("timed out waiting for {what}")]
    Timeout { what: &'static str },

    #[error("{message}")]
    Message { message: String },

    /// Everything that went wrong during shutdown.
    #[error("shutdown finished with {} error(s): {}", .0.len(), join(.0))]
    Shutdown(Vec<ServiceError>),
}

fn join(errors: &[ServiceError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ServiceError {
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
