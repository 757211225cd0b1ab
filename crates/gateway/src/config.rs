use std::{net::SocketAddr, path::PathBuf, time::Duration};

use {
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
    tobym_plugins::bundled::DEFAULT_APP_URL,
    tobym_telegram::polling::DEFAULT_POLL_TIMEOUT,
};

use crate::error::{ServiceError, ServiceResult};

/// How updates reach the bot.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TransportConfig {
    LongPoll {
        #[serde(default = "default_poll_timeout_secs")]
        timeout_secs: u64,
    },
    Webhook {
        /// Externally reachable base URL; `/_webhook/<secret>` is appended.
        public_url: String,
        #[serde(default)]
        secret: Option<String>,
    },
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::LongPoll {
            timeout_secs: default_poll_timeout_secs(),
        }
    }
}

fn default_poll_timeout_secs() -> u64 {
    DEFAULT_POLL_TIMEOUT.as_secs()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./var")
}

fn default_app_url() -> String {
    DEFAULT_APP_URL.to_string()
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_max_in_flight() -> usize {
    10
}

fn default_timeout_ms() -> u64 {
    5000
}

/// Bot service configuration.
#[derive(Debug, Deserialize)]
pub struct BotConfig {
    pub token: Secret<String>,
    #[serde(default)]
    pub transport: TransportConfig,
    /// HTTP bind address. Required for webhook mode.
    #[serde(default)]
    pub listen: Option<SocketAddr>,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Base URL printed in notify-token instructions.
    #[serde(default = "default_app_url")]
    pub app_url: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// Alternative Bot API server.
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_timeout_ms")]
    pub startup_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    /// Log every inbound update.
    #[serde(default)]
    pub debug: bool,
}

impl BotConfig {
    /// Defaults for everything but the token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Secret::new(token.into()),
            transport: TransportConfig::default(),
            listen: None,
            data_dir: default_data_dir(),
            app_url: default_app_url(),
            version: default_version(),
            api_url: None,
            max_in_flight: default_max_in_flight(),
            startup_timeout_ms: default_timeout_ms(),
            shutdown_timeout_ms: default_timeout_ms(),
            debug: false,
        }
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        match self.transport {
            TransportConfig::LongPoll { timeout_secs } => Duration::from_secs(timeout_secs),
            TransportConfig::Webhook { .. } => DEFAULT_POLL_TIMEOUT,
        }
    }

    pub fn validate(&self) -> ServiceResult<()> {
        if self.token.expose_secret().trim().is_empty() {
            return Err(ServiceError::config("bot token is empty"));
        }
        if self.max_in_flight == 0 {
            return Err(ServiceError::config("max_in_flight must be at least 1"));
        }
        if let Some(api_url) = &self.api_url {
            url::Url::parse(api_url)
                .map_err(|e| ServiceError::config(format!("invalid api_url: {e}")))?;
        }
        if let TransportConfig::Webhook { public_url, .. } = &self.transport {
            if self.listen.is_none() {
                return Err(ServiceError::config(
                    "webhook mode needs a listen address",
                ));
            }
            let url = url::Url::parse(public_url)
                .map_err(|e| ServiceError::config(format!("invalid webhook url: {e}")))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ServiceError::config(format!(
                    "webhook url must be http(s), got {}",
                    url.scheme()
                )));
            }
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_json() {
        let config: BotConfig = serde_json::from_str(r#"{"token":"123:abc"}"#).unwrap();
        assert_eq!(config.transport, TransportConfig::LongPoll { timeout_secs: 60 });
        assert_eq!(config.max_in_flight, 10);
        assert_eq!(config.startup_timeout(), Duration::from_secs(5));
        assert_eq!(config.app_url, "http://127.0.0.1");
        assert_eq!(config.data_dir, PathBuf::from("./var"));
        config.validate().unwrap();
    }

    #[test]
    fn token_is_redacted() {
        let config = BotConfig::new("123:very-secret");
        assert!(!format!("{config:?}").contains("very-secret"));
    }

    #[test]
    fn webhook_transport_from_json() {
        let config: BotConfig = serde_json::from_str(
            r#"{"token":"t","listen":"127.0.0.1:8443",
                "transport":{"mode":"webhook","public_url":"https://bot.example.com"}}"#,
        )
        .unwrap();
        assert_eq!(config.transport, TransportConfig::Webhook {
            public_url: "https://bot.example.com".into(),
            secret: None,
        });
        config.validate().unwrap();
    }

    #[test]
    fn rejects_invalid_configs() {
        assert!(BotConfig::new(" ").validate().is_err());

        let mut config = BotConfig::new("t");
        config.max_in_flight = 0;
        assert!(config.validate().is_err());

        let mut config = BotConfig::new("t");
        config.transport = TransportConfig::Webhook {
            public_url: "https://bot.example.com".into(),
            secret: None,
        };
        assert!(config.validate().is_err());

        config.listen = Some("127.0.0.1:0".parse().unwrap());
        config.transport = TransportConfig::Webhook {
            public_url: "ftp://bot.example.com".into(),
            secret: None,
        };
        assert!(config.validate().is_err());
    }
}
