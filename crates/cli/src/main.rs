mod token;

use std::{net::SocketAddr, path::PathBuf};

use {
    anyhow::{Context, bail},
    clap::Parser,
    tobym_gateway::{BotConfig, BotService, TransportConfig},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "tobym", version, about = "Telegram bot with an ordered plugin chain")]
struct Cli {
    /// File holding the bot token (first line is used).
    #[arg(long)]
    token: Option<PathBuf>,

    /// Bot token; takes precedence over `--token`.
    #[arg(long, env = "BOT_TOKEN", hide_env_values = true)]
    bot_token: Option<String>,

    /// Public base URL for webhook delivery. Long polling is used when unset.
    #[arg(long, env = "WEB_HOOK_URL")]
    webhook: Option<String>,

    /// Path secret for the webhook endpoint (random when unset).
    #[arg(long, env = "TOBYM_WEBHOOK_SECRET", hide_env_values = true)]
    webhook_secret: Option<String>,

    /// HTTP listen address.
    #[arg(long, env = "TOBYM_LISTEN", default_value = "0.0.0.0:8443")]
    listen: SocketAddr,

    /// Directory for the bot's database.
    #[arg(long, env = "TOBYM_DATA_DIR", default_value = "./var")]
    data_path: PathBuf,

    /// Base URL shown in notify-token instructions.
    #[arg(long, env = "TOBYM_APP_URL", default_value = "http://127.0.0.1")]
    app_url: String,

    /// Alternative Bot API server.
    #[arg(long, env = "TOBYM_API_URL")]
    api_url: Option<String>,

    /// Long-poll timeout in seconds.
    #[arg(long, default_value_t = 60)]
    poll_timeout: u64,

    /// Updates handled concurrently.
    #[arg(long, default_value_t = 10)]
    max_in_flight: usize,

    /// Log every inbound update.
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

impl Cli {
    fn bot_config(&self) -> anyhow::Result<BotConfig> {
        let token = match (&self.bot_token, &self.token) {
            (Some(token), _) if !token.trim().is_empty() => token.trim().to_string(),
            (_, Some(path)) => token::read_token_file(path)?,
            _ => bail!("no bot token: pass --token <file> or set BOT_TOKEN"),
        };

        let mut config = BotConfig::new(token);
        config.transport = match &self.webhook {
            Some(public_url) => TransportConfig::Webhook {
                public_url: public_url.clone(),
                secret: self.webhook_secret.clone(),
            },
            None => TransportConfig::LongPoll {
                timeout_secs: self.poll_timeout,
            },
        };
        config.listen = Some(self.listen);
        config.data_dir = self.data_path.clone();
        config.app_url = self.app_url.clone();
        config.api_url = self.api_url.clone();
        config.max_in_flight = self.max_in_flight;
        config.debug = self.debug;
        config.validate()?;
        Ok(config)
    }
}

fn init_telemetry(cli: &Cli) {
    let default_level = if cli.debug {
        "debug"
    } else {
        cli.log_level.as_str()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("failed to listen for ctrl-c")?,
            _ = terminate.recv() => {},
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let config = cli.bot_config()?;
    let service = BotService::new(config)
        .await
        .context("failed to set up bot service")?;
    service.init().await.context("failed to start bot service")?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        plugins = ?service.plugin_names(),
        "tobym started"
    );

    shutdown_signal().await?;
    info!("shutdown requested");
    service.close().await?;
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("tobym").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn long_poll_by_default() {
        let cli = parse(&["--bot-token", "123:abc"]);
        let config = cli.bot_config().unwrap();
        assert_eq!(config.transport, TransportConfig::LongPoll { timeout_secs: 60 });
        assert_eq!(config.listen, Some("0.0.0.0:8443".parse().unwrap()));
        assert_eq!(config.data_dir, PathBuf::from("./var"));
    }

    #[test]
    fn webhook_mode_and_token_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "123:abc\n").unwrap();

        let cli = parse(&[
            "--token",
            path.to_str().unwrap(),
            "--webhook",
            "https://bot.example.com",
            "--max-in-flight",
            "3",
        ]);
        let cli = Cli {
            bot_token: None,
            ..cli
        };
        let config = cli.bot_config().unwrap();
        assert_eq!(config.max_in_flight, 3);
        assert!(matches!(config.transport, TransportConfig::Webhook { .. }));
    }

    #[test]
    fn missing_token_is_an_error() {
        let cli = Cli {
            bot_token: None,
            ..parse(&[])
        };
        assert!(cli.bot_config().is_err());
    }
}
