use std::sync::Mutex;

use {
    async_trait::async_trait,
    teloxide::{prelude::*, types::AllowedUpdate},
    tracing::{debug, info, warn},
    url::Url,
};

use tobym_channels::{Error as ChannelError, Result as ChannelResult, UpdateSink, UpdateTransport};

use crate::{Result, convert};

/// Path under which pushed updates are accepted; the secret follows it.
pub const WEBHOOK_PATH_PREFIX: &str = "/_webhook/";

/// Receives updates pushed by Telegram to `<public_url>/_webhook/<secret>`.
pub struct Webhook {
    bot: Bot,
    url: Url,
    secret: String,
    sink: Mutex<Option<UpdateSink>>,
}

impl Webhook {
    /// `secret` defaults to a random UUID, so the endpoint path is unguessable.
    pub fn new(bot: Bot, public_url: &str, secret: Option<String>) -> Result<Self> {
        let secret = secret.unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        let url = webhook_url(public_url, &secret)?;
        Ok(Self {
            bot,
            url,
            secret,
            sink: Mutex::new(None),
        })
    }

    /// The URL registered with Telegram.
    pub fn url(&self) -> &Url {
        &self.url
    }

    fn current_sink(&self) -> Option<UpdateSink> {
        self.sink.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

fn webhook_url(public_url: &str, secret: &str) -> Result<Url> {
    let base = public_url.trim_end_matches('/');
    Ok(Url::parse(&format!("{base}{WEBHOOK_PATH_PREFIX}{secret}"))?)
}

#[async_trait]
impl UpdateTransport for Webhook {
    fn name(&self) -> &str {
        "webhook"
    }

    fn push_secret(&self) -> Option<&str> {
        Some(&self.secret)
    }

    async fn accept_push(&self, body: &[u8]) -> ChannelResult<()> {
        let raw = convert::parse_update(body)?;
        let Some(update) = convert::update(&raw) else {
            debug!(update_id = raw.id.0, "ignoring unsupported telegram update");
            return Ok(());
        };
        let sink = self
            .current_sink()
            .ok_or_else(|| ChannelError::unavailable("webhook is not started"))?;
        sink.push(update).await
    }

    async fn start(&self, sink: UpdateSink) -> ChannelResult<()> {
        self.bot
            .set_webhook(self.url.clone())
            .allowed_updates(vec![AllowedUpdate::Message, AllowedUpdate::CallbackQuery])
            .send()
            .await
            .map_err(|e| ChannelError::external("telegram setWebhook", e))?;

        match self.bot.get_webhook_info().send().await {
            Ok(info) => {
                if let Some(message) = info.last_error_message {
                    warn!(
                        last_error_date = ?info.last_error_date,
                        last_error = %message,
                        "telegram reports a previous webhook delivery error"
                    );
                }
            },
            Err(e) => warn!(error = %e, "telegram getWebhookInfo failed"),
        }

        *self.sink.lock().unwrap_or_else(|e| e.into_inner()) = Some(sink);
        info!(host = ?self.url.host_str(), "telegram webhook registered");
        Ok(())
    }

    async fn stop(&self) -> ChannelResult<()> {
        let sink = self.sink.lock().unwrap_or_else(|e| e.into_inner()).take();
        if sink.is_none() {
            return Ok(());
        }
        self.bot
            .delete_webhook()
            .send()
            .await
            .map_err(|e| ChannelError::external("telegram deleteWebhook", e))?;
        info!("telegram webhook removed");
        Ok(())
    }
}
