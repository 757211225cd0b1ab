use std::time::Duration;

use {
    secrecy::{ExposeSecret, Secret},
    teloxide::Bot,
};

use crate::Result;

/// Slack added on top of the long-poll timeout for the HTTP client.
const CLIENT_TIMEOUT_SLACK: Duration = Duration::from_secs(15);

/// Build a bot client whose HTTP timeout outlives one long-poll request.
///
/// `api_url` points the client at a different Bot API server.
pub fn build_bot(
    token: &Secret<String>,
    api_url: Option<url::Url>,
    poll_timeout: Duration,
) -> Result<Bot> {
    let client = teloxide::net::default_reqwest_settings()
        .timeout(poll_timeout + CLIENT_TIMEOUT_SLACK)
        .build()?;
    let bot = Bot::with_client(token.expose_secret(), client);
    Ok(match api_url {
        Some(url) => bot.set_api_url(url),
        None => bot,
    })
}
