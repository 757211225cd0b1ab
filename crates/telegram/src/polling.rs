use std::{sync::Mutex, time::Duration};

use {
    async_trait::async_trait,
    teloxide::{
        ApiError, RequestError,
        prelude::*,
        types::AllowedUpdate,
    },
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use tobym_channels::{Result as ChannelResult, UpdateSink, UpdateTransport};

use crate::convert;

/// Default `getUpdates` long-poll timeout.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(60);

/// Back-off after a failed `getUpdates` call.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Pulls updates with `getUpdates`.
pub struct LongPolling {
    bot: Bot,
    timeout: Duration,
    running: Mutex<Option<Running>>,
}

impl LongPolling {
    pub fn new(bot: Bot, timeout: Duration) -> Self {
        Self {
            bot,
            timeout,
            running: Mutex::new(None),
        }
    }
}

#[async_trait]
impl UpdateTransport for LongPolling {
    fn name(&self) -> &str {
        "long-polling"
    }

    async fn start(&self, sink: UpdateSink) -> ChannelResult<()> {
        // Long polling and a registered webhook are mutually exclusive.
        self.bot
            .delete_webhook()
            .send()
            .await
            .map_err(|e| tobym_channels::Error::external("telegram deleteWebhook", e))?;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_loop(
            self.bot.clone(),
            u32::try_from(self.timeout.as_secs()).unwrap_or(u32::MAX),
            sink,
            cancel.clone(),
        ));

        let previous = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(Running { cancel, task });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
        info!(timeout_secs = self.timeout.as_secs(), "telegram long polling started");
        Ok(())
    }

    async fn stop(&self) -> ChannelResult<()> {
        let running = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(running) = running else {
            return Ok(());
        };
        running.cancel.cancel();
        if let Err(e) = running.task.await {
            warn!(error = %e, "telegram polling task ended abnormally");
        }
        info!("telegram long polling stopped");
        Ok(())
    }
}

async fn poll_loop(bot: Bot, timeout_secs: u32, sink: UpdateSink, cancel: CancellationToken) {
    let mut offset: i32 = 0;

    loop {
        let request = bot
            .get_updates()
            .offset(offset)
            .timeout(timeout_secs)
            .allowed_updates(vec![AllowedUpdate::Message, AllowedUpdate::CallbackQuery])
            .send();

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = request => result,
        };

        match result {
            Ok(updates) => {
                debug!(count = updates.len(), "got telegram updates");
                for update in updates {
                    offset = update.id.as_offset();
                    let Some(update) = convert::update(&update) else {
                        debug!(update_id = update.id.0, "ignoring unsupported telegram update");
                        continue;
                    };
                    if sink.push(update).await.is_err() {
                        info!("update queue closed, telegram polling stopped");
                        return;
                    }
                }
            },
            Err(e) => {
                if matches!(&e, RequestError::Api(ApiError::TerminatedByOtherGetUpdates)) {
                    warn!("telegram polling stopped: another instance is already running with this token");
                    break;
                }

                warn!(error = %e, "telegram getUpdates failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(ERROR_BACKOFF) => {},
                }
            },
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::testing::MockTelegramApi,
        serde_json::json,
        tobym_channels::{ChatId, update_channel},
    };

    #[tokio::test]
    async fn delivers_polled_updates_and_stops() {
        let api = MockTelegramApi::start().await;
        api.queue_update(json!({
            "update_id": 100,
            "message": {
                "message_id": 1,
                "date": 1,
                "chat": { "id": 42, "type": "private", "first_name": "Ann" },
                "text": "/version"
            }
        }));

        let transport = LongPolling::new(api.bot(), Duration::from_secs(1));
        let (sink, mut stream) = update_channel(8);
        transport.start(sink).await.expect("start");

        let update = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("update in time")
            .expect("stream open");
        assert_eq!(update.id, 100);
        assert_eq!(update.chat_id(), Some(ChatId(42)));

        // Wait for the follow-up poll that acknowledges the delivered update.
        tokio::time::timeout(Duration::from_secs(5), async {
            while api.calls("GetUpdates").len() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("second poll");

        transport.stop().await.expect("stop");
        transport.stop().await.expect("second stop is a no-op");

        assert_eq!(api.calls("DeleteWebhook").len(), 1);
        let polls = api.calls("GetUpdates");
        assert!(!polls.is_empty());
        assert!(
            polls
                .iter()
                .any(|body| body["offset"] == json!(101)),
            "offset advances past delivered updates"
        );

        api.shutdown().await;
    }
}
