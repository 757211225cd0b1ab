use std::{
    ops::ControlFlow,
    sync::{Arc, Mutex},
};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tobym_channels::{ChatId, Outbound, OutgoingMessage, ParseMode, Update},
    tobym_store::{Record, Store},
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    bundled::addressed_command,
    plugin::{CommandDescription, DescribeCommands, Outcome, Plugin},
};

const COMMAND: &str = "subscibe_to_service";
const AWAKE_TEXT: &str = "Hello! I'm awake! You may send /version to me.";

/// A chat's subscription to service announcements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub chat_id: ChatId,
    pub subscribed: bool,
}

impl Record for Subscriber {
    const BUCKET: &'static str = "subscribers";

    fn key(&self) -> String {
        self.chat_id.to_string()
    }
}

/// Lets chats subscribe to a startup announcement.
pub struct MonitorPlugin {
    outbound: Arc<dyn Outbound>,
    store: Arc<Store>,
    cancel: CancellationToken,
    announcer: Mutex<Option<JoinHandle<()>>>,
}

impl MonitorPlugin {
    pub fn new(outbound: Arc<dyn Outbound>, store: Arc<Store>) -> Self {
        Self {
            outbound,
            store,
            cancel: CancellationToken::new(),
            announcer: Mutex::new(None),
        }
    }

    async fn subscribe(&self, chat_id: ChatId, subscribed: bool) -> anyhow::Result<()> {
        self.store
            .save(&Subscriber {
                chat_id,
                subscribed,
            })
            .await?;
        Ok(())
    }
}

/// Send the wake-up notice to every subscribed chat until `cancel` fires.
async fn announce(outbound: Arc<dyn Outbound>, store: Arc<Store>, cancel: CancellationToken) {
    let chats = match store.select(|s: &Subscriber| s.subscribed).await {
        Ok(subscribers) => subscribers,
        Err(e) => {
            warn!(error = %e, "failed to load subscribers");
            return;
        },
    };
    let mut delivered = 0usize;
    for subscriber in chats {
        let send = outbound.send(OutgoingMessage::text(subscriber.chat_id, AWAKE_TEXT));
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = send => result,
        };
        match result {
            Ok(_) => delivered += 1,
            Err(e) => warn!(chat_id = %subscriber.chat_id, error = %e, "wake-up notice failed"),
        }
    }
    info!(delivered, "wake-up notices sent");
}

#[async_trait]
impl Plugin for MonitorPlugin {
    fn name(&self) -> &str {
        "monitor"
    }

    async fn init(&self) -> anyhow::Result<()> {
        let mut subscribed = 0usize;
        self.store
            .for_each(|s: Subscriber| {
                if s.subscribed {
                    subscribed += 1;
                }
                ControlFlow::Continue(())
            })
            .await?;
        debug!(subscribed, "monitor subscribers loaded");

        let handle = tokio::spawn(announce(
            Arc::clone(&self.outbound),
            Arc::clone(&self.store),
            self.cancel.clone(),
        ));
        *self.announcer.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(())
    }

    async fn handle_update(
        &self,
        _cancel: &CancellationToken,
        update: &Update,
    ) -> anyhow::Result<Outcome> {
        let Some(msg) = update.message() else {
            return Ok(Outcome::Continue);
        };
        let subscribed = match addressed_command(self.outbound.as_ref(), msg).await? {
            Some(cmd) if cmd.name == COMMAND => cmd.args != "off",
            _ => return Ok(Outcome::Continue),
        };

        if let Err(e) = self.subscribe(msg.chat.id, subscribed).await {
            self.outbound
                .send(OutgoingMessage::text(
                    msg.chat.id,
                    "Can't subscribe, internal error :(",
                ))
                .await?;
            return Err(e);
        }

        let text = if subscribed {
            "Subscibed 👌"
        } else {
            "Unsubscibed 👌"
        };
        self.outbound
            .send(OutgoingMessage::text(msg.chat.id, text).parse_mode(ParseMode::Markdown))
            .await?;
        Ok(Outcome::Claimed)
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.cancel.cancel();
        let handle = self
            .announcer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.await?;
        }
        Ok(())
    }

    fn command_descriptions(&self) -> Option<&dyn DescribeCommands> {
        Some(self)
    }
}

impl DescribeCommands for MonitorPlugin {
    fn commands(&self) -> Vec<CommandDescription> {
        vec![CommandDescription::new(
            COMMAND,
            "Subscribe to service notifications",
            "Pass `off` to unsubscribe",
        )]
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*, crate::bundled::test_support::*, tobym_channels::testing::RecordingOutbound,
    };

    async fn plugin() -> (Arc<RecordingOutbound>, Arc<Store>, MonitorPlugin) {
        let outbound = Arc::new(RecordingOutbound::new(BOT));
        let store = Arc::new(Store::in_memory().await.unwrap());
        let plugin = MonitorPlugin::new(outbound.clone(), Arc::clone(&store));
        (outbound, store, plugin)
    }

    #[tokio::test]
    async fn subscribe_and_unsubscribe() {
        let (outbound, store, plugin) = plugin().await;
        let cancel = CancellationToken::new();

        let outcome = plugin
            .handle_update(&cancel, &private(3, "/subscibe_to_service"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Claimed);
        let saved: Subscriber = store.get("3").await.unwrap().unwrap();
        assert!(saved.subscribed);

        plugin
            .handle_update(&cancel, &private(3, "/subscibe_to_service off"))
            .await
            .unwrap();
        let saved: Subscriber = store.get("3").await.unwrap().unwrap();
        assert!(!saved.subscribed);

        let texts: Vec<String> = outbound.sent().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["Subscibed 👌", "Unsubscibed 👌"]);
        assert_eq!(outbound.sent()[0].parse_mode, ParseMode::Markdown);
    }

    #[tokio::test]
    async fn init_announces_to_subscribed_chats() {
        let (outbound, store, plugin) = plugin().await;
        store
            .save(&Subscriber {
                chat_id: ChatId(1),
                subscribed: true,
            })
            .await
            .unwrap();
        store
            .save(&Subscriber {
                chat_id: ChatId(2),
                subscribed: false,
            })
            .await
            .unwrap();

        plugin.init().await.unwrap();
        let handle = plugin.announcer.lock().unwrap().take().unwrap();
        handle.await.unwrap();

        let sent = outbound.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].chat, ChatId(1));
        assert_eq!(sent[0].text, AWAKE_TEXT);
        plugin.close().await.unwrap();
        plugin.close().await.unwrap();
    }

    #[tokio::test]
    async fn store_failure_sends_notice_and_errors() {
        let (outbound, store, plugin) = plugin().await;
        store.close().await;

        let result = plugin
            .handle_update(&CancellationToken::new(), &private(3, "/subscibe_to_service"))
            .await;
        assert!(result.is_err());
        assert_eq!(outbound.sent()[0].text, "Can't subscribe, internal error :(");
    }
}
