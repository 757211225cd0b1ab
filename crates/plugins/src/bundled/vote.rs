//! Up/down voting on chat messages.
//!
//! Replying `#vote` to a message (or forwarding a post from a channel) makes
//! the bot answer with a two-button keyboard. Each press moves the presser's
//! tally one step; the displayed score weighs every voter by
//! `floor(log2(1 + |tally|))`, so repeated presses grow slowly.

use std::{collections::BTreeMap, sync::Arc};

use {
    anyhow::anyhow,
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    tobym_channels::{
        CallbackQuery, ChatId, InlineButton, Message, MessageId, Outbound, OutgoingMessage,
        Update, UpdateKind, UserId,
    },
    tobym_store::{Record, Store},
    tokio_util::sync::CancellationToken,
    tracing::debug,
};

use crate::plugin::{Outcome, Plugin};

const TRIGGER: &str = "#vote";
const CALLBACK_PREFIX: &str = "vote";
const UP_DATA: &str = "vote+";
const DOWN_DATA: &str = "vote-";
const UP_LABEL: &str = "⤴️";
const DOWN_LABEL: &str = "⤵️";
const PROMPT: &str = "let's vote it, guys";

/// Votes cast on one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    /// Signed tally per voter.
    pub votes: BTreeMap<UserId, i32>,
    pub created_at: DateTime<Utc>,
    /// Author of the voted message, when known.
    pub author: Option<UserId>,
}

impl VoteRecord {
    pub fn new(chat_id: ChatId, message_id: MessageId, author: Option<UserId>) -> Self {
        Self {
            chat_id,
            message_id,
            votes: BTreeMap::new(),
            created_at: Utc::now(),
            author,
        }
    }

    /// Weighted `(plus, minus)` totals.
    pub fn score(&self) -> (u32, u32) {
        self.votes.values().fold((0, 0), |(plus, minus), &tally| {
            if tally > 0 {
                (plus + weight(tally), minus)
            } else if tally < 0 {
                (plus, minus + weight(tally))
            } else {
                (plus, minus)
            }
        })
    }
}

impl Record for VoteRecord {
    const BUCKET: &'static str = "votes";

    fn key(&self) -> String {
        vote_key(self.chat_id, self.message_id)
    }

    fn index(&self) -> Option<String> {
        Some(self.chat_id.to_string())
    }
}

pub fn vote_key(chat_id: ChatId, message_id: MessageId) -> String {
    format!("{chat_id}:{message_id}")
}

/// `floor(log2(1 + |tally|))`.
pub fn weight(tally: i32) -> u32 {
    (u64::from(tally.unsigned_abs()) + 1).ilog2()
}

/// Keyboard reflecting the current score.
pub fn buttons(record: &VoteRecord) -> Vec<InlineButton> {
    let (plus, minus) = record.score();
    let label = |base: &str, n: u32| {
        if n > 0 {
            format!("{base} {n}")
        } else {
            base.to_string()
        }
    };
    vec![
        InlineButton::new(label(UP_LABEL, plus), UP_DATA),
        InlineButton::new(label(DOWN_LABEL, minus), DOWN_DATA),
    ]
}

/// Outcome of one button press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteChange {
    pub record: VoteRecord,
    /// Presser's tally after the press.
    pub tally: i32,
    /// The presser's weight changed, so the keyboard needs redrawing.
    pub modified: bool,
}

/// Apply one press of `increment` (+1 or -1) by `user`.
///
/// A tally only moves further in its established direction; a press against
/// it is ignored. Creates the record if the message has none.
pub async fn add_vote(
    store: &Store,
    chat_id: ChatId,
    message_id: MessageId,
    user: UserId,
    increment: i32,
) -> tobym_store::Result<VoteChange> {
    let key = vote_key(chat_id, message_id);
    let _guard = store.lock(&key).await;
    let mut tx = store.begin().await?;

    let mut record = tx
        .get::<VoteRecord>(&key)
        .await?
        .unwrap_or_else(|| VoteRecord::new(chat_id, message_id, None));
    let previous = record.votes.get(&user).copied().unwrap_or(0);

    let stored = previous.saturating_mul(increment) >= 0;
    let tally = if stored {
        let tally = previous.saturating_add(increment);
        record.votes.insert(user, tally);
        tx.save(&record).await?;
        tally
    } else {
        previous
    };
    tx.commit().await?;

    Ok(VoteChange {
        record,
        tally,
        modified: stored && weight(tally) != weight(previous),
    })
}

pub struct VotePlugin {
    outbound: Arc<dyn Outbound>,
    store: Arc<Store>,
}

impl VotePlugin {
    pub fn new(outbound: Arc<dyn Outbound>, store: Arc<Store>) -> Self {
        Self { outbound, store }
    }

    /// The message a `#vote` request targets.
    fn target(msg: &Message) -> Option<&Message> {
        if msg.text().map(str::trim) == Some(TRIGGER) {
            return msg.reply_to.as_deref();
        }
        msg.forwarded_from_chat.then_some(msg)
    }

    async fn start_vote(&self, msg: &Message, target: &Message) -> anyhow::Result<()> {
        let key = vote_key(target.chat.id, target.id);
        let _guard = self.store.lock(&key).await;

        if self.store.get::<VoteRecord>(&key).await?.is_some() {
            self.outbound
                .send(OutgoingMessage::text(msg.chat.id, "Already exists").reply_to(msg.id))
                .await?;
            return Ok(());
        }

        let record = VoteRecord::new(
            target.chat.id,
            target.id,
            target.from.as_ref().map(|u| u.id),
        );
        self.store.save(&record).await?;
        self.outbound
            .send(
                OutgoingMessage::text(target.chat.id, PROMPT)
                    .reply_to(target.id)
                    .buttons(buttons(&record)),
            )
            .await?;
        debug!(chat_id = %target.chat.id, message_id = %target.id, "vote started");
        Ok(())
    }

    async fn press(&self, query: &CallbackQuery, increment: i32) -> anyhow::Result<()> {
        let prompt = query
            .message
            .as_ref()
            .ok_or_else(|| anyhow!("vote callback has no message"))?;
        let target = prompt
            .reply_to
            .as_deref()
            .ok_or_else(|| anyhow!("vote callback is not a reply"))?;

        let change = add_vote(
            &self.store,
            target.chat.id,
            target.id,
            query.from.id,
            increment,
        )
        .await?;

        let summary = format!("{:+} / {}", change.tally, change.record.votes.len());
        let toast = if change.modified {
            let arrow = if increment > 0 {
                UP_LABEL
            } else {
                DOWN_LABEL
            };
            format!("{arrow} {summary}")
        } else {
            summary
        };
        self.outbound
            .answer_callback(&query.id, Some(&toast))
            .await?;

        if change.modified {
            self.outbound
                .edit_buttons(prompt.chat.id, prompt.id, buttons(&change.record))
                .await?;
        }
        debug!(
            chat_id = %target.chat.id,
            message_id = %target.id,
            user = %query.from.id,
            tally = change.tally,
            modified = change.modified,
            "vote registered"
        );
        Ok(())
    }
}

#[async_trait]
impl Plugin for VotePlugin {
    fn name(&self) -> &str {
        "vote"
    }

    async fn handle_update(
        &self,
        _cancel: &CancellationToken,
        update: &Update,
    ) -> anyhow::Result<Outcome> {
        match &update.kind {
            UpdateKind::Message(msg) => {
                let Some(target) = Self::target(msg) else {
                    return Ok(Outcome::Continue);
                };
                self.start_vote(msg, target).await?;
                Ok(Outcome::Claimed)
            },
            UpdateKind::CallbackQuery(query) => {
                let increment = match query.data.as_deref() {
                    Some(UP_DATA) => 1,
                    Some(DOWN_DATA) => -1,
                    Some(data) if data.starts_with(CALLBACK_PREFIX) => {
                        return Err(anyhow!("unknown vote callback data {data:?}"));
                    },
                    _ => return Ok(Outcome::Continue),
                };
                self.press(query, increment).await?;
                Ok(Outcome::Claimed)
            },
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::bundled::test_support::*,
        rstest::rstest,
        tobym_channels::{ChatKind, testing::RecordingOutbound},
    };

    const CHAT: i64 = -100;

    struct Harness {
        outbound: Arc<RecordingOutbound>,
        store: Arc<Store>,
        plugin: Arc<VotePlugin>,
    }

    async fn harness() -> Harness {
        let outbound = Arc::new(RecordingOutbound::new(BOT));
        let store = Arc::new(Store::in_memory().await.unwrap());
        let plugin = Arc::new(VotePlugin::new(outbound.clone(), Arc::clone(&store)));
        Harness {
            outbound,
            store,
            plugin,
        }
    }

    fn target() -> Message {
        message(CHAT, ChatKind::Supergroup, 5, "cats are great")
    }

    fn vote_request() -> Update {
        let mut msg = message(CHAT, ChatKind::Supergroup, 6, "#vote");
        msg.reply_to = Some(Box::new(target()));
        message_update(msg)
    }

    /// The bot's prompt carrying the keyboard, replying to the target.
    fn prompt() -> Message {
        let mut msg = message(CHAT, ChatKind::Supergroup, 1000, PROMPT);
        msg.reply_to = Some(Box::new(target()));
        msg
    }

    #[rstest]
    #[case(0, 0)]
    #[case(1, 1)]
    #[case(-1, 1)]
    #[case(2, 1)]
    #[case(3, 2)]
    #[case(-7, 3)]
    #[case(i32::MIN, 31)]
    fn weight_is_log2_of_magnitude(#[case] tally: i32, #[case] expected: u32) {
        assert_eq!(weight(tally), expected);
    }

    #[test]
    fn labels_show_nonzero_scores() {
        let mut record = VoteRecord::new(ChatId(1), MessageId(1), None);
        let labels: Vec<String> = buttons(&record).into_iter().map(|b| b.label).collect();
        assert_eq!(labels, vec![UP_LABEL, DOWN_LABEL]);

        record.votes.insert(UserId(1), 3);
        record.votes.insert(UserId(2), 1);
        record.votes.insert(UserId(3), -1);
        let labels: Vec<String> = buttons(&record).into_iter().map(|b| b.label).collect();
        assert_eq!(labels, vec![format!("{UP_LABEL} 3"), format!("{DOWN_LABEL} 1")]);
    }

    #[tokio::test]
    async fn vote_reply_sends_one_prompt_and_creates_empty_record() {
        let h = harness().await;
        let outcome = h
            .plugin
            .handle_update(&CancellationToken::new(), &vote_request())
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Claimed);

        let sent = h.outbound.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, PROMPT);
        assert_eq!(sent[0].reply_to, Some(MessageId(5)));
        assert_eq!(sent[0].buttons, vec![
            InlineButton::new(UP_LABEL, UP_DATA),
            InlineButton::new(DOWN_LABEL, DOWN_DATA),
        ]);

        let record: VoteRecord = h
            .store
            .get(&vote_key(ChatId(CHAT), MessageId(5)))
            .await
            .unwrap()
            .unwrap();
        assert!(record.votes.is_empty());
        assert_eq!(record.author, Some(UserId(7)));
    }

    #[tokio::test]
    async fn second_request_reports_existing_vote() {
        let h = harness().await;
        let cancel = CancellationToken::new();
        h.plugin.handle_update(&cancel, &vote_request()).await.unwrap();
        h.plugin.handle_update(&cancel, &vote_request()).await.unwrap();

        let sent = h.outbound.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].text, "Already exists");
    }

    #[tokio::test]
    async fn forwarded_channel_post_starts_vote_on_itself() {
        let h = harness().await;
        let mut msg = message(CHAT, ChatKind::Supergroup, 8, "news");
        msg.forwarded_from_chat = true;
        h.plugin
            .handle_update(&CancellationToken::new(), &message_update(msg))
            .await
            .unwrap();
        assert_eq!(h.outbound.sent()[0].reply_to, Some(MessageId(8)));
    }

    #[tokio::test]
    async fn plain_messages_are_ignored() {
        let h = harness().await;
        let cancel = CancellationToken::new();
        let outcome = h
            .plugin
            .handle_update(&cancel, &group(CHAT, "#vote"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Continue);
        let outcome = h
            .plugin
            .handle_update(&cancel, &callback(1, Some(prompt()), "other"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Continue);
    }

    #[tokio::test]
    async fn press_updates_toast_and_keyboard() {
        let h = harness().await;
        let cancel = CancellationToken::new();
        h.plugin.handle_update(&cancel, &vote_request()).await.unwrap();

        h.plugin
            .handle_update(&cancel, &callback(1, Some(prompt()), UP_DATA))
            .await
            .unwrap();
        // Second press moves the tally to 2; weight stays 1.
        h.plugin
            .handle_update(&cancel, &callback(1, Some(prompt()), UP_DATA))
            .await
            .unwrap();
        // Opposite press is ignored.
        h.plugin
            .handle_update(&cancel, &callback(1, Some(prompt()), DOWN_DATA))
            .await
            .unwrap();

        let toasts: Vec<String> = h
            .outbound
            .answers()
            .into_iter()
            .map(|a| a.text.unwrap())
            .collect();
        assert_eq!(toasts, vec![format!("{UP_LABEL} +1 / 1"), "+2 / 1".into(), "+2 / 1".into()]);

        let edits = h.outbound.edits();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].message, MessageId(1000));
        assert_eq!(edits[0].buttons[0].label, format!("{UP_LABEL} 1"));
    }

    #[tokio::test]
    async fn callback_without_reply_is_an_error() {
        let h = harness().await;
        let bare = message(CHAT, ChatKind::Supergroup, 1000, PROMPT);
        let err = h
            .plugin
            .handle_update(&CancellationToken::new(), &callback(1, Some(bare), UP_DATA))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not a reply"));
    }

    #[tokio::test]
    async fn concurrent_votes_are_both_counted() {
        let h = harness().await;
        let cancel = CancellationToken::new();
        h.plugin.handle_update(&cancel, &vote_request()).await.unwrap();

        let presses = (1..=2u64).map(|user| {
            let plugin = Arc::clone(&h.plugin);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                plugin
                    .handle_update(&cancel, &callback(user, Some(prompt()), UP_DATA))
                    .await
            })
        });
        for press in presses.collect::<Vec<_>>() {
            press.await.unwrap().unwrap();
        }

        let record: VoteRecord = h
            .store
            .get(&vote_key(ChatId(CHAT), MessageId(5)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.votes.len(), 2);
        assert_eq!(record.score(), (2, 0));
    }

    #[tokio::test]
    async fn add_vote_creates_missing_record() {
        let store = Store::in_memory().await.unwrap();
        let change = add_vote(&store, ChatId(1), MessageId(2), UserId(3), -1)
            .await
            .unwrap();
        assert!(change.modified);
        assert_eq!(change.tally, -1);
        assert_eq!(change.record.score(), (0, 1));
    }
}
