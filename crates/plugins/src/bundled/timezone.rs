use std::{fmt::Write as _, sync::Arc};

use {
    async_trait::async_trait,
    chrono::{DateTime, NaiveTime, Offset, TimeZone, Utc},
    chrono_tz::Tz,
    serde::{Deserialize, Serialize},
    tobym_channels::{ChatId, Message, Outbound, OutgoingMessage, ParseMode, Update},
    tobym_store::{Record, Store},
    tokio_util::sync::CancellationToken,
};

use crate::{
    bundled::addressed_command,
    plugin::{CommandDescription, DescribeCommands, Outcome, Plugin},
};

const SET_COMMAND: &str = "set_timezones";
const TIME_COMMAND: &str = "time";

/// Zones configured for a chat; the first one is primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTimezones {
    pub chat_id: ChatId,
    pub zones: Vec<String>,
}

impl Record for ChatTimezones {
    const BUCKET: &'static str = "timezones";

    fn key(&self) -> String {
        self.chat_id.to_string()
    }
}

/// The instant `arg` (`HH:MM` in `primary`) refers to today, or `now` if
/// `arg` is empty.
pub fn resolve_time(primary: Tz, arg: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if arg.is_empty() {
        return Some(now);
    }
    let time = NaiveTime::parse_from_str(arg, "%H:%M").ok()?;
    let date = now.with_timezone(&primary).date_naive();
    primary
        .from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}

/// One HTML line per zone, ordered by UTC offset.
pub fn render_times(zones: &[Tz], at: DateTime<Utc>) -> String {
    let mut local: Vec<_> = zones.iter().map(|tz| at.with_timezone(tz)).collect();
    local.sort_by_key(|dt| dt.offset().fix().local_minus_utc());

    let mut text = String::new();
    for dt in local {
        let _ = writeln!(
            text,
            "{} | <i>{} ({})</i>",
            dt.format("%H:%M"),
            dt.timezone().name(),
            dt.format("%:z")
        );
    }
    text.trim_end().to_string()
}

/// Shows the current (or a given) time across a chat's time zones.
pub struct TimezonePlugin {
    outbound: Arc<dyn Outbound>,
    store: Arc<Store>,
}

impl TimezonePlugin {
    pub fn new(outbound: Arc<dyn Outbound>, store: Arc<Store>) -> Self {
        Self { outbound, store }
    }

    async fn reply(&self, msg: &Message, text: impl Into<String>) -> anyhow::Result<()> {
        self.outbound
            .send(OutgoingMessage::text(msg.chat.id, text))
            .await?;
        Ok(())
    }

    async fn set_zones(&self, msg: &Message, args: &str) -> anyhow::Result<()> {
        if args.is_empty() {
            return self.reply(msg, "command need arguments").await;
        }
        let mut zones = Vec::new();
        for name in args.split_whitespace() {
            match name.parse::<Tz>() {
                Ok(tz) => zones.push(tz.name().to_string()),
                Err(_) => {
                    self.reply(msg, format!("Can't find timezone '{name}'"))
                        .await?
                },
            }
        }
        if zones.is_empty() {
            // Keep whatever the chat had; every name was already reported.
            return Ok(());
        }
        let count = zones.len();
        self.store
            .save(&ChatTimezones {
                chat_id: msg.chat.id,
                zones,
            })
            .await?;
        self.reply(msg, format!("Ok, set {count} locations")).await
    }

    async fn show_time(&self, msg: &Message, arg: &str) -> anyhow::Result<()> {
        let zones: Vec<Tz> = self
            .store
            .get::<ChatTimezones>(&msg.chat.id.to_string())
            .await?
            .map(|record| record.zones)
            .unwrap_or_default()
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect();
        let Some(&primary) = zones.first() else {
            return self
                .reply(msg, "No time zones configured, use /set_timezones first")
                .await;
        };
        let Some(at) = resolve_time(primary, arg, Utc::now()) else {
            return self.reply(msg, format!("Can't parse time '{arg}'")).await;
        };
        self.outbound
            .send(
                OutgoingMessage::text(msg.chat.id, render_times(&zones, at))
                    .parse_mode(ParseMode::Html),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Plugin for TimezonePlugin {
    fn name(&self) -> &str {
        "timezone"
    }

    async fn handle_update(
        &self,
        _cancel: &CancellationToken,
        update: &Update,
    ) -> anyhow::Result<Outcome> {
        let Some(msg) = update.message() else {
            return Ok(Outcome::Continue);
        };
        let Some(cmd) = addressed_command(self.outbound.as_ref(), msg).await? else {
            return Ok(Outcome::Continue);
        };
        match cmd.name {
            SET_COMMAND => self.set_zones(msg, cmd.args).await?,
            TIME_COMMAND => self.show_time(msg, cmd.args).await?,
            _ => return Ok(Outcome::Continue),
        }
        Ok(Outcome::Claimed)
    }

    fn command_descriptions(&self) -> Option<&dyn DescribeCommands> {
        Some(self)
    }
}

impl DescribeCommands for TimezonePlugin {
    fn commands(&self) -> Vec<CommandDescription> {
        vec![
            CommandDescription::new(
                SET_COMMAND,
                "Set time zones for this chat",
                "Space separated IANA names, the first one is primary: /set_timezones Europe/Berlin UTC",
            ),
            CommandDescription::new(
                TIME_COMMAND,
                "Show time in every configured zone",
                "Pass HH:MM to convert a time in the primary zone: /time 10:30",
            ),
        ]
    }
}
