//! Telegram Bot API backend for tobym.
//!
//! Wraps teloxide: converts its updates into the platform-neutral model of
//! `tobym-channels`, sends through [`TelegramOutbound`], and receives updates
//! either by [`LongPolling`] or through a registered [`Webhook`].

pub mod client;
pub mod convert;
pub mod error;
pub mod outbound;
pub mod polling;
pub mod webhook;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use {
    client::build_bot,
    error::{Error, Result},
    outbound::TelegramOutbound,
    polling::LongPolling,
    webhook::{WEBHOOK_PATH_PREFIX, Webhook},
};
