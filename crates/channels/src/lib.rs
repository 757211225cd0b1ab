//! Platform-neutral chat model for tobym.
//!
//! Inbound events are normalized into [`Update`]s, pushed by an
//! [`UpdateTransport`] into an [`UpdateSink`], and answered through an
//! [`Outbound`] implementation. Platform crates (Telegram) implement the
//! traits; feature plugins only ever see the types defined here.

pub mod error;
pub mod outbound;
pub mod transport;
pub mod update;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use {
    error::{Error, Result},
    outbound::{InlineButton, Outbound, OutgoingMessage, ParseMode},
    transport::{UPDATE_QUEUE_CAPACITY, UpdateSink, UpdateStream, UpdateTransport, update_channel},
    update::{
        CallbackQuery, Chat, ChatId, ChatKind, Command, Message, MessageId, Update, UpdateKind,
        User, UserId,
    },
};
