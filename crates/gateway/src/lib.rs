//! Bot service core for tobym.
//!
//! [`BotService`] wires a Telegram transport, the plugin chain, the key-value
//! store and a small HTTP server together, and runs the bounded-concurrency
//! dispatch loop between them.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod service;
pub mod stats;
pub mod web;

pub use {
    config::{BotConfig, TransportConfig},
    error::{ServiceError, ServiceResult},
    lifecycle::LifecycleState,
    service::{BotService, ServiceParts},
    stats::StatsSnapshot,
};
