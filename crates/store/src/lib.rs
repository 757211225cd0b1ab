//! Embedded key-value store for plugin state.
//!
//! Records live in named buckets inside a single SQLite file. Each record has
//! a unique key and at most one secondary index value. Read-modify-write
//! sequences take a [`KeyGuard`] from [`Store::lock`] and run inside a
//! [`Tx`] so concurrent updates of one record never interleave.

pub mod error;
pub mod locks;
pub mod record;
pub mod store;
pub mod tx;

pub use {
    error::{Error, Result},
    locks::{KeyGuard, KeyLocks},
    record::Record,
    store::{DB_FILE_NAME, Store},
    tx::Tx,
};

/// Apply pending schema migrations.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
