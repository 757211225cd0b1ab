use std::{
    ops::ControlFlow,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use {
    futures::TryStreamExt,
    sqlx::{
        SqliteExecutor, SqlitePool,
        sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    },
    tracing::{debug, info},
};

use crate::{
    Error, Result,
    locks::{KeyGuard, KeyLocks},
    record::Record,
    tx::Tx,
};

/// File name of the database inside the data directory.
pub const DB_FILE_NAME: &str = "data.db";

/// Handle to the embedded store. Share it behind an `Arc`.
pub struct Store {
    pool: SqlitePool,
    locks: KeyLocks,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("locks", &self.locks.len())
            .finish_non_exhaustive()
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

impl Store {
    /// Open (creating if needed) `<dir>/data.db`.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(DB_FILE_NAME);
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let store = Self::connect(options).await?;
        info!(path = %path.display(), "store opened");
        Ok(store)
    }

    /// Private in-memory database, gone once the store is closed.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new().in_memory(true);
        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self> {
        // One connection: a single writer at a time, and in-memory databases
        // survive as long as the pool does.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        crate::run_migrations(&pool).await?;
        Ok(Self {
            pool,
            locks: KeyLocks::new(),
        })
    }

    /// Insert or replace a record under its key.
    pub async fn save<R: Record>(&self, record: &R) -> Result<()> {
        upsert(&self.pool, record).await
    }

    pub async fn get<R: Record>(&self, key: &str) -> Result<Option<R>> {
        fetch(&self.pool, key).await
    }

    /// Overwrite an existing record. Fails with `NotFound` when absent.
    pub async fn update<R: Record>(&self, record: &R) -> Result<()> {
        update_existing(&self.pool, record).await
    }

    /// Returns whether a record was removed.
    pub async fn delete<R: Record>(&self, key: &str) -> Result<bool> {
        delete_key::<R, _>(&self.pool, key).await
    }

    /// All records whose secondary index equals `index`, ordered by key.
    pub async fn find_by_index<R: Record>(&self, index: &str) -> Result<Vec<R>> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT value FROM kv WHERE bucket = ? AND idx = ? ORDER BY key",
        )
        .bind(R::BUCKET)
        .bind(index)
        .fetch_all(&self.pool)
        .await?;
        decode_all(rows)
    }

    /// Remove every record whose secondary index equals `index`.
    pub async fn delete_by_index<R: Record>(&self, index: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM kv WHERE bucket = ? AND idx = ?")
            .bind(R::BUCKET)
            .bind(index)
            .execute(&self.pool)
            .await?;
        debug!(
            bucket = R::BUCKET,
            index,
            removed = result.rows_affected(),
            "records deleted by index"
        );
        Ok(result.rows_affected())
    }

    /// Every record in the bucket, ordered by key.
    pub async fn all<R: Record>(&self) -> Result<Vec<R>> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT value FROM kv WHERE bucket = ? ORDER BY key",
        )
        .bind(R::BUCKET)
        .fetch_all(&self.pool)
        .await?;
        decode_all(rows)
    }

    /// Records matching `predicate`.
    pub async fn select<R, F>(&self, predicate: F) -> Result<Vec<R>>
    where
        R: Record,
        F: Fn(&R) -> bool,
    {
        let mut matched = Vec::new();
        self.for_each(|record: R| {
            if predicate(&record) {
                matched.push(record);
            }
            ControlFlow::Continue(())
        })
        .await?;
        Ok(matched)
    }

    /// Stream the bucket through `callback` until it breaks. Returns how many
    /// records were visited.
    pub async fn for_each<R, F>(&self, mut callback: F) -> Result<usize>
    where
        R: Record,
        F: FnMut(R) -> ControlFlow<()>,
    {
        let mut rows = sqlx::query_scalar::<_, String>(
            "SELECT value FROM kv WHERE bucket = ? ORDER BY key",
        )
        .bind(R::BUCKET)
        .fetch(&self.pool);

        let mut visited = 0;
        while let Some(value) = rows.try_next().await? {
            visited += 1;
            let record: R = serde_json::from_str(&value)?;
            if callback(record).is_break() {
                break;
            }
        }
        Ok(visited)
    }

    /// Start a transaction. Other store calls wait until it ends.
    pub async fn begin(&self) -> Result<Tx> {
        Ok(Tx::new(self.pool.begin().await?))
    }

    /// Exclusive access to one logical record.
    pub async fn lock(&self, key: &str) -> KeyGuard {
        self.locks.lock(key).await
    }

    /// Close the pool. Calls made afterwards fail.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("store closed");
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

fn decode_all<R: Record>(rows: Vec<String>) -> Result<Vec<R>> {
    rows.iter()
        .map(|value| serde_json::from_str(value).map_err(Error::from))
        .collect()
}

pub(crate) async fn fetch<'e, R, E>(exec: E, key: &str) -> Result<Option<R>>
where
    R: Record,
    E: SqliteExecutor<'e>,
{
    let value =
        sqlx::query_scalar::<_, String>("SELECT value FROM kv WHERE bucket = ? AND key = ?")
            .bind(R::BUCKET)
            .bind(key)
            .fetch_optional(exec)
            .await?;
    value
        .map(|value| serde_json::from_str(&value).map_err(Error::from))
        .transpose()
}

pub(crate) async fn upsert<'e, R, E>(exec: E, record: &R) -> Result<()>
where
    R: Record,
    E: SqliteExecutor<'e>,
{
    let value = serde_json::to_string(record)?;
    sqlx::query(
        r#"INSERT INTO kv (bucket, key, value, idx, updated_at)
           VALUES (?, ?, ?, ?, ?)
           ON CONFLICT(bucket, key) DO UPDATE SET
             value = excluded.value,
             idx = excluded.idx,
             updated_at = excluded.updated_at"#,
    )
    .bind(R::BUCKET)
    .bind(record.key())
    .bind(value)
    .bind(record.index())
    .bind(now_ms())
    .execute(exec)
    .await?;
    Ok(())
}

pub(crate) async fn update_existing<'e, R, E>(exec: E, record: &R) -> Result<()>
where
    R: Record,
    E: SqliteExecutor<'e>,
{
    let key = record.key();
    let value = serde_json::to_string(record)?;
    let result =
        sqlx::query("UPDATE kv SET value = ?, idx = ?, updated_at = ? WHERE bucket = ? AND key = ?")
            .bind(value)
            .bind(record.index())
            .bind(now_ms())
            .bind(R::BUCKET)
            .bind(&key)
            .execute(exec)
            .await?;
    if result.rows_affected() == 0 {
        return Err(Error::not_found(R::BUCKET, key));
    }
    Ok(())
}

pub(crate) async fn delete_key<'e, R, E>(exec: E, key: &str) -> Result<bool>
where
    R: Record,
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM kv WHERE bucket = ? AND key = ?")
        .bind(R::BUCKET)
        .bind(key)
        .execute(exec)
        .await?;
    Ok(result.rows_affected() > 0)
}
