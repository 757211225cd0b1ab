use sqlx::{Sqlite, Transaction};

use crate::{
    Result,
    record::Record,
    store::{delete_key, fetch, update_existing, upsert},
};

/// An open write transaction. Dropping it without `commit` rolls back.
pub struct Tx {
    inner: Transaction<'static, Sqlite>,
}

impl Tx {
    pub(crate) fn new(inner: Transaction<'static, Sqlite>) -> Self {
        Self { inner }
    }

    pub async fn get<R: Record>(&mut self, key: &str) -> Result<Option<R>> {
        fetch(&mut *self.inner, key).await
    }

    pub async fn save<R: Record>(&mut self, record: &R) -> Result<()> {
        upsert(&mut *self.inner, record).await
    }

    pub async fn update<R: Record>(&mut self, record: &R) -> Result<()> {
        update_existing(&mut *self.inner, record).await
    }

    pub async fn delete<R: Record>(&mut self, key: &str) -> Result<bool> {
        delete_key::<R, _>(&mut *self.inner, key).await
    }

    pub async fn commit(self) -> Result<()> {
        self.inner.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        self.inner.rollback().await?;
        Ok(())
    }
}
