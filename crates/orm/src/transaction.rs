//! Transaction Management
//!
//! `DbTransaction` is a cloneable handle to the one transaction a context may
//! have open. Statements the context issues while the handle is active run
//! inside it; `commit` and `rollback` end it for every clone.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::backends::{DatabasePool, DatabaseRow, DatabaseTransaction, DatabaseValue};
use crate::error::{ModelError, ModelResult};

/// Handle to an open transaction
#[derive(Clone)]
pub struct DbTransaction {
    id: Uuid,
    inner: Arc<Mutex<Option<Box<dyn DatabaseTransaction>>>>,
    completed: Arc<AtomicBool>,
}

impl fmt::Debug for DbTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbTransaction")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl PartialEq for DbTransaction {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DbTransaction {}

impl DbTransaction {
    /// Begin a transaction on `pool`
    pub async fn begin(pool: &dyn DatabasePool) -> ModelResult<DbTransaction> {
        let tx = pool
            .begin_transaction()
            .await
            .map_err(|e| ModelError::Transaction(format!("Failed to begin transaction: {}", e)))?;
        let id = Uuid::new_v4();
        debug!("Began transaction {}", id);
        Ok(Self {
            id,
            inner: Arc::new(Mutex::new(Some(tx))),
            completed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether the transaction is still open (not committed or rolled back)
    pub fn is_active(&self) -> bool {
        !self.completed.load(Ordering::Acquire)
    }

    /// Commit the transaction
    pub async fn commit(&self) -> ModelResult<()> {
        let tx = self.take().await?;
        debug!("Committing transaction {}", self.id);
        tx.commit()
            .await
            .map_err(|e| ModelError::Transaction(format!("Failed to commit transaction: {}", e)))?;
        debug!("Transaction {} committed successfully", self.id);
        Ok(())
    }

    /// Rollback the transaction
    pub async fn rollback(&self) -> ModelResult<()> {
        let tx = self.take().await?;
        debug!("Rolling back transaction {}", self.id);
        tx.rollback()
            .await
            .map_err(|e| {
                ModelError::Transaction(format!("Failed to rollback transaction: {}", e))
            })?;
        debug!("Transaction {} rolled back successfully", self.id);
        Ok(())
    }

    async fn take(&self) -> ModelResult<Box<dyn DatabaseTransaction>> {
        let mut guard = self.inner.lock().await;
        let tx = guard.take().ok_or_else(|| self.consumed())?;
        self.completed.store(true, Ordering::Release);
        Ok(tx)
    }

    /// End the transaction without waiting on the store. Dropping the driver
    /// transaction rolls it back. Returns false when a statement holds the
    /// transaction or it has already completed.
    pub(crate) fn abandon(&self) -> bool {
        let Ok(mut guard) = self.inner.try_lock() else {
            return false;
        };
        let Some(tx) = guard.take() else {
            return false;
        };
        self.completed.store(true, Ordering::Release);
        drop(guard);
        drop(tx);
        debug!("Transaction {} abandoned and rolled back", self.id);
        true
    }

    pub(crate) async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> ModelResult<u64> {
        let mut guard = self.inner.lock().await;
        let tx = guard.as_mut().ok_or_else(|| self.consumed())?;
        tx.execute(sql, params).await
    }

    pub(crate) async fn fetch_all(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> ModelResult<Vec<Box<dyn DatabaseRow>>> {
        let mut guard = self.inner.lock().await;
        let tx = guard.as_mut().ok_or_else(|| self.consumed())?;
        tx.fetch_all(sql, params).await
    }

    pub(crate) async fn fetch_result_sets(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> ModelResult<Vec<Vec<Box<dyn DatabaseRow>>>> {
        let mut guard = self.inner.lock().await;
        let tx = guard.as_mut().ok_or_else(|| self.consumed())?;
        tx.fetch_result_sets(sql, params).await
    }

    pub(crate) async fn fetch_optional(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> ModelResult<Option<Box<dyn DatabaseRow>>> {
        let mut guard = self.inner.lock().await;
        let tx = guard.as_mut().ok_or_else(|| self.consumed())?;
        tx.fetch_optional(sql, params).await
    }

    fn consumed(&self) -> ModelError {
        ModelError::Transaction(format!("Transaction {} has already been completed", self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{DatabasePoolConfig, SqlitePool};

    async fn pool() -> Arc<dyn DatabasePool> {
        SqlitePool::connect("sqlite::memory:", &DatabasePoolConfig::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_commit_completes_every_clone() {
        let pool = pool().await;
        let tx = DbTransaction::begin(pool.as_ref()).await.unwrap();
        let clone = tx.clone();
        assert_eq!(tx, clone);
        tx.commit().await.unwrap();
        assert!(!clone.is_active());
        assert!(matches!(clone.rollback().await, Err(ModelError::Transaction(_))));
    }

    #[tokio::test]
    async fn test_statements_after_rollback_fail() {
        let pool = pool().await;
        let tx = DbTransaction::begin(pool.as_ref()).await.unwrap();
        tx.execute("CREATE TABLE t (x INTEGER)", &[]).await.unwrap();
        tx.rollback().await.unwrap();
        assert!(matches!(tx.execute("SELECT 1", &[]).await, Err(ModelError::Transaction(_))));
    }

    #[tokio::test]
    async fn test_abandon_rolls_back_every_clone() {
        let pool = pool().await;
        let tx = DbTransaction::begin(pool.as_ref()).await.unwrap();
        tx.execute("CREATE TABLE t (x INTEGER)", &[]).await.unwrap();
        let clone = tx.clone();

        assert!(tx.abandon());
        assert!(!clone.is_active());
        assert!(!clone.abandon());
        assert!(matches!(clone.commit().await, Err(ModelError::Transaction(_))));

        // The connection only returns to the pool once the rollback has run
        let rows = pool
            .fetch_all("SELECT name FROM sqlite_master WHERE name = 't'", &[])
            .await
            .unwrap();
        assert!(rows.is_empty());
    }
}
