// SPDX-FileCopyrightText: 2026 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Durable storage of queued mutations.
//!
//! A single SQLite table `offline_requests` holds every mutation which still has to be delivered.
//! The store only offers primitive operations (add, get, put, delete, scan); claiming and
//! releasing is composed from them in [`crate::queue`].

use std::{path::Path, str::FromStr, time::Duration};

use outboxcommon::{MutationId, NewMutation, QueuedMutation, TimeStamp};
use sqlx::{
    SqlitePool, SqliteTransaction,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use tracing::info;

pub(crate) use persistence::MutationRecord;

mod persistence;

const MAX_CONNECTIONS: u32 = 4;

/// How long a connection waits for a lock held by another context.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to open the queue store: {0}")]
    Open(#[source] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("Invalid mutation payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Handle to the local queue database.
///
/// Cloning the handle is cheap; all clones share the same connection pool.
#[derive(Debug, Clone)]
pub struct QueueStore {
    pool: SqlitePool,
}

impl QueueStore {
    /// Opens the store at `path`, creating the database and its schema on first use.
    ///
    /// Several contexts may open the same file; SQLite serializes their writes.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(StoreError::Open)?;
        info!(path = %path.display(), "Opened queue store");
        Self::with_pool(pool).await
    }

    /// Opens a store which lives only as long as the returned handle and its clones.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(StoreError::Open)?;
        // Every connection to `:memory:` is a separate database, so keep exactly one alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(StoreError::Open)?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Inserts a new mutation which is not processing.
    pub async fn add(
        &self,
        mutation: &NewMutation,
        timestamp: TimeStamp,
    ) -> Result<MutationId, StoreError> {
        MutationRecord::insert(&self.pool, mutation, timestamp).await
    }

    pub async fn get(&self, id: MutationId) -> Result<Option<QueuedMutation>, StoreError> {
        MutationRecord::load(&self.pool, id).await
    }

    /// Overwrites the stored record with the same id.
    ///
    /// Returns false if there is no such record.
    pub async fn put(&self, mutation: &QueuedMutation) -> Result<bool, StoreError> {
        MutationRecord::store(&self.pool, mutation).await
    }

    /// Returns false if there is no such record.
    pub async fn delete(&self, id: MutationId) -> Result<bool, StoreError> {
        MutationRecord::delete(&self.pool, id).await
    }

    /// Returns all records in append order.
    pub async fn scan(&self) -> Result<Vec<QueuedMutation>, StoreError> {
        MutationRecord::load_all(&self.pool).await
    }

    /// Executes a function with a transaction.
    ///
    /// The transaction is committed if the function returns `Ok`, and rolled back if the function
    /// returns `Err`. The write lock is taken up front, so a read-modify-write inside `f` cannot
    /// interleave with one from another context.
    pub(crate) async fn with_transaction<T: Send, E: From<StoreError>>(
        &self,
        f: impl AsyncFnOnce(&mut SqliteTransaction<'_>) -> Result<T, E>,
    ) -> Result<T, E> {
        let mut txn = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(StoreError::from)?;
        let value = f(&mut txn).await?;
        txn.commit().await.map_err(StoreError::from)?;
        Ok(value)
    }
}
