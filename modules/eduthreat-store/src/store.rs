use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use crate::error::Result;

/// Writer busy-timeout. Readers use the shorter [`READ_BUSY_TIMEOUT`].
const WRITE_BUSY_TIMEOUT: Duration = Duration::from_secs(30);
const READ_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the incident store.
///
/// Backed by a single-connection pool: SQLite handle affinity means one
/// handle must never be shared across tasks that expect independent
/// transaction scopes. Each task opens its own `Store`; WAL mode lets a
/// writer and many readers coexist.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open a writer handle: WAL journal, normal synchronous, foreign keys
    /// enforced, 30 s busy-timeout.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(WRITE_BUSY_TIMEOUT)
            .foreign_keys(true);

        let pool = single_connection_pool(options).await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Open a read-only handle. Never acquires write locks and fails fast
    /// (5 s busy-timeout).
    pub async fn open_read_only(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .busy_timeout(READ_BUSY_TIMEOUT)
            .foreign_keys(true);

        let pool = single_connection_pool(options).await?;
        Ok(Self { pool })
    }

    /// In-memory store for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);

        let pool = single_connection_pool(options).await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Run the embedded SQL migrations.
    async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn single_connection_pool(options: SqliteConnectOptions) -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    Ok(pool)
}
