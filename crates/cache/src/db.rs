//! Database connection and pool management.

use exn::ResultExt;
use sqlx::SqliteConnection;
use sqlx::migrate::Migrator;
use sqlx::pool::PoolConnectionMetadata;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use tracing::instrument;

use crate::error::{ErrorKind, Result};

/// Schema of the primary store (user overrides).
static PRIMARY_MIGRATOR: Migrator = sqlx::migrate!("./migrations/primary");
/// Schema of the cache store (remote mappings and refresh markers).
static CACHE_MIGRATOR: Migrator = sqlx::migrate!("./migrations/cache");
// Lookups are short and mostly reads; a handful of connections is plenty.
const MAX_CONNECTIONS: u32 = 5;

/// Which of the two stores a [`Database`] holds.
///
/// They are kept apart because they have very different value: the primary
/// store holds what users typed in, the cache store only holds what can be
/// fetched again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Store {
    /// User overrides.
    Primary,
    /// Remote mappings and refresh bookkeeping.
    Cache,
}

impl Store {
    fn migrator(self) -> &'static Migrator {
        match self {
            Self::Primary => &PRIMARY_MIGRATOR,
            Self::Cache => &CACHE_MIGRATOR,
        }
    }
}

/// Database connection pool for one store.
///
/// Connecting runs the store's embedded migrations, so the schema exists
/// before any repository touches it. Migrations are tracked by sqlx and are
/// safe to run again on every start, from any number of processes.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    store: Store,
}

impl Database {
    async fn new(store: Store, options: SqliteConnectOptions, max: Option<u32>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            // This is IMPORTANT to apply the query-based PRAGMAs to EVERY
            // connection (set by max connections) instead of only the
            // first connection returned by the pool.
            .after_connect(|conn, meta| Box::pin(async move { Self::apply_pragmas(conn, meta).await }))
            .max_connections(max.unwrap_or(MAX_CONNECTIONS))
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let db = Self { pool, store };
        db.migrate().await?;
        Ok(db)
    }

    /// Connect to the store at the given path.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn connect(store: Store, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let options = Self::base_options().filename(path).create_if_missing(true);
        Self::new(store, options, None).await
    }

    /// Connect to an in-memory database (useful for testing).
    ///
    /// Note:
    /// - In-memory databases are destroyed when the connection closes.
    /// - Do NOT apply `#[cfg(test)]` so that other crates can also use this in their tests.
    pub async fn connect_in_memory(store: Store) -> Result<Self> {
        let options = Self::base_options().filename(":memory:");
        // In-memory database must either use the same cache `.shared_cache(true)`,
        // or be limited to one connection. Otherwise parallel connections will
        // see different databases that contain different data.
        Self::new(store, options, Some(1)).await
    }

    /// Base connection options shared between file and in-memory databases.
    fn base_options() -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            // Enable WAL mode for better concurrent read performance
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            // PRAGMA synchronous = NORMAL (balance between safety and speed)
            .synchronous(SqliteSynchronous::Normal)
            // PRAGMA busy_timeout = 1500ms
            // A refresh holds the write lock for the whole delete+insert of a
            // show; concurrent override writes wait for it instead of failing.
            .busy_timeout(std::time::Duration::from_millis(1500))
    }

    /// Apply additional PRAGMA settings that aren't exposed via SqliteConnectOptions.
    async fn apply_pragmas(conn: &mut SqliteConnection, _meta: PoolConnectionMetadata) -> sqlx::Result<()> {
        sqlx::query(
            r#"
                PRAGMA wal_autocheckpoint = 800;
                PRAGMA cache_size = -4096;
                PRAGMA temp_store = MEMORY;
            "#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Run database migrations.
    ///
    /// This is called automatically by `connect` and `connect_in_memory`.
    #[instrument("performing database migrations", skip(self), fields(store = ?self.store))]
    async fn migrate(&self) -> Result<()> {
        self.store.migrator().run(&self.pool).await.or_raise(|| ErrorKind::Migration)
    }

    /// Which store this database holds.
    pub fn store(&self) -> Store {
        self.store
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection pool.
    ///
    /// This waits for all connections to be returned to the pool and then
    /// closes them.
    pub async fn close(&self) {
        // Let SQLite update query planner statistics
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    async fn table_names(db: &Database) -> Vec<String> {
        sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE '\\_%' ESCAPE '\\' ORDER BY name",
        )
        .fetch_all(db.pool())
        .await
        .unwrap()
    }

    #[rstest]
    #[case(Store::Primary, &["scene_numbering"])]
    #[case(Store::Cache, &["remote_numbering", "remote_refresh"])]
    #[tokio::test]
    async fn test_schema_per_store(#[case] store: Store, #[case] expected: &[&str]) {
        let db = Database::connect_in_memory(store).await.unwrap();
        assert_eq!(db.store(), store);
        assert_eq!(table_names(&db).await, expected);
        db.close().await;
    }

    #[rstest]
    #[case(Store::Primary)]
    #[case(Store::Cache)]
    #[tokio::test]
    async fn test_migrations_are_idempotent(#[case] store: Store) {
        let db = Database::connect_in_memory(store).await.unwrap();
        // Running migrate again should succeed (already applied)
        db.migrate().await.unwrap();
        db.migrate().await.unwrap();
        db.close().await;
    }

    #[tokio::test]
    async fn test_pragmas_are_applied() {
        let db = Database::connect_in_memory(Store::Cache).await.unwrap();
        let row: (i64,) = sqlx::query_as("PRAGMA wal_autocheckpoint").fetch_one(db.pool()).await.unwrap();
        assert_eq!(row.0, 800, "WAL checkpoint should be 800");
        db.close().await;
    }
}
