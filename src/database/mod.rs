//! SQLite connection pool.
//!
//! Backed by `deadpool-sqlite`. Work reaches a pooled `rusqlite` connection
//! through `interact`, which runs it on Tokio's blocking thread pool.
//!
//! - at most `max_open` connections exist at once;
//! - at most `max_idle` of them are kept between uses, the rest are closed;
//! - the schema is bootstrapped once, when the pool opens. A pool that cannot
//!   bootstrap does not exist.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use deadpool_sqlite::{Hook, HookError, Pool, PoolConfig, Runtime};
use rusqlite::Connection;
use thiserror::Error;
use tracing::{debug, error, info};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS records (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    data TEXT NOT NULL
);
";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub type DbResult<T> = Result<T, DatabaseError>;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool: {0}")]
    Pool(#[from] deadpool_sqlite::PoolError),

    #[error("database worker failed: {0}")]
    Worker(String),

    #[error("invalid pool configuration: {0}")]
    Config(String),
}

/// Where the database lives and how many connections it may use.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_open: usize,
    pub max_idle: usize,
}

impl DatabaseConfig {
    /// Defaults: 25 open connections, 5 kept idle.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_open: 25,
            max_idle: 5,
        }
    }

    fn validate(&self) -> DbResult<()> {
        if self.max_open == 0 {
            return Err(DatabaseError::Config("max_open must be at least 1".into()));
        }
        if self.max_idle > self.max_open {
            return Err(DatabaseError::Config(format!(
                "max_idle ({}) exceeds max_open ({})",
                self.max_idle, self.max_open
            )));
        }
        Ok(())
    }
}

/// A cloneable handle to the shared connection pool.
#[derive(Clone)]
pub struct Database {
    pool: Pool,
    path: PathBuf,
    max_idle: usize,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("max_idle", &self.max_idle)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Opens the database file, switches it to WAL and creates the schema
    /// if needed. Pooled connections are opened lazily afterwards.
    pub fn open(config: &DatabaseConfig) -> DbResult<Self> {
        config.validate()?;

        let started_at = Instant::now();
        info!(path = %config.path.display(), "opening database");

        bootstrap(&config.path).inspect_err(|e| {
            error!(
                path = %config.path.display(),
                elapsed = ?started_at.elapsed(),
                error = %e,
                "database bootstrap failed"
            );
        })?;

        let mut pool_config = deadpool_sqlite::Config::new(&config.path);
        pool_config.pool = Some(PoolConfig::new(config.max_open));
        let pool = pool_config
            .builder(Runtime::Tokio1)
            .map_err(|e| DatabaseError::Config(e.to_string()))?
            .post_create(Hook::async_fn(|conn, _| {
                Box::pin(async move {
                    conn.interact(|conn| conn.busy_timeout(BUSY_TIMEOUT))
                        .await
                        .map_err(|e| HookError::Message(e.to_string().into()))?
                        .map_err(HookError::Backend)?;
                    debug!("pooled connection opened");
                    Ok(())
                })
            }))
            .build()
            .map_err(|e| DatabaseError::Config(e.to_string()))?;

        info!(
            path = %config.path.display(),
            max_open = config.max_open,
            max_idle = config.max_idle,
            elapsed = ?started_at.elapsed(),
            "database ready"
        );

        Ok(Self {
            pool,
            path: config.path.clone(),
            max_idle: config.max_idle,
        })
    }

    /// Runs `work` with a pooled connection, off the async runtime.
    ///
    /// Waits for a free slot when `max_open` connections are busy.
    pub async fn with_connection<T, F>(&self, work: F) -> DbResult<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.pool.get().await?;
        let result = conn
            .interact(move |conn| work(conn))
            .await
            .map_err(|e| DatabaseError::Worker(e.to_string()))?;
        drop(conn);
        self.trim_idle();
        Ok(result?)
    }

    /// Number of connections currently parked for reuse.
    pub fn idle_connections(&self) -> usize {
        self.pool.status().available
    }

    fn trim_idle(&self) {
        if self.pool.status().available <= self.max_idle {
            return;
        }
        let mut kept = 0;
        self.pool.retain(|_, _| {
            kept += 1;
            kept <= self.max_idle
        });
    }
}

fn bootstrap(path: &Path) -> DbResult<()> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    debug!(journal_mode = %mode, "database configured");
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &tempfile::TempDir) -> DatabaseConfig {
        DatabaseConfig::new(dir.path().join("records.db"))
    }

    #[test]
    fn open_creates_schema_in_wal_mode() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&config(&dir)).unwrap();
        assert_eq!(db.idle_connections(), 0);

        let conn = Connection::open(dir.path().join("records.db")).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'records'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);

        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_ascii_lowercase(), "wal");
    }

    #[test]
    fn open_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        Database::open(&config(&dir)).unwrap();
        Database::open(&config(&dir)).unwrap();
    }

    #[test]
    fn open_fails_for_unreachable_path() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = DatabaseConfig::new(dir.path().join("missing").join("records.db"));
        assert!(matches!(Database::open(&cfg), Err(DatabaseError::Sqlite(_))));
    }

    #[test]
    fn rejects_invalid_sizing() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(&dir);
        cfg.max_open = 0;
        cfg.max_idle = 0;
        assert!(matches!(Database::open(&cfg), Err(DatabaseError::Config(_))));

        let mut cfg = config(&dir);
        cfg.max_open = 2;
        cfg.max_idle = 3;
        assert!(matches!(Database::open(&cfg), Err(DatabaseError::Config(_))));
    }

    #[tokio::test]
    async fn pooled_connections_wait_on_locks() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&config(&dir)).unwrap();
        let timeout = db
            .with_connection(|conn| conn.query_row("PRAGMA busy_timeout", [], |row| row.get::<_, i64>(0)))
            .await
            .unwrap();
        assert_eq!(timeout, 5000);
    }

    #[tokio::test]
    async fn connections_are_reused_up_to_max_idle() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(&dir);
        cfg.max_open = 4;
        cfg.max_idle = 2;
        let db = Database::open(&cfg).unwrap();

        let barrier = std::sync::Arc::new(std::sync::Barrier::new(4));
        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let db = db.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    db.with_connection(move |conn| {
                        // Holds all four connections open at once.
                        barrier.wait();
                        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                    })
                    .await
                })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 1);
        }

        assert_eq!(db.idle_connections(), 2);
    }

    #[tokio::test]
    async fn sql_errors_surface_as_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&config(&dir)).unwrap();
        let err = db
            .with_connection(|conn| conn.execute("INSERT INTO nowhere VALUES (1)", []))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Sqlite(_)));
    }
}
