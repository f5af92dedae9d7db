//! r2d2 connection pools over SQLite.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use tf_core::{Error, Result};

use crate::migrations;

/// How long a connection waits on a lock held by another worker process.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const FILE_POOL_SIZE: u32 = 8;
const MEMORY_POOL_SIZE: u32 = 4;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Open (or create) the store at `db_path` and bring its schema up to date.
///
/// Every connection gets WAL journaling and a busy timeout, since several
/// `transforge worker` processes may write to the same file.
pub fn init_pool(db_path: &str) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;",
        )
    });
    migrated(manager, FILE_POOL_SIZE)
}

/// A private in-memory store, mainly for tests.
///
/// Each call gets its own shared-cache database name, so connections of one
/// pool see the same data while separate pools stay isolated.
pub fn init_memory_pool() -> Result<DbPool> {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let uri = format!(
        "file:transforge_mem_{}?mode=memory&cache=shared",
        NEXT.fetch_add(1, Ordering::Relaxed)
    );
    let manager = SqliteConnectionManager::file(uri).with_init(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
    });
    migrated(manager, MEMORY_POOL_SIZE)
}

fn migrated(manager: SqliteConnectionManager, size: u32) -> Result<DbPool> {
    let pool = Pool::builder()
        .max_size(size)
        .build(manager)
        .map_err(|e| Error::database(format!("Failed to create connection pool: {e}")))?;
    migrations::run_migrations(&*get_conn(&pool)?)?;
    Ok(pool)
}

pub fn get_conn(pool: &DbPool) -> Result<PooledConnection> {
    pool.get()
        .map_err(|e| Error::database(format!("No database connection available: {e}")))
}
