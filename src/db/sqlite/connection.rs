//! SQLite connection pool utilities

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::Path;

use crate::error::Result;

/// Build a connection pool for the given database file.
///
/// WAL mode lets parallel collection workers read while one writer
/// commits; foreign keys are enforced on every connection.
pub fn create_pool(path: &Path, max_size: u32) -> Result<Pool<SqliteConnectionManager>> {
    let manager = SqliteConnectionManager::file(path).with_init(configure_connection);
    let pool = Pool::builder().max_size(max_size).build(manager)?;
    Ok(pool)
}

/// In-memory pool for tests. A single connection so every handle sees
/// the same database.
pub fn create_memory_pool() -> Result<Pool<SqliteConnectionManager>> {
    let manager = SqliteConnectionManager::memory().with_init(configure_connection);
    let pool = Pool::builder().max_size(1).build(manager)?;
    Ok(pool)
}

fn configure_connection(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         PRAGMA foreign_keys=ON;
         PRAGMA busy_timeout=5000;",
    )
}
