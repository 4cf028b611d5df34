//! Database access for the Orrery pipeline
//!
//! One shared SQLite pool; tables are created idempotently at startup.

pub mod load_history;
pub mod quarantine;
pub mod queries;
pub mod schema;

use sqlx::SqlitePool;
use std::path::Path;

use crate::error::EtlResult;

/// Initialize database connection pool and create tables
pub async fn init_database_pool(db_path: &Path) -> EtlResult<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    schema::init_tables(&pool).await?;

    Ok(pool)
}

/// In-memory pool for tests
///
/// Capped at one connection: every pooled connection to `:memory:`
/// would otherwise get its own empty database.
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .unwrap();
    schema::init_tables(&pool).await.unwrap();
    pool
}
