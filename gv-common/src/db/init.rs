//! Database initialization
//!
//! Creates the catalog file on first run and the tables it needs. Table
//! creation is idempotent, so every start runs the same sequence.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// SQLite busy timeout applied to every pooled connection
pub const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Open (creating if needed) the catalog database and create missing tables
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Pragmas are per connection, so they go on the connect options rather
    // than a one-off query against the pool.
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_catalog_tables(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory catalog (tests and dry runs)
pub async fn init_memory_database() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    // One connection: every pooled connection would otherwise get its own
    // private in-memory database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    create_catalog_tables(&pool).await?;

    Ok(pool)
}

/// Create platforms, items and scan_runs tables if missing
pub async fn create_catalog_tables(pool: &SqlitePool) -> Result<()> {
    create_platforms_table(pool).await?;
    create_items_table(pool).await?;
    create_scan_runs_table(pool).await?;
    Ok(())
}

async fn create_platforms_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS platforms (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            slug TEXT NOT NULL UNIQUE,
            fs_slug TEXT NOT NULL,
            name TEXT NOT NULL,
            provider_ids TEXT NOT NULL DEFAULT '{}',
            logo_path TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_items_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            platform_id INTEGER NOT NULL REFERENCES platforms(id) ON DELETE CASCADE,
            file_name TEXT NOT NULL,
            file_name_no_tags TEXT NOT NULL,
            name TEXT NOT NULL,
            file_extension TEXT NOT NULL DEFAULT '',
            file_path TEXT NOT NULL,
            file_size INTEGER NOT NULL DEFAULT 0,
            region TEXT,
            revision TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            summary TEXT,
            cover_small TEXT,
            cover_large TEXT,
            provider_ids TEXT NOT NULL DEFAULT '{}',
            provider_metadata TEXT NOT NULL DEFAULT '{}',
            multi INTEGER NOT NULL DEFAULT 0,
            files TEXT NOT NULL DEFAULT '[]',
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(platform_id, file_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_platform ON items(platform_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_scan_runs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scan_runs (
            run_id TEXT PRIMARY KEY,
            state TEXT NOT NULL,
            request TEXT NOT NULL,
            failure_reason TEXT,
            stats TEXT,
            queued_at TEXT NOT NULL,
            started_at TEXT,
            ended_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_scan_runs_state ON scan_runs(state)")
        .execute(pool)
        .await?;

    Ok(())
}
