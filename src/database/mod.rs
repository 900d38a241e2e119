pub mod events;
pub mod schema;
pub mod tickets;
pub mod users;
pub mod workflow_runs;

use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Pool, Sqlite,
};
use std::{fs, path::Path, str::FromStr, time::Duration};
use tracing::info;

pub type DbPool = Pool<Sqlite>;

/// Strips the `sqlite:` scheme and any query string from a database URL.
fn database_file_path(database_url: &str) -> &str {
    let without_scheme = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);
    without_scheme
        .split_once('?')
        .map_or(without_scheme, |(path, _)| path)
}

/// Ensures the directory holding the database file exists
pub fn ensure_directory_structure(database_url: &str) -> Result<()> {
    let db_path = Path::new(database_file_path(database_url));

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
            info!("Ensured database directory: {}", parent.display());
        }
    }

    Ok(())
}

/// Directory for rolling log files, placed next to the database file
pub fn logs_dir(database_path: &str) -> std::path::PathBuf {
    let db_path = Path::new(database_file_path(database_path));
    match db_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join("logs"),
        _ => Path::new("logs").to_path_buf(),
    }
}

pub async fn create_pool(database_url: &str) -> Result<DbPool> {
    info!("Connecting to SQLite database");

    ensure_directory_structure(database_url)?;

    let connect_opts = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new().connect_with(connect_opts).await?;

    schema::run_migrations(&pool).await?;

    Ok(pool)
}

/// Whether `err` wraps a SQLite UNIQUE constraint failure.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<sqlx::Error>(),
        Some(sqlx::Error::Database(db_err)) if db_err.is_unique_violation()
    )
}

pub async fn close_pool(pool: DbPool) {
    info!("Closing database connection pool");
    pool.close().await;
}
