use anyhow::Result;
use sqlx::{sqlite::SqlitePool, Row};
use tracing::{debug, info};

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations");

    create_users_table(pool).await?;
    create_tickets_table(pool).await?;
    create_events_table(pool).await?;
    create_workflow_runs_table(pool).await?;
    create_workflow_steps_table(pool).await?;

    info!("Database migrations completed successfully");
    Ok(())
}

async fn create_users_table(pool: &SqlitePool) -> Result<()> {
    debug!("Creating users table");
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('user', 'junior', 'senior')),
            skills TEXT NOT NULL DEFAULT '[]',
            experience INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
    "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_tickets_table(pool: &SqlitePool) -> Result<()> {
    debug!("Creating tickets table");
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tickets (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            priority TEXT NOT NULL DEFAULT 'medium' CHECK (priority IN ('low', 'medium', 'high')),
            status TEXT NOT NULL DEFAULT 'TODO' CHECK (status IN ('TODO', 'IN_PROGRESS', 'COMPLETED')),
            created_by TEXT NOT NULL,
            assigned_to TEXT NULL,
            deadline TEXT NULL,
            related_skills TEXT NOT NULL DEFAULT '[]',
            helpful_notes TEXT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            FOREIGN KEY (created_by) REFERENCES users(id) ON DELETE CASCADE,
            FOREIGN KEY (assigned_to) REFERENCES users(id) ON DELETE SET NULL
        )
    "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tickets_created_by ON tickets(created_by)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tickets_assigned_to ON tickets(assigned_to)")
        .execute(pool)
        .await?;
    Ok(())
}

async fn create_events_table(pool: &SqlitePool) -> Result<()> {
    debug!("Creating events table");
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            payload TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            processed BOOLEAN NOT NULL DEFAULT 0,
            resolution_summary TEXT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )
    "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_workflow_runs_table(pool: &SqlitePool) -> Result<()> {
    debug!("Creating workflow_runs table");
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workflow_runs (
            run_id TEXT PRIMARY KEY,
            workflow_id TEXT NOT NULL,
            event_id TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('running', 'completed', 'failed')),
            output TEXT NULL,
            error TEXT NULL,
            attempts INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
    "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_workflow_steps_table(pool: &SqlitePool) -> Result<()> {
    debug!("Creating workflow_steps table");
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workflow_steps (
            run_id TEXT NOT NULL,
            step_name TEXT NOT NULL,
            output TEXT NOT NULL,
            completed_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (run_id, step_name),
            FOREIGN KEY (run_id) REFERENCES workflow_runs(run_id) ON DELETE CASCADE
        )
    "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_database_info(pool: &SqlitePool) -> Result<String> {
    let row = sqlx::query("SELECT sqlite_version() as version")
        .fetch_one(pool)
        .await?;

    let version: String = row.get("version");
    Ok(version)
}
