use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // Create tasks table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            task_uid BLOB PRIMARY KEY,
            user_uid TEXT NOT NULL,
            total_steps INTEGER NOT NULL,
            status TEXT NOT NULL,
            current_step_number INTEGER,
            current_step_uid BLOB,
            last_completed_step INTEGER NOT NULL DEFAULT 0,
            failed_step_number INTEGER,
            failed_step_uid BLOB,
            failure_stage TEXT,
            failure_message TEXT,
            created_at TEXT NOT NULL,
            started_at TEXT,
            finished_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create steps table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS steps (
            step_uid BLOB PRIMARY KEY,
            task_uid BLOB NOT NULL REFERENCES tasks(task_uid) ON DELETE CASCADE,
            step_number INTEGER NOT NULL,
            tool_name TEXT NOT NULL,
            args TEXT NOT NULL DEFAULT '{}',
            purpose TEXT,
            status TEXT NOT NULL,
            run_id TEXT,
            output_dir TEXT,
            log_path TEXT,
            status_path TEXT,
            exit_code INTEGER,
            error_message TEXT,
            started_at TEXT,
            finished_at TEXT,
            UNIQUE (task_uid, step_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create datasets table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS datasets (
            id INTEGER PRIMARY KEY,
            owner_uid TEXT NOT NULL,
            path TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status, created_at)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_user ON tasks(user_uid, created_at DESC)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_steps_task ON steps(task_uid, step_number)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_datasets_owner ON datasets(owner_uid)")
        .execute(pool)
        .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}

/// Opens the pool and brings the schema up to date
pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let pool = create_pool(database_url, max_connections).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}
