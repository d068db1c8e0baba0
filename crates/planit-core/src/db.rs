use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;

use crate::error::CoreError;

// Re-export the pool for use in other parts of the core crate
pub use sqlx::SqlitePool as DbPool;

/// Establishes a connection pool to the SQLite database and initializes the
/// schema.
///
/// The database file (and any missing parent directories) is created on first
/// use. Schema setup is idempotent, so reopening an existing database reloads
/// the task collection and completion records it already holds.
pub async fn establish_connection(db_path: &str) -> Result<SqlitePool, CoreError> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    init_schema(&pool).await?;

    Ok(pool)
}

/// Creates all tables if they do not exist. Recurrence rules are flattened
/// into the task row; tags, attributes, and per-occurrence completions live
/// in child tables keyed by task id.
async fn init_schema(pool: &SqlitePool) -> Result<(), CoreError> {
    let statements = [
        r#"CREATE TABLE IF NOT EXISTS tasks (
            id BLOB PRIMARY KEY,
            name TEXT NOT NULL,
            start_at TEXT,
            end_at TEXT,
            repeat_frequency TEXT,
            repeat_interval INTEGER,
            repeat_until TEXT,
            repeat_count INTEGER,
            completed INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS task_tags (
            task_id BLOB NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            tag_name TEXT NOT NULL,
            PRIMARY KEY (task_id, tag_name)
        )"#,
        r#"CREATE TABLE IF NOT EXISTS task_attributes (
            task_id BLOB NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (task_id, key)
        )"#,
        r#"CREATE TABLE IF NOT EXISTS occurrence_completions (
            task_id BLOB NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            scheduled_at TEXT NOT NULL,
            completed_at TEXT NOT NULL,
            PRIMARY KEY (task_id, scheduled_at)
        )"#,
        "CREATE INDEX IF NOT EXISTS idx_tasks_start_at ON tasks(start_at)",
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}
