use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

use crate::models::job::JobStatus;

/// Open (or create) the SQLite job store at `path`.
///
/// WAL with `synchronous = FULL` makes every committed write durable.
pub async fn init_pool(path: &Path) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .busy_timeout(Duration::from_secs(30));

    SqlitePoolOptions::new()
        .max_connections(8)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .connect_with(options)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Invalid transition for job {reference_id}: {from} -> {to}")]
    InvalidTransition {
        reference_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Could not allocate a unique reference id after {0} attempts")]
    IdExhausted(usize),

    #[error("Corrupt job row: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

pub mod queries;
