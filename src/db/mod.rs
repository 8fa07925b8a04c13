mod models;

pub use models::*;

use anyhow::{Context, Result};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    Sqlite, SqlitePool, Transaction,
};
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub type DbPool = SqlitePool;

/// How long a writer waits for the database lock before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Execute a SQL migration file, properly handling comments
async fn execute_sql(pool: &SqlitePool, sql: &str) -> Result<()> {
    for statement in sql.split(';') {
        // Strip SQL comment lines (lines starting with --)
        let cleaned: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let trimmed = cleaned.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }
    Ok(())
}

pub async fn init(data_dir: &Path) -> Result<DbPool> {
    let db_path = data_dir.join("gymdesk.db");

    info!("Initializing database at {}", db_path.display());

    // Applied to every pooled connection, not just the first
    let options = SqliteConnectOptions::new()
        .filename(&db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;

    run_migrations(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

/// Single-connection in-memory database with the full schema.
///
/// The pool is capped at one connection so every query sees the same
/// in-memory database.
pub async fn init_in_memory() -> Result<DbPool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

/// Open a transaction that takes the write lock up front.
///
/// A deferred transaction that reads before it writes fails with
/// `SQLITE_BUSY` when another writer commits in between; `BEGIN IMMEDIATE`
/// waits for the lock (bounded by the busy timeout) instead.
pub async fn begin_write(pool: &DbPool) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
    pool.begin_with("BEGIN IMMEDIATE").await
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    // Migration 001: Users and preferences
    execute_sql(pool, include_str!("../../migrations/001_users.sql")).await?;

    // Migration 002: Services, trainers, assignments, plans, programs, equipment
    execute_sql(pool, include_str!("../../migrations/002_catalog.sql")).await?;

    // Migration 003: Memberships, bookings, progress entries
    execute_sql(pool, include_str!("../../migrations/003_customer.sql")).await?;

    Ok(())
}
