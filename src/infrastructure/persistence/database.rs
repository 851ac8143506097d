use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Shared database handle
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        // Ensure the directory exists if it's a file path
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal); // Better for concurrency

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        // 1. Per-client monitoring records
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS account_monitoring (
                client_id TEXT PRIMARY KEY,
                venue TEXT NOT NULL,
                initial_balance TEXT NOT NULL,
                daily_start_balance TEXT NOT NULL,
                current_balance TEXT NOT NULL,
                previous_balance TEXT NOT NULL,
                status TEXT NOT NULL,
                daily_blocked_at TEXT,
                permanent_blocked_at TEXT,
                daily_block_reason TEXT,
                permanent_block_reason TEXT,
                last_balance_update TEXT,
                last_risk_check TEXT,
                daily_reset_at TEXT NOT NULL,
                active INTEGER NOT NULL,
                session_epoch INTEGER NOT NULL,
                version INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create account_monitoring table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_account_monitoring_active
            ON account_monitoring (active, last_balance_update);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create account_monitoring index")?;

        // 2. Status transition audit trail
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_log (
                event_id INTEGER PRIMARY KEY,
                client_id TEXT NOT NULL,
                before_status TEXT NOT NULL,
                after_status TEXT NOT NULL,
                reason TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_event_log_client
            ON event_log (client_id, event_id);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create event_log table")?;

        // 3. Durable notification history
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notification_history (
                event_id INTEGER PRIMARY KEY,
                record_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                client_id TEXT NOT NULL,
                priority TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_notification_history_client
            ON notification_history (client_id, event_id);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create notification_history table")?;

        // 4. Dead letters: publishes that exhausted their retry/TTL budget
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dead_letter (
                event_id INTEGER PRIMARY KEY,
                event_type TEXT NOT NULL,
                client_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                failure TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create dead_letter table")?;

        info!("Database schema initialized.");
        Ok(())
    }

    /// High-water mark for seeding the event id sequence across restarts.
    pub async fn max_event_id(&self) -> Result<u64> {
        let row: (Option<i64>, Option<i64>) = sqlx::query_as(
            r#"
            SELECT
                (SELECT MAX(event_id) FROM event_log),
                (SELECT MAX(event_id) FROM notification_history)
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to read event id high-water mark")?;

        Ok(row.0.unwrap_or(0).max(row.1.unwrap_or(0)) as u64)
    }
}
