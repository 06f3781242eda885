use crate::sync::JobSummary;
use anyhow::Result;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Sync history: job runs and individual uploads.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RunRecord {
    pub id: String,
    pub source: String,
    pub uploaded: i64,
    pub already_remote: i64,
    pub failed: i64,
    pub skipped: i64,
    pub last_uploaded: Option<String>,
    pub finished_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UploadRecord {
    pub source: String,
    pub file_name: String,
    pub uploaded_at: i64,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        let in_memory = database_url.contains(":memory:");

        if !in_memory {
            let path = database_url.strip_prefix("sqlite://").unwrap_or(database_url);
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every in-memory connection is its own database, so keep exactly one.
        let max_connections = if in_memory { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_runs (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                source TEXT NOT NULL,
                uploaded INTEGER NOT NULL,
                already_remote INTEGER NOT NULL,
                failed INTEGER NOT NULL,
                skipped INTEGER NOT NULL,
                last_uploaded TEXT,
                finished_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS uploads (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                file_name TEXT NOT NULL,
                uploaded_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn record_run(&self, source: &str, summary: &JobSummary, finished_at: i64) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO sync_runs (id, source, uploaded, already_remote, failed, skipped, last_uploaded, finished_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&id)
        .bind(source)
        .bind(summary.uploaded as i64)
        .bind(summary.already_remote as i64)
        .bind(summary.failed as i64)
        .bind(summary.skipped as i64)
        .bind(summary.last_uploaded.as_deref())
        .bind(finished_at)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    pub async fn record_upload(&self, source: &str, file_name: &str, uploaded_at: i64) -> Result<()> {
        sqlx::query("INSERT INTO uploads (source, file_name, uploaded_at) VALUES (?1, ?2, ?3)")
            .bind(source)
            .bind(file_name)
            .bind(uploaded_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Time of the most recent completed job, if any.
    pub async fn last_sync(&self) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT finished_at FROM sync_runs ORDER BY seq DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get("finished_at")))
    }

    pub async fn last_upload(&self) -> Result<Option<UploadRecord>> {
        let record = sqlx::query_as::<_, UploadRecord>(
            "SELECT source, file_name, uploaded_at FROM uploads ORDER BY seq DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn recent_runs(&self, limit: i64) -> Result<Vec<RunRecord>> {
        let runs = sqlx::query_as::<_, RunRecord>(
            r#"
            SELECT id, source, uploaded, already_remote, failed, skipped, last_uploaded, finished_at
            FROM sync_runs
            ORDER BY seq DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(runs)
    }
}
