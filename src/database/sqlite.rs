//! SQLite database implementation.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::QueryBuilder;
use sqlx::Sqlite;
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::sqlite::SqliteJournalMode;
use sqlx::sqlite::SqliteSynchronous;
use uuid::Uuid;

use super::Database;
use super::DatabaseError;
use super::Result;
use super::models::Analysis;
use super::models::AnalysisRow;
use super::models::AnalysisStatus;
use super::models::AnalysisUpdate;

/// Default page size for pagination.
const DEFAULT_PAGE_SIZE: i64 = 100;

/// Default offset for pagination.
const DEFAULT_OFFSET: i64 = 0;

/// SQLite connection string prefix.
const SQLITE_CONNECTION_PREFIX: &str = "sqlite:";

/// Store temporary tables and indices in memory for faster operations.
const SQLITE_TEMP_STORE: &str = "memory";

/// Enable foreign key constraint enforcement for referential integrity.
const SQLITE_FOREIGN_KEYS: &str = "on";

/// Metadata key for the schema version.
const VERSION_KEY: &str = "version";

/// Expected schema version.
const EXPECTED_VERSION: &str = "1";

/// Configure 5-second timeout when database is locked to prevent spurious
/// failures.
const SQLITE_BUSY_TIMEOUT: &str = "5000";

/// Allocate approximately 8MB for SQLite page cache for improved query
/// performance.
const SQLITE_CACHE_SIZE: &str = "2000";

/// The columns selected for an analysis.
const ANALYSIS_COLUMNS: &str = "id, target_endpoint, status, progress, created_at, updated_at, \
                                completed_at, inputs, outputs, bias_summary, bias_scores, \
                                report_reference, error_message";

/// SQLite database implementation.
#[derive(Debug, Clone)]
pub struct SqliteDatabase {
    /// The underlying SQLite connection pool.
    pool: SqlitePool,
}

impl SqliteDatabase {
    /// Create a new SQLite database connection from a path.
    ///
    /// Migrations are run upon a successful connection pool being established.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let database_url = format!("{}//{}", SQLITE_CONNECTION_PREFIX, path.display());
        let options = SqliteConnectOptions::from_str(&database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("temp_store", SQLITE_TEMP_STORE)
            .pragma("foreign_keys", SQLITE_FOREIGN_KEYS)
            .pragma("busy_timeout", SQLITE_BUSY_TIMEOUT)
            .pragma("cache_size", SQLITE_CACHE_SIZE);

        let pool = SqlitePool::connect_with(options).await?;
        Self::from_pool(pool).await
    }

    /// Creates a new SQLite connection from an existing pool.
    ///
    /// This method also runs the embedded migrations and checks the schema
    /// version.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;

        let version: Option<String> =
            sqlx::query_scalar("select value from metadata where key = ?")
                .bind(VERSION_KEY)
                .fetch_optional(&pool)
                .await?;

        match version {
            None => {
                sqlx::query("insert into metadata (key, value) values (?, ?)")
                    .bind(VERSION_KEY)
                    .bind(EXPECTED_VERSION)
                    .execute(&pool)
                    .await?;
            }
            Some(ref v) if v == EXPECTED_VERSION => {}
            Some(v) => {
                return Err(DatabaseError::InvalidVersion {
                    expected: EXPECTED_VERSION.to_string(),
                    found: v,
                });
            }
        }

        Ok(Self { pool })
    }

    /// Closes the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn create_analysis(&self, id: Uuid, target_endpoint: &str) -> Result<Analysis> {
        debug_assert!(
            !target_endpoint.is_empty(),
            "`target_endpoint` cannot be empty for an analysis"
        );

        let now = Utc::now();
        sqlx::query(
            "insert into analyses (id, target_endpoint, status, progress, created_at, updated_at) \
             values (?, ?, ?, 0, ?, ?)",
        )
        .bind(id.to_string())
        .bind(target_endpoint)
        .bind(AnalysisStatus::Started)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let row: AnalysisRow = sqlx::query_as(&format!(
            "select {ANALYSIS_COLUMNS} from analyses where id = ?"
        ))
        .bind(id.to_string())
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn get_analysis(&self, id: Uuid) -> Result<Option<Analysis>> {
        let row: Option<AnalysisRow> = sqlx::query_as(&format!(
            "select {ANALYSIS_COLUMNS} from analyses where id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Analysis::try_from).transpose()
    }

    async fn update_analysis(&self, id: Uuid, update: AnalysisUpdate) -> Result<bool> {
        let mut query: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("update analyses set updated_at = ");
        query.push_bind(Utc::now());

        if let Some(status) = update.status {
            query.push(", status = ").push_bind(status);
        }

        if let Some(progress) = update.progress {
            query.push(", progress = ").push_bind(i64::from(progress));
        }

        if let Some(inputs) = &update.inputs {
            query
                .push(", inputs = ")
                .push_bind(serde_json::to_string(inputs)?);
        }

        if let Some(outputs) = &update.outputs {
            query
                .push(", outputs = ")
                .push_bind(serde_json::to_string(outputs)?);
        }

        if let Some(summary) = &update.bias_summary {
            query
                .push(", bias_summary = ")
                .push_bind(serde_json::to_string(summary)?);
        }

        if let Some(scores) = &update.bias_scores {
            query
                .push(", bias_scores = ")
                .push_bind(serde_json::to_string(scores)?);
        }

        if let Some(reference) = update.report_reference {
            query.push(", report_reference = ").push_bind(reference);
        }

        if let Some(message) = update.error_message {
            query.push(", error_message = ").push_bind(message);
        }

        if let Some(completed_at) = update.completed_at {
            query.push(", completed_at = ").push_bind(completed_at);
        }

        query.push(" where id = ").push_bind(id.to_string());

        let result = query.build().execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_analyses(
        &self,
        status: Option<AnalysisStatus>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<Analysis>> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE);
        let offset = offset.unwrap_or(DEFAULT_OFFSET);

        let rows: Vec<AnalysisRow> = if let Some(status) = status {
            sqlx::query_as(&format!(
                "select {ANALYSIS_COLUMNS} from analyses where status = ? order by created_at \
                 desc, rowid desc limit ? offset ?"
            ))
            .bind(status)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as(&format!(
                "select {ANALYSIS_COLUMNS} from analyses order by created_at desc, rowid desc \
                 limit ? offset ?"
            ))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter().map(Analysis::try_from).collect()
    }

    async fn count_analyses(&self, status: Option<AnalysisStatus>) -> Result<i64> {
        let count: (i64,) = if let Some(status) = status {
            sqlx::query_as("select count(*) from analyses where status = ?")
                .bind(status)
                .fetch_one(&self.pool)
                .await?
        } else {
            sqlx::query_as("select count(*) from analyses")
                .fetch_one(&self.pool)
                .await?
        };

        Ok(count.0)
    }
}
