//! Persistence of analysis records.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub mod models;
pub mod sqlite;

pub use models::Analysis;
pub use models::AnalysisStatus;
pub use models::AnalysisUpdate;
pub use models::ModelOutput;
pub use models::SyntheticInput;
pub use sqlite::SqliteDatabase;

/// Database errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// A database error.
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    /// A migration error.
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// An I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A stored document could not be encoded or decoded.
    #[error("invalid stored document: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value is out of range.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// Invalid database schema version.
    #[error("invalid database schema version: expected `{expected}`, found `{found}`")]
    InvalidVersion {
        /// Expected version.
        expected: String,
        /// Found version.
        found: String,
    },
}

/// Result type for database operations.
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// The store of analysis records.
///
/// Records are only ever created and partially updated; any number of
/// readers may poll a record while its analysis writes to it.
#[async_trait]
pub trait Database: Send + Sync + std::fmt::Debug {
    /// Create a new analysis in the `started` state.
    async fn create_analysis(&self, id: Uuid, target_endpoint: &str) -> Result<Analysis>;

    /// Get an analysis by ID.
    async fn get_analysis(&self, id: Uuid) -> Result<Option<Analysis>>;

    /// Apply a partial update to an analysis.
    ///
    /// Only the fields set in the update are written; the update timestamp is
    /// always refreshed. Returns `true` if an analysis was updated, `false` if
    /// the analysis was not found.
    async fn update_analysis(&self, id: Uuid, update: AnalysisUpdate) -> Result<bool>;

    /// List analyses, newest first, with optional filtering and pagination.
    async fn list_analyses(
        &self,
        status: Option<AnalysisStatus>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<Analysis>>;

    /// Count analyses with optional filtering.
    async fn count_analyses(&self, status: Option<AnalysisStatus>) -> Result<i64>;
}
