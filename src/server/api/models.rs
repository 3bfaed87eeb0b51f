//! API request and response models.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use utoipa::IntoParams;
use utoipa::ToSchema;

use crate::database::Analysis;
use crate::database::AnalysisStatus;

/// Default number of analyses returned by a list request.
pub const DEFAULT_LIST_LIMIT: i64 = 10;

/// Largest number of analyses returned by a list request.
pub const MAX_LIST_LIMIT: i64 = 100;

/// Default limit function for serde.
fn default_limit() -> i64 {
    DEFAULT_LIST_LIMIT
}

/// Request to start a new analysis.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StartAnalysisRequest {
    /// The prediction endpoint to analyze.
    ///
    /// A missing scheme defaults to `http://`.
    #[serde(alias = "model_url")]
    pub target_endpoint: String,
}

/// Query parameters for listing analyses.
#[derive(Debug, Clone, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct ListAnalysesQuery {
    /// Number of analyses to return (default: `10`, at most `100`).
    #[serde(default = "default_limit")]
    pub limit: i64,
    /// Number of analyses to skip (default: `0`).
    #[serde(default)]
    pub skip: i64,
    /// Only return analyses with this status.
    pub status: Option<AnalysisStatus>,
}

impl ListAnalysesQuery {
    /// Checks that the pagination parameters are in range.
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=MAX_LIST_LIMIT).contains(&self.limit) {
            return Err(format!(
                "`limit` must be between 1 and {MAX_LIST_LIMIT}, found {}",
                self.limit
            ));
        }

        if self.skip < 0 {
            return Err(format!("`skip` must not be negative, found {}", self.skip));
        }

        Ok(())
    }
}

/// Response for listing analyses.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ListAnalysesResponse {
    /// The analyses, most recently created first.
    pub analyses: Vec<Analysis>,
    /// The requested page size.
    pub limit: i64,
    /// The number of analyses skipped.
    pub skip: i64,
    /// The number of analyses matching the filter.
    pub total: i64,
}

/// Response for the health check.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// The service status.
    pub status: String,
    /// The time of the check.
    pub timestamp: DateTime<Utc>,
}
