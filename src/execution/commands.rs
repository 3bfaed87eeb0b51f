//! Manager command types and responses.

use serde::Deserialize;
use serde::Serialize;
use tokio::sync::oneshot;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::database::Analysis;
use crate::database::AnalysisStatus;
use crate::execution::ManagerResult;

/// Response for analysis submission.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StartResponse {
    /// The analysis ID.
    #[schema(value_type = String)]
    pub workflow_id: Uuid,
    /// The status of the new analysis.
    pub status: AnalysisStatus,
}

/// Response for analysis status query.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    /// The analysis data.
    #[serde(flatten)]
    pub analysis: Analysis,
}

/// Response for analysis list query.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ListResponse {
    /// The analyses.
    pub analyses: Vec<Analysis>,
    /// Total count before pagination.
    pub total: i64,
}

/// Response for a report query.
#[derive(Debug)]
pub struct ReportResponse {
    /// The analysis ID.
    pub id: Uuid,
    /// The rendered report.
    pub content: Vec<u8>,
}

/// Response for analysis cancellation.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CancelResponse {
    /// The analysis ID.
    #[schema(value_type = String)]
    pub id: Uuid,
}

/// Commands sent to the analysis manager.
#[derive(Debug)]
pub enum ManagerCommand {
    /// Ping the manager to check if it's ready.
    Ping {
        /// Channel to send the response back.
        rx: oneshot::Sender<ManagerResult<()>>,
    },

    /// Start a new analysis.
    Start {
        /// The prediction endpoint to analyze, as given by the client.
        target_endpoint: String,
        /// Channel to send the response back.
        rx: oneshot::Sender<ManagerResult<StartResponse>>,
    },

    /// Get analysis status by ID.
    GetStatus {
        /// Analysis ID.
        id: Uuid,
        /// Channel to send the response back.
        rx: oneshot::Sender<ManagerResult<StatusResponse>>,
    },

    /// List analyses with optional filtering.
    List {
        /// Filter by status.
        status: Option<AnalysisStatus>,
        /// Number of results to return.
        limit: Option<i64>,
        /// Number of results to skip.
        offset: Option<i64>,
        /// Channel to send the response back.
        rx: oneshot::Sender<ManagerResult<ListResponse>>,
    },

    /// Get the report of an analysis, generating it if necessary.
    GetReport {
        /// Analysis ID.
        id: Uuid,
        /// Channel to send the response back.
        rx: oneshot::Sender<ManagerResult<ReportResponse>>,
    },

    /// Cancel an executing analysis.
    Cancel {
        /// Analysis ID to cancel.
        id: Uuid,
        /// Channel to send the response back.
        rx: oneshot::Sender<ManagerResult<CancelResponse>>,
    },

    /// Shutdown the manager gracefully.
    ///
    /// Executing analyses are cancelled and awaited before the response is
    /// sent.
    Shutdown {
        /// Channel to send the response back.
        rx: oneshot::Sender<ManagerResult<()>>,
    },
}
