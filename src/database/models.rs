//! Database models.

use std::fmt;
use std::str::FromStr;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use sqlx::FromRow;
use sqlx::Type as SqlxType;
use utoipa::ToSchema;
use uuid::Uuid;

use super::DatabaseError;
use crate::analysis::BiasScore;
use crate::analysis::BiasSummary;
use crate::synthesis::FeatureRecord;

/// The status of an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, SqlxType)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum AnalysisStatus {
    /// The analysis has been created but has not started executing.
    Started,
    /// The analysis is executing.
    InProgress,
    /// The analysis completed and its report is available.
    Completed,
    /// The analysis failed.
    Failed,
}

impl AnalysisStatus {
    /// Whether no further transitions are possible from this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the analysis may move from this status to `next`.
    ///
    /// The lifecycle is linear (`started` to `in_progress` to `completed`)
    /// and `failed` is reachable from any non-terminal status.
    pub fn can_transition_to(&self, next: AnalysisStatus) -> bool {
        matches!(
            (self, next),
            (Self::Started, Self::InProgress)
                | (Self::InProgress, Self::Completed)
                | (Self::Started | Self::InProgress, Self::Failed)
        )
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisStatus::Started => write!(f, "started"),
            AnalysisStatus::InProgress => write!(f, "in_progress"),
            AnalysisStatus::Completed => write!(f, "completed"),
            AnalysisStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for AnalysisStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(AnalysisStatus::Started),
            "in_progress" => Ok(AnalysisStatus::InProgress),
            "completed" => Ok(AnalysisStatus::Completed),
            "failed" => Ok(AnalysisStatus::Failed),
            _ => Err(format!("invalid analysis status: {}", s)),
        }
    }
}

/// A synthesized record submitted to the target endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SyntheticInput {
    /// The stable identifier of the input (`input_0`, `input_1`, ...).
    pub input_id: String,
    /// The record's features.
    #[schema(value_type = Object)]
    pub features: FeatureRecord,
    /// When the record was captured.
    pub timestamp: DateTime<Utc>,
}

/// The raw prediction returned for an input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ModelOutput {
    /// The identifier of the input the prediction was made for.
    pub input_id: String,
    /// The raw prediction payload.
    #[schema(value_type = Object)]
    pub output: Value,
    /// When the prediction was received.
    pub timestamp: DateTime<Utc>,
}

/// An analysis record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Analysis {
    /// Unique identifier.
    pub id: Uuid,
    /// The prediction endpoint under analysis.
    pub target_endpoint: String,
    /// Current status.
    pub status: AnalysisStatus,
    /// Progress as a percentage.
    pub progress: u8,
    /// Timestamp when the analysis was created.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last change to the analysis.
    pub updated_at: DateTime<Utc>,
    /// Timestamp when the analysis completed.
    pub completed_at: Option<DateTime<Utc>>,
    /// The synthesized inputs.
    pub inputs: Vec<SyntheticInput>,
    /// The predictions that were obtained.
    pub outputs: Vec<ModelOutput>,
    /// The aggregated bias metrics.
    pub bias_summary: Option<BiasSummary>,
    /// The fairness metrics checked against the configured threshold.
    pub bias_scores: Vec<BiasScore>,
    /// The reference to the rendered report.
    pub report_reference: Option<String>,
    /// Error message if the analysis failed.
    pub error_message: Option<String>,
}

/// A partial update of an analysis.
///
/// Only the fields that are set are written.
#[derive(Debug, Clone, Default, bon::Builder)]
pub struct AnalysisUpdate {
    /// The new status.
    pub status: Option<AnalysisStatus>,
    /// The new progress.
    pub progress: Option<u8>,
    /// The synthesized inputs.
    pub inputs: Option<Vec<SyntheticInput>>,
    /// The obtained predictions.
    pub outputs: Option<Vec<ModelOutput>>,
    /// The aggregated bias metrics.
    pub bias_summary: Option<BiasSummary>,
    /// The checked fairness metrics.
    pub bias_scores: Option<Vec<BiasScore>>,
    /// The reference to the rendered report.
    pub report_reference: Option<String>,
    /// The error message.
    pub error_message: Option<String>,
    /// The completion timestamp.
    pub completed_at: Option<DateTime<Utc>>,
}

impl AnalysisUpdate {
    /// An update that only changes the progress.
    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }
}

/// An analysis row as stored in SQLite.
///
/// Sequences and the summary are stored as JSON text.
#[derive(Debug, FromRow)]
pub(crate) struct AnalysisRow {
    /// Unique identifier.
    #[sqlx(try_from = "String")]
    pub id: Uuid,
    /// The prediction endpoint under analysis.
    pub target_endpoint: String,
    /// Current status.
    pub status: AnalysisStatus,
    /// Progress as a percentage.
    pub progress: i64,
    /// Timestamp when the analysis was created.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last change to the analysis.
    pub updated_at: DateTime<Utc>,
    /// Timestamp when the analysis completed.
    pub completed_at: Option<DateTime<Utc>>,
    /// JSON-encoded inputs.
    pub inputs: String,
    /// JSON-encoded outputs.
    pub outputs: String,
    /// JSON-encoded bias summary.
    pub bias_summary: Option<String>,
    /// JSON-encoded bias scores.
    pub bias_scores: String,
    /// The reference to the rendered report.
    pub report_reference: Option<String>,
    /// Error message if the analysis failed.
    pub error_message: Option<String>,
}

impl TryFrom<AnalysisRow> for Analysis {
    type Error = DatabaseError;

    fn try_from(row: AnalysisRow) -> Result<Self, Self::Error> {
        let progress = u8::try_from(row.progress).map_err(|_| {
            DatabaseError::Corrupt(format!(
                "analysis `{}` has out-of-range progress {}",
                row.id, row.progress
            ))
        })?;

        Ok(Self {
            id: row.id,
            target_endpoint: row.target_endpoint,
            status: row.status,
            progress,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
            inputs: serde_json::from_str(&row.inputs)?,
            outputs: serde_json::from_str(&row.outputs)?,
            bias_summary: row
                .bias_summary
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            bias_scores: serde_json::from_str(&row.bias_scores)?,
            report_reference: row.report_reference,
            error_message: row.error_message,
        })
    }
}
