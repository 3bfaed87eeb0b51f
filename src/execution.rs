//! Analysis execution.
//!
//! An analysis moves through four stages (synthesis, inference, aggregation,
//! and reporting) and persists its progress after every unit of work so that
//! clients polling the analysis always observe how far it has come.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;
use url::Url;
use uuid::Uuid;

use crate::analysis::AggregationError;
use crate::analysis::BiasAnalyzer;
use crate::database::Analysis;
use crate::database::AnalysisStatus;
use crate::database::AnalysisUpdate;
use crate::database::Database;
use crate::database::DatabaseError;
use crate::database::ModelOutput;
use crate::database::SyntheticInput;
use crate::inference::InferenceError;
use crate::inference::Predictor;
use crate::report::ReportError;
use crate::report::ReportRenderer;
use crate::synthesis::FeatureRecord;
use crate::synthesis::SynthesisError;
use crate::synthesis::Synthesizer;

pub mod commands;
pub mod manager;

pub use commands::CancelResponse;
pub use commands::ListResponse;
pub use commands::ManagerCommand;
pub use commands::ReportResponse;
pub use commands::StartResponse;
pub use commands::StatusResponse;
pub use manager::AnalysisManager;
pub use manager::ManagerError;
pub use manager::ManagerResult;
pub use manager::spawn_manager;

/// The default number of leading attempts that must all fail for the
/// endpoint to be considered unusable.
pub const DEFAULT_FAIL_FAST_THRESHOLD: usize = 10;

/// Progress once the analysis has started executing.
const PROGRESS_STARTED: u8 = 10;

/// Progress once the inputs have been synthesized.
const PROGRESS_SYNTHESIZED: u8 = 20;

/// The share of progress covered by the inference stage.
const PROGRESS_INFERENCE_SPAN: usize = 40;

/// Progress once every input has been submitted.
const PROGRESS_INFERRED: u8 = 60;

/// Progress once aggregation has begun.
const PROGRESS_AGGREGATING: u8 = 65;

/// Progress once the bias summary has been computed.
const PROGRESS_AGGREGATED: u8 = 80;

/// Progress once reporting has begun.
const PROGRESS_REPORTING: u8 = 90;

/// Progress of a completed analysis.
const PROGRESS_COMPLETED: u8 = 100;

/// The page size used when iterating completed analyses.
const REGENERATION_PAGE_SIZE: i64 = 100;

/// An error that ends an analysis.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The inputs could not be synthesized.
    #[error("failed to synthesize test data: {0}")]
    Synthesis(#[from] SynthesisError),

    /// Every leading attempt against the endpoint failed.
    #[error(
        "Model endpoint rejected all requests (0 successful predictions). Please provide a valid \
         prediction API endpoint (POST JSON → JSON)."
    )]
    EndpointRejected {
        /// The number of attempts made.
        attempts: usize,
    },

    /// The inference stage ran for longer than permitted.
    #[error("inference exceeded its time limit of {limit:?} after {completed} of {total} records")]
    InferenceDeadline {
        /// The configured limit.
        limit: Duration,
        /// The number of records that were attempted.
        completed: usize,
        /// The total number of records.
        total: usize,
    },

    /// The predictions could not be aggregated.
    #[error("failed to aggregate predictions: {0}")]
    Aggregation(#[from] AggregationError),

    /// The report could not be rendered.
    #[error("failed to generate report: {0}")]
    Reporting(#[from] ReportError),

    /// The analysis could not be persisted.
    #[error("failed to persist analysis: {0}")]
    Store(#[from] DatabaseError),

    /// The analysis does not exist.
    #[error("analysis `{0}` not found")]
    NotFound(Uuid),

    /// A status change is not permitted.
    #[error("invalid status transition from `{from}` to `{to}`")]
    Transition {
        /// The current status.
        from: AnalysisStatus,
        /// The requested status.
        to: AnalysisStatus,
    },

    /// The analysis was cancelled.
    #[error("analysis was cancelled")]
    Cancelled,
}

/// The result of executing an analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The analysis completed with the given report reference.
    Completed(String),
    /// The analysis failed with the given message.
    Failed(String),
    /// The analysis was cancelled and left in its last persisted state.
    Cancelled,
}

/// The state of an analysis report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportState {
    /// The report already existed.
    Existing(String),
    /// The report was generated.
    Generated(String),
    /// The analysis has not completed, so no report can be generated.
    NotReady,
}

impl ReportState {
    /// Gets the report reference, if any.
    pub fn reference(&self) -> Option<&str> {
        match self {
            Self::Existing(reference) | Self::Generated(reference) => Some(reference),
            Self::NotReady => None,
        }
    }
}

/// Counts of a bulk report regeneration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegenerationSummary {
    /// The number of reports that were regenerated.
    pub succeeded: usize,
    /// The number of reports that failed to regenerate.
    pub failed: usize,
}

/// Tracks the leading inference attempts of an analysis.
///
/// The breaker trips once at least `threshold` attempts were made and every
/// one of them failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailFast {
    /// The number of attempts that must all fail.
    threshold: usize,
    /// The number of attempts made.
    attempts: usize,
    /// The number of failed attempts.
    failures: usize,
    /// The number of successful attempts.
    successes: usize,
}

impl FailFast {
    /// Creates a new breaker.
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            attempts: 0,
            failures: 0,
            successes: 0,
        }
    }

    /// Records the outcome of an attempt.
    pub fn record(&mut self, success: bool) {
        self.attempts += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
    }

    /// Gets the number of attempts made.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Whether the endpoint should be considered unusable.
    pub fn tripped(&self) -> bool {
        self.attempts >= self.threshold && self.successes == 0 && self.failures == self.attempts
    }
}

/// Computes the progress after the record at `index` has been attempted.
pub fn inference_progress(index: usize, total: usize) -> u8 {
    if total == 0 {
        return PROGRESS_SYNTHESIZED;
    }

    let span = ((index + 1) * PROGRESS_INFERENCE_SPAN / total).min(PROGRESS_INFERENCE_SPAN);
    // `span` is at most 40.
    PROGRESS_SYNTHESIZED + span as u8
}

/// The persisted state of a single executing analysis.
///
/// Every write goes through [`Tracker::persist`], which enforces the status
/// transition table and keeps progress non-decreasing.
#[derive(Debug)]
struct Tracker<'a> {
    /// The database.
    db: &'a dyn Database,
    /// The analysis ID.
    id: Uuid,
    /// The last persisted status.
    status: AnalysisStatus,
    /// The last persisted progress.
    progress: u8,
}

impl<'a> Tracker<'a> {
    /// Creates a tracker for a freshly created analysis.
    fn new(db: &'a dyn Database, id: Uuid) -> Self {
        Self {
            db,
            id,
            status: AnalysisStatus::Started,
            progress: 0,
        }
    }

    /// Persists a partial update of the analysis.
    async fn persist(&mut self, mut update: AnalysisUpdate) -> Result<(), RunError> {
        if let Some(next) = update.status
            && !self.status.can_transition_to(next)
        {
            return Err(RunError::Transition {
                from: self.status,
                to: next,
            });
        }

        if let Some(progress) = update.progress {
            debug_assert!(progress >= self.progress, "progress must not decrease");
            update.progress = Some(progress.max(self.progress));
        }

        let status = update.status;
        let progress = update.progress;
        if !self.db.update_analysis(self.id, update).await? {
            return Err(RunError::NotFound(self.id));
        }

        if let Some(status) = status {
            self.status = status;
        }

        if let Some(progress) = progress {
            self.progress = progress;
        }

        Ok(())
    }

    /// Marks the analysis as failed.
    ///
    /// Progress is left at its last persisted value.
    async fn fail(&mut self, message: &str) -> Result<(), RunError> {
        self.persist(
            AnalysisUpdate::builder()
                .status(AnalysisStatus::Failed)
                .error_message(message.to_string())
                .build(),
        )
        .await
    }
}

/// Returns an error if the analysis has been cancelled.
fn check_cancelled(token: &CancellationToken) -> Result<(), RunError> {
    if token.is_cancelled() {
        return Err(RunError::Cancelled);
    }

    Ok(())
}

/// The analysis pipeline.
///
/// A pipeline is shared by every analysis executed by a server; analyses
/// share nothing but the database.
#[derive(Debug, bon::Builder)]
pub struct Pipeline {
    /// The database.
    db: Arc<dyn Database>,
    /// The source of test records.
    synthesizer: Arc<dyn Synthesizer>,
    /// The client used to obtain predictions.
    predictor: Arc<dyn Predictor>,
    /// The bias aggregator.
    #[builder(default)]
    analyzer: Arc<BiasAnalyzer>,
    /// The report renderer.
    renderer: Arc<dyn ReportRenderer>,
    /// The number of leading attempts that must all fail to abort.
    #[builder(default = DEFAULT_FAIL_FAST_THRESHOLD)]
    fail_fast_threshold: usize,
    /// The wall-clock limit of the inference stage.
    max_inference_duration: Option<Duration>,
    /// The threshold fairness metrics are checked against.
    fairness_threshold: Option<f64>,
}

impl Pipeline {
    /// Gets the database.
    pub fn database(&self) -> &Arc<dyn Database> {
        &self.db
    }

    /// Gets the report renderer.
    pub fn renderer(&self) -> &Arc<dyn ReportRenderer> {
        &self.renderer
    }

    /// Executes an analysis that was created in the `started` state.
    ///
    /// Failures are never returned; they are persisted on the analysis and
    /// reported through the outcome.
    pub async fn run(&self, id: Uuid, endpoint: &Url, token: &CancellationToken) -> RunOutcome {
        let mut tracker = Tracker::new(self.db.as_ref(), id);

        match self.execute(&mut tracker, endpoint, token).await {
            Ok(reference) => {
                info!("analysis `{id}` completed successfully");
                RunOutcome::Completed(reference)
            }
            Err(RunError::Cancelled) => {
                info!(
                    "analysis `{id}` was cancelled at {progress}%",
                    progress = tracker.progress
                );
                RunOutcome::Cancelled
            }
            Err(e) => {
                let message = e.to_string();
                error!("analysis `{id}` failed: {message}");

                if let Err(e) = tracker.fail(&message).await {
                    error!("failed to mark analysis `{id}` as failed: {e}");
                }

                RunOutcome::Failed(message)
            }
        }
    }

    /// Executes every stage of an analysis.
    async fn execute(
        &self,
        tracker: &mut Tracker<'_>,
        endpoint: &Url,
        token: &CancellationToken,
    ) -> Result<String, RunError> {
        let id = tracker.id;

        check_cancelled(token)?;
        tracker
            .persist(
                AnalysisUpdate::builder()
                    .status(AnalysisStatus::InProgress)
                    .progress(PROGRESS_STARTED)
                    .build(),
            )
            .await?;
        info!("analysis `{id}` started against `{endpoint}`");

        // Synthesis
        check_cancelled(token)?;
        let inputs = self.synthesize()?;
        tracker
            .persist(
                AnalysisUpdate::builder()
                    .inputs(inputs.clone())
                    .progress(PROGRESS_SYNTHESIZED)
                    .build(),
            )
            .await?;

        // Inference
        let outputs = self.infer(tracker, endpoint, &inputs, token).await?;
        tracker
            .persist(
                AnalysisUpdate::builder()
                    .outputs(outputs.clone())
                    .progress(PROGRESS_INFERRED)
                    .build(),
            )
            .await?;
        info!(
            "analysis `{id}` obtained {} of {} predictions",
            outputs.len(),
            inputs.len()
        );

        // Aggregation
        check_cancelled(token)?;
        tracker
            .persist(AnalysisUpdate::progress(PROGRESS_AGGREGATING))
            .await?;
        let summary = self.analyzer.analyze(&inputs, &outputs)?;
        let scores = summary.bias_scores(self.fairness_threshold);
        tracker
            .persist(
                AnalysisUpdate::builder()
                    .bias_summary(summary.clone())
                    .bias_scores(scores)
                    .progress(PROGRESS_AGGREGATED)
                    .build(),
            )
            .await?;
        info!(
            "analysis `{id}` has an overall bias score of {:.3}",
            summary.overall_bias_score
        );

        // Reporting
        check_cancelled(token)?;
        tracker
            .persist(AnalysisUpdate::progress(PROGRESS_REPORTING))
            .await?;
        let reference = self.renderer.render(id, &summary).await?;
        tracker
            .persist(
                AnalysisUpdate::builder()
                    .status(AnalysisStatus::Completed)
                    .progress(PROGRESS_COMPLETED)
                    .completed_at(Utc::now())
                    .report_reference(reference.clone())
                    .build(),
            )
            .await?;

        Ok(reference)
    }

    /// Synthesizes the inputs of an analysis.
    fn synthesize(&self) -> Result<Vec<SyntheticInput>, RunError> {
        let records = self.synthesizer.generate()?;
        if records.is_empty() {
            return Err(SynthesisError::Empty.into());
        }

        Ok(records
            .into_iter()
            .enumerate()
            .map(|(i, features)| SyntheticInput {
                input_id: format!("input_{i}"),
                features,
                timestamp: Utc::now(),
            })
            .collect())
    }

    /// Submits every input to the endpoint in order.
    ///
    /// Failed predictions are skipped; progress is persisted after every
    /// attempt whatever its outcome.
    async fn infer(
        &self,
        tracker: &mut Tracker<'_>,
        endpoint: &Url,
        inputs: &[SyntheticInput],
        token: &CancellationToken,
    ) -> Result<Vec<ModelOutput>, RunError> {
        let id = tracker.id;
        let total = inputs.len();
        let deadline = self.max_inference_duration.map(|d| (Instant::now() + d, d));
        let mut breaker = FailFast::new(self.fail_fast_threshold);
        let mut outputs = Vec::with_capacity(total);

        for (i, input) in inputs.iter().enumerate() {
            check_cancelled(token)?;

            let result = self
                .predict(endpoint, &input.features, token, deadline, i, total)
                .await?;

            match result {
                Ok(output) => {
                    breaker.record(true);
                    outputs.push(ModelOutput {
                        input_id: input.input_id.clone(),
                        output,
                        timestamp: Utc::now(),
                    });
                }
                Err(e) => {
                    breaker.record(false);
                    warn!(
                        "analysis `{id}`: prediction for `{input}` failed: {e}",
                        input = input.input_id
                    );
                }
            }

            tracker
                .persist(AnalysisUpdate::progress(inference_progress(i, total)))
                .await?;

            if breaker.tripped() {
                return Err(RunError::EndpointRejected {
                    attempts: breaker.attempts(),
                });
            }
        }

        Ok(outputs)
    }

    /// Obtains a single prediction.
    ///
    /// The outer result ends the analysis (cancellation or the inference
    /// deadline); the inner result is the outcome of the record.
    async fn predict(
        &self,
        endpoint: &Url,
        record: &FeatureRecord,
        token: &CancellationToken,
        deadline: Option<(Instant, Duration)>,
        index: usize,
        total: usize,
    ) -> Result<Result<Value, InferenceError>, RunError> {
        let exceeded = |limit| RunError::InferenceDeadline {
            limit,
            completed: index,
            total,
        };

        if let Some((at, limit)) = deadline
            && Instant::now() >= at
        {
            return Err(exceeded(limit));
        }

        let expired = async {
            match deadline {
                Some((at, limit)) => {
                    tokio::time::sleep_until(at).await;
                    limit
                }
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(RunError::Cancelled),
            limit = expired => Err(exceeded(limit)),
            result = self.predictor.predict(endpoint, record) => Ok(result),
        }
    }

    /// Gets the report of an analysis, generating it if necessary.
    ///
    /// An existing report is returned unchanged. Otherwise a report is only
    /// generated for a completed analysis with a bias summary.
    pub async fn generate_report(&self, id: Uuid) -> Result<ReportState, RunError> {
        let analysis = self
            .db
            .get_analysis(id)
            .await?
            .ok_or(RunError::NotFound(id))?;

        if let Some(reference) = analysis.report_reference {
            return Ok(ReportState::Existing(reference));
        }

        self.render_report(&analysis).await
    }

    /// Re-renders the report of a completed analysis, replacing any existing
    /// report.
    pub async fn regenerate_report(&self, analysis: &Analysis) -> Result<ReportState, RunError> {
        self.render_report(analysis).await
    }

    /// Re-renders the reports of every completed analysis.
    pub async fn regenerate_reports(&self) -> Result<RegenerationSummary, RunError> {
        let mut summary = RegenerationSummary::default();
        let mut offset = 0;

        loop {
            let page = self
                .db
                .list_analyses(
                    Some(AnalysisStatus::Completed),
                    Some(REGENERATION_PAGE_SIZE),
                    Some(offset),
                )
                .await?;

            if page.is_empty() {
                break;
            }

            offset += page.len() as i64;
            for analysis in &page {
                match self.regenerate_report(analysis).await {
                    Ok(ReportState::Generated(reference)) => {
                        debug!("regenerated report for analysis `{}`: `{reference}`", analysis.id);
                        summary.succeeded += 1;
                    }
                    Ok(_) => {
                        warn!("analysis `{}` has no bias summary to report", analysis.id);
                        summary.failed += 1;
                    }
                    Err(e) => {
                        error!("failed to regenerate report for analysis `{}`: {e}", analysis.id);
                        summary.failed += 1;
                    }
                }
            }
        }

        info!(
            "regenerated {} report(s), {} failure(s)",
            summary.succeeded, summary.failed
        );
        Ok(summary)
    }

    /// Renders and persists the report of a completed analysis.
    async fn render_report(&self, analysis: &Analysis) -> Result<ReportState, RunError> {
        let (AnalysisStatus::Completed, Some(summary)) = (analysis.status, &analysis.bias_summary)
        else {
            return Ok(ReportState::NotReady);
        };

        let reference = self.renderer.render(analysis.id, summary).await?;
        let updated = self
            .db
            .update_analysis(
                analysis.id,
                AnalysisUpdate::builder()
                    .report_reference(reference.clone())
                    .build(),
            )
            .await?;

        if !updated {
            return Err(RunError::NotFound(analysis.id));
        }

        Ok(ReportState::Generated(reference))
    }
}
