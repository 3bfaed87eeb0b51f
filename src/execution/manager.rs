//! Analysis manager actor implementation.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::database::AnalysisStatus;
use crate::database::DatabaseError;
use crate::endpoint::TargetEndpoint;
use crate::endpoint::ValidationError;
use crate::execution::Pipeline;
use crate::execution::ReportState;
use crate::execution::RunError;
use crate::execution::commands::*;

/// Manager errors.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// The target endpoint is invalid.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Analysis not found in database.
    #[error("analysis not found")]
    AnalysisNotFound,

    /// Analysis cannot be cancelled in current state.
    #[error("analysis cannot be cancelled in `{0}` state")]
    CannotCancel(AnalysisStatus),

    /// The report cannot be generated because the analysis has not completed.
    #[error("report not available: analysis has not completed")]
    ReportNotReady,

    /// Generating or loading a report failed.
    #[error(transparent)]
    Run(RunError),

    /// Database operation failed.
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<RunError> for ManagerError {
    fn from(e: RunError) -> Self {
        match e {
            RunError::NotFound(_) => Self::AnalysisNotFound,
            RunError::Store(e) => Self::Database(e),
            e => Self::Run(e),
        }
    }
}

/// Result type for manager operations.
pub type ManagerResult<T> = std::result::Result<T, ManagerError>;

/// Channel buffer size for manager commands.
const CHANNEL_BUFFER_SIZE: usize = 200;

/// Information about an executing analysis task.
#[derive(Debug)]
struct RunHandle {
    /// The tokio task handle.
    handle: JoinHandle<()>,
    /// The cancellation token for this analysis.
    token: CancellationToken,
}

/// Analysis manager actor.
///
/// The manager owns scheduling: it creates analysis records and spawns their
/// execution off the request path.
#[derive(Debug)]
pub struct AnalysisManager {
    /// The analysis pipeline.
    pipeline: Arc<Pipeline>,
    /// Command receiver.
    rx: mpsc::Receiver<ManagerCommand>,
    /// Executing analysis tasks.
    runs: HashMap<Uuid, RunHandle>,
    /// Semaphore for limiting concurrent analyses.
    semaphore: Option<Arc<Semaphore>>,
}

impl AnalysisManager {
    /// Create a new analysis manager.
    pub fn new(
        pipeline: Arc<Pipeline>,
        max_concurrent_analyses: Option<usize>,
        rx: mpsc::Receiver<ManagerCommand>,
    ) -> Self {
        let semaphore = max_concurrent_analyses.map(|max| Arc::new(Semaphore::new(max.max(1))));

        Self {
            pipeline,
            rx,
            runs: HashMap::new(),
            semaphore,
        }
    }

    /// Run the manager event loop.
    pub async fn run(mut self) {
        info!("analysis manager started");

        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                ManagerCommand::Ping { rx } => {
                    debug!("received `Ping` command");
                    let _ = rx.send(Ok(()));
                }
                ManagerCommand::Start {
                    target_endpoint,
                    rx,
                } => {
                    debug!(?target_endpoint, "received `Start` command");
                    let result = self.handle_start(&target_endpoint).await;
                    let _ = rx.send(result);
                }
                ManagerCommand::GetStatus { id, rx } => {
                    debug!(?id, "received `GetStatus` command");
                    let result = self.handle_get_status(id).await;
                    let _ = rx.send(result);
                }
                ManagerCommand::List {
                    status,
                    limit,
                    offset,
                    rx,
                } => {
                    debug!(?status, ?limit, ?offset, "received `List` command");
                    let result = self.handle_list(status, limit, offset).await;
                    let _ = rx.send(result);
                }
                ManagerCommand::GetReport { id, rx } => {
                    debug!(?id, "received `GetReport` command");
                    let result = self.handle_get_report(id).await;
                    let _ = rx.send(result);
                }
                ManagerCommand::Cancel { id, rx } => {
                    debug!(?id, "received `Cancel` command");
                    let result = self.handle_cancel(id).await;
                    let _ = rx.send(result);
                }
                ManagerCommand::Shutdown { rx } => {
                    debug!("received `Shutdown` command");
                    info!("analysis manager shutting down");
                    for run in self.runs.values() {
                        run.token.cancel();
                    }
                    for (id, run) in self.runs.drain() {
                        if let Err(e) = run.handle.await {
                            warn!("analysis `{id}` task failed: {e}");
                        }
                    }
                    let _ = rx.send(Ok(()));
                    break;
                }
            }
        }

        info!("analysis manager stopped");
    }

    /// Forgets analyses whose tasks have finished.
    fn prune(&mut self) {
        self.runs.retain(|_, run| !run.handle.is_finished());
    }

    /// Handle analysis submission.
    async fn handle_start(&mut self, target_endpoint: &str) -> ManagerResult<StartResponse> {
        self.prune();

        // Validate before anything is persisted
        let endpoint = TargetEndpoint::parse(target_endpoint)?;

        let id = Uuid::new_v4();
        let analysis = self
            .pipeline
            .database()
            .create_analysis(id, endpoint.as_str())
            .await?;

        let token = CancellationToken::new();
        let semaphore = self.semaphore.clone();
        let pipeline = self.pipeline.clone();
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            // Acquire semaphore permit if concurrency limit is set
            let _permit = match semaphore {
                Some(semaphore) => tokio::select! {
                    biased;
                    _ = task_token.cancelled() => {
                        info!("analysis `{id}` was cancelled before it started");
                        return;
                    }
                    permit = semaphore.acquire_owned() => permit.ok(),
                },
                None => None,
            };

            pipeline.run(id, endpoint.as_url(), &task_token).await;
        });

        self.runs.insert(id, RunHandle { handle, token });
        info!("analysis `{id}` scheduled");

        Ok(StartResponse {
            workflow_id: id,
            status: analysis.status,
        })
    }

    /// Handle get status request.
    async fn handle_get_status(&self, id: Uuid) -> ManagerResult<StatusResponse> {
        let analysis = self
            .pipeline
            .database()
            .get_analysis(id)
            .await?
            .ok_or(ManagerError::AnalysisNotFound)?;

        Ok(StatusResponse { analysis })
    }

    /// Handle list request.
    async fn handle_list(
        &self,
        status: Option<AnalysisStatus>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> ManagerResult<ListResponse> {
        let db = self.pipeline.database();
        let analyses = db.list_analyses(status, limit, offset).await?;
        let total = db.count_analyses(status).await?;
        Ok(ListResponse { analyses, total })
    }

    /// Handle report request.
    async fn handle_get_report(&self, id: Uuid) -> ManagerResult<ReportResponse> {
        let state = self.pipeline.generate_report(id).await?;
        let Some(reference) = state.reference() else {
            return Err(ManagerError::ReportNotReady);
        };

        if matches!(state, ReportState::Generated(_)) {
            info!("generated report for analysis `{id}` on demand");
        }

        let content = self
            .pipeline
            .renderer()
            .load(reference)
            .await
            .map_err(|e| ManagerError::Run(RunError::Reporting(e)))?;

        Ok(ReportResponse { id, content })
    }

    /// Handle cancel request.
    async fn handle_cancel(&mut self, id: Uuid) -> ManagerResult<CancelResponse> {
        self.prune();

        let analysis = self
            .pipeline
            .database()
            .get_analysis(id)
            .await?
            .ok_or(ManagerError::AnalysisNotFound)?;

        if analysis.status.is_terminal() {
            return Err(ManagerError::CannotCancel(analysis.status));
        }

        let Some(run) = self.runs.remove(&id) else {
            warn!("analysis `{id}` is `{}` but is not executing", analysis.status);
            return Err(ManagerError::CannotCancel(analysis.status));
        };

        run.token.cancel();
        info!("analysis `{id}` cancellation requested");

        Ok(CancelResponse { id })
    }
}

/// Create a new analysis manager handle.
pub fn spawn_manager(
    pipeline: Arc<Pipeline>,
    max_concurrent_analyses: Option<usize>,
) -> mpsc::Sender<ManagerCommand> {
    let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    let manager = AnalysisManager::new(pipeline, max_concurrent_analyses, rx);
    tokio::spawn(manager.run());
    tx
}
