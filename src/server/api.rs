//! API models and handlers.

use axum::Router;
use axum::routing::get;
use axum::routing::post;
use bon::Builder;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::error;
use tracing::warn;
use utoipa::OpenApi;

use self::analyses::*;
use self::error::Error;
use self::health::*;
use self::models::*;
use crate::analysis::BiasScore;
use crate::analysis::BiasSummary;
use crate::analysis::FairnessMetric;
use crate::analysis::FeatureInfluence;
use crate::analysis::ParityGroup;
use crate::analysis::explain::ExplainabilityInsight;
use crate::analysis::explain::FeatureImportance;
use crate::database::Analysis;
use crate::database::AnalysisStatus;
use crate::database::ModelOutput;
use crate::database::SyntheticInput;
use crate::execution::CancelResponse;
use crate::execution::ManagerCommand;
use crate::execution::ManagerResult;
use crate::execution::StartResponse;
use crate::execution::StatusResponse;

pub mod analyses;
pub mod error;
pub mod health;
pub mod models;

/// A sender for analysis manager commands.
type ManagerTx = mpsc::Sender<ManagerCommand>;

/// Application state.
#[derive(Builder, Clone, Debug)]
pub struct AppState {
    /// The analysis manager command transmitter.
    manager: ManagerTx,
}

impl AppState {
    /// Gets the analysis manager tx channel.
    pub fn manager(&self) -> &ManagerTx {
        &self.manager
    }
}

/// OpenAPI documentation for the API.
#[derive(OpenApi)]
#[openapi(
    paths(
        start_analysis,
        get_analysis,
        get_report,
        cancel_analysis,
        list_analyses,
        health,
    ),
    components(schemas(
        Analysis,
        AnalysisStatus,
        BiasScore,
        BiasSummary,
        CancelResponse,
        ExplainabilityInsight,
        FairnessMetric,
        FeatureImportance,
        FeatureInfluence,
        HealthResponse,
        ListAnalysesResponse,
        ModelOutput,
        ParityGroup,
        StartAnalysisRequest,
        StartResponse,
        StatusResponse,
        SyntheticInput,
    )),
    tags(
        (name = "analyses", description = "Bias analysis endpoints"),
        (name = "health", description = "Service health")
    )
)]
pub struct ApiDoc;

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/analysis/start", post(start_analysis))
        .route("/analysis/{id}", get(get_analysis))
        .route("/analysis/{id}/report", get(get_report))
        .route("/analysis/{id}/cancel", post(cancel_analysis))
        .route("/analyses", get(list_analyses))
        .with_state(state)
}

/// Sends a command to the manager and receives the response.
pub async fn send_command<T>(
    manager: &ManagerTx,
    build_command: impl FnOnce(oneshot::Sender<ManagerResult<T>>) -> ManagerCommand,
) -> Result<T, Error> {
    let (tx, rx) = oneshot::channel();

    manager.send(build_command(tx)).await.map_err(|e| {
        error!("failed to send command to manager: {}", e);
        Error::Internal
    })?;

    match rx.await {
        Err(e) => {
            error!("manager dropped response channel: {:#}", e);
            Err(Error::Internal)
        }
        Ok(Err(e)) => {
            warn!("manager rejected command: {:#}", e);
            Err(Error::from(e))
        }
        Ok(Ok(response)) => Ok(response),
    }
}
