//! Analysis API handlers.

use axum::Json;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::extract::rejection::QueryRejection;
use axum::http::HeaderValue;
use axum::http::header;
use axum::response::IntoResponse;
use tracing::error;
use uuid::Uuid;

use super::AppState;
use super::error::Error;
use super::models::ListAnalysesQuery;
use super::models::ListAnalysesResponse;
use super::models::StartAnalysisRequest;
use super::send_command;
use crate::execution::CancelResponse;
use crate::execution::ManagerCommand;
use crate::execution::StartResponse;
use crate::execution::StatusResponse;
use crate::report::REPORT_CONTENT_TYPE;

/// Start a new analysis.
///
/// The analysis is scheduled and executes in the background; poll its status
/// to observe progress and failures.
#[utoipa::path(
    post,
    path = "/api/analysis/start",
    request_body = StartAnalysisRequest,
    responses(
        (status = 200, description = "Analysis started", body = StartResponse),
        (status = 400, description = "Invalid target endpoint"),
    ),
    tag = "analyses"
)]
pub async fn start_analysis(
    State(state): State<AppState>,
    request: Result<Json<StartAnalysisRequest>, JsonRejection>,
) -> Result<Json<StartResponse>, Error> {
    let Json(request) =
        request.map_err(|rejection| Error::BadRequest(rejection.body_text()))?;

    let response = send_command(state.manager(), |rx| ManagerCommand::Start {
        target_endpoint: request.target_endpoint,
        rx,
    })
    .await?;

    Ok(Json(response))
}

/// Get an analysis by ID.
#[utoipa::path(
    get,
    path = "/api/analysis/{id}",
    params(
        ("id" = String, Path, description = "Analysis ID")
    ),
    responses(
        (status = 200, description = "Analysis found", body = StatusResponse),
        (status = 404, description = "Analysis not found"),
    ),
    tag = "analyses"
)]
pub async fn get_analysis(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusResponse>, Error> {
    let response = send_command(state.manager(), |rx| ManagerCommand::GetStatus { id, rx }).await?;
    Ok(Json(response))
}

/// Download the report of an analysis.
///
/// The report is generated on demand if the analysis has completed but has no
/// report yet.
#[utoipa::path(
    get,
    path = "/api/analysis/{id}/report",
    params(
        ("id" = String, Path, description = "Analysis ID")
    ),
    responses(
        (status = 200, description = "The HTML report", content_type = "text/html"),
        (status = 404, description = "Analysis not found or not completed"),
    ),
    tag = "analyses"
)]
pub async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, Error> {
    let response = send_command(state.manager(), |rx| ManagerCommand::GetReport { id, rx }).await?;

    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"biasscope-report-{id}.html\"",
        id = response.id
    ))
    .map_err(|e| {
        error!("invalid content disposition: {e}");
        Error::Internal
    })?;

    Ok((
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static(REPORT_CONTENT_TYPE),
            ),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        response.content,
    ))
}

/// Cancel an executing analysis.
///
/// Cancellation takes effect between units of work; the analysis keeps the
/// last state it persisted.
#[utoipa::path(
    post,
    path = "/api/analysis/{id}/cancel",
    params(
        ("id" = String, Path, description = "Analysis ID")
    ),
    responses(
        (status = 200, description = "Analysis cancelled", body = CancelResponse),
        (status = 404, description = "Analysis not found"),
        (status = 409, description = "Analysis is not executing"),
    ),
    tag = "analyses"
)]
pub async fn cancel_analysis(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CancelResponse>, Error> {
    let response = send_command(state.manager(), |rx| ManagerCommand::Cancel { id, rx }).await?;
    Ok(Json(response))
}

/// List analyses, most recently created first.
#[utoipa::path(
    get,
    path = "/api/analyses",
    params(ListAnalysesQuery),
    responses(
        (status = 200, description = "Analyses retrieved", body = ListAnalysesResponse),
        (status = 400, description = "Invalid query parameters"),
    ),
    tag = "analyses"
)]
pub async fn list_analyses(
    State(state): State<AppState>,
    query: Result<Query<ListAnalysesQuery>, QueryRejection>,
) -> Result<Json<ListAnalysesResponse>, Error> {
    let Query(query) = query.map_err(|rejection| match rejection {
        QueryRejection::FailedToDeserializeQueryString(err) => {
            Error::BadRequest(format!("invalid query parameters: {}", err))
        }
        _ => Error::BadRequest("invalid query parameters".to_string()),
    })?;

    query.validate().map_err(Error::BadRequest)?;

    let response = send_command(state.manager(), |rx| ManagerCommand::List {
        status: query.status,
        limit: Some(query.limit),
        offset: Some(query.skip),
        rx,
    })
    .await?;

    Ok(Json(ListAnalysesResponse {
        analyses: response.analyses,
        limit: query.limit,
        skip: query.skip,
        total: response.total,
    }))
}
