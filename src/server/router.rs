//! Server setup and routing.

use anyhow::Context;
use axum::Router;
use axum::http::HeaderValue;
use axum::routing::get;
use tokio::sync::oneshot;
use tower_http::LatencyUnit;
use tower_http::cors::CorsLayer;
use tower_http::trace::DefaultMakeSpan;
use tower_http::trace::DefaultOnRequest;
use tower_http::trace::DefaultOnResponse;
use tower_http::trace::TraceLayer;
use tracing::Level;
use tracing::info;
use tracing::warn;
use utoipa::OpenApi as _;
use utoipa_swagger_ui::SwaggerUi;

use super::api::AppState;
use crate::config::ServerConfig;
use crate::execution::ManagerCommand;
use crate::server::api;

/// Create the application router.
#[bon::builder]
pub fn create_router(state: AppState, cors: CorsLayer) -> Router {
    let trace = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        );

    Router::new()
        .merge(SwaggerUi::new("/api/swagger-ui").url("/api/openapi.json", api::ApiDoc::openapi()))
        .route("/health", get(api::health::health))
        .nest("/api", api::create_router(state))
        .layer(cors)
        .layer(trace)
}

/// Builds the CORS layer for the allowed origins.
fn cors_layer(allowed_origins: &[String]) -> anyhow::Result<CorsLayer> {
    let mut cors = CorsLayer::new();
    for origin in allowed_origins {
        let header = origin
            .parse::<HeaderValue>()
            .with_context(|| format!("invalid CORS origin: `{}`", origin))?;

        cors = cors.allow_origin(header);
    }

    Ok(cors)
}

/// Run the server until it receives a shutdown signal.
///
/// Executing analyses are cancelled on shutdown.
///
/// # Errors
///
/// Returns an error if the server fails to start or bind to the address.
pub async fn run(
    server_config: ServerConfig,
    manager: tokio::sync::mpsc::Sender<ManagerCommand>,
) -> anyhow::Result<()> {
    let cors = cors_layer(&server_config.allowed_origins)?;
    let state = AppState::builder().manager(manager.clone()).build();
    let app = create_router().state(state).cors(cors).call();

    let addr = format!("{}:{}", server_config.host, server_config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to `{addr}`"))?;

    info!("server listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for the shutdown signal: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    let (tx, rx) = oneshot::channel();
    if manager.send(ManagerCommand::Shutdown { rx: tx }).await.is_ok() {
        let _ = rx.await;
    }

    info!("server stopped");
    Ok(())
}
