//! Analysis API end-to-end tests.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use axum::http::StatusCode;
use axum::http::header;
use biasscope::database::Database;
use biasscope::database::SqliteDatabase;
use biasscope::execution::ManagerCommand;
use biasscope::execution::spawn_manager;
use biasscope::server::AppState;
use biasscope::server::create_router;
use http_body_util::BodyExt;
use serde_json::Value;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tower::ServiceExt;
use tower_http::cors::CorsLayer;

use crate::stubs::CountingRenderer;
use crate::stubs::FixedSynthesizer;
use crate::stubs::ScriptedPredictor;
use crate::stubs::pipeline;

/// Create a test server backed by stub collaborators.
#[bon::builder]
async fn create_test_server(
    pool: sqlx::SqlitePool,
    #[builder(default = ScriptedPredictor::succeeding())] predictor: ScriptedPredictor,
) -> (axum::Router, Arc<dyn Database>, TempDir) {
    let temp = TempDir::new().unwrap();

    let db: Arc<dyn Database> = Arc::new(SqliteDatabase::from_pool(pool).await.unwrap());
    let pipeline = pipeline(
        db.clone(),
        Arc::new(FixedSynthesizer { count: 10 }),
        Arc::new(predictor),
        Arc::new(CountingRenderer::new(&temp)),
    );

    let manager = spawn_manager(Arc::new(pipeline), None);

    // Wait for manager to be ready
    let (tx, rx) = oneshot::channel();
    manager.send(ManagerCommand::Ping { rx: tx }).await.unwrap();
    rx.await.unwrap().unwrap();

    let state = AppState::builder().manager(manager).build();
    let router = create_router().state(state).cors(CorsLayer::new()).call();

    (router, db, temp)
}

/// Sends a request and returns the status and JSON body.
async fn call(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let body = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, body)
}

/// Builds a JSON `POST` request.
fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

/// Builds a `GET` request.
fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Polls an analysis until it completes or fails.
async fn wait_for_terminal(app: &axum::Router, id: &str) -> Value {
    for _ in 0..100 {
        let (status, body) = call(app, get(&format!("/api/analysis/{id}"))).await;
        assert_eq!(status, StatusCode::OK);

        if body["status"] == "completed" || body["status"] == "failed" {
            return body;
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    panic!("analysis `{id}` did not finish");
}

#[sqlx::test]
async fn start_analysis_and_download_report(pool: sqlx::SqlitePool) {
    let (app, _db, _temp) = create_test_server().pool(pool).call().await;

    let (status, body) = call(
        &app,
        post(
            "/api/analysis/start",
            json!({ "target_endpoint": "localhost:5000/predict" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "started");
    let id = body["workflow_id"].as_str().unwrap().to_string();

    let analysis = wait_for_terminal(&app, &id).await;
    assert_eq!(analysis["status"], "completed");
    assert_eq!(analysis["progress"], 100);
    assert_eq!(analysis["id"], id.as_str());
    assert_eq!(analysis["target_endpoint"], "http://localhost:5000/predict");
    assert_eq!(analysis["outputs"].as_array().unwrap().len(), 10);
    assert!(analysis["bias_summary"]["overall_bias_score"].is_number());

    let response = app
        .clone()
        .oneshot(get(&format!("/api/analysis/{id}/report")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/html; charset=utf-8"
    );
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        format!("attachment; filename=\"biasscope-report-{id}.html\"").as_str()
    );

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let html = String::from_utf8(body.to_vec()).unwrap();
    assert!(html.starts_with("<!DOCTYPE html>"));
    assert!(html.contains(&id));
}

#[sqlx::test]
async fn start_accepts_model_url_alias(pool: sqlx::SqlitePool) {
    let (app, _db, _temp) = create_test_server().pool(pool).call().await;

    let (status, body) = call(
        &app,
        post(
            "/api/analysis/start",
            json!({ "model_url": "https://models.example.com/predict" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["workflow_id"].is_string());
}

#[sqlx::test]
async fn start_rejects_invalid_endpoints(pool: sqlx::SqlitePool) {
    let (app, db, _temp) = create_test_server().pool(pool).call().await;

    for endpoint in ["", "ftp://host/x"] {
        let (status, body) = call(
            &app,
            post(
                "/api/analysis/start",
                json!({ "target_endpoint": endpoint }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "BadRequest");
        assert!(body["message"].as_str().unwrap().contains("target endpoint"));
    }

    let (status, body) = call(&app, post("/api/analysis/start", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "BadRequest");

    assert_eq!(db.count_analyses(None).await.unwrap(), 0);
}

#[sqlx::test]
async fn unknown_analysis_is_not_found(pool: sqlx::SqlitePool) {
    let (app, _db, _temp) = create_test_server().pool(pool).call().await;
    let id = uuid::Uuid::new_v4();

    let (status, body) = call(&app, get(&format!("/api/analysis/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "NotFound");

    let (status, _) = call(&app, get(&format!("/api/analysis/{id}/report"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&app, post(&format!("/api/analysis/{id}/cancel"), json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[sqlx::test]
async fn failed_analysis_has_no_report(pool: sqlx::SqlitePool) {
    let (app, _db, _temp) = create_test_server()
        .pool(pool)
        .predictor(ScriptedPredictor::failing())
        .call()
        .await;

    let (_, body) = call(
        &app,
        post(
            "/api/analysis/start",
            json!({ "target_endpoint": "http://localhost:5000/predict" }),
        ),
    )
    .await;
    let id = body["workflow_id"].as_str().unwrap().to_string();

    let analysis = wait_for_terminal(&app, &id).await;
    assert_eq!(analysis["status"], "failed");
    assert_eq!(analysis["progress"], 60);
    assert!(
        analysis["error_message"]
            .as_str()
            .unwrap()
            .contains("rejected all requests")
    );

    let (status, body) = call(&app, get(&format!("/api/analysis/{id}/report"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "NotFound");

    let (status, body) = call(&app, post(&format!("/api/analysis/{id}/cancel"), json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "Conflict");
}

#[sqlx::test]
async fn cancel_executing_analysis(pool: sqlx::SqlitePool) {
    let (app, _db, _temp) = create_test_server()
        .pool(pool)
        .predictor(ScriptedPredictor::succeeding().with_delay(Duration::from_millis(100)))
        .call()
        .await;

    let (_, body) = call(
        &app,
        post(
            "/api/analysis/start",
            json!({ "target_endpoint": "http://localhost:5000/predict" }),
        ),
    )
    .await;
    let id = body["workflow_id"].as_str().unwrap().to_string();

    tokio::time::sleep(Duration::from_millis(150)).await;

    let (status, body) = call(&app, post(&format!("/api/analysis/{id}/cancel"), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], id.as_str());
}

#[sqlx::test]
async fn list_analyses_paginates(pool: sqlx::SqlitePool) {
    let (app, _db, _temp) = create_test_server().pool(pool).call().await;

    let mut ids = Vec::new();
    for _ in 0..3 {
        let (_, body) = call(
            &app,
            post(
                "/api/analysis/start",
                json!({ "target_endpoint": "http://localhost:5000/predict" }),
            ),
        )
        .await;
        ids.push(body["workflow_id"].as_str().unwrap().to_string());
    }

    for id in &ids {
        wait_for_terminal(&app, id).await;
    }

    let (status, body) = call(&app, get("/api/analyses")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["limit"], 10);
    assert_eq!(body["skip"], 0);
    assert_eq!(body["total"], 3);
    assert_eq!(body["analyses"].as_array().unwrap().len(), 3);
    assert_eq!(body["analyses"][0]["id"], ids[2].as_str());

    let (status, body) = call(&app, get("/api/analyses?limit=1&skip=1&status=completed")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    assert_eq!(body["analyses"].as_array().unwrap().len(), 1);
    assert_eq!(body["analyses"][0]["id"], ids[1].as_str());

    let (status, body) = call(&app, get("/api/analyses?status=failed")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);

    let (status, body) = call(&app, get("/api/analyses?limit=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "BadRequest");

    let (status, _) = call(&app, get("/api/analyses?status=bogus")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
