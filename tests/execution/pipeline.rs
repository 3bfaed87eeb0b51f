//! Tests of a single analysis executing through every stage.

use std::sync::Arc;
use std::time::Duration;

use biasscope::database::AnalysisStatus;
use biasscope::database::Database;
use biasscope::database::SqliteDatabase;
use biasscope::execution::Pipeline;
use biasscope::execution::RunOutcome;
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::stubs::CountingRenderer;
use crate::stubs::ENDPOINT;
use crate::stubs::FailingRenderer;
use crate::stubs::FailingSynthesizer;
use crate::stubs::FixedPredictor;
use crate::stubs::FixedSynthesizer;
use crate::stubs::RecordingDatabase;
use crate::stubs::ScriptedPredictor;
use crate::stubs::endpoint;
use crate::stubs::pipeline;

/// Creates a recording database and an analysis in it.
async fn setup(pool: sqlx::SqlitePool) -> (Arc<RecordingDatabase>, Uuid) {
    let db = SqliteDatabase::from_pool(pool)
        .await
        .expect("failed to create database");
    let db = Arc::new(RecordingDatabase::new(db));

    let id = Uuid::new_v4();
    db.create_analysis(id, ENDPOINT)
        .await
        .expect("failed to create analysis");

    (db, id)
}

#[sqlx::test]
async fn completes_and_persists_every_stage(pool: sqlx::SqlitePool) {
    let (db, id) = setup(pool).await;
    let dir = TempDir::new().expect("failed to create temp dir");
    let renderer = Arc::new(CountingRenderer::new(&dir));

    let pipeline = pipeline(
        db.clone(),
        Arc::new(FixedSynthesizer { count: 12 }),
        Arc::new(ScriptedPredictor::succeeding()),
        renderer.clone(),
    );

    let outcome = pipeline
        .run(id, &endpoint(), &CancellationToken::new())
        .await;
    let RunOutcome::Completed(reference) = outcome else {
        panic!("expected the analysis to complete, got {outcome:?}");
    };

    let analysis = db
        .get_analysis(id)
        .await
        .expect("failed to get analysis")
        .expect("analysis should exist");

    assert_eq!(analysis.status, AnalysisStatus::Completed);
    assert_eq!(analysis.progress, 100);
    assert_eq!(analysis.inputs.len(), 12);
    assert_eq!(analysis.outputs.len(), 12);
    assert_eq!(analysis.inputs[0].input_id, "input_0");
    assert_eq!(analysis.report_reference.as_deref(), Some(reference.as_str()));
    assert!(analysis.completed_at.is_some());
    assert!(analysis.error_message.is_none());
    assert!(std::path::Path::new(&reference).exists());
    assert_eq!(renderer.renders(), 1);

    let summary = analysis.bias_summary.expect("summary should be persisted");
    assert!((0.0..=1.0).contains(&summary.overall_bias_score));
    assert_eq!(analysis.bias_scores.len(), summary.fairness_metrics.len());
    assert!(analysis.bias_scores.iter().all(|s| s.passed));

    assert_eq!(
        db.statuses(),
        [AnalysisStatus::InProgress, AnalysisStatus::Completed]
    );
}

#[sqlx::test]
async fn progress_is_monotonic_and_ends_at_one_hundred(pool: sqlx::SqlitePool) {
    let (db, id) = setup(pool).await;
    let dir = TempDir::new().expect("failed to create temp dir");

    let pipeline = pipeline(
        db.clone(),
        Arc::new(FixedSynthesizer { count: 7 }),
        Arc::new(ScriptedPredictor::failing_first(2)),
        Arc::new(CountingRenderer::new(&dir)),
    );

    pipeline
        .run(id, &endpoint(), &CancellationToken::new())
        .await;

    let progress = db.progress();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");
    assert_eq!(progress.first(), Some(&10));
    assert_eq!(progress.last(), Some(&100));
    assert!(progress.contains(&20));
    assert!(progress.contains(&60));
    assert!(progress.contains(&80));
}

#[sqlx::test]
async fn fails_fast_when_every_leading_attempt_fails(pool: sqlx::SqlitePool) {
    let (db, id) = setup(pool).await;
    let dir = TempDir::new().expect("failed to create temp dir");
    let predictor = Arc::new(ScriptedPredictor::failing());
    let renderer = Arc::new(CountingRenderer::new(&dir));

    let pipeline = pipeline(
        db.clone(),
        Arc::new(FixedSynthesizer { count: 20 }),
        predictor.clone(),
        renderer.clone(),
    );

    let outcome = pipeline
        .run(id, &endpoint(), &CancellationToken::new())
        .await;
    assert!(matches!(outcome, RunOutcome::Failed(_)), "{outcome:?}");

    assert_eq!(predictor.calls(), 10);
    assert_eq!(renderer.renders(), 0);

    let analysis = db
        .get_analysis(id)
        .await
        .expect("failed to get analysis")
        .expect("analysis should exist");

    assert_eq!(analysis.status, AnalysisStatus::Failed);
    assert_eq!(analysis.progress, 40);
    assert!(analysis.outputs.is_empty());
    assert_eq!(analysis.inputs.len(), 20);
    assert!(analysis.bias_summary.is_none());
    assert!(analysis.report_reference.is_none());
    assert!(
        analysis
            .error_message
            .expect("error message should be set")
            .contains("rejected all requests")
    );
}

#[sqlx::test]
async fn continues_after_partial_failures(pool: sqlx::SqlitePool) {
    let (db, id) = setup(pool).await;
    let dir = TempDir::new().expect("failed to create temp dir");
    let predictor = Arc::new(ScriptedPredictor::failing_first(3));

    let pipeline = pipeline(
        db.clone(),
        Arc::new(FixedSynthesizer { count: 20 }),
        predictor.clone(),
        Arc::new(CountingRenderer::new(&dir)),
    );

    let outcome = pipeline
        .run(id, &endpoint(), &CancellationToken::new())
        .await;
    assert!(matches!(outcome, RunOutcome::Completed(_)), "{outcome:?}");
    assert_eq!(predictor.calls(), 20);

    let analysis = db
        .get_analysis(id)
        .await
        .expect("failed to get analysis")
        .expect("analysis should exist");

    assert_eq!(analysis.status, AnalysisStatus::Completed);
    assert_eq!(analysis.outputs.len(), 17);
    assert_eq!(analysis.outputs[0].input_id, "input_3");
}

#[sqlx::test]
async fn synthesis_failure_fails_the_analysis(pool: sqlx::SqlitePool) {
    let (db, id) = setup(pool).await;
    let dir = TempDir::new().expect("failed to create temp dir");
    let predictor = Arc::new(ScriptedPredictor::succeeding());

    let pipeline = pipeline(
        db.clone(),
        Arc::new(FailingSynthesizer),
        predictor.clone(),
        Arc::new(CountingRenderer::new(&dir)),
    );

    let outcome = pipeline
        .run(id, &endpoint(), &CancellationToken::new())
        .await;
    let RunOutcome::Failed(message) = outcome else {
        panic!("expected the analysis to fail, got {outcome:?}");
    };
    assert!(message.contains("generator exploded"));
    assert_eq!(predictor.calls(), 0);

    let analysis = db
        .get_analysis(id)
        .await
        .expect("failed to get analysis")
        .expect("analysis should exist");
    assert_eq!(analysis.status, AnalysisStatus::Failed);
    assert_eq!(analysis.progress, 10);
    assert!(analysis.inputs.is_empty());
}

#[sqlx::test]
async fn empty_population_fails_the_analysis(pool: sqlx::SqlitePool) {
    let (db, id) = setup(pool).await;
    let dir = TempDir::new().expect("failed to create temp dir");

    let pipeline = pipeline(
        db.clone(),
        Arc::new(FixedSynthesizer { count: 0 }),
        Arc::new(ScriptedPredictor::succeeding()),
        Arc::new(CountingRenderer::new(&dir)),
    );

    let outcome = pipeline
        .run(id, &endpoint(), &CancellationToken::new())
        .await;
    let RunOutcome::Failed(message) = outcome else {
        panic!("expected the analysis to fail, got {outcome:?}");
    };
    assert!(message.contains("no records"));
}

#[sqlx::test]
async fn reporting_failure_keeps_results(pool: sqlx::SqlitePool) {
    let (db, id) = setup(pool).await;

    let pipeline = pipeline(
        db.clone(),
        Arc::new(FixedSynthesizer { count: 6 }),
        Arc::new(ScriptedPredictor::succeeding()),
        Arc::new(FailingRenderer),
    );

    let outcome = pipeline
        .run(id, &endpoint(), &CancellationToken::new())
        .await;
    assert!(matches!(outcome, RunOutcome::Failed(_)), "{outcome:?}");

    let analysis = db
        .get_analysis(id)
        .await
        .expect("failed to get analysis")
        .expect("analysis should exist");

    assert_eq!(analysis.status, AnalysisStatus::Failed);
    assert_eq!(analysis.progress, 90);
    assert_eq!(analysis.outputs.len(), 6);
    assert!(analysis.bias_summary.is_some());
    assert!(analysis.report_reference.is_none());
    assert!(
        analysis
            .error_message
            .expect("error message should be set")
            .contains("renderer unavailable")
    );
}

#[sqlx::test]
async fn overflowing_predictions_fail_the_analysis(pool: sqlx::SqlitePool) {
    let (db, id) = setup(pool).await;
    let dir = TempDir::new().expect("failed to create temp dir");

    let pipeline = pipeline(
        db.clone(),
        Arc::new(FixedSynthesizer { count: 12 }),
        Arc::new(FixedPredictor(json!({ "prediction": 1e308 }))),
        Arc::new(CountingRenderer::new(&dir)),
    );

    let outcome = pipeline
        .run(id, &endpoint(), &CancellationToken::new())
        .await;
    assert!(matches!(outcome, RunOutcome::Failed(_)), "{outcome:?}");

    let analysis = db
        .get_analysis(id)
        .await
        .expect("failed to get analysis")
        .expect("analysis should exist");

    assert_eq!(analysis.status, AnalysisStatus::Failed);
    assert_eq!(analysis.progress, 65);
    assert!(analysis.bias_summary.is_none());
    assert!(
        analysis
            .error_message
            .expect("error message should be set")
            .contains("not a finite number")
    );

    let listed = db
        .list_analyses(None, None, None)
        .await
        .expect("failed to list analyses");
    assert_eq!(listed.len(), 1);
}

#[sqlx::test]
async fn cancellation_leaves_last_persisted_state(pool: sqlx::SqlitePool) {
    let (db, id) = setup(pool).await;
    let dir = TempDir::new().expect("failed to create temp dir");
    let predictor =
        Arc::new(ScriptedPredictor::succeeding().with_delay(Duration::from_millis(50)));

    let pipeline = Arc::new(pipeline(
        db.clone(),
        Arc::new(FixedSynthesizer { count: 50 }),
        predictor.clone(),
        Arc::new(CountingRenderer::new(&dir)),
    ));

    let token = CancellationToken::new();
    let handle = {
        let pipeline = pipeline.clone();
        let token = token.clone();
        tokio::spawn(async move { pipeline.run(id, &endpoint(), &token).await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    token.cancel();

    let outcome = handle.await.expect("analysis task panicked");
    assert_eq!(outcome, RunOutcome::Cancelled);
    assert!(predictor.calls() < 50);

    let analysis = db
        .get_analysis(id)
        .await
        .expect("failed to get analysis")
        .expect("analysis should exist");

    assert_eq!(analysis.status, AnalysisStatus::InProgress);
    assert!(analysis.progress >= 20 && analysis.progress < 60);
    assert!(analysis.error_message.is_none());
}

#[sqlx::test]
async fn inference_deadline_fails_the_analysis(pool: sqlx::SqlitePool) {
    let (db, id) = setup(pool).await;
    let dir = TempDir::new().expect("failed to create temp dir");

    let pipeline = Pipeline::builder()
        .db(db.clone())
        .synthesizer(Arc::new(FixedSynthesizer { count: 30 }))
        .predictor(Arc::new(
            ScriptedPredictor::succeeding().with_delay(Duration::from_millis(50)),
        ))
        .renderer(Arc::new(CountingRenderer::new(&dir)))
        .max_inference_duration(Duration::from_millis(120))
        .build();

    let outcome = pipeline
        .run(id, &endpoint(), &CancellationToken::new())
        .await;
    let RunOutcome::Failed(message) = outcome else {
        panic!("expected the analysis to fail, got {outcome:?}");
    };
    assert!(message.contains("time limit"), "{message}");

    let analysis = db
        .get_analysis(id)
        .await
        .expect("failed to get analysis")
        .expect("analysis should exist");
    assert_eq!(analysis.status, AnalysisStatus::Failed);
    assert!(analysis.outputs.is_empty());
}

#[sqlx::test]
async fn fairness_threshold_marks_failing_metrics(pool: sqlx::SqlitePool) {
    let (db, id) = setup(pool).await;
    let dir = TempDir::new().expect("failed to create temp dir");

    let pipeline = Pipeline::builder()
        .db(db.clone())
        .synthesizer(Arc::new(FixedSynthesizer { count: 10 }))
        .predictor(Arc::new(ScriptedPredictor::succeeding()))
        .renderer(Arc::new(CountingRenderer::new(&dir)))
        .fairness_threshold(0.0)
        .build();

    pipeline
        .run(id, &endpoint(), &CancellationToken::new())
        .await;

    let analysis = db
        .get_analysis(id)
        .await
        .expect("failed to get analysis")
        .expect("analysis should exist");

    assert!(!analysis.bias_scores.is_empty());
    assert!(analysis.bias_scores.iter().all(|s| s.threshold == Some(0.0)));
    assert!(analysis.bias_scores.iter().any(|s| !s.passed));
}
