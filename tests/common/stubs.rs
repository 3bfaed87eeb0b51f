//! Test doubles for the analysis pipeline.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use biasscope::analysis::BiasSummary;
use biasscope::database::Analysis;
use biasscope::database::AnalysisStatus;
use biasscope::database::AnalysisUpdate;
use biasscope::database::Database;
use biasscope::database::Result;
use biasscope::database::SqliteDatabase;
use biasscope::execution::Pipeline;
use biasscope::inference::InferenceError;
use biasscope::inference::Predictor;
use biasscope::report::HtmlReportRenderer;
use biasscope::report::ReportError;
use biasscope::report::ReportRenderer;
use biasscope::synthesis::FeatureRecord;
use biasscope::synthesis::SynthesisError;
use biasscope::synthesis::Synthesizer;
use serde_json::Value;
use serde_json::json;
use tempfile::TempDir;
use url::Url;
use uuid::Uuid;

/// The endpoint handed to stub predictors.
pub const ENDPOINT: &str = "http://localhost:5000/predict";

/// Parses [`ENDPOINT`].
pub fn endpoint() -> Url {
    Url::parse(ENDPOINT).expect("endpoint should parse")
}

/// Produces a fixed number of records alternating between two genders.
#[derive(Debug)]
pub struct FixedSynthesizer {
    /// The number of records to produce.
    pub count: usize,
}

impl Synthesizer for FixedSynthesizer {
    fn generate(&self) -> std::result::Result<Vec<FeatureRecord>, SynthesisError> {
        Ok((0..self.count)
            .map(|i| {
                let record = json!({
                    "age": 20 + i,
                    "gender": if i % 2 == 0 { "male" } else { "female" },
                    "race": if i % 3 == 0 { "white" } else { "black" },
                    "income": 30_000.0 + 1_000.0 * i as f64,
                    "credit_score": 600 + i,
                });

                match record {
                    Value::Object(map) => map,
                    _ => unreachable!("record is an object"),
                }
            })
            .collect())
    }
}

/// A synthesizer that always fails.
#[derive(Debug)]
pub struct FailingSynthesizer;

impl Synthesizer for FailingSynthesizer {
    fn generate(&self) -> std::result::Result<Vec<FeatureRecord>, SynthesisError> {
        Err(SynthesisError::Other(String::from("generator exploded")))
    }
}

/// A predictor that fails its first `fail_first` calls and then predicts
/// from the record's age.
#[derive(Debug)]
pub struct ScriptedPredictor {
    /// The number of leading calls that fail.
    pub fail_first: usize,
    /// The delay before every answer.
    pub delay: Option<Duration>,
    /// The number of calls made.
    pub calls: AtomicUsize,
}

impl ScriptedPredictor {
    /// Creates a predictor failing its first `fail_first` calls.
    pub fn failing_first(fail_first: usize) -> Self {
        Self {
            fail_first,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Creates a predictor that always succeeds.
    pub fn succeeding() -> Self {
        Self::failing_first(0)
    }

    /// Creates a predictor that always fails.
    pub fn failing() -> Self {
        Self::failing_first(usize::MAX)
    }

    /// Delays every answer by `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Gets the number of calls made.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Predictor for ScriptedPredictor {
    async fn predict(
        &self,
        _: &Url,
        record: &FeatureRecord,
    ) -> std::result::Result<Value, InferenceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if call < self.fail_first {
            return Err(InferenceError::Status {
                status: 503,
                body: String::from("unavailable"),
            });
        }

        let age = record.get("age").and_then(Value::as_f64).unwrap_or(0.0);
        Ok(json!({ "prediction": age / 100.0 }))
    }
}

/// A predictor that answers every record with the same payload.
#[derive(Debug)]
pub struct FixedPredictor(pub Value);

#[async_trait]
impl Predictor for FixedPredictor {
    async fn predict(&self, _: &Url, _: &FeatureRecord) -> std::result::Result<Value, InferenceError> {
        Ok(self.0.clone())
    }
}

/// An HTML renderer that counts how often it renders.
#[derive(Debug)]
pub struct CountingRenderer {
    /// The renderer doing the work.
    pub inner: HtmlReportRenderer,
    /// The number of renders.
    pub renders: AtomicUsize,
}

impl CountingRenderer {
    /// Creates a renderer writing into `dir`.
    pub fn new(dir: &TempDir) -> Self {
        Self {
            inner: HtmlReportRenderer::new(dir.path()),
            renders: AtomicUsize::new(0),
        }
    }

    /// Gets the number of renders.
    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReportRenderer for CountingRenderer {
    async fn render(
        &self,
        id: Uuid,
        summary: &BiasSummary,
    ) -> std::result::Result<String, ReportError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        self.inner.render(id, summary).await
    }
}

/// A renderer that always fails.
#[derive(Debug)]
pub struct FailingRenderer;

#[async_trait]
impl ReportRenderer for FailingRenderer {
    async fn render(&self, _: Uuid, _: &BiasSummary) -> std::result::Result<String, ReportError> {
        Err(ReportError::Other(String::from("renderer unavailable")))
    }
}

/// A database that records every update applied to it.
#[derive(Debug)]
pub struct RecordingDatabase {
    /// The database doing the work.
    pub inner: SqliteDatabase,
    /// The progress values written, in order.
    pub progress: Mutex<Vec<u8>>,
    /// The statuses written, in order.
    pub statuses: Mutex<Vec<AnalysisStatus>>,
}

impl RecordingDatabase {
    /// Wraps a database.
    pub fn new(inner: SqliteDatabase) -> Self {
        Self {
            inner,
            progress: Mutex::new(Vec::new()),
            statuses: Mutex::new(Vec::new()),
        }
    }

    /// Gets the progress values written.
    pub fn progress(&self) -> Vec<u8> {
        self.progress.lock().unwrap().clone()
    }

    /// Gets the statuses written.
    pub fn statuses(&self) -> Vec<AnalysisStatus> {
        self.statuses.lock().unwrap().clone()
    }
}

#[async_trait]
impl Database for RecordingDatabase {
    async fn create_analysis(&self, id: Uuid, target_endpoint: &str) -> Result<Analysis> {
        self.inner.create_analysis(id, target_endpoint).await
    }

    async fn get_analysis(&self, id: Uuid) -> Result<Option<Analysis>> {
        self.inner.get_analysis(id).await
    }

    async fn update_analysis(&self, id: Uuid, update: AnalysisUpdate) -> Result<bool> {
        if let Some(progress) = update.progress {
            self.progress.lock().unwrap().push(progress);
        }

        if let Some(status) = update.status {
            self.statuses.lock().unwrap().push(status);
        }

        self.inner.update_analysis(id, update).await
    }

    async fn list_analyses(
        &self,
        status: Option<AnalysisStatus>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<Analysis>> {
        self.inner.list_analyses(status, limit, offset).await
    }

    async fn count_analyses(&self, status: Option<AnalysisStatus>) -> Result<i64> {
        self.inner.count_analyses(status).await
    }
}

/// Builds a pipeline from the given parts.
pub fn pipeline(
    db: Arc<dyn Database>,
    synthesizer: Arc<dyn Synthesizer>,
    predictor: Arc<dyn Predictor>,
    renderer: Arc<dyn ReportRenderer>,
) -> Pipeline {
    Pipeline::builder()
        .db(db)
        .synthesizer(synthesizer)
        .predictor(predictor)
        .renderer(renderer)
        .build()
}
