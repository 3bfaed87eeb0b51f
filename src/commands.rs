//! Implementation of BiasScope CLI commands.

use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;

use crate::config::Config;
use crate::database::SqliteDatabase;
use crate::execution::Pipeline;
use crate::inference::HttpPredictor;
use crate::report::HtmlReportRenderer;
use crate::synthesis::RandomSynthesizer;

pub mod config;
pub mod report;
pub mod server;
pub mod status;

/// Opens the configured database, applying any pending migrations.
pub async fn open_database(config: &Config) -> Result<Arc<SqliteDatabase>> {
    let path = &config.database.path;
    let db = SqliteDatabase::new(path)
        .await
        .with_context(|| format!("failed to open database `{}`", path.display()))?;
    Ok(Arc::new(db))
}

/// Builds the analysis pipeline described by the configuration.
pub fn build_pipeline(config: &Config, db: Arc<SqliteDatabase>) -> Result<Pipeline> {
    let predictor = HttpPredictor::builder()
        .timeout(config.inference.timeout())
        .max_attempts(config.inference.max_attempts)
        .retry_delay(config.inference.retry_delay())
        .max_redirects(config.inference.max_redirects)
        .build()
        .context("failed to create the inference client")?;

    let synthesizer =
        RandomSynthesizer::new(config.analysis.population_size, config.analysis.seed);

    Ok(Pipeline::builder()
        .db(db)
        .synthesizer(Arc::new(synthesizer))
        .predictor(Arc::new(predictor))
        .renderer(Arc::new(HtmlReportRenderer::new(&config.report.directory)))
        .fail_fast_threshold(config.analysis.fail_fast_threshold)
        .maybe_max_inference_duration(config.analysis.max_inference_duration())
        .maybe_fairness_threshold(config.analysis.fairness_threshold)
        .build())
}
