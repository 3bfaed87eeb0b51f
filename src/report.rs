//! Rendering of analysis reports.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use maud::DOCTYPE;
use maud::Markup;
use maud::html;
use tracing::info;
use uuid::Uuid;

use crate::analysis::BiasSummary;

/// The media type of rendered reports.
pub const REPORT_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// An error rendering or loading a report.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// The report could not be written or read.
    #[error("i/o error for report `{path}`: {source}")]
    Io {
        /// The path of the report.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },

    /// A renderer-specific failure.
    #[error("{0}")]
    Other(String),
}

/// Renders a bias summary into a persisted report artifact.
#[async_trait]
pub trait ReportRenderer: Send + Sync + fmt::Debug {
    /// Renders the report for an analysis.
    ///
    /// Returns an opaque reference to the rendered artifact.
    async fn render(&self, id: Uuid, summary: &BiasSummary) -> Result<String, ReportError>;

    /// Loads a previously rendered artifact by its reference.
    async fn load(&self, reference: &str) -> Result<Vec<u8>, ReportError> {
        tokio::fs::read(reference)
            .await
            .map_err(|source| ReportError::Io {
                path: PathBuf::from(reference),
                source,
            })
    }
}

/// Renders reports as standalone HTML pages in a directory.
#[derive(Debug, Clone)]
pub struct HtmlReportRenderer {
    /// The directory reports are written to.
    directory: PathBuf,
}

impl HtmlReportRenderer {
    /// Creates a renderer writing into the given directory.
    ///
    /// The directory is created on first render if it does not exist.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Gets the path of the report for an analysis.
    pub fn report_path(&self, id: Uuid) -> PathBuf {
        self.directory.join(format!("{id}_report.html"))
    }
}

#[async_trait]
impl ReportRenderer for HtmlReportRenderer {
    async fn render(&self, id: Uuid, summary: &BiasSummary) -> Result<String, ReportError> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|source| ReportError::Io {
                path: self.directory.clone(),
                source,
            })?;

        let path = self.report_path(id);
        let page = render_page(id, summary);
        tokio::fs::write(&path, page.into_string())
            .await
            .map_err(|source| ReportError::Io {
                path: path.clone(),
                source,
            })?;

        info!("rendered report for analysis `{id}` to `{}`", path.display());
        Ok(path.to_string_lossy().into_owned())
    }
}

/// Renders the full report page.
fn render_page(id: Uuid, summary: &BiasSummary) -> Markup {
    let insight = &summary.explainability_insights;

    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                title { "BiasScope Analysis Report" }
            }
            body {
                h1 { "BiasScope Analysis Report" }
                p { "Analysis ID: " (id.to_string()) }
                p { "Generated: " (Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string()) }

                h2 { "Overall Bias Score: " (format!("{:.3}", summary.overall_bias_score)) }
                p { "Lower scores indicate less bias (0 = no bias, 1 = maximum bias)." }

                @if !summary.fairness_metrics.is_empty() {
                    h2 { "Fairness Metrics" }
                    table {
                        thead { tr { th { "Metric" } th { "Value" } } }
                        tbody {
                            @for metric in &summary.fairness_metrics {
                                tr {
                                    td { (metric.metric) }
                                    td { (format!("{:.4}", metric.value)) }
                                }
                            }
                        }
                    }
                }

                @if !summary.feature_influence.is_empty() {
                    h2 { "Feature Influence" }
                    table {
                        thead { tr { th { "Feature" } th { "Influence" } th { "Importance" } } }
                        tbody {
                            @for feature in &summary.feature_influence {
                                tr {
                                    td { (feature.feature) }
                                    td { (format!("{:.4}", feature.influence)) }
                                    td { (format!("{:.4}", feature.importance)) }
                                }
                            }
                        }
                    }
                }

                @if !summary.demographic_parity.is_empty() {
                    h2 { "Demographic Parity" }
                    table {
                        thead { tr { th { "Group" } th { "Mean prediction" } } }
                        tbody {
                            @for group in &summary.demographic_parity {
                                tr {
                                    td { (group.name) }
                                    td { (format!("{:.4}", group.value)) }
                                }
                            }
                        }
                    }
                }

                h2 { "Explainability" }
                p { "Method: " (insight.method) }
                @if !insight.top_features.is_empty() {
                    ol {
                        @for feature in &insight.top_features {
                            li { (feature.feature) " (" (format!("{:.4}", feature.importance)) ")" }
                        }
                    }
                }
                @if let Some(note) = &insight.note {
                    p { em { (note) } }
                }
            }
        }
    }
}
