//! Aggregation of predictions into bias and fairness metrics.
//!
//! The aggregator joins each model output to the synthesized input it was
//! produced for, extracts a scalar prediction from every output, and then
//! measures how much the mean prediction varies across the groups of each
//! protected attribute.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use utoipa::ToSchema;

use crate::database::ModelOutput;
use crate::database::SyntheticInput;
use crate::inference::extract_scalar;
use crate::synthesis::FeatureRecord;

pub mod explain;
pub mod stats;

pub use explain::CorrelationExplainer;
pub use explain::ExplainabilityInsight;
pub use explain::Explainer;
pub use explain::FeatureImportance;

/// The protected attribute for gender.
pub const GENDER: &str = "gender";

/// The protected attribute for race.
pub const RACE: &str = "race";

/// The numeric features whose influence on the prediction is measured.
pub const INFLUENCE_FEATURES: &[&str] = &["age", "income", "experience_years", "credit_score"];

/// Added to the denominator of demographic parity to avoid dividing by zero.
const PARITY_EPSILON: f64 = 1e-6;

/// An error aggregating predictions.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AggregationError {
    /// An output references an input that does not exist.
    #[error("output references unknown input `{0}`")]
    UnknownInput(String),

    /// More than one output references the same input.
    #[error("input `{0}` has more than one output")]
    DuplicateOutput(String),

    /// A metric is not a finite number (e.g. the predictions overflowed).
    #[error("metric `{0}` is not a finite number")]
    NonFinite(String),
}

/// A named fairness metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FairnessMetric {
    /// The metric name (e.g. `demographic_parity_gender`).
    pub metric: String,
    /// The metric value.
    pub value: f64,
    /// The protected attribute the metric was computed over.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// The influence of a numeric feature on the prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FeatureInfluence {
    /// The feature name.
    pub feature: String,
    /// The absolute correlation of the feature with the prediction.
    pub influence: f64,
    /// The importance of the feature; currently equal to the influence.
    pub importance: f64,
}

/// The mean prediction of a single group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ParityGroup {
    /// The group label (e.g. `Gender: female`).
    pub name: String,
    /// The mean prediction of the group.
    pub value: f64,
}

/// The aggregated bias metrics of an analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BiasSummary {
    /// The headline bias score in `[0, 1]`; higher means more biased.
    pub overall_bias_score: f64,
    /// The named fairness metrics.
    pub fairness_metrics: Vec<FairnessMetric>,
    /// The numeric features ordered by descending influence.
    pub feature_influence: Vec<FeatureInfluence>,
    /// The mean prediction of every protected group.
    pub demographic_parity: Vec<ParityGroup>,
    /// The explanation of the predictions.
    pub explainability_insights: ExplainabilityInsight,
}

/// A fairness metric checked against a threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BiasScore {
    /// The metric name.
    pub metric_name: String,
    /// The metric value.
    pub value: f64,
    /// The threshold the metric was checked against, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    /// Whether the metric is within the threshold.
    ///
    /// Always `true` when no threshold is configured.
    pub passed: bool,
}

impl BiasSummary {
    /// Lists the fairness metrics as scores, optionally checked against a
    /// threshold.
    pub fn bias_scores(&self, threshold: Option<f64>) -> Vec<BiasScore> {
        self.fairness_metrics
            .iter()
            .map(|m| BiasScore {
                metric_name: m.metric.clone(),
                value: m.value,
                threshold,
                passed: threshold.is_none_or(|t| m.value.abs() <= t),
            })
            .collect()
    }
}

/// A synthesized record paired with the scalar prediction made for it.
#[derive(Debug, Clone, Copy)]
struct Sample<'a> {
    /// The record's features.
    features: &'a FeatureRecord,
    /// The scalar prediction.
    prediction: f64,
}

/// Computes bias metrics over a set of predictions.
#[derive(Debug)]
pub struct BiasAnalyzer {
    /// The explainability strategy.
    explainer: Box<dyn Explainer>,
}

impl Default for BiasAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl BiasAnalyzer {
    /// Creates an analyzer using correlation-based explanations.
    pub fn new() -> Self {
        Self::with_explainer(CorrelationExplainer::new())
    }

    /// Creates an analyzer using the given explainability strategy.
    pub fn with_explainer(explainer: impl Explainer + 'static) -> Self {
        Self {
            explainer: Box::new(explainer),
        }
    }

    /// Aggregates the outputs of an analysis into a bias summary.
    ///
    /// Outputs are joined to inputs by input id; inputs without an output
    /// (failed predictions) are skipped.
    pub fn analyze(
        &self,
        inputs: &[SyntheticInput],
        outputs: &[ModelOutput],
    ) -> Result<BiasSummary, AggregationError> {
        let samples = join(inputs, outputs)?;
        debug!(
            "aggregating {} predictions over {} inputs",
            samples.len(),
            inputs.len()
        );

        let has_gender = attribute_present(inputs, GENDER);
        let has_race = attribute_present(inputs, RACE);

        let gender_bias = has_gender
            .then(|| group_bias_score(&samples, GENDER))
            .unwrap_or(0.0);
        let race_bias = has_race
            .then(|| group_bias_score(&samples, RACE))
            .unwrap_or(0.0);
        let overall_bias_score = ((gender_bias + race_bias) / 2.0).clamp(0.0, 1.0);

        let mut fairness_metrics = Vec::new();
        if has_gender {
            fairness_metrics.push(FairnessMetric {
                metric: String::from("demographic_parity_gender"),
                value: demographic_parity(&samples, GENDER),
                group: Some(GENDER.to_string()),
            });
        }
        if has_race {
            fairness_metrics.push(FairnessMetric {
                metric: String::from("demographic_parity_race"),
                value: demographic_parity(&samples, RACE),
                group: Some(RACE.to_string()),
            });
        }
        if has_gender {
            fairness_metrics.push(FairnessMetric {
                metric: String::from("equalized_odds_gender"),
                value: equalized_odds(&samples, GENDER),
                group: Some(GENDER.to_string()),
            });
        }

        let feature_influence = feature_influence(inputs, &samples);

        let mut demographic_parity = Vec::new();
        for (attribute, label) in [(GENDER, "Gender"), (RACE, "Race")] {
            for (group, predictions) in groups(&samples, attribute) {
                if let Some(mean) = stats::mean(&predictions) {
                    demographic_parity.push(ParityGroup {
                        name: format!("{label}: {group}"),
                        value: mean,
                    });
                }
            }
        }

        let explainability_insights = self.explainer.explain(&feature_influence);

        let summary = BiasSummary {
            overall_bias_score,
            fairness_metrics,
            feature_influence,
            demographic_parity,
            explainability_insights,
        };
        ensure_finite(&summary)?;
        Ok(summary)
    }
}

/// Returns an error naming the first metric of a summary that is not finite.
///
/// JSON has no representation for `NaN` or infinities.
fn ensure_finite(summary: &BiasSummary) -> Result<(), AggregationError> {
    let metrics = std::iter::once(("overall_bias_score", summary.overall_bias_score))
        .chain(
            summary
                .fairness_metrics
                .iter()
                .map(|m| (m.metric.as_str(), m.value)),
        )
        .chain(
            summary
                .feature_influence
                .iter()
                .map(|f| (f.feature.as_str(), f.influence)),
        )
        .chain(
            summary
                .demographic_parity
                .iter()
                .map(|g| (g.name.as_str(), g.value)),
        );

    for (name, value) in metrics {
        if !value.is_finite() {
            return Err(AggregationError::NonFinite(name.to_string()));
        }
    }

    Ok(())
}

/// Joins outputs to their inputs, preserving input order.
fn join<'a>(
    inputs: &'a [SyntheticInput],
    outputs: &'a [ModelOutput],
) -> Result<Vec<Sample<'a>>, AggregationError> {
    let known: HashSet<&str> = inputs.iter().map(|i| i.input_id.as_str()).collect();

    let mut by_input: HashMap<&str, &ModelOutput> = HashMap::with_capacity(outputs.len());
    for output in outputs {
        if !known.contains(output.input_id.as_str()) {
            return Err(AggregationError::UnknownInput(output.input_id.clone()));
        }

        if by_input.insert(output.input_id.as_str(), output).is_some() {
            return Err(AggregationError::DuplicateOutput(output.input_id.clone()));
        }
    }

    Ok(inputs
        .iter()
        .filter_map(|input| {
            by_input.get(input.input_id.as_str()).map(|output| Sample {
                features: &input.features,
                prediction: extract_scalar(&output.output),
            })
        })
        .collect())
}

/// Whether any input carries the given attribute.
fn attribute_present(inputs: &[SyntheticInput], attribute: &str) -> bool {
    inputs.iter().any(|i| i.features.contains_key(attribute))
}

/// Converts an attribute value into a group label.
///
/// Samples with a missing or null attribute belong to no group.
fn group_label(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Partitions the predictions by the value of an attribute.
fn groups(samples: &[Sample<'_>], attribute: &str) -> BTreeMap<String, Vec<f64>> {
    let mut groups: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for sample in samples {
        if let Some(label) = sample.features.get(attribute).and_then(group_label) {
            groups.entry(label).or_default().push(sample.prediction);
        }
    }
    groups
}

/// Computes the mean prediction of every group of an attribute.
fn group_means(samples: &[Sample<'_>], attribute: &str) -> Vec<f64> {
    groups(samples, attribute)
        .values()
        .filter_map(|predictions| stats::mean(predictions))
        .collect()
}

/// Computes the bias score of an attribute.
///
/// The score is the coefficient of variation of the group means, clamped to
/// `[0, 1]`. It is zero with fewer than two groups or a zero overall mean.
fn group_bias_score(samples: &[Sample<'_>], attribute: &str) -> f64 {
    let means = group_means(samples, attribute);
    if means.len() < 2 {
        return 0.0;
    }

    let (Some(mean), Some(std_dev)) = (stats::mean(&means), stats::sample_std_dev(&means)) else {
        return 0.0;
    };

    if mean == 0.0 {
        return 0.0;
    }

    (std_dev / mean.abs()).min(1.0)
}

/// Computes the demographic parity of an attribute.
///
/// This is the relative spread of the group means and is not clamped.
fn demographic_parity(samples: &[Sample<'_>], attribute: &str) -> f64 {
    let means = group_means(samples, attribute);
    if means.len() < 2 {
        return 0.0;
    }

    match (stats::mean(&means), stats::sample_std_dev(&means)) {
        (Some(mean), Some(std_dev)) => std_dev / (mean + PARITY_EPSILON),
        _ => 0.0,
    }
}

/// Computes the equalized-odds metric of an attribute.
///
/// Without ground-truth labels this is a simplification equal to the
/// attribute's demographic parity.
fn equalized_odds(samples: &[Sample<'_>], attribute: &str) -> f64 {
    demographic_parity(samples, attribute)
}

/// Measures the influence of every known numeric feature on the prediction.
fn feature_influence(inputs: &[SyntheticInput], samples: &[Sample<'_>]) -> Vec<FeatureInfluence> {
    let mut influence: Vec<_> = INFLUENCE_FEATURES
        .iter()
        .filter(|feature| {
            inputs
                .iter()
                .any(|i| i.features.get(**feature).is_some_and(Value::is_number))
        })
        .map(|feature| {
            let (xs, ys): (Vec<f64>, Vec<f64>) = samples
                .iter()
                .filter_map(|s| {
                    s.features
                        .get(*feature)
                        .and_then(Value::as_f64)
                        .map(|x| (x, s.prediction))
                })
                .unzip();

            let value = stats::pearson(&xs, &ys).map(f64::abs).unwrap_or(0.0);
            FeatureInfluence {
                feature: feature.to_string(),
                influence: value,
                importance: value,
            }
        })
        .collect();

    influence.sort_by(|a, b| b.influence.total_cmp(&a.influence));
    influence
}
