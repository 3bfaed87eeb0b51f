//! Explainability strategies.
//!
//! The explainability insight attached to a bias summary always has the same
//! shape (a method name and a ranked feature list); strategies only differ in
//! how the ranking is produced.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use utoipa::ToSchema;

use super::FeatureInfluence;

/// The default number of features listed by the correlation explainer.
const DEFAULT_TOP_FEATURES: usize = 3;

/// A feature and its importance to the prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FeatureImportance {
    /// The feature name.
    pub feature: String,
    /// The importance of the feature.
    pub importance: f64,
}

/// An explanation of which features drive the predictions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ExplainabilityInsight {
    /// The name of the method that produced the explanation.
    pub method: String,
    /// The most important features, most important first.
    pub top_features: Vec<FeatureImportance>,
    /// An optional note about the method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A strategy for explaining predictions.
pub trait Explainer: Send + Sync + fmt::Debug {
    /// Produces an explanation from the computed feature influence.
    ///
    /// `influence` is sorted by descending influence.
    fn explain(&self, influence: &[FeatureInfluence]) -> ExplainabilityInsight;
}

/// Ranks features by their absolute correlation with the prediction.
#[derive(Debug, Clone)]
pub struct CorrelationExplainer {
    /// The number of features to list.
    top: usize,
}

impl CorrelationExplainer {
    /// Creates an explainer listing the three most influential features.
    pub fn new() -> Self {
        Self {
            top: DEFAULT_TOP_FEATURES,
        }
    }

    /// Creates an explainer listing the `top` most influential features.
    pub fn with_top(top: usize) -> Self {
        Self { top }
    }
}

impl Explainer for CorrelationExplainer {
    fn explain(&self, influence: &[FeatureInfluence]) -> ExplainabilityInsight {
        ExplainabilityInsight {
            method: String::from("correlation_analysis"),
            top_features: influence
                .iter()
                .take(self.top)
                .map(|i| FeatureImportance {
                    feature: i.feature.clone(),
                    importance: i.importance,
                })
                .collect(),
            note: Some(String::from(
                "features ranked by absolute Pearson correlation with the prediction",
            )),
        }
    }
}
