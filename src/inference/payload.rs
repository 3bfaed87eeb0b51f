//! Prediction payloads returned by a target endpoint.

use serde_json::Map;
use serde_json::Value;

/// The keys consulted, in order, when a payload is a mapping.
pub const PREDICTION_KEYS: &[&str] = &["prediction", "result", "output", "score"];

/// The shape of a raw prediction payload.
///
/// The target endpoint is arbitrary, so nothing about its response schema is
/// assumed beyond what this enum distinguishes.
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction<'a> {
    /// The payload is a bare number or boolean.
    Number(f64),
    /// The payload is a JSON object.
    Mapping(&'a Map<String, Value>),
    /// The payload is anything else (string, array, or null).
    Unknown(&'a Value),
}

impl<'a> Prediction<'a> {
    /// Classifies a raw payload.
    pub fn classify(payload: &'a Value) -> Self {
        match payload {
            Value::Number(_) | Value::Bool(_) => numeric(payload)
                .map(Self::Number)
                .unwrap_or(Self::Unknown(payload)),
            Value::Object(map) => Self::Mapping(map),
            other => Self::Unknown(other),
        }
    }

    /// Extracts the scalar prediction.
    ///
    /// Mappings yield the first of [`PREDICTION_KEYS`] holding a number or
    /// boolean. Everything that yields no number extracts as `0.0`.
    pub fn scalar(&self) -> f64 {
        match self {
            Self::Number(n) => *n,
            Self::Mapping(map) => PREDICTION_KEYS
                .iter()
                .find_map(|key| map.get(*key).and_then(numeric))
                .unwrap_or(0.0),
            Self::Unknown(_) => 0.0,
        }
    }
}

/// Converts a JSON number or boolean into a number.
///
/// Booleans count as `1.0` (true) and `0.0` (false).
fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        other => other.as_f64(),
    }
}

/// Extracts the scalar prediction from a raw payload.
pub fn extract_scalar(payload: &Value) -> f64 {
    Prediction::classify(payload).scalar()
}
