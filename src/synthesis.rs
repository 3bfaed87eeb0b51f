//! Synthesis of the test population submitted to a target endpoint.

use std::fmt;

use rand::Rng;
use rand::SeedableRng;
use rand::distr::weighted::WeightedIndex;
use rand::prelude::Distribution;
use rand::rngs::StdRng;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use tracing::info;

/// A single synthesized record.
///
/// Records are open-ended feature maps: the bias aggregator only relies on the
/// protected attributes and numeric features it recognizes and ignores the
/// rest.
pub type FeatureRecord = Map<String, Value>;

/// The gender categories and their relative weights.
const GENDERS: &[(&str, f64)] = &[("male", 0.48), ("female", 0.48), ("other", 0.04)];

/// The race categories and their relative weights.
const RACES: &[(&str, f64)] = &[
    ("white", 0.60),
    ("black", 0.13),
    ("asian", 0.06),
    ("hispanic", 0.18),
    ("other", 0.03),
];

/// The education categories and their relative weights.
const EDUCATION: &[(&str, f64)] = &[
    ("high_school", 0.30),
    ("bachelor", 0.40),
    ("master", 0.25),
    ("phd", 0.05),
];

/// The cities records are placed in.
const CITIES: &[&str] = &[
    "Austin",
    "Baltimore",
    "Chicago",
    "Denver",
    "Fresno",
    "Houston",
    "Memphis",
    "Miami",
    "Portland",
    "Sacramento",
    "Seattle",
    "Tucson",
];

/// The mean of the synthesized income distribution.
const INCOME_MEAN: f64 = 50_000.0;

/// The standard deviation of the synthesized income distribution.
const INCOME_STD_DEV: f64 = 20_000.0;

/// An error synthesizing records.
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    /// The synthesizer produced no records.
    #[error("synthesizer produced no records")]
    Empty,

    /// A categorical distribution could not be constructed.
    #[error("invalid categorical weights for `{field}`: {source}")]
    Weights {
        /// The field whose weights are invalid.
        field: &'static str,
        /// The underlying error.
        source: rand::distr::weighted::Error,
    },

    /// A record could not be converted into a feature map.
    #[error("failed to encode synthesized record: {0}")]
    Encode(#[from] serde_json::Error),

    /// A generator-specific failure.
    #[error("{0}")]
    Other(String),
}

/// A source of synthetic test records.
pub trait Synthesizer: Send + Sync + fmt::Debug {
    /// Generates the full test population.
    fn generate(&self) -> Result<Vec<FeatureRecord>, SynthesisError>;
}

/// A synthesized applicant profile.
#[derive(Debug, Serialize)]
struct Profile {
    /// The applicant's age in years.
    age: u32,
    /// The applicant's gender.
    gender: &'static str,
    /// The applicant's race.
    race: &'static str,
    /// The applicant's highest education level.
    education: &'static str,
    /// The applicant's yearly income.
    income: f64,
    /// The applicant's years of work experience.
    experience_years: u32,
    /// The city the applicant lives in.
    location: &'static str,
    /// The applicant's credit score.
    credit_score: u32,
}

/// A categorical distribution over string labels.
struct Categorical {
    /// The labels.
    labels: Vec<&'static str>,
    /// The weighted index over the labels.
    index: WeightedIndex<f64>,
}

impl Categorical {
    /// Builds a categorical distribution from label/weight pairs.
    fn new(field: &'static str, weights: &[(&'static str, f64)]) -> Result<Self, SynthesisError> {
        let index = WeightedIndex::new(weights.iter().map(|(_, w)| *w))
            .map_err(|source| SynthesisError::Weights { field, source })?;

        Ok(Self {
            labels: weights.iter().map(|(label, _)| *label).collect(),
            index,
        })
    }

    /// Samples a label.
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> &'static str {
        self.labels[self.index.sample(rng)]
    }
}

/// Generates a demographically diverse random population.
///
/// The population can be made reproducible by providing a seed.
#[derive(Debug, Clone)]
pub struct RandomSynthesizer {
    /// The number of records to generate.
    size: usize,
    /// The seed for the random number generator.
    seed: Option<u64>,
}

impl RandomSynthesizer {
    /// Creates a new synthesizer producing `size` records.
    pub fn new(size: usize, seed: Option<u64>) -> Self {
        Self { size, seed }
    }

    /// Samples a single profile.
    fn profile(
        rng: &mut StdRng,
        genders: &Categorical,
        races: &Categorical,
        education: &Categorical,
    ) -> Profile {
        Profile {
            age: rng.random_range(18..80),
            gender: genders.sample(rng),
            race: races.sample(rng),
            education: education.sample(rng),
            income: normal(rng, INCOME_MEAN, INCOME_STD_DEV).max(0.0),
            experience_years: rng.random_range(0..40),
            location: CITIES[rng.random_range(0..CITIES.len())],
            credit_score: rng.random_range(300..850),
        }
    }
}

impl Synthesizer for RandomSynthesizer {
    fn generate(&self) -> Result<Vec<FeatureRecord>, SynthesisError> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };

        let genders = Categorical::new("gender", GENDERS)?;
        let races = Categorical::new("race", RACES)?;
        let education = Categorical::new("education", EDUCATION)?;

        let records = (0..self.size)
            .map(|_| {
                let profile = Self::profile(&mut rng, &genders, &races, &education);
                match serde_json::to_value(profile)? {
                    Value::Object(map) => Ok(map),
                    other => Err(SynthesisError::Other(format!(
                        "profile encoded as a non-object value: {other}"
                    ))),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!("generated {} synthetic records", records.len());
        Ok(records)
    }
}

/// Samples a normally distributed value using the Box-Muller transform.
fn normal<R: Rng + ?Sized>(rng: &mut R, mean: f64, std_dev: f64) -> f64 {
    // `random` yields [0, 1); shift to (0, 1] so the logarithm is finite.
    let u1: f64 = 1.0 - rng.random::<f64>();
    let u2: f64 = rng.random();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    mean + std_dev * z
}
