//! Implementation of the configuration module.
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then environment variables prefixed with `BIASSCOPE__` (for example,
//! `BIASSCOPE__INFERENCE__TIMEOUT_SECS=5`).

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use serde::Deserialize;
use serde::Serialize;

use crate::execution::DEFAULT_FAIL_FAST_THRESHOLD;

/// The prefix of environment variables that override configuration.
const ENV_PREFIX: &str = "BIASSCOPE";

/// The separator between the prefix and sections of environment variables.
const ENV_SEPARATOR: &str = "__";

/// Default host.
const DEFAULT_HOST: &str = "127.0.0.1";

/// Default port.
const DEFAULT_PORT: u16 = 8000;

/// Default database path.
const DEFAULT_DATABASE_PATH: &str = "biasscope.db";

/// Default number of synthesized records per analysis.
const DEFAULT_POPULATION_SIZE: usize = 100;

/// Default per-attempt inference timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default number of inference attempts per record.
const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Default delay between inference attempts in milliseconds.
const DEFAULT_RETRY_DELAY_MS: u64 = 250;

/// Default maximum number of redirects to follow.
const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Default reports directory.
const DEFAULT_REPORTS_DIRECTORY: &str = "./reports";

/// Represents the configuration for the BiasScope service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Database settings.
    pub database: DatabaseConfig,
    /// Analysis pipeline settings.
    pub analysis: AnalysisConfig,
    /// Inference client settings.
    pub inference: InferenceConfig,
    /// Report settings.
    pub report: ReportConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Host to bind to (default: `127.0.0.1`).
    pub host: String,
    /// Port to bind to (default: `8000`).
    pub port: u16,
    /// Allowed CORS origins.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::from(DEFAULT_HOST),
            port: DEFAULT_PORT,
            allowed_origins: Vec::new(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file (default: `biasscope.db`).
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_DATABASE_PATH),
        }
    }
}

/// Analysis pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Number of records synthesized per analysis (default: `100`).
    pub population_size: usize,
    /// Seed for reproducible populations.
    pub seed: Option<u64>,
    /// Number of consecutive failed inference attempts, from the start of
    /// the inference stage, after which a run is aborted (default: `10`).
    pub fail_fast_threshold: usize,
    /// Wall-clock limit of the inference stage in seconds.
    pub max_inference_duration_secs: Option<u64>,
    /// Maximum number of concurrently executing analyses.
    pub max_concurrent_analyses: Option<usize>,
    /// Largest fairness metric value considered passing.
    pub fairness_threshold: Option<f64>,
}

impl AnalysisConfig {
    /// Gets the inference stage wall-clock limit.
    pub fn max_inference_duration(&self) -> Option<Duration> {
        self.max_inference_duration_secs.map(Duration::from_secs)
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            population_size: DEFAULT_POPULATION_SIZE,
            seed: None,
            fail_fast_threshold: DEFAULT_FAIL_FAST_THRESHOLD,
            max_inference_duration_secs: None,
            max_concurrent_analyses: None,
            fairness_threshold: None,
        }
    }
}

/// Inference client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default, deny_unknown_fields)]
pub struct InferenceConfig {
    /// Per-attempt timeout in seconds (default: `30`).
    pub timeout_secs: u64,
    /// Attempts per record (default: `3`).
    pub max_attempts: usize,
    /// Delay between attempts in milliseconds (default: `250`).
    pub retry_delay_ms: u64,
    /// Maximum number of redirects to follow (default: `10`).
    pub max_redirects: usize,
}

impl InferenceConfig {
    /// Gets the per-attempt timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Gets the delay between attempts.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }
}

/// Report configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default, deny_unknown_fields)]
pub struct ReportConfig {
    /// Directory reports are written to (default: `./reports`).
    pub directory: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_REPORTS_DIRECTORY),
        }
    }
}

impl Config {
    /// Loads the configuration.
    ///
    /// Values from the file at `path`, if given, override the defaults and
    /// `BIASSCOPE__` environment variables override both.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                bail!("configuration file `{}` does not exist", path.display());
            }

            builder = builder.add_source(config::File::from(path));
        }

        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("failed to parse configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.analysis.population_size == 0 {
            bail!("`analysis.population_size` must be greater than zero");
        }

        if self.analysis.fail_fast_threshold == 0 {
            bail!("`analysis.fail_fast_threshold` must be greater than zero");
        }

        if self.analysis.max_concurrent_analyses == Some(0) {
            bail!("`analysis.max_concurrent_analyses` must be greater than zero");
        }

        if self.inference.max_attempts == 0 {
            bail!("`inference.max_attempts` must be greater than zero");
        }

        if self.inference.timeout_secs == 0 {
            bail!("`inference.timeout_secs` must be greater than zero");
        }

        Ok(())
    }
}
