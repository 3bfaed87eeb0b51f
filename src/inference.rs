//! Submission of synthesized records to a target prediction endpoint.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::ACCEPT;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use serde_json::Value;
use tokio_retry2::Retry;
use tokio_retry2::RetryError;
use tokio_retry2::strategy::FixedInterval;
use tracing::debug;
use tracing::warn;
use url::Url;

use crate::synthesis::FeatureRecord;

pub mod payload;

pub use payload::Prediction;
pub use payload::extract_scalar;

/// The maximum number of characters of an error response body that is kept.
const MAX_ERROR_BODY_CHARS: usize = 512;

/// The JSON media type.
const APPLICATION_JSON: &str = "application/json";

/// An error obtaining a prediction for a single record.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    /// The attempt did not complete within the configured timeout.
    #[error("request timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    /// The request failed before a response was received.
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// The endpoint answered with a non-success status code.
    #[error("endpoint responded with HTTP {status}: {body}")]
    Status {
        /// The HTTP status code.
        status: u16,
        /// The (truncated) response body.
        body: String,
    },

    /// The response body was not valid JSON.
    #[error("endpoint returned a body that is not JSON: {0}")]
    Decode(#[source] serde_json::Error),

    /// The record could not be encoded as JSON.
    #[error("failed to encode record: {0}")]
    Encode(#[source] serde_json::Error),

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl InferenceError {
    /// Whether another attempt may succeed where this one failed.
    ///
    /// Well-formed error responses are answers, not transient conditions, and
    /// are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport(_) | Self::Decode(_))
    }

    /// Classifies a `reqwest` error.
    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e)
        } else {
            Self::Transport(e)
        }
    }
}

/// A client capable of obtaining a prediction for a record.
#[async_trait]
pub trait Predictor: Send + Sync + fmt::Debug {
    /// Obtains the raw prediction payload for a single record.
    ///
    /// The payload is returned verbatim; interpreting its shape is the bias
    /// aggregator's concern.
    async fn predict(&self, endpoint: &Url, record: &FeatureRecord) -> Result<Value, InferenceError>;
}

/// A [`Predictor`] that POSTs each record as JSON to the target endpoint.
///
/// Every attempt is bounded by the client timeout. Timeouts, transport
/// failures, and undecodable bodies are retried until the attempt budget is
/// spent; error statuses are surfaced immediately. Redirects (such as an
/// `http` to `https` upgrade) are followed transparently.
#[derive(Debug, Clone)]
pub struct HttpPredictor {
    /// The underlying HTTP client.
    client: Client,
    /// The total number of attempts per record.
    max_attempts: usize,
    /// The delay between attempts.
    retry_delay: Duration,
}

#[bon::bon]
impl HttpPredictor {
    /// Constructs a new HTTP predictor.
    ///
    /// `timeout` bounds each attempt, `max_attempts` is the total number of
    /// attempts per record (at least one is always made), and `max_redirects`
    /// bounds the redirects followed within a single attempt.
    #[builder]
    pub fn new(
        timeout: Duration,
        #[builder(default = 3)] max_attempts: usize,
        #[builder(default = Duration::from_millis(250))] retry_delay: Duration,
        #[builder(default = 10)] max_redirects: usize,
    ) -> Result<Self, InferenceError> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(Policy::limited(max_redirects))
            .build()
            .map_err(InferenceError::Client)?;

        Ok(Self {
            client,
            max_attempts: max_attempts.max(1),
            retry_delay,
        })
    }

    /// Performs a single attempt.
    ///
    /// Failures are marked transient or permanent by
    /// [`InferenceError::is_retryable`].
    async fn attempt(&self, endpoint: &Url, body: &[u8]) -> Result<Value, RetryError<InferenceError>> {
        self.send(endpoint, body).await.map_err(|e| {
            if e.is_retryable() {
                RetryError::transient(e)
            } else {
                RetryError::permanent(e)
            }
        })
    }

    /// Sends a record and decodes the response.
    async fn send(&self, endpoint: &Url, body: &[u8]) -> Result<Value, InferenceError> {
        let response = self
            .client
            .post(endpoint.clone())
            .header(CONTENT_TYPE, APPLICATION_JSON)
            .header(ACCEPT, APPLICATION_JSON)
            .body(body.to_vec())
            .send()
            .await
            .map_err(InferenceError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let bytes = response.bytes().await.map_err(InferenceError::from_reqwest)?;
        serde_json::from_slice(&bytes).map_err(InferenceError::Decode)
    }
}

#[async_trait]
impl Predictor for HttpPredictor {
    async fn predict(&self, endpoint: &Url, record: &FeatureRecord) -> Result<Value, InferenceError> {
        let body = serde_json::to_vec(record).map_err(InferenceError::Encode)?;
        let delay_millis = u64::try_from(self.retry_delay.as_millis()).unwrap_or(u64::MAX);
        let shown = endpoint.to_string();

        let result = Retry::spawn_notify(
            FixedInterval::from_millis(delay_millis).take(self.max_attempts - 1),
            || self.attempt(endpoint, &body),
            move |e: &InferenceError, _| {
                warn!(endpoint = %shown, e = %e, "prediction attempt failed; retrying");
            },
        )
        .await;

        if let Err(e) = &result {
            debug!(endpoint = %endpoint, e = %e, "prediction failed");
        }

        result
    }
}
