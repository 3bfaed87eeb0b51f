//! Validation of the prediction endpoints submitted for analysis.

use std::fmt;

use url::Url;

/// The scheme assumed when a submitted endpoint omits one.
const DEFAULT_SCHEME: &str = "http";

/// An error validating a submitted target endpoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The endpoint was empty (or only whitespace).
    #[error("target endpoint is required")]
    Empty,

    /// The endpoint could not be parsed as a URL.
    #[error("target endpoint `{0}` is not a valid URL")]
    Malformed(String),

    /// The endpoint uses a scheme other than `http` or `https`.
    #[error("target endpoint must start with `http://` or `https://` (or omit the scheme), found `{0}`")]
    UnsupportedScheme(String),

    /// The endpoint has no host component.
    #[error("target endpoint must include a host (e.g., `localhost:5000`)")]
    MissingHost,
}

/// A validated, normalized prediction endpoint.
///
/// Once constructed, a [`TargetEndpoint`] is guaranteed to be an absolute
/// `http` or `https` URL with a non-empty host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetEndpoint(Url);

impl TargetEndpoint {
    /// Validates and normalizes a user-supplied endpoint.
    ///
    /// Surrounding whitespace is trimmed and a missing scheme defaults to
    /// `http://`, so `localhost:5000/predict` becomes
    /// `http://localhost:5000/predict`.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::Empty);
        }

        let candidate = if has_explicit_scheme(trimmed) {
            trimmed.to_string()
        } else {
            format!("{DEFAULT_SCHEME}://{trimmed}")
        };

        let url =
            Url::parse(&candidate).map_err(|_| ValidationError::Malformed(trimmed.to_string()))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ValidationError::UnsupportedScheme(url.scheme().to_string()));
        }

        if url.host_str().is_none_or(str::is_empty) {
            return Err(ValidationError::MissingHost);
        }

        Ok(Self(url))
    }

    /// Gets the endpoint as a URL.
    pub fn as_url(&self) -> &Url {
        &self.0
    }

    /// Gets the endpoint as a string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for TargetEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Determines whether the input already names a scheme.
///
/// A `host:port` prefix such as `localhost:5000` parses as a URL with the
/// scheme `localhost`, so a scheme is only considered present when it is
/// followed by `//`.
fn has_explicit_scheme(input: &str) -> bool {
    match input.split_once("://") {
        Some((scheme, _)) => {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}
