//! Type-safe wrappers using new-type pattern
//!
//! These wrappers validate user-supplied values once, at the edge, so the
//! rest of the crate can rely on them.

use crate::infra::error::{SigningError, SigningResult};
use std::fmt;
use std::str::FromStr;

/// Type-safe wrapper for timestamp URLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampUrl(String);

impl TimestampUrl {
    /// Create a new `TimestampUrl` after validation
    pub fn new(url: impl AsRef<str>) -> SigningResult<Self> {
        let url = url.as_ref().trim();
        Self::validate_url(url)?;
        Ok(TimestampUrl(url.to_string()))
    }

    /// Get the URL as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate_url(url: &str) -> SigningResult<()> {
        let Some(without_protocol) = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
        else {
            return Err(SigningError::InvalidInput(format!(
                "Timestamp URL must start with http:// or https://, got: {url}"
            )));
        };

        let host = without_protocol.split(['/', '?', '#']).next().unwrap_or("");
        if host.is_empty() {
            return Err(SigningError::InvalidInput(format!(
                "Timestamp URL has no host: {url}"
            )));
        }

        if url.chars().any(char::is_whitespace) {
            return Err(SigningError::InvalidInput(format!(
                "Timestamp URL contains whitespace: {url}"
            )));
        }

        Ok(())
    }
}

impl FromStr for TimestampUrl {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for TimestampUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Upper bound on concurrently running format signer invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxConcurrency(usize);

impl MaxConcurrency {
    /// # Errors
    /// Returns `InvalidInput` when `value` is zero.
    pub fn new(value: usize) -> SigningResult<Self> {
        if value == 0 {
            return Err(SigningError::InvalidInput(
                "max concurrency must be at least 1".to_string(),
            ));
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn get(&self) -> usize {
        self.0
    }
}

impl Default for MaxConcurrency {
    fn default() -> Self {
        Self(4)
    }
}
