//! Configuration module for client and session settings

use crate::error::{PyxisError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
pub const DEFAULT_REQUEST_THREADS_LIMIT: usize = 7;

/// Upper bound for a single backoff sleep.
pub const BACKOFF_MAX: Duration = Duration::from_secs(120);

/// Settings shared by every session a client creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub hostname: String,
    pub retries: u32,
    /// Seconds; the n-th retry waits `backoff_factor * 2^(n-1)`
    pub backoff_factor: f64,
    pub verify: bool,
    pub threads: usize,
}

impl ClientConfig {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            retries: DEFAULT_RETRIES,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            verify: true,
            threads: DEFAULT_REQUEST_THREADS_LIMIT,
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_backoff_factor(mut self, backoff_factor: f64) -> Self {
        self.backoff_factor = backoff_factor;
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.hostname.trim().is_empty() {
            return Err(PyxisError::Config("Pyxis hostname cannot be empty".to_string()));
        }
        if self.threads == 0 {
            return Err(PyxisError::Config(
                "Number of request threads must be at least 1".to_string(),
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 0.0 {
            return Err(PyxisError::Config(format!(
                "Invalid backoff factor: {}",
                self.backoff_factor
            )));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            backoff_factor: self.backoff_factor,
        }
    }
}

/// Bounded retry budget applied to every verb.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff_factor: f64,
}

impl RetryPolicy {
    pub fn is_retryable_status(status: u16) -> bool {
        status == 429 || (500..=511).contains(&status)
    }

    /// Delay before the given retry (1-based).
    pub fn backoff(&self, retry_number: u32) -> Duration {
        let exponent = retry_number.saturating_sub(1).min(16) as i32;
        let secs = self.backoff_factor * 2f64.powi(exponent);
        if secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(secs).min(BACKOFF_MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new("pyxis.example.com");
        assert_eq!(config.retries, 3);
        assert_eq!(config.backoff_factor, 2.0);
        assert!(config.verify);
        assert_eq!(config.threads, DEFAULT_REQUEST_THREADS_LIMIT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ClientConfig::new("  ").validate().is_err());
        assert!(ClientConfig::new("h").with_threads(0).validate().is_err());
        assert!(ClientConfig::new("h").with_backoff_factor(-1.0).validate().is_err());
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(RetryPolicy::is_retryable_status(429));
        assert!(RetryPolicy::is_retryable_status(500));
        assert!(RetryPolicy::is_retryable_status(511));
        assert!(!RetryPolicy::is_retryable_status(512));
        assert!(!RetryPolicy::is_retryable_status(404));
        assert!(!RetryPolicy::is_retryable_status(409));
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = ClientConfig::new("h").with_backoff_factor(0.5).retry_policy();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_secs(1));
        assert_eq!(policy.backoff(3), Duration::from_secs(2));
        assert_eq!(policy.backoff(30), BACKOFF_MAX);

        let none = ClientConfig::new("h").with_backoff_factor(0.0).retry_policy();
        assert_eq!(none.backoff(4), Duration::ZERO);
    }
}
