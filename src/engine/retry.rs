use crate::config::RetryConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    Transient,
    Timeout,
    RateLimited,
    Validation,
    /// The step handler panicked; never retried.
    Panicked,
}

impl StepErrorKind {
    pub fn is_retryable(self) -> bool {
        !matches!(self, StepErrorKind::Validation | StepErrorKind::Panicked)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepErrorKind::Transient => "transient",
            StepErrorKind::Timeout => "timeout",
            StepErrorKind::RateLimited => "rate_limited",
            StepErrorKind::Validation => "validation",
            StepErrorKind::Panicked => "panicked",
        }
    }
}

impl std::fmt::Display for StepErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exponential backoff, `base * 2^retry_count` capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_secs(config.base_delay_seconds),
            Duration::from_secs(config.max_delay_seconds),
        )
    }

    pub fn next_retry_delay(&self, retry_count: u32) -> Duration {
        2_u32
            .checked_pow(retry_count)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    pub fn should_retry(&self, retry_count: u32, max_retries: u32, kind: StepErrorKind) -> bool {
        retry_count < max_retries && kind.is_retryable()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
