//! Retry policy and failure classification for reviewer calls.
//!
//! The policy is a value object (max retries + base backoff) consumed by
//! [`retry_classified`], which keeps the attempt loop testable apart from
//! the I/O it wraps. Only `rate_limit` failures retry; every other class
//! returns on the first occurrence.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Classification of a failed reviewer attempt, derived from error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RateLimit,
    Timeout,
    ParseError,
    Unknown,
}

impl FailureKind {
    /// Classify an error message by case-insensitive substring.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("rate limit") || lower.contains("429") {
            Self::RateLimit
        } else if lower.contains("timeout") || lower.contains("timed out") {
            Self::Timeout
        } else if lower.contains("parse") || lower.contains("json") {
            Self::ParseError
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::Timeout => "timeout",
            Self::ParseError => "parse_error",
            Self::Unknown => "unknown",
        }
    }

    /// Only rate limits are transient enough to retry automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimit)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rate_limit" => Ok(Self::RateLimit),
            "timeout" => Ok(Self::Timeout),
            "parse_error" => Ok(Self::ParseError),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("Unknown failure kind: {}", s)),
        }
    }
}

/// Bounded exponential backoff: attempt `n` waits `backoff × 2^n`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt, so total attempts = max_retries + 1.
    pub max_retries: u32,
    /// Base delay for the exponential schedule.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Delay before the retry following failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff * 2u32.saturating_pow(attempt)
    }

    pub fn total_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// Outcome of one attempt inside [`retry_classified`].
#[derive(Debug, Clone)]
pub struct AttemptFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl AttemptFailure {
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: FailureKind::classify(&message),
            message,
        }
    }
}

/// Drive `op` under `policy`: retry while the failure classifies as
/// retryable and attempts remain, sleeping the policy's delay between
/// attempts. Returns the last failure with the attempt count on
/// exhaustion or on the first non-retryable failure.
pub async fn retry_classified<T, F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
) -> Result<(T, u32), (AttemptFailure, u32)>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptFailure>>,
{
    let mut attempt = 0u32;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok((value, attempt + 1)),
            Err(failure) => {
                if failure.kind.is_retryable() && attempt < policy.max_retries {
                    let delay = policy.delay_for(attempt);
                    debug!(
                        attempt,
                        kind = %failure.kind,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                } else {
                    warn!(
                        attempt,
                        kind = %failure.kind,
                        "Giving up: {}",
                        failure.message
                    );
                    return Err((failure, attempt + 1));
                }
            }
        }
    }
}
