//! Retry policy and backoff for task steps and jobs.
//!
//! Retries are never driven by sleeping inside one execution: a failed
//! attempt is recorded, the job goes back to `queued`, and the next claim
//! makes the next attempt. Backoff only decides how long the job waits
//! before it is claimable again.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound for any computed backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(3600);

// ---------------------------------------------------------------------------
// Backoff / RetryPolicy
// ---------------------------------------------------------------------------

/// Delay applied between a failed attempt and the next claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay after every failure.
    Fixed { delay_ms: u64 },
    /// `delay_ms * 2^(attempts - 1)`, capped at [`MAX_BACKOFF`].
    Exponential { delay_ms: u64 },
}

/// How many times a failing handler is re-attempted.
///
/// `retries = N` allows `N + 1` total attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default)]
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff: Option<Backoff>,
}

impl RetryPolicy {
    pub fn new(retries: u32) -> Self {
        Self {
            retries,
            backoff: None,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }
}

impl From<u32> for RetryPolicy {
    fn from(retries: u32) -> Self {
        RetryPolicy::new(retries)
    }
}

// ---------------------------------------------------------------------------
// RetryHandler
// ---------------------------------------------------------------------------

/// Stateless retry decisions. All logic takes the policy as a parameter.
pub struct RetryHandler;

impl RetryHandler {
    /// Whether another attempt is allowed after `attempts` failed ones.
    ///
    /// `attempts` counts every invocation so far, the failed one included.
    pub fn should_retry(policy: &RetryPolicy, attempts: u32) -> bool {
        attempts <= policy.retries
    }

    /// Delay before the next attempt, or `None` for "immediately".
    pub fn delay_for(policy: &RetryPolicy, attempts: u32) -> Option<Duration> {
        let delay = match policy.backoff? {
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential { delay_ms } => {
                let exponent = attempts.saturating_sub(1).min(32);
                let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
                Duration::from_millis(delay_ms.saturating_mul(factor))
            }
        };
        Some(delay.min(MAX_BACKOFF))
    }

    /// The `wait_until` timestamp for a requeue decided at `now`.
    pub fn next_eligible_at(delay: Option<Duration>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let delay = delay?;
        chrono::Duration::from_std(delay).ok().map(|d| now + d)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
