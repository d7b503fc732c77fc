// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded retry with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, warn};

use mostrador_core::{GatewayErrorKind, MostradorError};

/// Error codes that are retried when they appear in an error message.
pub const DEFAULT_RETRYABLE_MARKERS: &[&str] = &[
    "ECONNRESET",
    "ENOTFOUND",
    "ECONNREFUSED",
    "ETIMEDOUT",
    "NETWORK_ERROR",
    "RATE_LIMIT",
    "TEMPORARY_FAILURE",
];

/// HTTP statuses that are worth another attempt.
pub const RETRYABLE_STATUSES: &[u16] = &[408, 429, 500, 502, 503, 504];

/// Default classifier: network-class failures and HTTP 408/429/5xx.
pub fn is_retryable_error(err: &MostradorError) -> bool {
    if let Some(status) = err.http_status() {
        return RETRYABLE_STATUSES.contains(&status);
    }
    match err {
        MostradorError::Gateway { kind, .. } => *kind != GatewayErrorKind::Client,
        MostradorError::Timeout { .. } => true,
        _ => false,
    }
}

/// Result of [`RetryPolicy::execute`].
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, MostradorError>,
    /// Attempts made, including the first.
    pub attempts: u32,
    pub elapsed: Duration,
}

impl<T> RetryOutcome<T> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> Result<T, MostradorError> {
        self.result
    }
}

/// Retry configuration.
///
/// `backoff[i]` is the wait after the `i+1`-th failed attempt; the last
/// entry is reused when attempts outnumber entries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub backoff: Vec<Duration>,
    /// Upper bound of the random extra delay, as a fraction of the base delay.
    pub jitter_ratio: f64,
    /// Substrings that make an error retryable regardless of its class.
    pub retryable_markers: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000),
            ],
            jitter_ratio: 0.1,
            retryable_markers: DEFAULT_RETRYABLE_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

impl RetryPolicy {
    pub fn matches_allow_list(&self, err: &MostradorError) -> bool {
        if self.retryable_markers.is_empty() {
            return false;
        }
        let text = err.to_string();
        self.retryable_markers.iter().any(|m| text.contains(m.as_str()))
    }

    pub fn is_retryable(&self, err: &MostradorError) -> bool {
        is_retryable_error(err) || self.matches_allow_list(err)
    }

    /// Whether another attempt should follow the failed attempt number `attempt` (1-based).
    pub fn should_retry(&self, err: &MostradorError, attempt: u32) -> bool {
        attempt < self.max_attempts.max(1) && self.is_retryable(err)
    }

    /// Backoff after failed attempt `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        if self.backoff.is_empty() {
            return Duration::ZERO;
        }
        let index = (attempt.max(1) as usize - 1).min(self.backoff.len() - 1);
        self.backoff[index]
    }

    /// Backoff after failed attempt `attempt` (1-based), with jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter_ratio <= 0.0 || base.is_zero() {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0.0..=self.jitter_ratio);
        base.mul_f64(1.0 + jitter)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// `max_attempts` is exhausted, using the default classifier.
    pub async fn execute<T, F, Fut>(&self, op: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MostradorError>>,
    {
        self.execute_with(op, is_retryable_error).await
    }

    /// Like [`execute`](Self::execute) with a caller-supplied classifier.
    /// The allow-list applies on top of `classify`.
    pub async fn execute_with<T, F, Fut, C>(&self, mut op: F, classify: C) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MostradorError>>,
        C: Fn(&MostradorError) -> bool,
    {
        let started = Instant::now();
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempts = attempt, "operation succeeded after retry");
                    }
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                        elapsed: started.elapsed(),
                    };
                }
                Err(err) => err,
            };

            let retryable = classify(&err) || self.matches_allow_list(&err);
            if !retryable || attempt >= max_attempts {
                if retryable {
                    warn!(attempts = attempt, error = %err, "retries exhausted");
                } else {
                    debug!(attempts = attempt, error = %err, "non-retryable error");
                }
                return RetryOutcome {
                    result: Err(err),
                    attempts: attempt,
                    elapsed: started.elapsed(),
                };
            }

            let delay = self.delay_for(attempt);
            debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "attempt failed, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
