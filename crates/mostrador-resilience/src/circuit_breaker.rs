// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-dependency circuit breaker.
//!
//! `CLOSED` counts failures; reaching the threshold opens the circuit. While
//! `OPEN`, calls fail fast until `recovery_timeout` has elapsed since the last
//! failure, then a single probe is admitted (`HALF_OPEN`). A successful probe
//! closes the circuit, a failed one re-opens it.
//!
//! Client-class errors (malformed requests) never count as failures.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use mostrador_core::{ErrorClass, MostradorError};

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Thresholds and timers for one breaker.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Counted failures that open the circuit.
    pub failure_threshold: u32,
    /// Time after the last failure before a probe is admitted.
    pub recovery_timeout: Duration,
    /// Counters reset when no failure happened within this window.
    pub monitoring_period: Duration,
    /// Per-call deadline; an expired call counts as a transient failure.
    pub call_timeout: Option<Duration>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            monitoring_period: Duration::from_secs(300),
            call_timeout: None,
        }
    }
}

impl CircuitBreakerConfig {
    /// Profile for the WhatsApp Cloud API: trips sooner, recovers sooner.
    pub fn whatsapp() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            monitoring_period: Duration::from_secs(180),
            call_timeout: Some(Duration::from_secs(15)),
        }
    }
}

/// Point-in-time view of a breaker, for health endpoints and logs.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failures: u32,
    pub successes: u32,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    /// Milliseconds until an open circuit admits a probe.
    pub retry_in_ms: Option<u64>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    total_calls: u64,
    rejected_calls: u64,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    /// Start of the in-flight half-open probe. A probe older than the
    /// recovery timeout is treated as abandoned.
    probe_started: Option<Instant>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            successes: 0,
            total_calls: 0,
            rejected_calls: 0,
            last_failure: None,
            last_failure_at: None,
            last_success_at: None,
            probe_started: None,
        }
    }

    fn recovery_elapsed(&self, recovery_timeout: Duration) -> bool {
        self.last_failure
            .is_none_or(|at| at.elapsed() >= recovery_timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

/// Circuit breaker guarding one named external dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

/// Whether an error from the wrapped operation counts against the breaker.
fn counts_as_failure(err: &MostradorError) -> bool {
    !matches!(err.class(), ErrorClass::Client | ErrorClass::Capacity)
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn open_error(&self) -> MostradorError {
        MostradorError::CircuitOpen {
            dependency: self.name.clone(),
        }
    }

    /// Current state. An open circuit whose recovery timeout has elapsed is
    /// still reported as `Open` until the next call probes it.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Whether a call issued now would reach the dependency.
    pub fn is_call_permitted(&self) -> bool {
        let inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => inner.recovery_elapsed(self.config.recovery_timeout),
            CircuitState::HalfOpen => inner
                .probe_started
                .is_none_or(|at| at.elapsed() >= self.config.recovery_timeout),
        }
    }

    /// Execute `op` through the breaker.
    ///
    /// Fails with [`MostradorError::CircuitOpen`] without invoking `op` while
    /// the circuit is open.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, MostradorError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, MostradorError>>,
    {
        self.try_acquire()?.call(op).await
    }

    /// Reserve a call slot without running anything yet.
    ///
    /// Work done between acquiring and [`CallPermit::call`] is not observed
    /// by the breaker. A permit dropped unused releases a half-open probe
    /// slot without recording an outcome.
    pub fn try_acquire(&self) -> Result<CallPermit<'_>, MostradorError> {
        let admission = self.admit()?;
        Ok(CallPermit {
            breaker: self,
            admission,
            settled: false,
        })
    }

    fn admit(&self) -> Result<Admission, MostradorError> {
        let mut inner = self.lock();
        inner.total_calls += 1;
        match inner.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => {
                if inner.recovery_elapsed(self.config.recovery_timeout) {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_started = Some(Instant::now());
                    info!(breaker = %self.name, "circuit half-open, admitting probe");
                    Ok(Admission::Probe)
                } else {
                    inner.rejected_calls += 1;
                    debug!(breaker = %self.name, "circuit open, rejecting call");
                    Err(self.open_error())
                }
            }
            CircuitState::HalfOpen => {
                let probe_busy = inner
                    .probe_started
                    .is_some_and(|at| at.elapsed() < self.config.recovery_timeout);
                if probe_busy {
                    inner.rejected_calls += 1;
                    Err(self.open_error())
                } else {
                    inner.probe_started = Some(Instant::now());
                    Ok(Admission::Probe)
                }
            }
        }
    }

    fn on_success(&self, admission: Admission) {
        let mut inner = self.lock();
        inner.successes = inner.successes.saturating_add(1);
        inner.last_success_at = Some(Utc::now());
        match (inner.state, admission) {
            (CircuitState::HalfOpen, Admission::Probe) => {
                inner.state = CircuitState::Closed;
                inner.failures = 0;
                inner.probe_started = None;
                info!(breaker = %self.name, "probe succeeded, circuit closed");
            }
            (CircuitState::Closed, _) => inner.failures = 0,
            _ => {}
        }
    }

    fn on_failure(&self, admission: Admission, err: &MostradorError) {
        let mut inner = self.lock();
        inner.failures = inner.failures.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        inner.last_failure_at = Some(Utc::now());
        match inner.state {
            CircuitState::HalfOpen if admission == Admission::Probe => {
                inner.state = CircuitState::Open;
                inner.probe_started = None;
                warn!(breaker = %self.name, error = %err, "probe failed, circuit re-opened");
            }
            CircuitState::Closed if inner.failures >= self.config.failure_threshold => {
                inner.state = CircuitState::Open;
                warn!(
                    breaker = %self.name,
                    failures = inner.failures,
                    recovery_secs = self.config.recovery_timeout.as_secs(),
                    error = %err,
                    "circuit opened"
                );
            }
            _ => {}
        }
    }

    fn on_neutral(&self, admission: Admission) {
        if admission == Admission::Probe {
            self.lock().probe_started = None;
        }
    }

    /// Reset counters when no failure happened within the monitoring period.
    ///
    /// Returns `true` when counters were cleared.
    pub fn decay(&self) -> bool {
        let mut inner = self.lock();
        let quiet = inner
            .last_failure
            .is_none_or(|at| at.elapsed() >= self.config.monitoring_period);
        if quiet && (inner.failures > 0 || inner.successes > 0) {
            inner.failures = 0;
            inner.successes = 0;
            debug!(breaker = %self.name, "circuit counters decayed");
            return true;
        }
        false
    }

    /// Force the breaker back to `CLOSED` with cleared counters.
    pub fn reset(&self) {
        let mut inner = self.lock();
        let (total, rejected) = (inner.total_calls, inner.rejected_calls);
        *inner = Inner::new();
        inner.total_calls = total;
        inner.rejected_calls = rejected;
        info!(breaker = %self.name, "circuit manually reset");
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        let retry_in_ms = match (inner.state, inner.last_failure) {
            (CircuitState::Open, Some(at)) => Some(
                self.config
                    .recovery_timeout
                    .saturating_sub(at.elapsed())
                    .as_millis() as u64,
            ),
            _ => None,
        };
        CircuitSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failures: inner.failures,
            successes: inner.successes,
            total_calls: inner.total_calls,
            rejected_calls: inner.rejected_calls,
            last_failure_at: inner.last_failure_at,
            last_success_at: inner.last_success_at,
            retry_in_ms,
        }
    }
}

/// Admission granted by [`CircuitBreaker::try_acquire`].
#[derive(Debug)]
#[must_use = "a permit does nothing until `call` is invoked"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl CallPermit<'_> {
    /// Run `op` under this admission and record its outcome.
    pub async fn call<T, F, Fut>(mut self, op: F) -> Result<T, MostradorError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, MostradorError>>,
    {
        let breaker = self.breaker;
        let result = match breaker.config.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, op()).await {
                Ok(result) => result,
                Err(_) => Err(MostradorError::Timeout { duration: limit }),
            },
            None => op().await,
        };

        self.settled = true;
        match &result {
            Ok(_) => breaker.on_success(self.admission),
            Err(err) if counts_as_failure(err) => breaker.on_failure(self.admission, err),
            Err(_) => breaker.on_neutral(self.admission),
        }
        result
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_neutral(self.admission);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            recovery_timeout: Duration::from_secs(30),
            monitoring_period: Duration::from_secs(180),
            call_timeout: None,
        }
    }

    async fn fail(breaker: &CircuitBreaker, calls: &AtomicU32) -> Result<(), MostradorError> {
        breaker
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(MostradorError::gateway_status(503, "unavailable"))
            })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker, calls: &AtomicU32) -> Result<(), MostradorError> {
        breaker
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_fails_fast() {
        let breaker = CircuitBreaker::new("whatsapp", config(3));
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            assert!(fail(&breaker, &calls).await.is_err());
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let err = succeed(&breaker, &calls).await.unwrap_err();
        assert!(matches!(err, MostradorError::CircuitOpen { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3, "open circuit must not invoke op");
        assert_eq!(breaker.snapshot().rejected_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_success_closes() {
        let breaker = CircuitBreaker::new("whatsapp", config(2));
        let calls = AtomicU32::new(0);
        let _ = fail(&breaker, &calls).await;
        let _ = fail(&breaker, &calls).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.is_call_permitted());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(breaker.is_call_permitted());

        succeed(&breaker, &calls).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("whatsapp", config(1));
        let calls = AtomicU32::new(0);
        let _ = fail(&breaker, &calls).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        assert!(fail(&breaker, &calls).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Recovery timer restarts from the failed probe.
        let err = succeed(&breaker, &calls).await.unwrap_err();
        assert!(matches!(err, MostradorError::CircuitOpen { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn acquired_permit_survives_a_concurrent_trip() {
        let breaker = CircuitBreaker::new("whatsapp", config(2));
        let calls = AtomicU32::new(0);
        let permit = breaker.try_acquire().unwrap();

        let _ = fail(&breaker, &calls).await;
        let _ = fail(&breaker, &calls).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(matches!(
            breaker.try_acquire().unwrap_err(),
            MostradorError::CircuitOpen { .. }
        ));

        // Admitted before the trip, so the operation still runs.
        permit.call(|| async { Ok(()) }).await.unwrap();
        assert_eq!(breaker.snapshot().rejected_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_probe_permit_frees_the_slot() {
        let breaker = CircuitBreaker::new("whatsapp", config(1));
        let calls = AtomicU32::new(0);
        let _ = fail(&breaker, &calls).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        let probe = breaker.try_acquire().unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.try_acquire().is_err());
        drop(probe);

        succeed(&breaker, &calls).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_do_not_count() {
        let breaker = CircuitBreaker::new("whatsapp", config(2));
        for _ in 0..5 {
            let _ = breaker
                .call(|| async { Err::<(), _>(MostradorError::gateway_status(400, "bad number")) })
                .await;
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_consecutive_failures() {
        let breaker = CircuitBreaker::new("whatsapp", config(3));
        let calls = AtomicU32::new(0);
        let _ = fail(&breaker, &calls).await;
        let _ = fail(&breaker, &calls).await;
        succeed(&breaker, &calls).await.unwrap();
        let _ = fail(&breaker, &calls).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn call_timeout_counts_as_failure() {
        let mut cfg = config(1);
        cfg.call_timeout = Some(Duration::from_millis(100));
        let breaker = CircuitBreaker::new("slow", cfg);

        let err = breaker
            .call(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), MostradorError>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MostradorError::Timeout { .. }));
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn decay_clears_stale_counters() {
        let breaker = CircuitBreaker::new("whatsapp", config(5));
        let calls = AtomicU32::new(0);
        let _ = fail(&breaker, &calls).await;
        assert!(!breaker.decay(), "failure is still inside the window");

        tokio::time::advance(Duration::from_secs(181)).await;
        assert!(breaker.decay());
        assert_eq!(breaker.snapshot().failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_reports_retry_window() {
        let breaker = CircuitBreaker::new("whatsapp", config(1));
        let calls = AtomicU32::new(0);
        let _ = fail(&breaker, &calls).await;
        tokio::time::advance(Duration::from_secs(10)).await;
        let snap = breaker.snapshot();
        assert_eq!(snap.state, CircuitState::Open);
        assert_eq!(snap.retry_in_ms, Some(20_000));
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
