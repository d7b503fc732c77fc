// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Failure isolation primitives for calls to external dependencies.
//!
//! - [`CircuitBreaker`] and [`CircuitBreakerRegistry`]: per-dependency
//!   closed/open/half-open state with counter decay.
//! - [`RetryPolicy`]: bounded retry with backoff and jitter.
//! - [`DedupLedger`]: TTL set of recently seen idempotency keys.

pub mod circuit_breaker;
pub mod dedup;
pub mod registry;
pub mod retry;

pub use circuit_breaker::{
    CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState,
};
pub use dedup::DedupLedger;
pub use registry::{BreakerHealth, CircuitBreakerRegistry, OverallHealth};
pub use retry::{RetryOutcome, RetryPolicy, is_retryable_error};
