// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Registry of named circuit breakers with aggregate health.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use strum::Display;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState};

/// Aggregate health over all tracked dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OverallHealth {
    Healthy,
    Degraded,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerHealth {
    pub overall: OverallHealth,
    pub total: usize,
    pub closed: usize,
    pub half_open: usize,
    pub open: usize,
}

/// One breaker per dependency name, created lazily and kept for the
/// process lifetime.
pub struct CircuitBreakerRegistry {
    defaults: CircuitBreakerConfig,
    profiles: HashMap<String, CircuitBreakerConfig>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(defaults: CircuitBreakerConfig) -> Self {
        Self {
            defaults,
            profiles: HashMap::new(),
            breakers: DashMap::new(),
        }
    }

    /// Use `config` instead of the defaults for the dependency `name`.
    pub fn with_profile(mut self, name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        self.profiles.insert(name.into(), config);
        self
    }

    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                let config = self
                    .profiles
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| self.defaults.clone());
                debug!(breaker = name, "creating circuit breaker");
                Arc::new(CircuitBreaker::new(name, config))
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| Arc::clone(b.value()))
    }

    /// Snapshots of every breaker, sorted by name.
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let mut snaps: Vec<_> = self.breakers.iter().map(|b| b.snapshot()).collect();
        snaps.sort_by(|a, b| a.name.cmp(&b.name));
        snaps
    }

    /// Healthy when every circuit is closed, critical when open circuits
    /// outnumber closed ones, degraded otherwise.
    pub fn health(&self) -> BreakerHealth {
        let (mut closed, mut half_open, mut open) = (0, 0, 0);
        for breaker in self.breakers.iter() {
            match breaker.state() {
                CircuitState::Closed => closed += 1,
                CircuitState::HalfOpen => half_open += 1,
                CircuitState::Open => open += 1,
            }
        }
        let overall = if open > 0 && open > closed {
            OverallHealth::Critical
        } else if open > 0 || half_open > 0 {
            OverallHealth::Degraded
        } else {
            OverallHealth::Healthy
        };
        BreakerHealth {
            overall,
            total: closed + half_open + open,
            closed,
            half_open,
            open,
        }
    }

    /// Reset one breaker. Returns `false` for unknown names.
    pub fn reset(&self, name: &str) -> bool {
        match self.breakers.get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.iter() {
            breaker.reset();
        }
    }

    /// Run counter decay on every breaker; returns how many were cleared.
    pub fn decay_all(&self) -> usize {
        self.breakers.iter().filter(|b| b.decay()).count()
    }

    /// Periodically decay counters until `cancel` fires.
    pub fn spawn_decay_task(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let cleared = registry.decay_all();
                        if cleared > 0 {
                            debug!(cleared, "decayed circuit breaker counters");
                        }
                    }
                }
            }
            info!("circuit breaker decay task stopped");
        })
    }
}
