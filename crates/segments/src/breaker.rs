//! Per-provider circuit breakers.
//!
//! A provider that keeps failing is short-circuited for `reset_timeout`, so
//! showtime requests skip its campaigns immediately instead of each waiting
//! for a timeout.
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected without reaching the provider.
    Open,
    /// Probe calls pass; one failure reopens, enough successes close.
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    #[serde(rename = "reset_timeout_ms", with = "crate::config::millis")]
    pub reset_timeout: Duration,
    /// Successful probes needed to close a half-open circuit.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    successes: u32,
    changed_at: Instant,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                changed_at: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether a call may go through. Moves an open circuit to half-open once
    /// the reset timeout elapsed.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open if inner.changed_at.elapsed() >= self.config.reset_timeout => {
                inner.state = CircuitState::HalfOpen;
                inner.successes = 0;
                inner.changed_at = Instant::now();
                true
            }
            CircuitState::Open => false,
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.failures = 0,
            CircuitState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    inner.successes = 0;
                    inner.changed_at = Instant::now();
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.changed_at = Instant::now();
                    warn!(provider = %self.name, failures = inner.failures, "segment provider circuit opened");
                }
            }
            CircuitState::HalfOpen => {
                inner.failures += 1;
                inner.state = CircuitState::Open;
                inner.changed_at = Instant::now();
                warn!(provider = %self.name, "segment provider probe failed, circuit reopened");
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failures(&self) -> u32 {
        self.lock().failures
    }
}

/// One breaker per provider key, created on first use.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    pub fn get_or_create(&self, provider: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(provider, self.config)))
            .clone()
    }

    /// `(provider, state, failures)` for every breaker created so far.
    pub fn snapshot(&self) -> Vec<(String, CircuitState, u32)> {
        let mut out: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.state(), entry.failures()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_and_rejects() {
        let cb = CircuitBreaker::new(
            "remote",
            CircuitBreakerConfig::default().with_failure_threshold(2),
        );
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn success_in_closed_state_resets_failures() {
        let cb = CircuitBreaker::new(
            "remote",
            CircuitBreakerConfig::default().with_failure_threshold(2),
        );
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_probes_close_or_reopen() {
        let config = CircuitBreakerConfig::default()
            .with_failure_threshold(1)
            .with_reset_timeout(Duration::ZERO)
            .with_success_threshold(2);

        let closing = CircuitBreaker::new("a", config);
        closing.record_failure();
        assert!(closing.allow_request());
        assert_eq!(closing.state(), CircuitState::HalfOpen);
        closing.record_success();
        closing.record_success();
        assert_eq!(closing.state(), CircuitState::Closed);

        let reopening = CircuitBreaker::new("b", config);
        reopening.record_failure();
        assert!(reopening.allow_request());
        reopening.record_failure();
        assert_eq!(reopening.state(), CircuitState::Open);
    }

    #[test]
    fn registry_hands_out_one_breaker_per_provider() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
        let a = registry.get_or_create("remote");
        let b = registry.get_or_create("remote");
        assert!(Arc::ptr_eq(&a, &b));
        a.record_failure();
        assert_eq!(
            registry.snapshot(),
            vec![("remote".to_string(), CircuitState::Closed, 1)]
        );
    }
}
