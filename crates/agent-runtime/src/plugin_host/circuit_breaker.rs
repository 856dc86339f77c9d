//! Per-plugin-hook circuit breaker (spec.md §4.7).
//!
//! Adapted from the teacher's per-tool-endpoint circuit breaker
//! (reasoning::circuit_breaker): same Closed → Open → HalfOpen state
//! machine, keyed here by hook name instead of tool endpoint, with the
//! defaults spec.md specifies (5 consecutive failures, 60s recovery).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open { opened_at: Instant },
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    #[serde(with = "duration_ms")]
    pub recovery_timeout: Duration,
    pub half_open_max_calls: u32,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 2,
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failure_count: u32,
    half_open_calls: u32,
}

#[derive(Debug, thiserror::Error)]
#[error("circuit open for hook '{hook_name}': {consecutive_failures} consecutive failures, recovery in {recovery_remaining:?}")]
pub struct CircuitOpenError {
    pub hook_name: String,
    pub consecutive_failures: u32,
    pub recovery_remaining: Duration,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failure_count: 0,
            half_open_calls: 0,
        }
    }

    pub fn check(&mut self, hook_name: &str) -> Result<(), CircuitOpenError> {
        match &self.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open { opened_at } => {
                if opened_at.elapsed() >= self.config.recovery_timeout {
                    self.state = CircuitState::HalfOpen;
                    self.half_open_calls = 1;
                    tracing::info!(hook = hook_name, "circuit transitioning to half-open");
                    Ok(())
                } else {
                    let remaining = self.config.recovery_timeout - opened_at.elapsed();
                    Err(CircuitOpenError {
                        hook_name: hook_name.to_string(),
                        consecutive_failures: self.failure_count,
                        recovery_remaining: remaining,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if self.half_open_calls < self.config.half_open_max_calls {
                    self.half_open_calls += 1;
                    Ok(())
                } else {
                    Err(CircuitOpenError {
                        hook_name: hook_name.to_string(),
                        consecutive_failures: self.failure_count,
                        recovery_remaining: Duration::from_secs(0),
                    })
                }
            }
        }
    }

    pub fn record_success(&mut self, hook_name: &str) {
        match self.state {
            CircuitState::Closed => {
                self.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                self.state = CircuitState::Closed;
                self.failure_count = 0;
                self.half_open_calls = 0;
                tracing::info!(hook = hook_name, "circuit recovered, closed");
            }
            CircuitState::Open { .. } => {
                self.state = CircuitState::Closed;
                self.failure_count = 0;
            }
        }
    }

    /// Returns `true` the moment this failure trips the circuit open (so
    /// the caller can emit `plugin.hook_circuit_open` exactly once per
    /// opening, not on every failure while it stays open).
    pub fn record_failure(&mut self, hook_name: &str) -> bool {
        match self.state {
            CircuitState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= self.config.failure_threshold {
                    self.state = CircuitState::Open { opened_at: Instant::now() };
                    tracing::warn!(hook = hook_name, failures = self.failure_count, "circuit tripped open");
                    return true;
                }
                false
            }
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open { opened_at: Instant::now() };
                self.half_open_calls = 0;
                tracing::warn!(hook = hook_name, "half-open recovery failed, back to open");
                true
            }
            CircuitState::Open { .. } => {
                self.failure_count += 1;
                false
            }
        }
    }

    pub fn state(&self) -> &CircuitState {
        &self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }
}

pub struct CircuitBreakerRegistry {
    breakers: Arc<RwLock<HashMap<String, CircuitBreaker>>>,
    default_config: CircuitBreakerConfig,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: Arc::new(RwLock::new(HashMap::new())),
            default_config,
        }
    }

    pub fn check(&self, hook_name: &str) -> Result<(), CircuitOpenError> {
        let mut breakers = self.breakers.write();
        let breaker = breakers
            .entry(hook_name.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.default_config.clone()));
        breaker.check(hook_name)
    }

    pub fn record_success(&self, hook_name: &str) {
        let mut breakers = self.breakers.write();
        if let Some(breaker) = breakers.get_mut(hook_name) {
            breaker.record_success(hook_name);
        }
    }

    /// Mirrors `CircuitBreaker::record_failure`'s "just tripped" signal.
    pub fn record_failure(&self, hook_name: &str) -> bool {
        let mut breakers = self.breakers.write();
        let breaker = breakers
            .entry(hook_name.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.default_config.clone()));
        breaker.record_failure(hook_name)
    }

    pub fn get_state(&self, hook_name: &str) -> Option<CircuitState> {
        let breakers = self.breakers.read();
        breakers.get(hook_name).map(|b| b.state().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_closed() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        assert_eq!(*cb.state(), CircuitState::Closed);
    }

    #[test]
    fn trips_open_after_five_failures_by_default() {
        let mut cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        for _ in 0..4 {
            assert!(!cb.record_failure("hook"));
        }
        assert!(cb.record_failure("hook"));
        assert!(matches!(*cb.state(), CircuitState::Open { .. }));
        assert!(cb.check("hook").is_err());
    }

    #[test]
    fn recovers_through_half_open_on_success() {
        let config = CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_millis(1),
            half_open_max_calls: 1,
        };
        let mut cb = CircuitBreaker::new(config);
        cb.record_failure("hook");
        cb.record_failure("hook");
        std::thread::sleep(Duration::from_millis(5));
        assert!(cb.check("hook").is_ok());
        assert_eq!(*cb.state(), CircuitState::HalfOpen);
        cb.record_success("hook");
        assert_eq!(*cb.state(), CircuitState::Closed);
    }

    #[test]
    fn registry_isolates_circuits_per_hook() {
        let registry = CircuitBreakerRegistry::default();
        for _ in 0..5 {
            registry.record_failure("failing_hook");
        }
        assert!(registry.check("failing_hook").is_err());
        assert!(registry.check("other_hook").is_ok());
    }
}
