//! Per-endpoint circuit breaker state machines with a static fallback map
//! (§4.4), grounded on `circuit_breaker.py`'s `CircuitBreaker` /
//! `CircuitBreakerRegistry`.

use chrono::{DateTime, Utc};
use llmesh_domain::config::CircuitConfig;
use llmesh_domain::trace::TraceEvent;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Static alternates, e.g. `gemini ↔ kimi`, mirroring the original's
/// `FALLBACK_MAPPING`.
const FALLBACK_MAPPING: &[(&str, &str)] = &[
    ("gemini", "kimi"),
    ("kimi", "gemini"),
    ("deepseek", "qwen"),
    ("qwen", "deepseek"),
    ("mistral", "cogito"),
    ("cogito", "mistral"),
    ("nova", "gemini"),
    ("glm", "minimax"),
    ("minimax", "glm"),
    ("claude", "deepseek"),
];

fn static_fallback(endpoint_id: &str) -> Option<&'static str> {
    FALLBACK_MAPPING
        .iter()
        .find(|(from, _)| *from == endpoint_id)
        .map(|(_, to)| *to)
}

struct Circuit {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    failure_threshold: u32,
    recovery_timeout_secs: u64,
    half_open_max_calls: u32,
}

impl Circuit {
    fn new(endpoint_id: &str, config: &CircuitConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            last_success: None,
            failure_threshold: config.failure_threshold_for(endpoint_id),
            recovery_timeout_secs: config.recovery_timeout_for(endpoint_id),
            half_open_max_calls: config.half_open_max_calls_for(endpoint_id),
        }
    }

    /// §3 Circuit invariants: CLOSED always admits; OPEN admits only after
    /// `recovery_timeout` has elapsed (transitioning to HALF_OPEN first);
    /// HALF_OPEN admits at most `half_open_max_calls` attempts.
    fn is_available(&mut self, endpoint_id: &str) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let Some(last_failure) = self.last_failure else {
                    return false;
                };
                let elapsed = (Utc::now() - last_failure).num_seconds().max(0) as u64;
                if elapsed >= self.recovery_timeout_secs {
                    self.transition(endpoint_id, CircuitState::HalfOpen, "recovery timeout elapsed");
                    self.success_count = 0;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => self.success_count < self.half_open_max_calls,
        }
    }

    fn record_success(&mut self, endpoint_id: &str) {
        self.success_count += 1;
        self.last_success = Some(Utc::now());
        match self.state {
            CircuitState::HalfOpen => {
                if self.success_count >= self.half_open_max_calls {
                    self.transition(endpoint_id, CircuitState::Closed, "recovered");
                    self.failure_count = 0;
                }
            }
            CircuitState::Closed => {
                self.failure_count = self.failure_count.saturating_sub(1);
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&mut self, endpoint_id: &str) {
        self.last_failure = Some(Utc::now());
        self.failure_count += 1;
        match self.state {
            CircuitState::HalfOpen => {
                self.transition(endpoint_id, CircuitState::Open, "failure during recovery");
            }
            CircuitState::Closed => {
                if self.failure_count >= self.failure_threshold {
                    self.transition(endpoint_id, CircuitState::Open, "failure threshold reached");
                }
            }
            CircuitState::Open => {}
        }
    }

    fn transition(&mut self, endpoint_id: &str, to: CircuitState, reason: &str) {
        let from = self.state;
        self.state = to;
        TraceEvent::CircuitTransition {
            endpoint_id: endpoint_id.to_string(),
            from_state: from.as_str().to_string(),
            to_state: to.as_str().to_string(),
            reason: reason.to_string(),
        }
        .emit();
        tracing::info!(endpoint_id, from = from.as_str(), to = to.as_str(), reason, "circuit transition");
    }

    fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.success_count = 0;
    }

    fn status(&self, endpoint_id: &str) -> CircuitStatus {
        CircuitStatus {
            endpoint_id: endpoint_id.to_string(),
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            last_failure: self.last_failure,
            last_success: self.last_success,
            fallback: static_fallback(endpoint_id).map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitStatus {
    pub endpoint_id: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub fallback: Option<String>,
}

/// Registry of per-endpoint circuits, lazily created on first use.
pub struct CircuitBreakerRegistry {
    breakers: Mutex<HashMap<String, Circuit>>,
    config: CircuitConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn is_available(&self, endpoint_id: &str) -> bool {
        let mut breakers = self.breakers.lock();
        breakers
            .entry(endpoint_id.to_string())
            .or_insert_with(|| Circuit::new(endpoint_id, &self.config))
            .is_available(endpoint_id)
    }

    pub fn record_success(&self, endpoint_id: &str) {
        let mut breakers = self.breakers.lock();
        breakers
            .entry(endpoint_id.to_string())
            .or_insert_with(|| Circuit::new(endpoint_id, &self.config))
            .record_success(endpoint_id);
    }

    pub fn record_failure(&self, endpoint_id: &str) {
        let mut breakers = self.breakers.lock();
        breakers
            .entry(endpoint_id.to_string())
            .or_insert_with(|| Circuit::new(endpoint_id, &self.config))
            .record_failure(endpoint_id);
    }

    /// The static fallback for `endpoint_id`, filtered by its own
    /// availability — `None` if there is no configured fallback or the
    /// fallback's circuit also denies (§4.4).
    pub fn available_fallback(&self, endpoint_id: &str) -> Option<String> {
        let fallback = static_fallback(endpoint_id)?;
        self.is_available(fallback).then(|| fallback.to_string())
    }

    pub fn status(&self, endpoint_id: &str) -> CircuitStatus {
        let mut breakers = self.breakers.lock();
        breakers
            .entry(endpoint_id.to_string())
            .or_insert_with(|| Circuit::new(endpoint_id, &self.config))
            .status(endpoint_id)
    }

    pub fn all_status(&self) -> Vec<CircuitStatus> {
        let breakers = self.breakers.lock();
        breakers.iter().map(|(id, c)| c.status(id)).collect()
    }

    pub fn reset(&self, endpoint_id: &str) {
        if let Some(circuit) = self.breakers.lock().get_mut(endpoint_id) {
            circuit.reset();
        }
    }

    pub fn reset_all(&self) {
        for circuit in self.breakers.lock().values_mut() {
            circuit.reset();
        }
    }
}
