use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitConfig {
    #[serde(default = "d_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "d_recovery_timeout")]
    pub recovery_timeout_seconds: u64,
    #[serde(default = "d_half_open_max_calls")]
    pub half_open_max_calls: u32,
    /// Per-endpoint overrides of the defaults above, keyed by endpoint id.
    #[serde(default)]
    pub overrides: HashMap<String, CircuitOverride>,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: d_failure_threshold(),
            recovery_timeout_seconds: d_recovery_timeout(),
            half_open_max_calls: d_half_open_max_calls(),
            overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CircuitOverride {
    pub failure_threshold: Option<u32>,
    pub recovery_timeout_seconds: Option<u64>,
    pub half_open_max_calls: Option<u32>,
}

impl CircuitConfig {
    pub fn failure_threshold_for(&self, endpoint_id: &str) -> u32 {
        self.overrides
            .get(endpoint_id)
            .and_then(|o| o.failure_threshold)
            .unwrap_or(self.failure_threshold)
    }

    pub fn recovery_timeout_for(&self, endpoint_id: &str) -> u64 {
        self.overrides
            .get(endpoint_id)
            .and_then(|o| o.recovery_timeout_seconds)
            .unwrap_or(self.recovery_timeout_seconds)
    }

    pub fn half_open_max_calls_for(&self, endpoint_id: &str) -> u32 {
        self.overrides
            .get(endpoint_id)
            .and_then(|o| o.half_open_max_calls)
            .unwrap_or(self.half_open_max_calls)
    }
}

fn d_failure_threshold() -> u32 {
    5
}
fn d_recovery_timeout() -> u64 {
    60
}
fn d_half_open_max_calls() -> u32 {
    3
}
