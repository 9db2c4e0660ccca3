use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    #[serde(default = "d_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "d_max_call_depth")]
    pub max_call_depth: u32,
    #[serde(default)]
    pub default_lead_endpoint: Option<String>,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: d_timeout_ms(),
            max_call_depth: d_max_call_depth(),
            default_lead_endpoint: None,
        }
    }
}

fn d_timeout_ms() -> u64 {
    120_000
}
fn d_max_call_depth() -> u32 {
    10
}
