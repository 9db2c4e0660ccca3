use crate::endpoint::CapabilityTag;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A configured mesh endpoint: a short alias bound to a vendor+model pair
/// plus the routing metadata the mesh needs to reach and rate-limit it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub id: String,
    pub provider: ProviderKind,
    pub model: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub capability_tags: HashSet<CapabilityTag>,
    #[serde(default = "d_rate_limit")]
    pub rate_limit_per_min: u32,
    /// Environment variable holding the API key for this endpoint.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Upstream base URL. Required for `openai_compat` (Ollama, vLLM, LM
    /// Studio, Together, ...); defaults to the vendor's public API for
    /// `anthropic`/`google` when absent.
    #[serde(default)]
    pub base_url: Option<String>,
}

fn d_rate_limit() -> u32 {
    60
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Anthropic,
    Google,
    OpenaiCompat,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EndpointsConfig {
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}
