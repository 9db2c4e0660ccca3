use serde::{Deserialize, Serialize};

/// Token usage for a completion, surfaced on successful mesh calls as
/// `prompt_tokens`/`completion_tokens` on `TraceEvent::MeshCall`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}
