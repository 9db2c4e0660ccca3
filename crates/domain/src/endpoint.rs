use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A routing tag describing what an endpoint (or a command type) is suited
/// for. Used by the Mesh's `best_for_task` lookup and the Queue's
/// type-to-capability map — never by the wire-level provider adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityTag {
    Coding,
    Research,
    Review,
    Vision,
    LongContext,
    FastResponse,
    Reasoning,
    Multilingual,
    German,
    Search,
    Chat,
    Coordinate,
}

impl CapabilityTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Coding => "coding",
            Self::Research => "research",
            Self::Review => "review",
            Self::Vision => "vision",
            Self::LongContext => "long_context",
            Self::FastResponse => "fast_response",
            Self::Reasoning => "reasoning",
            Self::Multilingual => "multilingual",
            Self::German => "german",
            Self::Search => "search",
            Self::Chat => "chat",
            Self::Coordinate => "coordinate",
        }
    }
}

/// An entry in the mesh: a short alias (`gemini`, `claude`, ...), the
/// concrete backing model string, and the capability tags it advertises.
/// Immutable after registration (§3 `LLMEndpoint`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmEndpoint {
    pub id: String,
    pub backing_model: String,
    pub capability_tags: HashSet<CapabilityTag>,
}

impl LlmEndpoint {
    pub fn has_capability(&self, tag: CapabilityTag) -> bool {
        self.capability_tags.contains(&tag)
    }
}
