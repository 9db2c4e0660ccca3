//! Shared types, configuration, and error handling for the llmesh
//! workspace. Every other crate depends on this one and nothing in here
//! depends on them.

pub mod audit_entry;
pub mod chain;
pub mod command;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod memory_entry;
pub mod rbac;
pub mod stream;
pub mod tool;
pub mod trace;
pub mod wire;

pub use audit_entry::{AuditEntry, AuditLevel, AuditOutcome};
pub use chain::{AgentPlan, AgentResult, AgentTask, Chain, ChainStatus, Cycle, CycleNextAction};
pub use command::{Agent, Command, CommandStatus, CommandType, Priority};
pub use config::Config;
pub use endpoint::{CapabilityTag, LlmEndpoint};
pub use error::{Error, Result};
pub use memory_entry::{Importance, MemoryEntry, MemoryType};
pub use rbac::{Permission, Role};
pub use stream::Usage;
pub use tool::{ContentPart, Message, MessageContent, Role as MessageRole, ToolCall, ToolCategory, ToolDefinition, ToolSpec};
pub use trace::TraceEvent;
pub use wire::{LlmCapabilities, ToolSupport};
