//! Tool Dispatcher (§4.8): a name→handler registry with RBAC-gated,
//! audited, timeout-bounded invocation.

pub mod builtin;
pub mod registry;

pub use builtin::register_builtin_tools;
pub use registry::{ToolCallResult, ToolHandler, ToolRegistry};
