//! Inline-Call Parser (§4.9): extracts `@mcp.call(name, {...})`
//! occurrences from arbitrary text, executes them through the Tool
//! Dispatcher, and splices the results back in.

pub mod parser;
pub mod processor;

pub use parser::{has_calls, parse, McpCall};
pub use processor::{process, process_iterative, McpResult};
