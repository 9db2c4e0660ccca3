//! JSON-RPC 2.0 front-end (§4.13): wire types plus method routing over the
//! §4.8 tool dispatcher. This process is itself the MCP server — it has no
//! outbound-client transport, only the three inbound methods the spec
//! names (`initialize`, `tools/list`, `tools/call`).

pub mod dispatch;
pub mod protocol;

pub use dispatch::{parse_incoming, Dispatcher, Incoming};
pub use protocol::{
    ClientInfo, InitializeParams, InitializeResult, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    McpToolDef, ServerInfo, ToolCallContent, ToolCallResult, ToolsListResult,
};
