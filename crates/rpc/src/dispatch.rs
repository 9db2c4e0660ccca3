//! JSON-RPC 2.0 front-end method routing (§4.13). Three methods:
//! `initialize`, `tools/list`, `tools/call`; everything else is
//! `-32601 Method not found`. Notifications (no `id`) never produce a
//! response.

use crate::protocol::{
    InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpToolDef, ServerInfo, ToolCallContent,
    ToolCallResult as WireToolCallResult, ToolsListResult,
};
use llmesh_tools::ToolRegistry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const PIPELINE_ERROR: i64 = -32000;

/// Parsed form of an incoming JSON-RPC line: a `Request` expects a
/// response; a `Notification` (no `id`) never gets one.
pub enum Incoming {
    Request(JsonRpcRequest),
    Notification,
}

pub fn parse_incoming(raw: &str) -> std::result::Result<Incoming, JsonRpcError> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| JsonRpcError {
        code: PARSE_ERROR,
        message: e.to_string(),
        data: None,
    })?;
    if value.get("id").is_some() {
        let req: JsonRpcRequest = serde_json::from_value(value).map_err(|e| JsonRpcError {
            code: PARSE_ERROR,
            message: e.to_string(),
            data: None,
        })?;
        Ok(Incoming::Request(req))
    } else {
        Ok(Incoming::Notification)
    }
}

/// Routes JSON-RPC requests to the §4.8 tool dispatcher, RBAC-filtering
/// `tools/list` and wrapping `tools/call` into MCP-style content blocks.
pub struct Dispatcher {
    tools: Arc<ToolRegistry>,
    server_name: String,
    server_version: String,
    bootstrapped: AtomicBool,
}

impl Dispatcher {
    pub fn new(tools: Arc<ToolRegistry>, server_name: impl Into<String>, server_version: impl Into<String>) -> Self {
        Self {
            tools,
            server_name: server_name.into(),
            server_version: server_version.into(),
            bootstrapped: AtomicBool::new(false),
        }
    }

    /// Handle one parsed request. `caller` is the RBAC identity driving
    /// `tools/list` filtering and the §4.8 `can_use_tool` check inside
    /// `tools/call`.
    pub async fn handle(&self, request: JsonRpcRequest, caller: &str, trace_id: Option<&str>) -> JsonRpcResponse {
        match request.method.as_str() {
            "initialize" => self.handle_initialize(request.id),
            "tools/list" => self.handle_tools_list(request.id, caller),
            "tools/call" => self.handle_tools_call(request.id, request.params, caller, trace_id).await,
            other => error_response(request.id, METHOD_NOT_FOUND, format!("method not found: {other}")),
        }
    }

    fn handle_initialize(&self, id: u64) -> JsonRpcResponse {
        if !self.bootstrapped.swap(true, Ordering::SeqCst) {
            tracing::info!(server = %self.server_name, "bootstrapping JSON-RPC front-end on first initialize");
        }
        let result = InitializeResult {
            capabilities: serde_json::json!({
                "tools": {"listChanged": true},
                "resources": {},
                "prompts": {},
                "logging": {},
            }),
            server_info: ServerInfo {
                name: self.server_name.clone(),
                version: self.server_version.clone(),
            },
        };
        ok_response(id, serde_json::to_value(result).expect("InitializeResult is always serializable"))
    }

    fn handle_tools_list(&self, id: u64, caller: &str) -> JsonRpcResponse {
        let tools = self
            .tools
            .list_for(caller)
            .into_iter()
            .map(|def| McpToolDef {
                name: def.name,
                description: def.description,
                input_schema: def.parameters,
            })
            .collect();
        let result = ToolsListResult { tools };
        ok_response(id, serde_json::to_value(result).expect("ToolsListResult is always serializable"))
    }

    async fn handle_tools_call(&self, id: u64, params: Option<serde_json::Value>, caller: &str, trace_id: Option<&str>) -> JsonRpcResponse {
        let Some(params) = params else {
            return error_response(id, PIPELINE_ERROR, "tools/call requires params".to_string());
        };
        let Some(name) = params.get("name").and_then(|v| v.as_str()) else {
            return error_response(id, PIPELINE_ERROR, "tools/call params.name is required".to_string());
        };
        let arguments = params.get("arguments").cloned().unwrap_or(serde_json::json!({}));

        let outcome = self.tools.call(name, arguments, caller, trace_id).await;
        let (content, is_error) = match (&outcome.result, &outcome.error) {
            (Some(value), _) => (
                vec![ToolCallContent {
                    content_type: "text".to_string(),
                    text: value.to_string(),
                }],
                false,
            ),
            (None, Some(err)) => (
                vec![ToolCallContent {
                    content_type: "text".to_string(),
                    text: err.clone(),
                }],
                true,
            ),
            (None, None) => (Vec::new(), !outcome.success),
        };
        let result = WireToolCallResult { content, is_error };
        ok_response(id, serde_json::to_value(result).expect("ToolCallResult is always serializable"))
    }
}

fn ok_response(id: u64, result: serde_json::Value) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".into(),
        id,
        result: Some(result),
        error: None,
    }
}

fn error_response(id: u64, code: i64, message: String) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".into(),
        id,
        result: None,
        error: Some(JsonRpcError { code, message, data: None }),
    }
}
