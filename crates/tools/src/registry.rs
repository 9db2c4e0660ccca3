//! Name→handler registry with RBAC-gated, audited invocation (§4.8).

use async_trait::async_trait;
use llmesh_audit::AuditLog;
use llmesh_domain::audit_entry::{AuditEntry, AuditLevel, AuditOutcome};
use llmesh_domain::error::Result;
use llmesh_domain::tool::{ToolDefinition, ToolSpec};
use llmesh_rbac::Rbac;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// A tool's async implementation. Handlers are expected to be idempotent
/// or to surface their own side-effect semantics; the dispatcher itself
/// never retries.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, params: serde_json::Value) -> Result<serde_json::Value>;
}

struct Registered {
    spec: ToolSpec,
    handler: Arc<dyn ToolHandler>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolCallResult {
    pub success: bool,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

/// Process-wide map from tool name to handler. Registration is additive:
/// `register` may be called repeatedly at startup, or later at runtime to
/// add a tool the process didn't start with.
pub struct ToolRegistry {
    tools: HashMap<String, Registered>,
    rbac: Arc<Rbac>,
    audit: Arc<AuditLog>,
}

impl ToolRegistry {
    pub fn new(rbac: Arc<Rbac>, audit: Arc<AuditLog>) -> Self {
        Self {
            tools: HashMap::new(),
            rbac,
            audit,
        }
    }

    pub fn register(&mut self, spec: ToolSpec, handler: Arc<dyn ToolHandler>) {
        self.tools.insert(spec.name.clone(), Registered { spec, handler });
    }

    /// The tools visible to `caller` given their RBAC role, for
    /// `tools/list` (§4.13).
    pub fn list_for(&self, caller: &str) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .filter(|r| self.rbac.has_permission(caller, r.spec.required_permission))
            .map(|r| r.spec.definition())
            .collect()
    }

    pub fn contains(&self, tool_name: &str) -> bool {
        self.tools.contains_key(tool_name)
    }

    /// §4.8 invocation pipeline: resolve name, RBAC check, invoke with a
    /// timeout, record one `tool_call` audit entry, wrap the result.
    pub async fn call(&self, tool_name: &str, params: serde_json::Value, caller: &str, trace_id: Option<&str>) -> ToolCallResult {
        let Some(registered) = self.tools.get(tool_name) else {
            return ToolCallResult {
                success: false,
                result: None,
                error: Some(format!("unknown tool: {tool_name}")),
                execution_time_ms: 0,
            };
        };

        if !self.rbac.can_use_tool(caller, &registered.spec) {
            return ToolCallResult {
                success: false,
                result: None,
                error: Some("rbac denied".to_string()),
                execution_time_ms: 0,
            };
        }

        let start = std::time::Instant::now();
        let outcome = tokio::time::timeout(DEFAULT_TOOL_TIMEOUT, registered.handler.call(params.clone())).await;
        let execution_time_ms = start.elapsed().as_millis() as u64;

        let (success, result, error, result_status) = match outcome {
            Ok(Ok(value)) => (true, Some(value), None, "success"),
            Ok(Err(e)) => (false, None, Some(e.to_string()), "error"),
            Err(_) => (
                false,
                None,
                Some(format!("timeout after {}s", DEFAULT_TOOL_TIMEOUT.as_secs())),
                "timeout",
            ),
        };

        let mut audit_params = serde_json::json!({
            "tool_name": tool_name,
            "params": params,
            "result_status": result_status,
            "execution_time_ms": execution_time_ms,
        });
        if let Some(msg) = &error {
            audit_params["error_message"] = serde_json::json!(msg);
        }

        let mut entry = AuditEntry::new(
            if success { AuditLevel::Info } else { AuditLevel::Error },
            caller,
            "tool_call",
            audit_params,
            if success { AuditOutcome::Allowed } else { AuditOutcome::Error },
        );
        if let Some(id) = trace_id {
            entry = entry.with_trace(id);
        }
        self.audit.record(entry);

        ToolCallResult {
            success,
            result,
            error,
            execution_time_ms,
        }
    }
}
