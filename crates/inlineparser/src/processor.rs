//! Executes parsed `McpCall`s through the tool dispatcher and splices
//! their results back into the source text (§4.9).

use crate::parser::{self, McpCall};
use llmesh_tools::ToolRegistry;

#[derive(Debug, Clone, serde::Serialize)]
pub struct McpResult {
    pub tool_name: String,
    pub success: bool,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

async fn execute_all(tools: &ToolRegistry, calls: &[McpCall], caller: &str, trace_id: Option<&str>) -> Vec<McpResult> {
    let mut results = Vec::with_capacity(calls.len());
    for call in calls {
        let outcome = tools.call(&call.tool_name, call.params.clone(), caller, trace_id).await;
        results.push(McpResult {
            tool_name: call.tool_name.clone(),
            success: outcome.success,
            result: outcome.result,
            error: outcome.error,
            execution_time_ms: outcome.execution_time_ms,
        });
    }
    results
}

/// Replaces each call's `raw_text` with `[MCP_RESULT:name] <json>` on
/// success or `[MCP_ERROR:name] {"error": "..."}` on failure. Applied in
/// reverse line order so an earlier replacement never shifts a later
/// call's position.
fn inject(text: &str, calls: &[McpCall], results: &[McpResult]) -> String {
    let mut pairs: Vec<(&McpCall, &McpResult)> = calls.iter().zip(results.iter()).collect();
    pairs.sort_by(|a, b| b.0.line_number.cmp(&a.0.line_number));

    let mut modified = text.to_string();
    for (call, result) in pairs {
        let replacement = if result.success {
            let result_json = serde_json::to_string_pretty(&result.result).unwrap_or_else(|_| "null".into());
            format!("[MCP_RESULT:{}] {}", call.tool_name, result_json)
        } else {
            let error = result.error.clone().unwrap_or_else(|| "unknown error".into());
            format!("[MCP_ERROR:{}] {}", call.tool_name, serde_json::json!({"error": error}))
        };
        modified = modified.replace(&call.raw_text, &replacement);
    }
    modified
}

/// Single pass: extract every call, execute in order, splice results in.
pub async fn process(tools: &ToolRegistry, text: &str, caller: &str, trace_id: Option<&str>) -> (String, Vec<McpResult>) {
    let calls = parser::parse(text);
    if calls.is_empty() {
        return (text.to_string(), Vec::new());
    }
    let results = execute_all(tools, &calls, caller, trace_id).await;
    let modified = inject(text, &calls, &results);
    (modified, results)
}

/// Re-parses the rewritten text after each pass, since a tool's own
/// output may itself contain `@mcp.call(...)`. Stops when a pass finds
/// nothing new or `max_iterations` is reached.
pub async fn process_iterative(
    tools: &ToolRegistry,
    text: &str,
    caller: &str,
    trace_id: Option<&str>,
    max_iterations: usize,
) -> (String, Vec<McpResult>) {
    let mut current = text.to_string();
    let mut all_results = Vec::new();

    for iteration in 0..max_iterations {
        let calls = parser::parse(&current);
        if calls.is_empty() {
            break;
        }
        tracing::debug!(iteration = iteration + 1, call_count = calls.len(), "inline parser pass");
        let results = execute_all(tools, &calls, caller, trace_id).await;
        current = inject(&current, &calls, &results);
        all_results.extend(results);
    }

    (current, all_results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use llmesh_audit::AuditLog;
    use llmesh_domain::config::{AuditConfig, RbacConfig};
    use llmesh_domain::error::Result;
    use llmesh_domain::rbac::Permission;
    use llmesh_domain::tool::{ToolCategory, ToolSpec};
    use llmesh_rbac::Rbac;
    use llmesh_tools::ToolHandler;
    use std::sync::Arc;

    struct EchoHandler;

    #[async_trait]
    impl ToolHandler for EchoHandler {
        async fn call(&self, params: serde_json::Value) -> Result<serde_json::Value> {
            Ok(params)
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl ToolHandler for FailingHandler {
        async fn call(&self, _params: serde_json::Value) -> Result<serde_json::Value> {
            Err(llmesh_domain::error::Error::Other("boom".into()))
        }
    }

    fn registry_with(names_and_ok: &[(&str, bool)]) -> (ToolRegistry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let audit = Arc::new(
            AuditLog::new(&AuditConfig {
                dir: dir.path().to_path_buf(),
                ring_capacity: 100,
                flush_every: 100,
            })
            .unwrap(),
        );
        let rbac = Arc::new(Rbac::new(RbacConfig::default(), audit.clone()));
        let mut registry = ToolRegistry::new(rbac, audit);
        for (name, ok) in names_and_ok {
            let spec = ToolSpec {
                name: name.to_string(),
                description: String::new(),
                input_schema: serde_json::json!({"type": "object"}),
                required_permission: Permission::HealthCheck,
                category: ToolCategory::Diagnostic,
            };
            if *ok {
                registry.register(spec, Arc::new(EchoHandler));
            } else {
                registry.register(spec, Arc::new(FailingHandler));
            }
        }
        (registry, dir)
    }

    #[tokio::test]
    async fn single_pass_splices_success_result() {
        let (tools, _dir) = registry_with(&[("echo", true)]);
        let text = r#"please run @mcp.call(echo, {"x": 1}) now"#;
        let (modified, results) = process(&tools, text, "gemini", None).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        assert!(modified.contains("[MCP_RESULT:echo]"));
        assert!(!modified.contains("@mcp.call"));
    }

    #[tokio::test]
    async fn single_pass_splices_error_result() {
        let (tools, _dir) = registry_with(&[("echo", false)]);
        let text = r#"@mcp.call(echo, {})"#;
        let (modified, results) = process(&tools, text, "gemini", None).await;
        assert!(!results[0].success);
        assert!(modified.contains("[MCP_ERROR:echo]"));
        assert!(modified.contains("boom"));
    }

    #[tokio::test]
    async fn text_without_calls_is_returned_unchanged() {
        let (tools, _dir) = registry_with(&[]);
        let (modified, results) = process(&tools, "just plain text", "gemini", None).await;
        assert_eq!(modified, "just plain text");
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn multiple_calls_on_separate_lines_all_resolve() {
        let (tools, _dir) = registry_with(&[("echo", true)]);
        let text = "@mcp.call(echo, {\"a\": 1})\n@mcp.call(echo, {\"b\": 2})";
        let (modified, results) = process(&tools, text, "gemini", None).await;
        assert_eq!(results.len(), 2);
        assert_eq!(modified.matches("[MCP_RESULT:echo]").count(), 2);
    }

    #[tokio::test]
    async fn iterative_mode_stops_when_no_calls_remain() {
        let (tools, _dir) = registry_with(&[("echo", true)]);
        let text = r#"@mcp.call(echo, {})"#;
        let (modified, results) = process_iterative(&tools, text, "gemini", None, 5).await;
        assert_eq!(results.len(), 1);
        assert!(!parser::has_calls(&modified));
    }

    struct SelfCallingHandler;

    #[async_trait]
    impl ToolHandler for SelfCallingHandler {
        async fn call(&self, _params: serde_json::Value) -> Result<serde_json::Value> {
            Ok(serde_json::json!({"msg": "@mcp.call(self_call, {})"}))
        }
    }

    #[tokio::test]
    async fn iterative_mode_respects_max_iterations_cap() {
        let dir = tempfile::tempdir().unwrap();
        let audit = Arc::new(
            AuditLog::new(&AuditConfig {
                dir: dir.path().to_path_buf(),
                ring_capacity: 100,
                flush_every: 100,
            })
            .unwrap(),
        );
        let rbac = Arc::new(Rbac::new(RbacConfig::default(), audit.clone()));
        let mut tools = ToolRegistry::new(rbac, audit);
        tools.register(
            ToolSpec {
                name: "self_call".into(),
                description: String::new(),
                input_schema: serde_json::json!({"type": "object"}),
                required_permission: Permission::HealthCheck,
                category: ToolCategory::Diagnostic,
            },
            Arc::new(SelfCallingHandler),
        );

        // Every pass's result contains a fresh @mcp.call, so the loop
        // would run forever without the cap.
        let text = r#"@mcp.call(self_call, {})"#;
        let (_modified, results) = process_iterative(&tools, text, "gemini", None, 3).await;
        assert_eq!(results.len(), 3);
    }
}
