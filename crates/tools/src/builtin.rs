//! A small built-in tool set seeded into every gateway's registry at
//! startup. `memory.*` tools are added separately once a memory store is
//! wired in — this module only covers tools with no other dependency.

use crate::registry::{ToolHandler, ToolRegistry};
use async_trait::async_trait;
use llmesh_domain::error::Result;
use llmesh_domain::rbac::Permission;
use llmesh_domain::tool::{ToolCategory, ToolSpec};
use std::sync::Arc;

struct HealthCheckTool;

#[async_trait]
impl ToolHandler for HealthCheckTool {
    async fn call(&self, _params: serde_json::Value) -> Result<serde_json::Value> {
        Ok(serde_json::json!({"status": "ok"}))
    }
}

struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    async fn call(&self, params: serde_json::Value) -> Result<serde_json::Value> {
        Ok(params)
    }
}

pub fn register_builtin_tools(registry: &mut ToolRegistry) {
    registry.register(
        ToolSpec {
            name: "health.check".into(),
            description: "Report that the gateway process is responsive.".into(),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
            required_permission: Permission::HealthCheck,
            category: ToolCategory::Health,
        },
        Arc::new(HealthCheckTool),
    );

    registry.register(
        ToolSpec {
            name: "echo".into(),
            description: "Return the given params unchanged. Useful for verifying the tool pipeline end to end.".into(),
            input_schema: serde_json::json!({"type": "object"}),
            required_permission: Permission::HealthCheck,
            category: ToolCategory::Diagnostic,
        },
        Arc::new(EchoTool),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmesh_audit::AuditLog;
    use llmesh_domain::config::{AuditConfig, RbacConfig};
    use llmesh_rbac::Rbac;

    #[tokio::test]
    async fn health_check_reports_ok() {
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
        register_builtin_tools(&mut registry);

        let result = registry.call("health.check", serde_json::json!({}), "gemini", None).await;
        assert!(result.success);
        assert_eq!(result.result, Some(serde_json::json!({"status": "ok"})));
    }

    #[tokio::test]
    async fn echo_returns_params_verbatim() {
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
        register_builtin_tools(&mut registry);

        let result = registry.call("echo", serde_json::json!({"a": "b"}), "gemini", None).await;
        assert!(result.success);
        assert_eq!(result.result, Some(serde_json::json!({"a": "b"})));
    }
}
