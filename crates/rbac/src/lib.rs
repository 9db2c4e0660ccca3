//! RBAC operations: `role_of`, `can_use_tool`, `can_call`, with
//! audit-on-deny (§4.1). The permission/role data model itself lives in
//! `llmesh_domain::rbac`; this crate only adds the operations that branch
//! on it.

use llmesh_audit::AuditLog;
use llmesh_domain::audit_entry::{AuditEntry, AuditLevel, AuditOutcome};
use llmesh_domain::config::RbacConfig;
use llmesh_domain::rbac::{Permission, Role};
use llmesh_domain::tool::ToolSpec;
use llmesh_domain::trace::TraceEvent;
use std::collections::HashSet;
use std::sync::Arc;

pub struct Rbac {
    config: RbacConfig,
    audit: Arc<AuditLog>,
}

impl Rbac {
    pub fn new(config: RbacConfig, audit: Arc<AuditLog>) -> Self {
        Self { config, audit }
    }

    /// The role assigned to a caller/endpoint short id — an override if
    /// configured, else the built-in default.
    pub fn role_of(&self, caller_id: &str) -> Role {
        self.config.role_for(caller_id)
    }

    pub fn permissions(&self, role: Role) -> HashSet<Permission> {
        role.permissions()
    }

    /// Whether `caller` holds `permission`, either directly or via
    /// `admin:full` short-circuiting every check.
    pub fn has_permission(&self, caller: &str, permission: Permission) -> bool {
        let perms = self.role_of(caller).permissions();
        perms.contains(&Permission::AdminFull) || perms.contains(&permission)
    }

    /// §4.1 `can_use_tool`: does `caller` hold the permission `tool`
    /// requires? Emits `security/rbac_denied` on refusal.
    pub fn can_use_tool(&self, caller: &str, tool: &ToolSpec) -> bool {
        let allowed = self.has_permission(caller, tool.required_permission);
        if !allowed {
            self.deny(caller, &format!("tool:{}", tool.name), tool.required_permission);
        }
        allowed
    }

    /// §4.1 `can_call`: does `caller` hold `llm:call` (or admin) to reach
    /// `target`? Emits `security/rbac_denied` on refusal.
    pub fn can_call(&self, caller: &str, target: &str) -> bool {
        let allowed = self.has_permission(caller, Permission::LlmCall);
        if !allowed {
            self.deny(caller, &format!("call:{target}"), Permission::LlmCall);
        }
        allowed
    }

    fn deny(&self, caller: &str, action: &str, permission: Permission) {
        let role = self.role_of(caller);
        TraceEvent::RbacDenied {
            caller: caller.to_string(),
            role: format!("{role:?}"),
            permission: permission.as_str().to_string(),
        }
        .emit();
        self.audit.record(AuditEntry::new(
            AuditLevel::Security,
            caller,
            "security/rbac_denied",
            serde_json::json!({"action": action, "permission": permission.as_str(), "role": format!("{role:?}")}),
            AuditOutcome::Denied,
        ));
    }
}
