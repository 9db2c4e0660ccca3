//! RBAC data model: the permission enumeration, the role enumeration, and
//! the fixed role→permission table. Operations live in `llmesh-rbac`; this
//! module only carries the shapes and defaults every crate needs to agree
//! on (§4.1).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    MemoryRead,
    MemoryWrite,
    MemoryDelete,
    MemoryAdmin,
    CodeExec,
    CodeLint,
    DepsInstall,
    TestsRun,
    GitRead,
    GitWrite,
    GitBranch,
    FileRead,
    FileWrite,
    FileDelete,
    LlmCall,
    LlmBroadcast,
    LlmConsensus,
    AuditRead,
    AuditWrite,
    HealthCheck,
    AdminFull,
}

impl Permission {
    pub const ALL: &'static [Permission] = &[
        Permission::MemoryRead,
        Permission::MemoryWrite,
        Permission::MemoryDelete,
        Permission::MemoryAdmin,
        Permission::CodeExec,
        Permission::CodeLint,
        Permission::DepsInstall,
        Permission::TestsRun,
        Permission::GitRead,
        Permission::GitWrite,
        Permission::GitBranch,
        Permission::FileRead,
        Permission::FileWrite,
        Permission::FileDelete,
        Permission::LlmCall,
        Permission::LlmBroadcast,
        Permission::LlmConsensus,
        Permission::AuditRead,
        Permission::AuditWrite,
        Permission::HealthCheck,
        Permission::AdminFull,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MemoryRead => "memory:read",
            Self::MemoryWrite => "memory:write",
            Self::MemoryDelete => "memory:delete",
            Self::MemoryAdmin => "memory:admin",
            Self::CodeExec => "code:exec",
            Self::CodeLint => "code:lint",
            Self::DepsInstall => "deps:install",
            Self::TestsRun => "tests:run",
            Self::GitRead => "git:read",
            Self::GitWrite => "git:write",
            Self::GitBranch => "git:branch",
            Self::FileRead => "file:read",
            Self::FileWrite => "file:write",
            Self::FileDelete => "file:delete",
            Self::LlmCall => "llm:call",
            Self::LlmBroadcast => "llm:broadcast",
            Self::LlmConsensus => "llm:consensus",
            Self::AuditRead => "audit:read",
            Self::AuditWrite => "audit:write",
            Self::HealthCheck => "health:check",
            Self::AdminFull => "admin:full",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Lead,
    Worker,
    Reviewer,
    Reader,
}

impl Role {
    /// The fixed permission subset for this role (§4.1). `Admin` carries
    /// `admin:full` only — callers must treat it as a short-circuit, not
    /// enumerate every other permission alongside it.
    pub fn permissions(self) -> HashSet<Permission> {
        match self {
            Role::Admin => [Permission::AdminFull].into_iter().collect(),
            Role::Lead => [
                Permission::MemoryRead,
                Permission::MemoryWrite,
                Permission::FileRead,
                Permission::GitRead,
                Permission::LlmCall,
                Permission::LlmBroadcast,
                Permission::LlmConsensus,
                Permission::AuditRead,
                Permission::AuditWrite,
                Permission::HealthCheck,
            ]
            .into_iter()
            .collect(),
            Role::Worker => [
                Permission::MemoryRead,
                Permission::MemoryWrite,
                Permission::CodeExec,
                Permission::CodeLint,
                Permission::DepsInstall,
                Permission::TestsRun,
                Permission::FileRead,
                Permission::FileWrite,
                Permission::GitRead,
                Permission::GitWrite,
                Permission::GitBranch,
                Permission::LlmCall,
                Permission::HealthCheck,
            ]
            .into_iter()
            .collect(),
            Role::Reviewer => [
                Permission::MemoryRead,
                Permission::CodeLint,
                Permission::FileRead,
                Permission::GitRead,
                Permission::LlmCall,
                Permission::AuditRead,
                Permission::HealthCheck,
            ]
            .into_iter()
            .collect(),
            Role::Reader => [
                Permission::MemoryRead,
                Permission::FileRead,
                Permission::GitRead,
                Permission::HealthCheck,
            ]
            .into_iter()
            .collect(),
        }
    }
}

/// Built-in default role for known endpoint/caller short ids, overridable
/// per deployment via `config.rbac.role_overrides` (SPEC_FULL §B.1).
pub fn default_role_for(short_id: &str) -> Role {
    match short_id {
        "system" | "orchestrator_kernel" => Role::Admin,
        "gemini" | "kimi" => Role::Lead,
        "deepseek" | "qwen-coder" | "claude" | "codex" => Role::Worker,
        "cogito" | "mistral" => Role::Reviewer,
        "nova" => Role::Admin,
        _ => Role::Reader,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_permissions_is_just_admin_full() {
        assert_eq!(Role::Admin.permissions(), [Permission::AdminFull].into());
    }

    #[test]
    fn lead_can_call_but_not_exec_code() {
        let perms = Role::Lead.permissions();
        assert!(perms.contains(&Permission::LlmCall));
        assert!(!perms.contains(&Permission::CodeExec));
    }

    #[test]
    fn reader_is_minimal() {
        let perms = Role::Reader.permissions();
        assert!(!perms.contains(&Permission::LlmCall));
        assert!(perms.contains(&Permission::HealthCheck));
    }

    #[test]
    fn permission_as_str_matches_colon_convention() {
        assert_eq!(Permission::MemoryRead.as_str(), "memory:read");
        assert_eq!(Permission::AdminFull.as_str(), "admin:full");
    }
}
