use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    Info,
    Security,
    Error,
}

/// A single audit log entry (§4.2). `params` has already been sanitized
/// (secret-bearing keys redacted, long values truncated) by the time it
/// reaches this struct — `llmesh-audit` owns that transform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: AuditLevel,
    pub trace_id: Option<String>,
    pub caller: String,
    pub action: String,
    pub params: serde_json::Value,
    pub outcome: AuditOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Allowed,
    Denied,
    Error,
}

impl AuditEntry {
    pub fn new(
        level: AuditLevel,
        caller: impl Into<String>,
        action: impl Into<String>,
        params: serde_json::Value,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            id: format!("audit_{}", Uuid::new_v4().simple()),
            timestamp: Utc::now(),
            level,
            trace_id: None,
            caller: caller.into(),
            action: action.into(),
            params,
            outcome,
        }
    }

    pub fn with_trace(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entry_carries_given_fields() {
        let entry = AuditEntry::new(
            AuditLevel::Security,
            "claude",
            "rbac.denied",
            serde_json::json!({"permission": "code:exec"}),
            AuditOutcome::Denied,
        )
        .with_trace("trace-1");
        assert_eq!(entry.caller, "claude");
        assert_eq!(entry.trace_id.as_deref(), Some("trace-1"));
        assert!(entry.id.starts_with("audit_"));
    }
}
