use crate::rbac::Role;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Role overrides layered over the built-in [`crate::rbac::default_role_for`]
/// table, keyed by endpoint/caller short id.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RbacConfig {
    #[serde(default)]
    pub role_overrides: HashMap<String, Role>,
}

impl RbacConfig {
    pub fn role_for(&self, short_id: &str) -> Role {
        self.role_overrides
            .get(short_id)
            .copied()
            .unwrap_or_else(|| crate::rbac::default_role_for(short_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_wins_over_default() {
        let mut cfg = RbacConfig::default();
        cfg.role_overrides.insert("deepseek".into(), Role::Admin);
        assert_eq!(cfg.role_for("deepseek"), Role::Admin);
    }

    #[test]
    fn falls_back_to_builtin_default() {
        let cfg = RbacConfig::default();
        assert_eq!(cfg.role_for("qwen-coder"), Role::Worker);
    }
}
