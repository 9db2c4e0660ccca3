mod audit;
mod chain;
mod circuit;
mod endpoints;
mod memory;
mod mesh;
mod observability;
mod queue;
mod rbac;
mod server;

pub use audit::*;
pub use chain::*;
pub use circuit::*;
pub use endpoints::*;
pub use memory::*;
pub use mesh::*;
pub use observability::*;
pub use queue::*;
pub use rbac::*;
pub use server::*;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    #[serde(default)]
    pub rbac: RbacConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub circuit: CircuitConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub mesh: MeshConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues. Returns an
    /// empty vec when everything looks good. `gateway::main` aborts startup
    /// on any `Error`-severity issue.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }
        if self.server.host.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }
        if self.server.cors.allowed_origins.len() == 1 && self.server.cors.allowed_origins[0] == "*" {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard \"*\" allows all origins (not recommended for production)".into(),
            });
        }
        if let Some(rl) = &self.server.rate_limit {
            if rl.requests_per_second == 0 {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: "server.rate_limit.requests_per_second".into(),
                    message: "requests_per_second must be greater than 0".into(),
                });
            }
            if rl.burst_size == 0 {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: "server.rate_limit.burst_size".into(),
                    message: "burst_size must be greater than 0".into(),
                });
            }
        }

        if self.endpoints.endpoints.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "endpoints".into(),
                message: "no endpoints configured".into(),
            });
        }

        let mut seen_ids: HashSet<&str> = HashSet::new();
        for (i, ep) in self.endpoints.endpoints.iter().enumerate() {
            if ep.id.is_empty() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("endpoints[{i}].id"),
                    message: "endpoint id must not be empty".into(),
                });
            }
            if ep.model.is_empty() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("endpoints[{i}].model"),
                    message: "model must not be empty".into(),
                });
            }
            if !ep.id.is_empty() && !seen_ids.insert(&ep.id) {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("endpoints[{i}].id"),
                    message: format!("duplicate endpoint id \"{}\"", ep.id),
                });
            }
            if ep.rate_limit_per_min == 0 {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("endpoints[{i}].rate_limit_per_min"),
                    message: "rate_limit_per_min must be greater than 0".into(),
                });
            }
        }

        if let Some(lead) = &self.mesh.default_lead_endpoint {
            if !seen_ids.contains(lead.as_str()) {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: "mesh.default_lead_endpoint".into(),
                    message: format!("\"{lead}\" does not match any configured endpoint id"),
                });
            }
        }

        if self.mesh.max_call_depth == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "mesh.max_call_depth".into(),
                message: "max_call_depth must be greater than 0".into(),
            });
        }

        if self.chain.max_cycles == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "chain.max_cycles".into(),
                message: "max_cycles must be greater than 0".into(),
            });
        }

        if !(0.0..=1.0).contains(&self.observability.sample_rate) {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "observability.sample_rate".into(),
                message: "sample_rate must be between 0.0 and 1.0".into(),
            });
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            endpoints: EndpointsConfig {
                endpoints: vec![EndpointConfig {
                    id: "claude".into(),
                    provider: ProviderKind::Anthropic,
                    model: "claude-sonnet-4".into(),
                    role: None,
                    capability_tags: Default::default(),
                    rate_limit_per_min: 60,
                    api_key_env: Some("ANTHROPIC_API_KEY".into()),
                    base_url: None,
                }],
            },
            ..Config::default()
        }
    }

    fn find_issue<'a>(issues: &'a [ConfigIssue], field_prefix: &str) -> Option<&'a ConfigIssue> {
        issues.iter().find(|e| e.field.starts_with(field_prefix))
    }

    #[test]
    fn valid_config_has_no_errors() {
        let issues = valid_config().validate();
        let errors: Vec<_> = issues
            .iter()
            .filter(|e| e.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "expected no errors, got: {errors:?}");
    }

    #[test]
    fn no_endpoints_is_warning() {
        let issues = Config::default().validate();
        let issue = find_issue(&issues, "endpoints").expect("expected endpoints warning");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn duplicate_endpoint_ids_is_error() {
        let mut cfg = valid_config();
        let dup = cfg.endpoints.endpoints[0].clone();
        cfg.endpoints.endpoints.push(dup);
        let issues = cfg.validate();
        let issue = find_issue(&issues, "endpoints[1].id").expect("expected duplicate id error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn unknown_default_lead_endpoint_is_error() {
        let mut cfg = valid_config();
        cfg.mesh.default_lead_endpoint = Some("nonexistent".into());
        let issues = cfg.validate();
        find_issue(&issues, "mesh.default_lead_endpoint").expect("expected error");
    }

    #[test]
    fn known_default_lead_endpoint_is_ok() {
        let mut cfg = valid_config();
        cfg.mesh.default_lead_endpoint = Some("claude".into());
        let issues = cfg.validate();
        assert!(find_issue(&issues, "mesh.default_lead_endpoint").is_none());
    }

    #[test]
    fn cors_wildcard_is_warning() {
        let mut cfg = valid_config();
        cfg.server.cors.allowed_origins = vec!["*".into()];
        let issues = cfg.validate();
        let issue = find_issue(&issues, "server.cors.allowed_origins").expect("expected warning");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn zero_max_cycles_is_error() {
        let mut cfg = valid_config();
        cfg.chain.max_cycles = 0;
        let issues = cfg.validate();
        find_issue(&issues, "chain.max_cycles").expect("expected error");
    }

    #[test]
    fn sample_rate_out_of_range_is_error() {
        let mut cfg = valid_config();
        cfg.observability.sample_rate = 1.5;
        let issues = cfg.validate();
        find_issue(&issues, "observability.sample_rate").expect("expected error");
    }
}
