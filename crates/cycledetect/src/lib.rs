//! Per-trace call-chain tracking to refuse `A -> B -> A` cycles and runaway
//! depth (§4.5), grounded on `circuit_breaker.py`'s `CycleDetector`.

use llmesh_audit::AuditLog;
use llmesh_domain::audit_entry::{AuditEntry, AuditLevel, AuditOutcome};
use llmesh_domain::trace::TraceEvent;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub struct CycleDetector {
    chains: Mutex<HashMap<String, Vec<String>>>,
    audit: Arc<AuditLog>,
    max_depth: u32,
}

impl CycleDetector {
    pub fn new(max_depth: u32, audit: Arc<AuditLog>) -> Self {
        Self {
            chains: Mutex::new(HashMap::new()),
            audit,
            max_depth,
        }
    }

    /// Begin tracking a trace's call chain with its first hop.
    pub fn start_chain(&self, trace_id: &str, endpoint_id: &str) -> bool {
        self.add_to_chain(trace_id, endpoint_id)
    }

    /// Append `endpoint_id` to the chain for `trace_id`. Refused (and
    /// audited) if the endpoint already appears in the chain or the chain
    /// has reached `max_depth`.
    pub fn add_to_chain(&self, trace_id: &str, endpoint_id: &str) -> bool {
        let mut chains = self.chains.lock();
        let chain = chains.entry(trace_id.to_string()).or_default();

        if chain.iter().any(|hop| hop == endpoint_id) {
            let depth = chain.len() as u32;
            self.refuse(trace_id, endpoint_id, chain, depth, "endpoint already in chain");
            return false;
        }
        if chain.len() as u32 >= self.max_depth {
            let depth = chain.len() as u32;
            self.refuse(trace_id, endpoint_id, chain, depth, "max depth reached");
            return false;
        }

        chain.push(endpoint_id.to_string());
        true
    }

    fn refuse(&self, trace_id: &str, endpoint_id: &str, chain: &[String], depth: u32, reason: &str) {
        TraceEvent::CycleRefused {
            trace_id: trace_id.to_string(),
            endpoint_id: endpoint_id.to_string(),
            depth,
            max_depth: self.max_depth,
        }
        .emit();
        self.audit.record(
            AuditEntry::new(
                AuditLevel::Security,
                endpoint_id,
                "security/cycle_detected",
                serde_json::json!({"reason": reason, "chain": chain, "attempted": endpoint_id}),
                AuditOutcome::Denied,
            )
            .with_trace(trace_id),
        );
    }

    /// Remove the last hop from the chain, e.g. when a delegated call
    /// returns and its leg no longer counts toward depth.
    pub fn pop_from_chain(&self, trace_id: &str) -> Option<String> {
        self.chains.lock().get_mut(trace_id).and_then(|chain| chain.pop())
    }

    /// Drop the chain entirely once the originating trace completes.
    pub fn end_chain(&self, trace_id: &str) {
        self.chains.lock().remove(trace_id);
    }

    pub fn get_chain(&self, trace_id: &str) -> Vec<String> {
        self.chains.lock().get(trace_id).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmesh_domain::config::AuditConfig;

    fn detector(max_depth: u32) -> (CycleDetector, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let audit = Arc::new(
            AuditLog::new(&AuditConfig {
                dir: dir.path().to_path_buf(),
                ring_capacity: 100,
                flush_every: 100,
            })
            .unwrap(),
        );
        (CycleDetector::new(max_depth, audit), dir)
    }

    #[test]
    fn fresh_chain_admits_first_hop() {
        let (det, _d) = detector(5);
        assert!(det.start_chain("t1", "claude"));
        assert_eq!(det.get_chain("t1"), vec!["claude".to_string()]);
    }

    #[test]
    fn direct_revisit_is_refused() {
        let (det, _d) = detector(5);
        det.start_chain("t1", "claude");
        det.add_to_chain("t1", "deepseek");
        assert!(!det.add_to_chain("t1", "claude"));
        assert_eq!(det.get_chain("t1"), vec!["claude".to_string(), "deepseek".to_string()]);
    }

    #[test]
    fn refusal_is_audited_with_full_chain() {
        let (det, _d) = detector(5);
        det.start_chain("t1", "claude");
        det.add_to_chain("t1", "claude");
        let entries = det.audit.security_only();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "security/cycle_detected");
        assert_eq!(entries[0].params["chain"], serde_json::json!(["claude"]));
    }

    #[test]
    fn max_depth_refuses_further_hops() {
        let (det, _d) = detector(2);
        assert!(det.add_to_chain("t1", "a"));
        assert!(det.add_to_chain("t1", "b"));
        assert!(!det.add_to_chain("t1", "c"));
    }

    #[test]
    fn pop_and_end_chain_clear_state() {
        let (det, _d) = detector(5);
        det.add_to_chain("t1", "a");
        det.add_to_chain("t1", "b");
        assert_eq!(det.pop_from_chain("t1"), Some("b".to_string()));
        assert_eq!(det.get_chain("t1"), vec!["a".to_string()]);
        det.end_chain("t1");
        assert!(det.get_chain("t1").is_empty());
    }
}
