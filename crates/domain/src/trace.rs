use serde::Serialize;

/// Structured trace events emitted across all llmesh crates. Each variant
/// mirrors the fields written to the audit log for the same operation, so a
/// trace line and its audit entry can always be correlated by `trace_id`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    MeshCall {
        trace_id: String,
        endpoint_id: String,
        model: String,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    MeshFallback {
        trace_id: String,
        from_endpoint: String,
        to_endpoint: String,
        reason: String,
    },
    MeshBroadcast {
        trace_id: String,
        endpoint_ids: Vec<String>,
        succeeded: usize,
        failed: usize,
    },
    CircuitTransition {
        endpoint_id: String,
        from_state: String,
        to_state: String,
        reason: String,
    },
    CycleRefused {
        trace_id: String,
        endpoint_id: String,
        depth: u32,
        max_depth: u32,
    },
    RateLimitRejected {
        endpoint_id: String,
        window_count: u32,
        limit: u32,
    },
    RbacDenied {
        caller: String,
        role: String,
        permission: String,
    },
    QueueEnqueue {
        command_id: String,
        priority: String,
        command_type: String,
    },
    QueueDequeue {
        command_id: String,
        assigned_to: String,
        wait_ms: u64,
    },
    ToolInvoked {
        trace_id: String,
        tool_name: String,
        caller: String,
        duration_ms: u64,
        ok: bool,
    },
    ChainCycleCompleted {
        chain_id: String,
        cycle_index: u32,
        next_action: String,
        tokens_used: u64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "llmesh_event");
    }
}
