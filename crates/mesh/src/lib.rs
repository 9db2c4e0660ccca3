//! Guarded `call`/`broadcast`/`consensus`/`delegate` primitives (§4.7).
//!
//! `call` is the only primitive that talks to RBAC, the cycle detector, the
//! rate limiter, and the circuit breaker directly; `broadcast`, `consensus`,
//! and `delegate` are built on top of it, so every guard still applies to
//! every leg of a fan-out.

use futures_util::future::join_all;
use llmesh_audit::AuditLog;
use llmesh_circuit::CircuitBreakerRegistry;
use llmesh_cycledetect::CycleDetector;
use llmesh_domain::audit_entry::{AuditEntry, AuditLevel, AuditOutcome};
use llmesh_domain::config::{EndpointConfig, MeshConfig};
use llmesh_domain::endpoint::CapabilityTag;
use llmesh_domain::tool::Message;
use llmesh_domain::trace::TraceEvent;
use llmesh_providers::{ChatRequest, ProviderRegistry};
use llmesh_ratelimit::RateLimiter;
use llmesh_rbac::Rbac;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const MESH_SYSTEM_PROMPT: &str = "You are one endpoint in a mesh of cooperating LLMs. \
You were called by another endpoint to help with a task. Answer directly and completely.";

#[derive(Debug, Clone, Serialize)]
pub struct CallResult {
    pub target: String,
    pub success: bool,
    pub response: Option<String>,
    pub actual_target: Option<String>,
    pub fallback_used: Option<String>,
    pub error: Option<String>,
    pub trace_id: String,
}

impl CallResult {
    fn refused(target: &str, trace_id: &str, error: impl Into<String>) -> Self {
        Self {
            target: target.to_string(),
            success: false,
            response: None,
            actual_target: None,
            fallback_used: None,
            error: Some(error.into()),
            trace_id: trace_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BroadcastResult {
    pub targets: Vec<String>,
    pub results: HashMap<String, CallResult>,
    pub success_count: usize,
    pub error_count: usize,
    pub trace_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsensusResult {
    pub question: String,
    pub targets: Vec<String>,
    pub individual_responses: HashMap<String, CallResult>,
    pub consensus: Option<String>,
    pub consensus_success: bool,
    pub success_count: usize,
    pub trace_id: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DelegateResult {
    #[serde(flatten)]
    pub call: CallResult,
    pub task_type: String,
    pub delegated: bool,
}

/// Maps a task type string to the capability tag `best_for_task` matches
/// against. Unrecognized task types fall through to the default lead.
fn capability_tag_for(task_type: &str) -> Option<CapabilityTag> {
    use CapabilityTag::*;
    match task_type.to_lowercase().as_str() {
        "coding" => Some(Coding),
        "research" => Some(Research),
        "review" => Some(Review),
        "vision" => Some(Vision),
        "long_context" => Some(LongContext),
        "fast_response" => Some(FastResponse),
        "reasoning" => Some(Reasoning),
        "multilingual" => Some(Multilingual),
        "german" => Some(German),
        "search" => Some(Search),
        "chat" => Some(Chat),
        "coordinate" => Some(Coordinate),
        _ => None,
    }
}

pub struct Mesh {
    rbac: Arc<Rbac>,
    cycles: Arc<CycleDetector>,
    rates: Arc<RateLimiter>,
    circuits: Arc<CircuitBreakerRegistry>,
    providers: Arc<ProviderRegistry>,
    audit: Arc<AuditLog>,
    endpoints: HashMap<String, EndpointConfig>,
    default_lead: Option<String>,
    default_timeout: Duration,
}

impl Mesh {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &MeshConfig,
        endpoints: &[EndpointConfig],
        rbac: Arc<Rbac>,
        cycles: Arc<CycleDetector>,
        rates: Arc<RateLimiter>,
        circuits: Arc<CircuitBreakerRegistry>,
        providers: Arc<ProviderRegistry>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            rbac,
            cycles,
            rates,
            circuits,
            providers,
            audit,
            endpoints: endpoints.iter().map(|e| (e.id.clone(), e.clone())).collect(),
            default_lead: config.default_lead_endpoint.clone(),
            default_timeout: Duration::from_millis(config.default_timeout_ms),
        }
    }

    fn default_lead_or_gemini(&self) -> String {
        self.default_lead.clone().unwrap_or_else(|| "gemini".to_string())
    }

    /// §4.7 `call`: the canonical single-endpoint invocation. Runs RBAC,
    /// cycle, rate, and circuit guards in order before touching the
    /// network; a denial from any guard returns a structured failure
    /// without recording a circuit outcome or an `llm_call` audit entry.
    pub async fn call(&self, target: &str, prompt: &str, caller: &str, trace_id: Option<String>) -> CallResult {
        let trace_id = trace_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        if !self.rbac.can_call(caller, target) {
            return CallResult::refused(target, &trace_id, format!("RBAC denied: {caller} cannot call {target}"));
        }

        if !self.cycles.add_to_chain(&trace_id, target) {
            let chain = self.cycles.get_chain(&trace_id);
            return CallResult::refused(
                target,
                &trace_id,
                format!("cycle detected: {} -> {target}", chain.join(" -> ")),
            );
        }

        let limit = self.endpoints.get(target).map(|e| e.rate_limit_per_min).unwrap_or(60);
        if !self.rates.admit(target, limit) {
            let wait = self.rates.wait_time(target, limit).as_secs_f32();
            return CallResult::refused(target, &trace_id, format!("rate limit exceeded, wait {wait:.1}s"));
        }

        let mut actual_target = target.to_string();
        let mut fallback_used = None;
        if !self.circuits.is_available(target) {
            match self.circuits.available_fallback(target) {
                Some(fallback) => {
                    TraceEvent::MeshFallback {
                        trace_id: trace_id.clone(),
                        from_endpoint: target.to_string(),
                        to_endpoint: fallback.clone(),
                        reason: "circuit open".to_string(),
                    }
                    .emit();
                    actual_target = fallback.clone();
                    fallback_used = Some(fallback);
                }
                None => {
                    return CallResult::refused(target, &trace_id, format!("circuit open for {target}, no fallback available"));
                }
            }
        }

        let Some(endpoint) = self.endpoints.get(&actual_target) else {
            return CallResult::refused(target, &trace_id, format!("endpoint '{actual_target}' not configured"));
        };
        let Some(provider) = self.providers.get(&actual_target) else {
            return CallResult::refused(target, &trace_id, format!("no provider initialized for '{actual_target}'"));
        };
        let model = endpoint.model.clone();

        let request = ChatRequest {
            messages: vec![Message::system(MESH_SYSTEM_PROMPT), Message::user(prompt.to_string())],
            temperature: Some(0.7),
            max_tokens: Some(2048),
            model: None,
        };

        let start = std::time::Instant::now();
        let outcome = tokio::time::timeout(self.default_timeout, provider.chat(request)).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(response)) => {
                self.circuits.record_success(&actual_target);
                TraceEvent::MeshCall {
                    trace_id: trace_id.clone(),
                    endpoint_id: actual_target.clone(),
                    model,
                    duration_ms,
                    prompt_tokens: response.usage.as_ref().map(|u| u.prompt_tokens),
                    completion_tokens: response.usage.as_ref().map(|u| u.completion_tokens),
                }
                .emit();
                self.audit.record(
                    AuditEntry::new(
                        AuditLevel::Info,
                        caller,
                        "llm_call",
                        serde_json::json!({
                            "target": target,
                            "actual_target": actual_target,
                            "result_status": "success",
                            "execution_time_ms": duration_ms,
                        }),
                        AuditOutcome::Allowed,
                    )
                    .with_trace(trace_id.as_str()),
                );
                self.cycles.pop_from_chain(&trace_id);
                CallResult {
                    target: target.to_string(),
                    success: true,
                    response: Some(response.content),
                    actual_target: Some(actual_target),
                    fallback_used,
                    error: None,
                    trace_id,
                }
            }
            Ok(Err(e)) => self.record_call_failure(target, &actual_target, caller, &trace_id, duration_ms, "error", e.to_string()),
            Err(_) => {
                let message = format!("timeout after {}s", self.default_timeout.as_secs());
                self.record_call_failure(target, &actual_target, caller, &trace_id, duration_ms, "timeout", message)
            }
        }
    }

    fn record_call_failure(
        &self,
        target: &str,
        actual_target: &str,
        caller: &str,
        trace_id: &str,
        duration_ms: u64,
        result_status: &str,
        error_message: String,
    ) -> CallResult {
        self.circuits.record_failure(actual_target);
        self.audit.record(
            AuditEntry::new(
                AuditLevel::Error,
                caller,
                "llm_call",
                serde_json::json!({
                    "target": target,
                    "actual_target": actual_target,
                    "result_status": result_status,
                    "execution_time_ms": duration_ms,
                    "error_message": error_message,
                }),
                AuditOutcome::Error,
            )
            .with_trace(trace_id),
        );
        self.cycles.pop_from_chain(trace_id);
        CallResult::refused(target, trace_id, error_message)
    }

    /// §4.7 `broadcast`: fan out `call` to every target in parallel under
    /// one shared trace id, then report aggregate counts.
    pub async fn broadcast(&self, targets: &[String], prompt: &str, caller: &str, trace_id: Option<String>) -> BroadcastResult {
        let trace_id = trace_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let calls = targets.iter().map(|target| self.call(target, prompt, caller, Some(trace_id.clone())));
        let outcomes = join_all(calls).await;

        let mut results = HashMap::with_capacity(targets.len());
        let mut success_count = 0;
        let mut error_count = 0;
        for (target, result) in targets.iter().zip(outcomes) {
            if result.success {
                success_count += 1;
            } else {
                error_count += 1;
            }
            results.insert(target.clone(), result);
        }

        TraceEvent::MeshBroadcast {
            trace_id: trace_id.clone(),
            endpoint_ids: targets.to_vec(),
            succeeded: success_count,
            failed: error_count,
        }
        .emit();

        BroadcastResult {
            targets: targets.to_vec(),
            results,
            success_count,
            error_count,
            trace_id,
        }
    }

    /// §4.7 `consensus`: broadcast, then ask the default lead endpoint to
    /// analyze agreement across at least two successful responses.
    pub async fn consensus(
        &self,
        targets: &[String],
        question: &str,
        caller: &str,
        weights: Option<HashMap<String, f32>>,
        min_agreement: f32,
        trace_id: Option<String>,
    ) -> ConsensusResult {
        let trace_id = trace_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let broadcast = self.broadcast(targets, question, caller, Some(trace_id.clone())).await;

        let successful: Vec<(&String, &CallResult)> = broadcast.results.iter().filter(|(_, r)| r.success).collect();
        if successful.len() < 2 {
            return ConsensusResult {
                question: question.to_string(),
                targets: targets.to_vec(),
                individual_responses: broadcast.results,
                consensus: None,
                consensus_success: false,
                success_count: broadcast.success_count,
                trace_id,
                error: Some("not enough successful responses for consensus".to_string()),
            };
        }

        let weights = weights.unwrap_or_default();
        let mut responses_text = String::new();
        for (target, result) in &successful {
            let weight = weights.get(*target).copied().unwrap_or(1.0);
            responses_text.push_str(&format!(
                "=== {target} (weight: {weight}) ===\n{}\n\n",
                result.response.as_deref().unwrap_or("no response")
            ));
        }

        let analysis_prompt = format!(
            "Analyze the following responses and find consensus:\n\n\
             QUESTION: {question}\n\n\
             RESPONSES:\n{responses_text}\
             TASK:\n\
             1. AGREEMENT: what do all/most responses agree on?\n\
             2. DIFFERENCES: where do they differ?\n\
             3. RECOMMENDATION: best recommendation based on consensus?\n\
             4. AGREEMENT_SCORE: rate overall agreement from 0.0 to 1.0\n\n\
             Minimum required agreement: {min_agreement}\n\n\
             Format your response as:\n\
             AGREEMENT: ...\n\
             DIFFERENCES: ...\n\
             RECOMMENDATION: ...\n\
             AGREEMENT_SCORE: 0.X"
        );

        let lead = self.default_lead_or_gemini();
        let result = self.call(&lead, &analysis_prompt, caller, Some(trace_id.clone())).await;

        ConsensusResult {
            question: question.to_string(),
            targets: targets.to_vec(),
            error: if result.success { None } else { result.error.clone() },
            consensus: result.response.clone().filter(|_| result.success),
            consensus_success: result.success,
            individual_responses: broadcast.results,
            success_count: broadcast.success_count,
            trace_id,
        }
    }

    /// §4.7 `delegate`: resolve `"auto"` via [`Mesh::best_for_task`], wrap
    /// the prompt as a delegated task, then `call`.
    pub async fn delegate(&self, target: &str, task_type: &str, prompt: &str, caller: &str, trace_id: Option<String>) -> DelegateResult {
        let trace_id = trace_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let resolved = if target.eq_ignore_ascii_case("auto") {
            self.best_for_task(task_type)
        } else {
            target.to_string()
        };

        let delegation_prompt = format!(
            "DELEGATED TASK\nType: {task_type}\nFrom: {caller}\n\nTASK:\n{prompt}\n\nPlease complete this task thoroughly and return your results."
        );

        let call = self.call(&resolved, &delegation_prompt, caller, Some(trace_id)).await;
        DelegateResult {
            call,
            task_type: task_type.to_string(),
            delegated: true,
        }
    }

    /// The first available endpoint whose capability tags include
    /// `task_type`'s tag, falling back to the default lead endpoint.
    pub fn best_for_task(&self, task_type: &str) -> String {
        if let Some(tag) = capability_tag_for(task_type) {
            let mut ids: Vec<&String> = self.endpoints.keys().collect();
            ids.sort();
            for id in ids {
                let endpoint = &self.endpoints[id];
                if endpoint.capability_tags.contains(&tag) && self.circuits.is_available(id) {
                    return id.clone();
                }
            }
        }
        self.default_lead_or_gemini()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use llmesh_domain::config::{AuditConfig, CircuitConfig, EndpointsConfig, ProviderKind, RbacConfig};
    use llmesh_domain::error::Result;
    use llmesh_domain::wire::{LlmCapabilities, ToolSupport};
    use llmesh_providers::{ChatResponse, LlmProvider};
    use std::collections::HashSet;

    struct StubProvider {
        id: String,
        reply: Result<String>,
    }

    #[async_trait]
    impl LlmProvider for StubProvider {
        async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse> {
            match &self.reply {
                Ok(text) => Ok(ChatResponse {
                    content: text.clone(),
                    usage: None,
                    model: self.id.clone(),
                    finish_reason: Some("stop".to_string()),
                }),
                Err(_) => Err(llmesh_domain::error::Error::Provider {
                    endpoint: self.id.clone(),
                    message: "stub failure".to_string(),
                }),
            }
        }
        fn capabilities(&self) -> &LlmCapabilities {
            static CAPS: LlmCapabilities = LlmCapabilities {
                supports_tools: ToolSupport::None,
                supports_streaming: false,
                supports_json_mode: false,
                supports_vision: false,
                context_window_tokens: None,
                max_output_tokens: None,
            };
            &CAPS
        }
        fn provider_id(&self) -> &str {
            &self.id
        }
    }

    fn endpoint(id: &str, model: &str, tags: &[CapabilityTag]) -> EndpointConfig {
        EndpointConfig {
            id: id.to_string(),
            provider: ProviderKind::Anthropic,
            model: model.to_string(),
            role: None,
            capability_tags: tags.iter().copied().collect::<HashSet<_>>(),
            rate_limit_per_min: 60,
            api_key_env: None,
            base_url: None,
        }
    }

    fn mesh_with(endpoints: Vec<EndpointConfig>, providers: HashMap<String, Arc<dyn LlmProvider>>, dir: &std::path::Path) -> Mesh {
        let audit = Arc::new(
            AuditLog::new(&AuditConfig {
                dir: dir.to_path_buf(),
                ring_capacity: 100,
                flush_every: 100,
            })
            .unwrap(),
        );
        let rbac = Arc::new(Rbac::new(RbacConfig::default(), audit.clone()));
        let cycles = Arc::new(CycleDetector::new(10, audit.clone()));
        let rates = Arc::new(RateLimiter::new());
        let circuits = Arc::new(CircuitBreakerRegistry::new(CircuitConfig {
            failure_threshold: 5,
            recovery_timeout_seconds: 60,
            half_open_max_calls: 3,
            overrides: HashMap::new(),
        }));

        let mut registry = ProviderRegistry::from_config(&EndpointsConfig { endpoints: vec![] });
        for (id, provider) in providers {
            registry.insert(id, provider);
        }

        Mesh::new(
            &MeshConfig {
                default_timeout_ms: 5_000,
                max_call_depth: 10,
                default_lead_endpoint: Some("gemini".to_string()),
            },
            &endpoints,
            rbac,
            cycles,
            rates,
            circuits,
            Arc::new(registry),
            audit,
        )
    }

    #[tokio::test]
    async fn call_succeeds_and_returns_response() {
        let dir = tempfile::tempdir().unwrap();
        let providers: HashMap<String, Arc<dyn LlmProvider>> = [(
            "claude".to_string(),
            Arc::new(StubProvider { id: "claude".to_string(), reply: Ok("hi".to_string()) }) as Arc<dyn LlmProvider>,
        )]
        .into_iter()
        .collect();
        let mesh = mesh_with(vec![endpoint("claude", "claude-sonnet-4", &[])], providers, dir.path());

        let result = mesh.call("claude", "hello", "gemini", None).await;
        assert!(result.success);
        assert_eq!(result.response.as_deref(), Some("hi"));
        assert_eq!(result.actual_target.as_deref(), Some("claude"));
    }

    #[tokio::test]
    async fn call_denies_rbac_without_touching_circuit() {
        let dir = tempfile::tempdir().unwrap();
        let mesh = mesh_with(vec![endpoint("claude", "claude-sonnet-4", &[])], HashMap::new(), dir.path());

        // "unknown" caller defaults to Reader, which lacks llm:call.
        let result = mesh.call("claude", "hello", "unknown", None).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("RBAC denied"));
    }

    #[tokio::test]
    async fn cycle_is_refused_on_direct_revisit() {
        let dir = tempfile::tempdir().unwrap();
        let providers: HashMap<String, Arc<dyn LlmProvider>> = [
            ("claude".to_string(), Arc::new(StubProvider { id: "claude".to_string(), reply: Ok("a".to_string()) }) as Arc<dyn LlmProvider>),
        ]
        .into_iter()
        .collect();
        let mesh = mesh_with(vec![endpoint("claude", "claude-sonnet-4", &[])], providers, dir.path());

        let trace_id = "t1".to_string();
        mesh.cycles.add_to_chain(&trace_id, "claude");
        let result = mesh.call("claude", "hello", "gemini", Some(trace_id)).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("cycle detected"));
    }

    #[tokio::test]
    async fn failed_call_records_circuit_failure_and_still_pops_chain() {
        let dir = tempfile::tempdir().unwrap();
        let providers: HashMap<String, Arc<dyn LlmProvider>> = [(
            "claude".to_string(),
            Arc::new(StubProvider { id: "claude".to_string(), reply: Err(llmesh_domain::error::Error::Other("boom".into())) }) as Arc<dyn LlmProvider>,
        )]
        .into_iter()
        .collect();
        let mesh = mesh_with(vec![endpoint("claude", "claude-sonnet-4", &[])], providers, dir.path());

        let result = mesh.call("claude", "hello", "gemini", Some("t2".to_string())).await;
        assert!(!result.success);
        assert_eq!(mesh.cycles.get_chain("t2").len(), 0);
        assert_eq!(mesh.circuits.status("claude").failure_count, 1);
    }

    #[tokio::test]
    async fn broadcast_reports_mixed_success_and_failure() {
        let dir = tempfile::tempdir().unwrap();
        let providers: HashMap<String, Arc<dyn LlmProvider>> = [
            ("claude".to_string(), Arc::new(StubProvider { id: "claude".to_string(), reply: Ok("ok".to_string()) }) as Arc<dyn LlmProvider>),
            ("deepseek".to_string(), Arc::new(StubProvider { id: "deepseek".to_string(), reply: Err(llmesh_domain::error::Error::Other("boom".into())) }) as Arc<dyn LlmProvider>),
        ]
        .into_iter()
        .collect();
        let mesh = mesh_with(
            vec![endpoint("claude", "claude-sonnet-4", &[]), endpoint("deepseek", "deepseek-v3", &[])],
            providers,
            dir.path(),
        );

        let result = mesh
            .broadcast(&["claude".to_string(), "deepseek".to_string()], "hello", "gemini", None)
            .await;
        assert_eq!(result.success_count, 1);
        assert_eq!(result.error_count, 1);
    }

    #[tokio::test]
    async fn consensus_requires_at_least_two_successes() {
        let dir = tempfile::tempdir().unwrap();
        let providers: HashMap<String, Arc<dyn LlmProvider>> = [(
            "claude".to_string(),
            Arc::new(StubProvider { id: "claude".to_string(), reply: Ok("ok".to_string()) }) as Arc<dyn LlmProvider>,
        )]
        .into_iter()
        .collect();
        let mesh = mesh_with(vec![endpoint("claude", "claude-sonnet-4", &[])], providers, dir.path());

        let result = mesh.consensus(&["claude".to_string()], "what next?", "gemini", None, 0.6, None).await;
        assert!(!result.consensus_success);
        assert_eq!(result.error.as_deref(), Some("not enough successful responses for consensus"));
    }

    #[tokio::test]
    async fn delegate_auto_resolves_via_capability_tag() {
        let dir = tempfile::tempdir().unwrap();
        let providers: HashMap<String, Arc<dyn LlmProvider>> = [(
            "deepseek".to_string(),
            Arc::new(StubProvider { id: "deepseek".to_string(), reply: Ok("done".to_string()) }) as Arc<dyn LlmProvider>,
        )]
        .into_iter()
        .collect();
        let mesh = mesh_with(
            vec![endpoint("deepseek", "deepseek-v3", &[CapabilityTag::Coding])],
            providers,
            dir.path(),
        );

        let result = mesh.delegate("auto", "coding", "fix the bug", "gemini", None).await;
        assert!(result.call.success);
        assert_eq!(result.call.actual_target.as_deref(), Some("deepseek"));
        assert!(result.delegated);
    }

    #[test]
    fn best_for_task_falls_back_to_default_lead_when_no_tag_matches() {
        let dir = tempfile::tempdir().unwrap();
        let mesh = mesh_with(vec![endpoint("claude", "claude-sonnet-4", &[])], HashMap::new(), dir.path());
        assert_eq!(mesh.best_for_task("unknown_task"), "gemini");
    }
}
