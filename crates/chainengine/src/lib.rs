//! Chain Engine (§4.12): drives §4.11 cycle execution for up to
//! `max_cycles`, persisting a workspace per chain and exposing
//! start/cancel/pause/resume/status/list/logs.

use chrono::Utc;
use llmesh_cycleengine::CycleEngine;
use llmesh_domain::chain::{Chain, ChainStatus, Cycle, CycleNextAction};
use llmesh_domain::config::{AutopromptConfig, ChainConfig};
use llmesh_domain::error::{Error, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

const ORCHESTRATOR_CALLER: &str = "orchestrator_kernel";

/// Bookkeeping kept alongside a chain's public [`Chain`] record so a
/// paused run can be resumed without re-deriving its workspace path or
/// autoprompt resolution.
struct RunMeta {
    chain_dir: PathBuf,
    lead: String,
    trace_id: Option<String>,
}

struct Inner {
    chains: HashMap<String, Chain>,
    meta: HashMap<String, RunMeta>,
}

#[derive(Serialize)]
struct ConfigSnapshot<'a> {
    chain_id: &'a str,
    project_id: &'a str,
    user_prompt: &'a str,
    max_cycles: u32,
    autoprompt_profile: Option<&'a str>,
    autoprompt_override: Option<&'a str>,
    trace_id: Option<&'a str>,
    started_at: chrono::DateTime<Utc>,
    workspace: String,
}

pub struct ChainEngine {
    cycle_engine: Arc<CycleEngine>,
    inner: Mutex<Inner>,
    workspace_root: PathBuf,
    default_max_cycles: u32,
    autoprompt: AutopromptConfig,
    default_lead: String,
}

impl ChainEngine {
    pub fn new(cycle_engine: Arc<CycleEngine>, config: &ChainConfig, default_lead: impl Into<String>) -> Self {
        Self {
            cycle_engine,
            inner: Mutex::new(Inner { chains: HashMap::new(), meta: HashMap::new() }),
            workspace_root: config.workspace_root.clone(),
            default_max_cycles: config.max_cycles,
            autoprompt: config.autoprompt.clone(),
            default_lead: default_lead.into(),
        }
    }

    /// Allocates a chain, snapshots its config to its workspace, registers
    /// it RUNNING, and spawns the cycle loop in the background (§4.12).
    pub fn start_chain(
        self: &Arc<Self>,
        user_prompt: &str,
        project_id: Option<String>,
        max_cycles: Option<u32>,
        autoprompt_profile: Option<String>,
        autoprompt_override: Option<String>,
        trace_id: Option<String>,
    ) -> Result<Chain> {
        let chain_id = format!("chain_{}", uuid::Uuid::new_v4().simple());
        let project_id = project_id.unwrap_or_else(|| format!("proj_{}", uuid::Uuid::new_v4().simple()));
        let max_cycles = max_cycles.unwrap_or(self.default_max_cycles);

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let chain_dir = self.workspace_root.join(&project_id).join("chains").join(timestamp.to_string());
        std::fs::create_dir_all(&chain_dir).map_err(Error::Io)?;

        let mut chain = Chain::new(chain_id.clone(), project_id.clone(), user_prompt, max_cycles);
        chain.status = ChainStatus::Running;
        chain.autoprompt_profile = autoprompt_profile.clone();

        let snapshot = ConfigSnapshot {
            chain_id: &chain_id,
            project_id: &project_id,
            user_prompt,
            max_cycles,
            autoprompt_profile: autoprompt_profile.as_deref(),
            autoprompt_override: autoprompt_override.as_deref(),
            trace_id: trace_id.as_deref(),
            started_at: chain.started_at,
            workspace: chain_dir.display().to_string(),
        };
        std::fs::write(chain_dir.join("config.json"), serde_json::to_string_pretty(&snapshot).map_err(Error::Json)?)
            .map_err(Error::Io)?;

        let resolved = self.autoprompt.resolve(autoprompt_profile.as_deref(), Some(&project_id), autoprompt_override.as_deref());

        {
            let mut inner = self.inner.lock();
            inner.chains.insert(chain_id.clone(), chain.clone());
            inner.meta.insert(
                chain_id.clone(),
                RunMeta { chain_dir: chain_dir.clone(), lead: self.default_lead.clone(), trace_id: trace_id.clone() },
            );
        }

        tracing::info!(chain_id = %chain_id, project_id = %project_id, "started chain");

        let engine = Arc::clone(self);
        let start_context = user_prompt.to_string();
        tokio::spawn(async move {
            engine.run_loop(chain_id, start_context, resolved, 1).await;
        });

        Ok(chain)
    }

    /// Runs cycles `from_cycle..=max_cycles`, observing the status flag at
    /// each boundary so a concurrent cancel/pause stops the loop cleanly.
    async fn run_loop(self: Arc<Self>, chain_id: String, mut context: String, autoprompt: llmesh_domain::config::AutopromptProfile, from_cycle: u32) {
        let (lead, trace_id, max_cycles) = {
            let inner = self.inner.lock();
            let Some(meta) = inner.meta.get(&chain_id) else { return };
            let Some(chain) = inner.chains.get(&chain_id) else { return };
            (meta.lead.clone(), meta.trace_id.clone(), chain.max_cycles)
        };

        let mut last_consolidation: Option<String> = None;

        for cycle_number in from_cycle..=max_cycles {
            if !self.still_running(&chain_id) {
                return;
            }

            let cycle = self
                .cycle_engine
                .execute_cycle(&context, &autoprompt, &lead, cycle_number, ORCHESTRATOR_CALLER, trace_id.clone())
                .await;

            self.persist_cycle(&chain_id, &cycle);
            last_consolidation = cycle.consolidation.clone();

            let next_action = cycle.next_action;
            let consolidation = cycle.consolidation.clone();

            {
                let mut inner = self.inner.lock();
                if let Some(chain) = inner.chains.get_mut(&chain_id) {
                    chain.current_cycle = cycle_number;
                    chain.total_tokens += cycle.tokens_used;
                    chain.cycles.push(cycle);
                }
            }

            match next_action {
                CycleNextAction::Done => {
                    self.finish(&chain_id, ChainStatus::Completed, consolidation, None);
                    return;
                }
                CycleNextAction::Error => {
                    let error = consolidation.unwrap_or_else(|| "cycle failed".to_string());
                    self.finish(&chain_id, ChainStatus::Failed, None, Some(error));
                    return;
                }
                CycleNextAction::Continue => {
                    context = consolidation.unwrap_or(context);
                }
            }
        }

        self.finish(&chain_id, ChainStatus::Completed, last_consolidation, None);
    }

    fn still_running(&self, chain_id: &str) -> bool {
        self.inner.lock().chains.get(chain_id).map(|c| c.status == ChainStatus::Running).unwrap_or(false)
    }

    fn persist_cycle(&self, chain_id: &str, cycle: &Cycle) {
        let Some(chain_dir) = self.inner.lock().meta.get(chain_id).map(|m| m.chain_dir.clone()) else { return };
        let path = chain_dir.join(format!("cycle_{:03}.json", cycle.cycle_number));
        match serde_json::to_string_pretty(cycle) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    tracing::warn!(chain_id, error = %e, "failed to persist cycle");
                }
            }
            Err(e) => tracing::warn!(chain_id, error = %e, "failed to serialize cycle"),
        }
    }

    fn finish(&self, chain_id: &str, status: ChainStatus, final_output: Option<String>, error: Option<String>) {
        let (chain_dir, chain) = {
            let mut inner = self.inner.lock();
            let chain_dir = inner.meta.get(chain_id).map(|m| m.chain_dir.clone());
            let Some(chain) = inner.chains.get_mut(chain_id) else { return };
            chain.status = status;
            chain.completed_at = Some(Utc::now());
            chain.final_output = final_output;
            chain.error = error;
            (chain_dir, chain.clone())
        };
        tracing::info!(chain_id, status = ?status, "chain finished");
        if let Some(dir) = chain_dir {
            match serde_json::to_string_pretty(&chain) {
                Ok(json) => {
                    if let Err(e) = std::fs::write(dir.join("result.json"), json) {
                        tracing::warn!(chain_id, error = %e, "failed to persist chain result");
                    }
                }
                Err(e) => tracing::warn!(chain_id, error = %e, "failed to serialize chain result"),
            }
        }
    }

    pub fn status(&self, chain_id: &str) -> Option<Chain> {
        self.inner.lock().chains.get(chain_id).cloned()
    }

    pub fn list_chains(&self, project_id: Option<&str>, status: Option<ChainStatus>) -> Vec<Chain> {
        self.inner
            .lock()
            .chains
            .values()
            .filter(|c| project_id.map_or(true, |p| c.project_id == p))
            .filter(|c| status.map_or(true, |s| c.status == s))
            .cloned()
            .collect()
    }

    pub fn logs(&self, chain_id: &str, cycle_number: Option<u32>) -> Vec<Cycle> {
        let Some(chain) = self.inner.lock().chains.get(chain_id).cloned() else { return Vec::new() };
        match cycle_number {
            Some(n) => chain.cycles.into_iter().filter(|c| c.cycle_number == n).collect(),
            None => chain.cycles,
        }
    }

    /// Flips a running chain to CANCELLED; a past-terminal chain is left
    /// untouched and `false` is returned (§4.12).
    pub fn cancel_chain(&self, chain_id: &str) -> bool {
        let mut inner = self.inner.lock();
        let Some(chain) = inner.chains.get_mut(chain_id) else { return false };
        if chain.is_terminal() {
            return false;
        }
        chain.status = ChainStatus::Cancelled;
        chain.completed_at = Some(Utc::now());
        true
    }

    pub fn pause_chain(&self, chain_id: &str) -> bool {
        let mut inner = self.inner.lock();
        let Some(chain) = inner.chains.get_mut(chain_id) else { return false };
        if chain.status != ChainStatus::Running {
            return false;
        }
        chain.status = ChainStatus::Paused;
        true
    }

    /// Flips a PAUSED chain back to RUNNING and respawns the cycle loop
    /// from the cycle after the last persisted one, using that cycle's
    /// consolidation as the resumed context.
    pub fn resume_chain(self: &Arc<Self>, chain_id: &str) -> bool {
        let (next_cycle, context) = {
            let mut inner = self.inner.lock();
            let Some(chain) = inner.chains.get_mut(chain_id) else { return false };
            if chain.status != ChainStatus::Paused {
                return false;
            }
            chain.status = ChainStatus::Running;
            let context = chain.cycles.last().and_then(|c| c.consolidation.clone()).unwrap_or_else(|| chain.user_prompt.clone());
            (chain.current_cycle + 1, context)
        };

        let autoprompt = {
            let inner = self.inner.lock();
            let project_id = inner.chains.get(chain_id).map(|c| c.project_id.clone());
            let profile = inner.chains.get(chain_id).and_then(|c| c.autoprompt_profile.clone());
            drop(inner);
            self.autoprompt.resolve(profile.as_deref(), project_id.as_deref(), None)
        };

        let engine = Arc::clone(self);
        let chain_id = chain_id.to_string();
        tokio::spawn(async move {
            engine.run_loop(chain_id, context, autoprompt, next_cycle).await;
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use llmesh_audit::AuditLog;
    use llmesh_circuit::CircuitBreakerRegistry;
    use llmesh_cycledetect::CycleDetector;
    use llmesh_domain::config::{AuditConfig, CircuitConfig, EndpointConfig, EndpointsConfig, MeshConfig, ProviderKind, RbacConfig};
    use llmesh_domain::error::Result as DomainResult;
    use llmesh_domain::wire::{LlmCapabilities, ToolSupport};
    use llmesh_mesh::Mesh;
    use llmesh_providers::{ChatRequest, ChatResponse, LlmProvider, ProviderRegistry};
    use llmesh_rbac::Rbac;
    use llmesh_ratelimit::RateLimiter;
    use std::collections::{HashMap as StdHashMap, HashSet, VecDeque};
    use std::time::Duration;

    struct ScriptedProvider {
        id: String,
        replies: std::sync::Mutex<VecDeque<String>>,
    }

    impl ScriptedProvider {
        fn new(id: &str, replies: &[&str]) -> Self {
            Self { id: id.to_string(), replies: std::sync::Mutex::new(replies.iter().map(|s| s.to_string()).collect()) }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn chat(&self, _req: ChatRequest) -> DomainResult<ChatResponse> {
            let mut replies = self.replies.lock().unwrap();
            let content = replies.pop_front().unwrap_or_else(|| "[CHAIN_DONE]".to_string());
            Ok(ChatResponse { content, usage: None, model: self.id.clone(), finish_reason: Some("stop".to_string()) })
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

    fn test_engine(dir: &std::path::Path, replies: &[&str]) -> Arc<ChainEngine> {
        let audit = Arc::new(AuditLog::new(&AuditConfig { dir: dir.to_path_buf(), ring_capacity: 100, flush_every: 100 }).unwrap());
        let rbac = Arc::new(Rbac::new(RbacConfig::default(), audit.clone()));
        let cycles = Arc::new(CycleDetector::new(10, audit.clone()));
        let rates = Arc::new(RateLimiter::new());
        let circuits = Arc::new(CircuitBreakerRegistry::new(CircuitConfig {
            failure_threshold: 5,
            recovery_timeout_seconds: 60,
            half_open_max_calls: 3,
            overrides: StdHashMap::new(),
        }));
        let mut registry = ProviderRegistry::from_config(&EndpointsConfig { endpoints: vec![] });
        registry.insert("gemini".to_string(), Arc::new(ScriptedProvider::new("gemini", replies)) as Arc<dyn LlmProvider>);

        let endpoint = EndpointConfig {
            id: "gemini".to_string(),
            provider: ProviderKind::Google,
            model: "gemini-model".to_string(),
            role: None,
            capability_tags: HashSet::new(),
            rate_limit_per_min: 60,
            api_key_env: None,
            base_url: None,
        };
        let mesh = Mesh::new(
            &MeshConfig { default_timeout_ms: 5_000, max_call_depth: 10, default_lead_endpoint: Some("gemini".to_string()) },
            &[endpoint],
            rbac,
            cycles,
            rates,
            circuits,
            Arc::new(registry),
            audit,
        );
        let cycle_engine = Arc::new(CycleEngine::new(Arc::new(mesh), 4));
        let chain_config = ChainConfig { max_cycles: 10, workspace_root: dir.join("chains"), autoprompt: AutopromptConfig::default() };
        Arc::new(ChainEngine::new(cycle_engine, &chain_config, "gemini"))
    }

    #[tokio::test]
    async fn start_chain_completes_on_first_chain_done() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(dir.path(), &["summary [CHAIN_DONE]"]);

        let chain = engine.start_chain("do the thing", None, None, None, None, None).unwrap();
        assert_eq!(chain.status, ChainStatus::Running);
        let chain_id = chain.chain_id.clone();

        tokio::time::sleep(Duration::from_millis(100)).await;

        let status = engine.status(&chain_id).unwrap();
        assert_eq!(status.status, ChainStatus::Completed);
        assert_eq!(status.final_output.as_deref(), Some("summary [CHAIN_DONE]"));
        assert_eq!(status.cycles.len(), 1);

        let logs = engine.logs(&chain_id, None);
        assert_eq!(logs.len(), 1);
    }

    #[tokio::test]
    async fn cancel_on_running_chain_marks_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        // Never emits [CHAIN_DONE] so the loop would otherwise run to max_cycles.
        let engine = test_engine(dir.path(), &["still working [CHAIN_CONTINUE]"]);

        let chain = engine.start_chain("long task", None, Some(1), None, None, None).unwrap();
        let cancelled = engine.cancel_chain(&chain.chain_id);
        assert!(cancelled);

        let status = engine.status(&chain.chain_id).unwrap();
        assert_eq!(status.status, ChainStatus::Cancelled);

        // A chain already in a terminal state cannot be cancelled again.
        assert!(!engine.cancel_chain(&chain.chain_id));
    }

    #[tokio::test]
    async fn pause_then_resume_continues_from_next_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(dir.path(), &["partial [CHAIN_CONTINUE]", "finished [CHAIN_DONE]"]);

        let chain = engine.start_chain("multi-step task", None, Some(5), None, None, None).unwrap();
        assert!(engine.pause_chain(&chain.chain_id));

        // Give the loop time to observe the paused flag at a cycle boundary.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let paused = engine.status(&chain.chain_id).unwrap();
        assert_eq!(paused.status, ChainStatus::Paused);

        assert!(engine.resume_chain(&chain.chain_id));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let done = engine.status(&chain.chain_id).unwrap();
        assert_eq!(done.status, ChainStatus::Completed);
    }

    #[tokio::test]
    async fn list_chains_filters_by_project_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(dir.path(), &["[CHAIN_DONE]"]);
        engine.start_chain("p1 task", Some("p1".to_string()), None, None, None, None).unwrap();
        engine.start_chain("p2 task", Some("p2".to_string()), None, None, None, None).unwrap();

        let p1_only = engine.list_chains(Some("p1"), None);
        assert_eq!(p1_only.len(), 1);
        assert_eq!(p1_only[0].project_id, "p1");

        let running = engine.list_chains(None, Some(ChainStatus::Running));
        assert_eq!(running.len(), 2);
    }
}
