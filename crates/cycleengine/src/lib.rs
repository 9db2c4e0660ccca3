//! Cycle Engine (§4.11): one plan → dispatch → consolidate pass driven by
//! the lead endpoint through [`llmesh_mesh::Mesh`].

use chrono::Utc;
use llmesh_domain::chain::{AgentPlan, AgentResult, AgentTask, Cycle, CycleNextAction};
use llmesh_domain::config::AutopromptProfile;
use llmesh_mesh::Mesh;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

static AGENT_PLAN_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```agent_plan\s*(.*?)\s*```").unwrap());
static TASKS_OBJECT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"(?s)\{.*"tasks".*\}"#).unwrap());

#[derive(Debug, Deserialize)]
struct RawTask {
    task_id: String,
    agent: String,
    #[serde(default)]
    task_type: String,
    prompt: String,
    #[serde(default)]
    depends_on: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    analysis: String,
    #[serde(default)]
    reasoning: String,
    tasks: Vec<RawTask>,
    #[serde(default)]
    expected_output: String,
}

fn estimate_tokens(text: &str) -> u64 {
    (text.len() / 4) as u64
}

/// Extracts the ```agent_plan fenced JSON block, falling back to any JSON
/// object carrying a `tasks` field (§4.11 step 1).
fn parse_agent_plan(response: &str) -> Option<AgentPlan> {
    let raw: RawPlan = if let Some(m) = AGENT_PLAN_FENCE.captures(response) {
        match serde_json::from_str(&m[1]) {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse agent_plan fenced block");
                return try_loose_plan(response);
            }
        }
    } else {
        return try_loose_plan(response);
    };
    Some(into_agent_plan(raw))
}

fn try_loose_plan(response: &str) -> Option<AgentPlan> {
    let candidate = TASKS_OBJECT.find(response)?;
    serde_json::from_str::<RawPlan>(candidate.as_str()).ok().map(into_agent_plan)
}

fn into_agent_plan(raw: RawPlan) -> AgentPlan {
    AgentPlan {
        analysis: raw.analysis,
        reasoning: raw.reasoning,
        expected_output: raw.expected_output,
        tasks: raw
            .tasks
            .into_iter()
            .map(|t| AgentTask {
                task_id: t.task_id,
                endpoint: t.agent,
                task_type: t.task_type,
                instruction: t.prompt,
                depends_on: t.depends_on,
            })
            .collect(),
    }
}

fn build_planning_prompt(context: &str, autoprompt: &AutopromptProfile, cycle_number: u32) -> String {
    format!(
        "{system}\n\nCYCLE: {cycle_number}\n\n{prefix}{context}{suffix}\n\n\
         If you can resolve this yourself, answer directly. If you need specialist \
         help, respond with a fenced ```agent_plan block containing JSON:\n\
         {{\"analysis\": \"...\", \"reasoning\": \"...\", \"tasks\": [{{\"task_id\": \"task_1\", \
         \"agent\": \"<endpoint id>\", \"task_type\": \"coding|research|review|...\", \
         \"prompt\": \"...\", \"depends_on\": []}}], \"expected_output\": \"...\"}}\n\n\
         End with [CHAIN_DONE] once the task is fully resolved, or [CHAIN_CONTINUE] if more work remains.",
        system = autoprompt.system_prompt,
        prefix = autoprompt.task_prefix,
        context = context,
        suffix = autoprompt.task_suffix,
    )
}

fn build_consolidation_prompt(context: &str, plan: &AgentPlan, results: &HashMap<String, AgentResult>, cycle_number: u32) -> String {
    let mut results_text = String::new();
    for (task_id, result) in results {
        let mark = if result.success { "ok" } else { "failed" };
        results_text.push_str(&format!(
            "\n### {task_id} ({endpoint}) [{mark}]\n{response}\n",
            endpoint = result.endpoint,
            response = result.response.as_deref().unwrap_or(result.error.as_deref().unwrap_or("no response")),
        ));
    }
    let plan_json = serde_json::to_string_pretty(plan).unwrap_or_default();
    format!(
        "CONSOLIDATION - CYCLE {cycle_number}\n\n\
         ORIGINAL TASK:\n{context}\n\n\
         AGENT PLAN:\n{plan_json}\n\n\
         AGENT RESULTS:\n{results_text}\n\n\
         Summarize the findings into a coherent answer. End with [CHAIN_DONE] if the task is \
         complete, [CHAIN_CONTINUE] if more work is needed, or [CHAIN_ERROR] if a critical \
         failure blocks progress."
    )
}

pub struct CycleEngine {
    mesh: Arc<Mesh>,
    max_parallel_tasks: usize,
}

impl CycleEngine {
    pub fn new(mesh: Arc<Mesh>, max_parallel_tasks: usize) -> Self {
        Self { mesh, max_parallel_tasks }
    }

    /// Executes one plan → dispatch → consolidate pass (§4.11).
    pub async fn execute_cycle(
        &self,
        context: &str,
        autoprompt: &AutopromptProfile,
        lead: &str,
        cycle_number: u32,
        caller: &str,
        trace_id: Option<String>,
    ) -> Cycle {
        let started_at = Utc::now();
        let start = std::time::Instant::now();
        let mut tokens_used = 0u64;

        let plan_prompt = build_planning_prompt(context, autoprompt, cycle_number);
        let plan_response = self.mesh.call(lead, &plan_prompt, caller, trace_id.clone()).await;

        if !plan_response.success {
            return Cycle {
                cycle_number,
                started_at,
                completed_at: Some(Utc::now()),
                lead_analysis: format!("lead analysis failed: {}", plan_response.error.unwrap_or_default()),
                agent_plan: None,
                agent_tasks: Vec::new(),
                agent_results: HashMap::new(),
                consolidation: None,
                next_action: CycleNextAction::Error,
                execution_time_ms: start.elapsed().as_millis() as u64,
                tokens_used,
            };
        }

        let lead_output = plan_response.response.unwrap_or_default();
        tokens_used += estimate_tokens(&lead_output);
        let agent_plan = parse_agent_plan(&lead_output);

        let Some(plan) = agent_plan.filter(|p| !p.tasks.is_empty()) else {
            let next_action = CycleNextAction::from_consolidation_text(&lead_output);
            return Cycle {
                cycle_number,
                started_at,
                completed_at: Some(Utc::now()),
                lead_analysis: lead_output.clone(),
                agent_plan: None,
                agent_tasks: Vec::new(),
                agent_results: HashMap::new(),
                consolidation: Some(lead_output),
                next_action,
                execution_time_ms: start.elapsed().as_millis() as u64,
                tokens_used,
            };
        };

        let max_parallel = autoprompt.max_parallel.unwrap_or(4).min(self.max_parallel_tasks).max(1);
        let agent_results = self.dispatch_tasks(&plan.tasks, max_parallel, caller, trace_id.clone()).await;
        for result in agent_results.values() {
            tokens_used += estimate_tokens(result.response.as_deref().unwrap_or_default());
        }

        let consolidation_prompt = build_consolidation_prompt(context, &plan, &agent_results, cycle_number);
        let consolidation_response = self.mesh.call(lead, &consolidation_prompt, caller, trace_id).await;

        let (consolidation, next_action) = if consolidation_response.success {
            let text = consolidation_response.response.unwrap_or_default();
            tokens_used += estimate_tokens(&text);
            let action = CycleNextAction::from_consolidation_text(&text);
            (Some(text), action)
        } else {
            (
                Some(format!("consolidation failed: {}", consolidation_response.error.unwrap_or_default())),
                CycleNextAction::Error,
            )
        };

        Cycle {
            cycle_number,
            started_at,
            completed_at: Some(Utc::now()),
            lead_analysis: lead_output,
            agent_tasks: plan.tasks.clone(),
            agent_plan: Some(plan),
            agent_results,
            consolidation,
            next_action,
            execution_time_ms: start.elapsed().as_millis() as u64,
            tokens_used,
        }
    }

    /// Independent tasks run in batches of `max_parallel` via `delegate`;
    /// dependent tasks run sequentially in declared order once every id in
    /// their `depends_on` has already succeeded (§4.11 step 2).
    async fn dispatch_tasks(
        &self,
        tasks: &[AgentTask],
        max_parallel: usize,
        caller: &str,
        trace_id: Option<String>,
    ) -> HashMap<String, AgentResult> {
        let mut results = HashMap::with_capacity(tasks.len());
        let (independent, dependent): (Vec<&AgentTask>, Vec<&AgentTask>) =
            tasks.iter().partition(|t| t.depends_on.is_empty());

        for batch in independent.chunks(max_parallel.max(1)) {
            let futures = batch.iter().map(|task| self.delegate_task(task, caller, trace_id.clone()));
            let batch_results = futures_util::future::join_all(futures).await;
            for (task, result) in batch.iter().zip(batch_results) {
                results.insert(task.task_id.clone(), result);
            }
        }

        for task in dependent {
            let deps_satisfied = task.depends_on.iter().all(|dep| results.get(dep).is_some_and(|r| r.success));
            if !deps_satisfied {
                results.insert(
                    task.task_id.clone(),
                    AgentResult {
                        endpoint: task.endpoint.clone(),
                        success: false,
                        response: None,
                        error: Some("dependencies not satisfied".to_string()),
                    },
                );
                continue;
            }

            let dep_context: String = task
                .depends_on
                .iter()
                .map(|dep| format!("Result from {dep}:\n{}", results[dep].response.as_deref().unwrap_or_default()))
                .collect::<Vec<_>>()
                .join("\n");
            let enhanced = AgentTask {
                instruction: format!("{}\n\nCONTEXT FROM PREVIOUS TASKS:\n{dep_context}", task.instruction),
                ..task.clone()
            };
            let result = self.delegate_task(&enhanced, caller, trace_id.clone()).await;
            results.insert(task.task_id.clone(), result);
        }

        results
    }

    async fn delegate_task(&self, task: &AgentTask, caller: &str, trace_id: Option<String>) -> AgentResult {
        let delegation = self.mesh.delegate(&task.endpoint, &task.task_type, &task.instruction, caller, trace_id).await;
        AgentResult {
            endpoint: delegation.call.actual_target.unwrap_or_else(|| task.endpoint.clone()),
            success: delegation.call.success,
            response: delegation.call.response,
            error: delegation.call.error,
        }
    }
}
