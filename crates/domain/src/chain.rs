use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleNextAction {
    Continue,
    Done,
    Error,
}

impl CycleNextAction {
    /// Scan consolidation text for a terminal marker, defaulting to
    /// `Continue` when none is present (§4.11 step 3).
    pub fn from_consolidation_text(text: &str) -> Self {
        if text.contains("[CHAIN_DONE]") {
            CycleNextAction::Done
        } else if text.contains("[CHAIN_ERROR]") {
            CycleNextAction::Error
        } else {
            CycleNextAction::Continue
        }
    }
}

/// A task dispatched to one mesh member within a cycle, parsed out of the
/// lead endpoint's agent plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub task_id: String,
    pub endpoint: String,
    #[serde(default)]
    pub task_type: String,
    pub instruction: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// The parsed ```agent_plan``` fenced block from a lead response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPlan {
    pub analysis: String,
    pub reasoning: String,
    pub tasks: Vec<AgentTask>,
    pub expected_output: String,
}

/// The result of dispatching one `AgentTask`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub endpoint: String,
    pub success: bool,
    pub response: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cycle {
    pub cycle_number: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub lead_analysis: String,
    pub agent_plan: Option<AgentPlan>,
    pub agent_tasks: Vec<AgentTask>,
    pub agent_results: HashMap<String, AgentResult>,
    pub consolidation: Option<String>,
    pub next_action: CycleNextAction,
    pub execution_time_ms: u64,
    pub tokens_used: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chain {
    pub chain_id: String,
    pub project_id: String,
    pub user_prompt: String,
    pub status: ChainStatus,
    pub max_cycles: u32,
    pub current_cycle: u32,
    pub cycles: Vec<Cycle>,
    pub autoprompt_profile: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub final_output: Option<String>,
    pub total_tokens: u64,
    pub error: Option<String>,
}

impl Chain {
    pub fn new(chain_id: impl Into<String>, project_id: impl Into<String>, user_prompt: impl Into<String>, max_cycles: u32) -> Self {
        Self {
            chain_id: chain_id.into(),
            project_id: project_id.into(),
            user_prompt: user_prompt.into(),
            status: ChainStatus::Pending,
            max_cycles,
            current_cycle: 0,
            cycles: Vec::new(),
            autoprompt_profile: None,
            started_at: Utc::now(),
            completed_at: None,
            final_output: None,
            total_tokens: 0,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            ChainStatus::Completed | ChainStatus::Failed | ChainStatus::Cancelled
        )
    }
}
