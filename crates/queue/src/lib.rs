//! Command Queue (§4.10): a priority-ordered command queue with
//! capability-based agent routing, automatic retry, and JSON snapshot
//! persistence.
//!
//! Ordering is `(priority, sequence)` ascending — `Priority::Critical`
//! sorts first, ties break FIFO by enqueue order. A `BTreeSet` of that key
//! tuple keeps the pending set always in that order without needing to
//! rebuild a heap on every capability-filtered scan.

use llmesh_domain::command::{Agent, Command, CommandStatus, CommandType, Priority};
use llmesh_domain::config::QueueConfig;
use llmesh_domain::error::{Error, Result};
use llmesh_domain::trace::TraceEvent;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Instant;

struct Inner {
    pending: BTreeSet<(Priority, u64, String)>,
    commands: HashMap<String, Command>,
    agents: HashMap<String, Agent>,
    next_sequence: u64,
    /// When a command was handed to `dequeue`, for `QueueDequeue`'s
    /// `wait_ms` field.
    enqueued_at: HashMap<String, Instant>,
}

pub struct Queue {
    inner: Mutex<Inner>,
    max_queue_size: usize,
    snapshot_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Snapshot {
    timestamp: chrono::DateTime<chrono::Utc>,
    commands: Vec<Command>,
}

impl Queue {
    pub fn new(config: &QueueConfig) -> Result<Self> {
        let queue = Self {
            inner: Mutex::new(Inner {
                pending: BTreeSet::new(),
                commands: HashMap::new(),
                agents: HashMap::new(),
                next_sequence: 0,
                enqueued_at: HashMap::new(),
            }),
            max_queue_size: config.max_queue_size,
            snapshot_path: config.snapshot_path.clone(),
        };
        queue.load_snapshot()?;
        Ok(queue)
    }

    fn load_snapshot(&self) -> Result<()> {
        if !self.snapshot_path.exists() {
            return Ok(());
        }
        let raw = std::fs::read_to_string(&self.snapshot_path)?;
        let snapshot: Snapshot = serde_json::from_str(&raw)?;
        let mut inner = self.inner.lock();

        for mut cmd in snapshot.commands {
            match cmd.status {
                CommandStatus::Running => {
                    tracing::warn!(command_id = %cmd.id, "recovered running command, resetting to queued");
                    cmd.status = CommandStatus::Queued;
                    inner.pending.insert((cmd.priority, cmd.sequence, cmd.id.clone()));
                }
                CommandStatus::Pending | CommandStatus::Queued => {
                    inner.pending.insert((cmd.priority, cmd.sequence, cmd.id.clone()));
                }
                CommandStatus::Completed | CommandStatus::Failed | CommandStatus::Cancelled => {}
            }
            inner.next_sequence = inner.next_sequence.max(cmd.sequence + 1);
            inner.commands.insert(cmd.id.clone(), cmd);
        }
        tracing::info!(loaded = inner.commands.len(), "loaded queue snapshot");
        Ok(())
    }

    fn snapshot(&self, inner: &Inner) -> Result<()> {
        let snapshot = Snapshot {
            timestamp: chrono::Utc::now(),
            commands: inner.commands.values().cloned().collect(),
        };
        let serialized = serde_json::to_string_pretty(&snapshot)?;
        if let Some(parent) = self.snapshot_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = tmp_path_for(&self.snapshot_path);
        std::fs::write(&tmp_path, serialized)?;
        std::fs::rename(&tmp_path, &self.snapshot_path)?;
        Ok(())
    }

    pub fn register_agent(&self, agent: Agent) {
        self.inner.lock().agents.insert(agent.id.clone(), agent);
    }

    /// §4.10 `enqueue`: rejects once the pending set reaches
    /// `max_queue_size`; otherwise pushes, indexes, and snapshots.
    pub fn enqueue(&self, kind: CommandType, priority: Priority, payload: serde_json::Value, target_agent: Option<String>) -> Result<Command> {
        let mut inner = self.inner.lock();
        if inner.pending.len() >= self.max_queue_size {
            return Err(Error::Other("queue is full".into()));
        }

        let sequence = inner.next_sequence;
        inner.next_sequence += 1;

        let mut cmd = Command::new(kind, priority, payload, sequence);
        cmd.status = CommandStatus::Queued;
        cmd.target_agent = target_agent;

        inner.pending.insert((cmd.priority, cmd.sequence, cmd.id.clone()));
        inner.enqueued_at.insert(cmd.id.clone(), Instant::now());

        TraceEvent::QueueEnqueue {
            command_id: cmd.id.clone(),
            priority: format!("{:?}", cmd.priority),
            command_type: format!("{:?}", cmd.kind),
        }
        .emit();

        inner.commands.insert(cmd.id.clone(), cmd.clone());
        self.snapshot(&inner)?;
        Ok(cmd)
    }

    /// §4.10 `dequeue`: with `agent`, scans pending in priority order for
    /// the first command whose target (if any) matches and whose type's
    /// required capability the agent holds. Without `agent`, returns the
    /// pending minimum.
    pub fn dequeue(&self, agent_id: Option<&str>) -> Option<Command> {
        let mut inner = self.inner.lock();

        let key = match agent_id {
            Some(agent_id) => {
                let agent_available = inner.agents.get(agent_id).map(|a| a.available).unwrap_or(false);
                if !agent_available {
                    return None;
                }
                let capabilities = inner.agents.get(agent_id).map(|a| a.capabilities.clone()).unwrap_or_default();
                inner
                    .pending
                    .iter()
                    .find(|(_, _, id)| {
                        let cmd = &inner.commands[id];
                        let target_matches = cmd.target_agent.as_deref().map(|t| t == agent_id).unwrap_or(true);
                        target_matches && (cmd.kind == CommandType::Chat || capabilities.contains(&cmd.kind.capability()))
                    })
                    .cloned()
            }
            None => inner.pending.iter().next().cloned(),
        }?;

        inner.pending.remove(&key);
        let (_, _, command_id) = key;

        let wait_ms = inner
            .enqueued_at
            .remove(&command_id)
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);

        {
            let cmd = inner.commands.get_mut(&command_id).expect("pending entry without a command");
            cmd.status = CommandStatus::Running;
            cmd.started_at = Some(chrono::Utc::now());
            if let Some(agent_id) = agent_id {
                cmd.assigned_to = Some(agent_id.to_string());
            }
        }
        if let Some(agent_id) = agent_id {
            if let Some(agent) = inner.agents.get_mut(agent_id) {
                agent.current_command = Some(command_id.clone());
                agent.available = false;
            }
        }
        let result = inner.commands.get(&command_id).expect("pending entry without a command").clone();

        TraceEvent::QueueDequeue {
            command_id: result.id.clone(),
            assigned_to: agent_id.unwrap_or("").to_string(),
            wait_ms,
        }
        .emit();

        let _ = self.snapshot(&inner);
        Some(result)
    }

    /// §4.10 `complete`: terminal status + `completed_at`; on failure with
    /// retries remaining, re-enqueues with a fresh sequence so it doesn't
    /// starve commands already waiting at the same priority.
    pub fn complete(&self, command_id: &str, result: serde_json::Value, success: bool) {
        let mut inner = self.inner.lock();
        let Some(cmd) = inner.commands.get(command_id).cloned() else {
            return;
        };

        let assigned_to = cmd.assigned_to.clone();
        let mut updated = cmd;
        updated.completed_at = Some(chrono::Utc::now());

        if success {
            updated.status = CommandStatus::Completed;
            updated.result = Some(result);
        } else {
            updated.error = Some(result.get("error").and_then(|v| v.as_str()).unwrap_or("unknown error").to_string());
            if updated.can_retry() {
                updated.retries += 1;
                updated.status = CommandStatus::Queued;
                let sequence = inner.next_sequence;
                inner.next_sequence += 1;
                updated.sequence = sequence;
                inner.pending.insert((updated.priority, sequence, updated.id.clone()));
                inner.enqueued_at.insert(updated.id.clone(), Instant::now());
                tracing::warn!(command_id, retries = updated.retries, max_retries = updated.max_retries, "command failed, retrying");
            } else {
                updated.status = CommandStatus::Failed;
            }
        }

        if let Some(agent_id) = assigned_to {
            if let Some(agent) = inner.agents.get_mut(&agent_id) {
                agent.current_command = None;
                agent.available = true;
                agent.last_active = Some(chrono::Utc::now());
                if success {
                    agent.completed_count += 1;
                } else {
                    agent.failed_count += 1;
                }
            }
        }

        inner.commands.insert(updated.id.clone(), updated);
        let _ = self.snapshot(&inner);
    }

    /// §4.10 `distribute_research`: routes to the least-busy agent with
    /// `search`, then `research`, then any available agent.
    pub fn distribute_research(&self, query: &str) -> Result<Command> {
        let target = {
            let inner = self.inner.lock();
            least_busy_with(&inner.agents, llmesh_domain::endpoint::CapabilityTag::Search)
                .or_else(|| least_busy_with(&inner.agents, llmesh_domain::endpoint::CapabilityTag::Research))
                .or_else(|| least_busy_any(&inner.agents))
        };
        let Some(agent_id) = target else {
            return Err(Error::Other("no agents available for research".into()));
        };

        self.enqueue(
            CommandType::Search,
            Priority::Normal,
            serde_json::json!({"query": query, "type": "web_search"}),
            Some(agent_id),
        )
    }

    /// §4.10 `broadcast`: one command per target (or every registered
    /// agent when `targets` is `None`).
    pub fn broadcast(&self, payload: serde_json::Value, kind: CommandType, targets: Option<&[String]>) -> Vec<Command> {
        let agent_ids: Vec<String> = match targets {
            Some(targets) => targets.to_vec(),
            None => self.inner.lock().agents.keys().cloned().collect(),
        };

        agent_ids
            .into_iter()
            .filter_map(|agent_id| self.enqueue(kind, Priority::Normal, payload.clone(), Some(agent_id)).ok())
            .collect()
    }

    pub fn get(&self, command_id: &str) -> Option<Command> {
        self.inner.lock().commands.get(command_id).cloned()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }
}

fn least_busy_with(agents: &HashMap<String, Agent>, tag: llmesh_domain::endpoint::CapabilityTag) -> Option<String> {
    agents
        .values()
        .filter(|a| a.available && a.has_capability(tag))
        .min_by_key(|a| a.queue_size)
        .map(|a| a.id.clone())
}

fn least_busy_any(agents: &HashMap<String, Agent>) -> Option<String> {
    agents.values().filter(|a| a.available).min_by_key(|a| a.queue_size).map(|a| a.id.clone())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmesh_domain::endpoint::CapabilityTag;

    fn queue_in(dir: &std::path::Path) -> Queue {
        Queue::new(&QueueConfig {
            max_queue_size: 10,
            snapshot_path: dir.join("snapshot.json"),
        })
        .unwrap()
    }

    fn agent_with(id: &str, caps: &[CapabilityTag]) -> Agent {
        let mut agent = Agent::new(id, id, "worker");
        for cap in caps {
            agent.capabilities.insert(*cap);
        }
        agent
    }

    #[test]
    fn enqueue_rejects_once_full() {
        let dir = tempfile::tempdir().unwrap();
        let small = Queue::new(&QueueConfig {
            max_queue_size: 1,
            snapshot_path: dir.path().join("small.json"),
        })
        .unwrap();
        small.enqueue(CommandType::Chat, Priority::Normal, serde_json::json!({}), None).unwrap();
        let err = small.enqueue(CommandType::Chat, Priority::Normal, serde_json::json!({}), None);
        assert!(err.is_err());
    }

    #[test]
    fn dequeue_without_agent_returns_highest_priority_first() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(dir.path());
        queue.enqueue(CommandType::Chat, Priority::Low, serde_json::json!({}), None).unwrap();
        let critical = queue.enqueue(CommandType::Chat, Priority::Critical, serde_json::json!({}), None).unwrap();

        let dequeued = queue.dequeue(None).unwrap();
        assert_eq!(dequeued.id, critical.id);
        assert_eq!(dequeued.status, CommandStatus::Running);
    }

    #[test]
    fn dequeue_ties_break_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(dir.path());
        let first = queue.enqueue(CommandType::Chat, Priority::Normal, serde_json::json!({}), None).unwrap();
        let _second = queue.enqueue(CommandType::Chat, Priority::Normal, serde_json::json!({}), None).unwrap();

        let dequeued = queue.dequeue(None).unwrap();
        assert_eq!(dequeued.id, first.id);
    }

    #[test]
    fn dequeue_for_agent_requires_capability_match() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(dir.path());
        queue.register_agent(agent_with("deepseek", &[CapabilityTag::Coding]));

        queue.enqueue(CommandType::Review, Priority::Normal, serde_json::json!({}), None).unwrap();
        assert!(queue.dequeue(Some("deepseek")).is_none());

        let code_cmd = queue.enqueue(CommandType::Code, Priority::Normal, serde_json::json!({}), None).unwrap();
        let dequeued = queue.dequeue(Some("deepseek")).unwrap();
        assert_eq!(dequeued.id, code_cmd.id);
    }

    #[test]
    fn chat_commands_match_any_agent() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(dir.path());
        queue.register_agent(agent_with("mistral", &[CapabilityTag::Review]));
        let chat_cmd = queue.enqueue(CommandType::Chat, Priority::Normal, serde_json::json!({}), None).unwrap();

        let dequeued = queue.dequeue(Some("mistral")).unwrap();
        assert_eq!(dequeued.id, chat_cmd.id);
    }

    #[test]
    fn dequeue_for_unavailable_agent_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(dir.path());
        let mut agent = agent_with("claude", &[CapabilityTag::Coding]);
        agent.available = false;
        queue.register_agent(agent);
        queue.enqueue(CommandType::Code, Priority::Normal, serde_json::json!({}), None).unwrap();

        assert!(queue.dequeue(Some("claude")).is_none());
    }

    #[test]
    fn complete_success_marks_agent_available_and_bumps_counter() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(dir.path());
        queue.register_agent(agent_with("claude", &[CapabilityTag::Coding]));
        let cmd = queue.enqueue(CommandType::Code, Priority::Normal, serde_json::json!({}), None).unwrap();
        queue.dequeue(Some("claude")).unwrap();

        queue.complete(&cmd.id, serde_json::json!({"ok": true}), true);

        let stored = queue.get(&cmd.id).unwrap();
        assert_eq!(stored.status, CommandStatus::Completed);
        assert_eq!(queue.inner.lock().agents["claude"].completed_count, 1);
        assert!(queue.inner.lock().agents["claude"].available);
    }

    #[test]
    fn complete_failure_retries_until_max_then_fails() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(dir.path());
        queue.register_agent(agent_with("claude", &[CapabilityTag::Coding]));
        let cmd = queue.enqueue(CommandType::Code, Priority::Normal, serde_json::json!({}), None).unwrap();
        let max_retries = cmd.max_retries;

        for _ in 0..=max_retries {
            let dequeued = queue.dequeue(Some("claude")).unwrap();
            queue.complete(&dequeued.id, serde_json::json!({"error": "boom"}), false);
        }

        let stored = queue.get(&cmd.id).unwrap();
        assert_eq!(stored.status, CommandStatus::Failed);
        assert_eq!(stored.retries, max_retries);
    }

    #[test]
    fn distribute_research_prefers_search_then_research_then_any() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(dir.path());
        queue.register_agent(agent_with("gemini", &[CapabilityTag::Search, CapabilityTag::Research]));
        queue.register_agent(agent_with("claude", &[CapabilityTag::Research]));

        let cmd = queue.distribute_research("rust async runtimes").unwrap();
        assert_eq!(cmd.target_agent.as_deref(), Some("gemini"));
    }

    #[test]
    fn distribute_research_fails_with_no_agents() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(dir.path());
        assert!(queue.distribute_research("anything").is_err());
    }

    #[test]
    fn broadcast_enqueues_one_command_per_target() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(dir.path());
        queue.register_agent(agent_with("gemini", &[]));
        queue.register_agent(agent_with("claude", &[]));

        let commands = queue.broadcast(serde_json::json!({"text": "hi"}), CommandType::Chat, None);
        assert_eq!(commands.len(), 2);
    }

    #[test]
    fn snapshot_survives_reload_and_resets_running_to_queued() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let queue = Queue::new(&QueueConfig {
            max_queue_size: 10,
            snapshot_path: path.clone(),
        })
        .unwrap();
        queue.register_agent(agent_with("claude", &[CapabilityTag::Coding]));
        let cmd = queue.enqueue(CommandType::Code, Priority::Normal, serde_json::json!({}), None).unwrap();
        queue.dequeue(Some("claude")).unwrap();
        drop(queue);

        let reloaded = Queue::new(&QueueConfig {
            max_queue_size: 10,
            snapshot_path: path,
        })
        .unwrap();
        let restored = reloaded.get(&cmd.id).unwrap();
        assert_eq!(restored.status, CommandStatus::Queued);
        assert_eq!(reloaded.pending_len(), 1);
    }
}
