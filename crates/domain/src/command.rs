use crate::endpoint::CapabilityTag;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Priority of a queued command. Lower numeric value dequeues first;
/// commands of equal priority dequeue in FIFO (enqueue) order (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Priority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
    Idle = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    Chat,
    Research,
    Code,
    Review,
    Search,
    Coordinate,
    Memory,
    System,
}

impl CommandType {
    /// The capability a command of this type is routed by, used to pick an
    /// agent when `target_agent` is unset (§6 capability-based routing).
    pub fn capability(self) -> CapabilityTag {
        match self {
            CommandType::Chat => CapabilityTag::Chat,
            CommandType::Research => CapabilityTag::Research,
            CommandType::Code => CapabilityTag::Coding,
            CommandType::Review => CapabilityTag::Review,
            CommandType::Search => CapabilityTag::Search,
            CommandType::Coordinate => CapabilityTag::Coordinate,
            CommandType::Memory => CapabilityTag::Chat,
            CommandType::System => CapabilityTag::Coordinate,
        }
    }
}

/// A queued command. Field order intentionally mirrors the original
/// `to_dict` shape so the JSON snapshot format is stable (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    pub priority: Priority,
    #[serde(rename = "type")]
    pub kind: CommandType,
    pub status: CommandStatus,
    pub payload: serde_json::Value,
    pub target_agent: Option<String>,
    pub assigned_to: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retries: u32,
    pub max_retries: u32,
    /// Monotonic enqueue sequence, used to break priority ties FIFO.
    pub sequence: u64,
}

impl Command {
    pub fn new(kind: CommandType, priority: Priority, payload: serde_json::Value, sequence: u64) -> Self {
        Self {
            id: format!("cmd_{}", &Uuid::new_v4().simple().to_string()[..12]),
            priority,
            kind,
            status: CommandStatus::Pending,
            payload,
            target_agent: None,
            assigned_to: None,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            retries: 0,
            max_retries: 3,
            sequence,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.retries < self.max_retries
    }
}

/// An agent registered with the queue: its capabilities and live load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub available: bool,
    pub current_command: Option<String>,
    pub queue_size: usize,
    pub completed_count: u64,
    pub failed_count: u64,
    pub capabilities: HashSet<CapabilityTag>,
    pub last_active: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: kind.into(),
            available: true,
            current_command: None,
            queue_size: 0,
            completed_count: 0,
            failed_count: 0,
            capabilities: HashSet::new(),
            last_active: None,
        }
    }

    pub fn has_capability(&self, tag: CapabilityTag) -> bool {
        self.capabilities.contains(&tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering_is_critical_first() {
        let mut priorities = vec![Priority::Low, Priority::Critical, Priority::Normal];
        priorities.sort();
        assert_eq!(priorities, vec![Priority::Critical, Priority::Normal, Priority::Low]);
    }

    #[test]
    fn command_type_maps_to_expected_capability() {
        assert_eq!(CommandType::Code.capability(), CapabilityTag::Coding);
        assert_eq!(CommandType::Research.capability(), CapabilityTag::Research);
    }

    #[test]
    fn new_command_starts_pending_with_zero_retries() {
        let cmd = Command::new(CommandType::Chat, Priority::Normal, serde_json::json!({}), 1);
        assert_eq!(cmd.status, CommandStatus::Pending);
        assert_eq!(cmd.retries, 0);
        assert!(cmd.can_retry());
        assert!(cmd.id.starts_with("cmd_"));
    }

    #[test]
    fn can_retry_false_once_max_reached() {
        let mut cmd = Command::new(CommandType::Chat, Priority::Normal, serde_json::json!({}), 1);
        cmd.retries = cmd.max_retries;
        assert!(!cmd.can_retry());
    }
}
