use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "d_max_queue_size")]
    pub max_queue_size: usize,
    #[serde(default = "d_snapshot_path")]
    pub snapshot_path: PathBuf,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: d_max_queue_size(),
            snapshot_path: d_snapshot_path(),
        }
    }
}

fn d_max_queue_size() -> usize {
    1000
}
fn d_snapshot_path() -> PathBuf {
    PathBuf::from("./data/queue/snapshot.json")
}
