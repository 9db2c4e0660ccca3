use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "d_dir")]
    pub dir: PathBuf,
    #[serde(default = "d_max_entries")]
    pub max_entries: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            dir: d_dir(),
            max_entries: d_max_entries(),
        }
    }
}

fn d_dir() -> PathBuf {
    PathBuf::from("./data/memory")
}
fn d_max_entries() -> usize {
    10_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_max_entries_is_ten_thousand() {
        assert_eq!(MemoryConfig::default().max_entries, 10_000);
    }
}
