use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "d_dir")]
    pub dir: PathBuf,
    #[serde(default = "d_ring_capacity")]
    pub ring_capacity: usize,
    #[serde(default = "d_flush_every")]
    pub flush_every: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            dir: d_dir(),
            ring_capacity: d_ring_capacity(),
            flush_every: d_flush_every(),
        }
    }
}

fn d_dir() -> PathBuf {
    PathBuf::from("./data/audit")
}
fn d_ring_capacity() -> usize {
    1000
}
fn d_flush_every() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = AuditConfig::default();
        assert_eq!(cfg.ring_capacity, 1000);
        assert_eq!(cfg.flush_every, 100);
    }
}
