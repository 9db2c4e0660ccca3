use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "d_max_cycles")]
    pub max_cycles: u32,
    #[serde(default = "d_workspace_root")]
    pub workspace_root: PathBuf,
    #[serde(default)]
    pub autoprompt: AutopromptConfig,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_cycles: d_max_cycles(),
            workspace_root: d_workspace_root(),
            autoprompt: AutopromptConfig::default(),
        }
    }
}

fn d_max_cycles() -> u32 {
    10
}
fn d_workspace_root() -> PathBuf {
    PathBuf::from("./data/chains")
}

/// One autoprompt layer: the planning system prompt plus the text wrapped
/// around the incoming task, and how many independent tasks a cycle may
/// dispatch in parallel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutopromptProfile {
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub task_prefix: String,
    #[serde(default)]
    pub task_suffix: String,
    #[serde(default)]
    pub max_parallel: Option<usize>,
}

impl Default for AutopromptProfile {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            task_prefix: String::new(),
            task_suffix: String::new(),
            max_parallel: None,
        }
    }
}

impl AutopromptProfile {
    fn is_default(&self) -> bool {
        self.system_prompt.is_empty()
            && self.task_prefix.is_empty()
            && self.task_suffix.is_empty()
            && self.max_parallel.is_none()
    }

    /// Merge `other` on top of `self`: any field `other` sets to a
    /// non-empty/non-default value wins, otherwise `self`'s value carries
    /// through. `system_prompt` is appended rather than replaced, so a
    /// later layer augments the base instructions instead of discarding
    /// them.
    fn merge_with(&self, other: &AutopromptProfile) -> AutopromptProfile {
        if other.is_default() {
            return self.clone();
        }
        let system_prompt = if other.system_prompt.is_empty() {
            self.system_prompt.clone()
        } else if self.system_prompt.is_empty() {
            other.system_prompt.clone()
        } else {
            format!("{}\n\n{}", self.system_prompt, other.system_prompt)
        };
        AutopromptProfile {
            system_prompt,
            task_prefix: if other.task_prefix.is_empty() { self.task_prefix.clone() } else { other.task_prefix.clone() },
            task_suffix: if other.task_suffix.is_empty() { self.task_suffix.clone() } else { other.task_suffix.clone() },
            max_parallel: other.max_parallel.or(self.max_parallel),
        }
    }
}

/// Layered autoprompt sources, merged global → profile → project → per-call
/// override before a cycle's planning prompt is built.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AutopromptConfig {
    #[serde(default)]
    pub global: Option<AutopromptProfile>,
    #[serde(default)]
    pub profiles: HashMap<String, AutopromptProfile>,
    #[serde(default)]
    pub projects: HashMap<String, AutopromptProfile>,
}

impl AutopromptConfig {
    /// Merge the layers in increasing precedence: global → named profile →
    /// project → ad-hoc call override. `call_override` is treated as plain
    /// text appended to the merged `system_prompt`, mirroring how an
    /// operator-supplied override augments rather than replaces the
    /// resolved instructions.
    pub fn resolve(&self, profile: Option<&str>, project: Option<&str>, call_override: Option<&str>) -> AutopromptProfile {
        let mut merged = self.global.clone().unwrap_or_default();
        if let Some(p) = profile.and_then(|p| self.profiles.get(p)) {
            merged = merged.merge_with(p);
        }
        if let Some(p) = project.and_then(|p| self.projects.get(p)) {
            merged = merged.merge_with(p);
        }
        if let Some(o) = call_override {
            if !o.is_empty() {
                merged.system_prompt = if merged.system_prompt.is_empty() {
                    o.to_string()
                } else {
                    format!("{}\n\n{}", merged.system_prompt, o)
                };
            }
        }
        merged
    }
}
