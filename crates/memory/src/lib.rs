//! In-process content store with confidence scores, TTL expiry, and
//! explicit versioning (§4.3). One `MemoryStore` per process, guarded by a
//! single mutex, persisting JSONL per project under `dir`.

use chrono::Utc;
use llmesh_domain::config::MemoryConfig;
use llmesh_domain::error::{Error, Result};
use llmesh_domain::memory_entry::{Importance, MemoryEntry, MemoryType};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, Write};
use std::path::PathBuf;

const GLOBAL_PROJECT: &str = "global";

#[derive(Debug, Clone, Default)]
pub struct RecallQuery {
    pub text: Option<String>,
    pub kind: Option<MemoryType>,
    pub project_id: Option<String>,
    pub min_confidence: f32,
    pub max_age_hours: Option<i64>,
    pub tags: Vec<String>,
    pub include_expired: bool,
    pub limit: usize,
}

impl RecallQuery {
    pub fn new() -> Self {
        Self {
            limit: 10,
            ..Default::default()
        }
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, MemoryEntry>,
    by_project: HashMap<String, HashSet<String>>,
    by_tag: HashMap<String, HashSet<String>>,
}

impl Inner {
    fn index(&mut self, entry: &MemoryEntry) {
        let project = entry.project_id.clone().unwrap_or_else(|| GLOBAL_PROJECT.to_string());
        self.by_project.entry(project).or_default().insert(entry.id.clone());
        for tag in &entry.tags {
            self.by_tag.entry(tag.clone()).or_default().insert(entry.id.clone());
        }
    }

    fn unindex(&mut self, entry: &MemoryEntry) {
        let project = entry.project_id.clone().unwrap_or_else(|| GLOBAL_PROJECT.to_string());
        if let Some(ids) = self.by_project.get_mut(&project) {
            ids.remove(&entry.id);
        }
        for tag in &entry.tags {
            if let Some(ids) = self.by_tag.get_mut(tag) {
                ids.remove(&entry.id);
            }
        }
    }
}

/// Process-wide memory store. Shared behind an `Arc` across every guarded
/// component that reads or writes content memory.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    dir: PathBuf,
    max_entries: usize,
}

impl MemoryStore {
    pub fn new(config: &MemoryConfig) -> Result<Self> {
        fs::create_dir_all(&config.dir)?;
        let mut inner = Inner::default();
        load_from_disk(&config.dir, &mut inner)?;
        Ok(Self {
            inner: Mutex::new(inner),
            dir: config.dir.clone(),
            max_entries: config.max_entries,
        })
    }

    /// Store a brand-new entry (version 1, no lineage) and persist it.
    #[allow(clippy::too_many_arguments)]
    pub fn remember(
        &self,
        content: impl Into<String>,
        kind: MemoryType,
        confidence: f32,
        project_id: Option<String>,
        tags: Vec<String>,
        keywords: Vec<String>,
        importance: Importance,
        ttl_hours: Option<i64>,
        source_endpoint: Option<String>,
    ) -> Result<MemoryEntry> {
        let entry = MemoryEntry::new(
            content,
            kind,
            confidence,
            project_id,
            tags,
            keywords,
            importance,
            ttl_hours,
            source_endpoint,
        );
        self.insert(entry.clone())?;
        Ok(entry)
    }

    /// Supersede an existing head with a new version. The old entry is left
    /// intact; the new one is indexed and persisted with an incremented
    /// `version` and `previous_version_id` pointing at the head it replaces.
    pub fn update(&self, id: &str, content: Option<String>, confidence: Option<f32>) -> Result<Option<MemoryEntry>> {
        let head = {
            let inner = self.inner.lock();
            match inner.entries.get(id) {
                Some(e) => e.clone(),
                None => return Ok(None),
            }
        };
        let next = head.supersede(content.unwrap_or_else(|| head.content.clone()), confidence);
        self.insert(next.clone())?;
        Ok(Some(next))
    }

    /// Add a caller's validation to an entry in place (raises confidence
    /// idempotently) and persist the mutated entry. Validation does not
    /// create a new version — it is a mutation on the current head.
    pub fn validate(&self, id: &str, caller: &str) -> Result<Option<MemoryEntry>> {
        let updated = {
            let mut inner = self.inner.lock();
            match inner.entries.get_mut(id) {
                Some(entry) => {
                    entry.validate(caller);
                    entry.clone()
                }
                None => return Ok(None),
            }
        };
        self.persist(&updated)?;
        Ok(Some(updated))
    }

    pub fn invalidate(&self, id: &str) -> Result<Option<MemoryEntry>> {
        let updated = {
            let mut inner = self.inner.lock();
            match inner.entries.get_mut(id) {
                Some(entry) => {
                    entry.invalidate();
                    entry.clone()
                }
                None => return Ok(None),
            }
        };
        self.persist(&updated)?;
        Ok(Some(updated))
    }

    pub fn get(&self, id: &str) -> Option<MemoryEntry> {
        self.inner.lock().entries.get(id).cloned()
    }

    pub fn delete(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.remove(id) {
            Some(entry) => {
                inner.unindex(&entry);
                true
            }
            None => false,
        }
    }

    /// Full lineage for an entry's chain, oldest first, walking
    /// `previous_version_id` links. Includes entries already filtered out
    /// of ordinary `recall` results (expired or not).
    pub fn history(&self, id: &str) -> Vec<MemoryEntry> {
        let inner = self.inner.lock();
        let mut chain = Vec::new();
        let mut cursor = inner.entries.get(id).cloned();
        while let Some(entry) = cursor {
            let prev = entry.previous_version_id.clone();
            chain.push(entry);
            cursor = prev.and_then(|p| inner.entries.get(&p).cloned());
        }
        chain.reverse();
        chain
    }

    /// Recall entries matching every set filter in `query`, sorted by
    /// `(confidence DESC, updated_at DESC)` and truncated to `query.limit`.
    pub fn recall(&self, query: &RecallQuery) -> Vec<MemoryEntry> {
        let inner = self.inner.lock();
        let now = Utc::now();

        let candidates: Box<dyn Iterator<Item = &MemoryEntry>> = match (&query.project_id, query.tags.first()) {
            (Some(project), _) => {
                let ids = inner.by_project.get(project);
                Box::new(ids.into_iter().flatten().filter_map(|id| inner.entries.get(id)))
            }
            (None, Some(tag)) => {
                let ids = inner.by_tag.get(tag);
                Box::new(ids.into_iter().flatten().filter_map(|id| inner.entries.get(id)))
            }
            (None, None) => Box::new(inner.entries.values()),
        };

        let mut results: Vec<MemoryEntry> = candidates
            .filter(|entry| query.include_expired || !entry.is_expired(now))
            .filter(|entry| query.project_id.as_deref().map_or(true, |p| entry.project_id.as_deref() == Some(p)))
            .filter(|entry| query.kind.map_or(true, |k| entry.kind == k))
            .filter(|entry| entry.confidence >= query.min_confidence)
            .filter(|entry| {
                query.max_age_hours.map_or(true, |max_hours| {
                    (now - entry.created_at).num_seconds() as f64 / 3600.0 <= max_hours as f64
                })
            })
            .filter(|entry| query.tags.is_empty() || query.tags.iter().any(|t| entry.tags.contains(t)))
            .filter(|entry| query.text.as_deref().map_or(true, |q| entry.matches_query(q)))
            .cloned()
            .collect();

        results.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.updated_at.cmp(&a.updated_at))
        });
        results.truncate(query.limit);
        results
    }

    pub fn stats(&self) -> MemoryStats {
        let inner = self.inner.lock();
        let mut by_type: HashMap<String, usize> = HashMap::new();
        let mut by_project: HashMap<String, usize> = HashMap::new();
        let mut total_confidence = 0.0;
        let mut expired = 0;
        let now = Utc::now();
        for entry in inner.entries.values() {
            *by_type.entry(format!("{:?}", entry.kind)).or_default() += 1;
            let project = entry.project_id.clone().unwrap_or_else(|| GLOBAL_PROJECT.to_string());
            *by_project.entry(project).or_default() += 1;
            total_confidence += entry.confidence as f64;
            if entry.is_expired(now) {
                expired += 1;
            }
        }
        let total = inner.entries.len();
        MemoryStats {
            total,
            by_type,
            by_project,
            avg_confidence: if total > 0 { total_confidence / total as f64 } else { 0.0 },
            expired,
        }
    }

    /// Remove expired entries, then — if still over `max_entries` — the
    /// oldest remaining entries by `updated_at`.
    pub fn evict(&self) -> usize {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        let expired_ids: Vec<String> = inner
            .entries
            .values()
            .filter(|e| e.is_expired(now))
            .map(|e| e.id.clone())
            .collect();
        let mut removed = 0;
        for id in expired_ids {
            if let Some(entry) = inner.entries.remove(&id) {
                inner.unindex(&entry);
                removed += 1;
            }
        }

        if inner.entries.len() > self.max_entries {
            let overflow = inner.entries.len() - self.max_entries;
            let mut by_age: Vec<(String, chrono::DateTime<Utc>)> =
                inner.entries.values().map(|e| (e.id.clone(), e.updated_at)).collect();
            by_age.sort_by_key(|(_, updated_at)| *updated_at);
            for (id, _) in by_age.into_iter().take(overflow) {
                if let Some(entry) = inner.entries.remove(&id) {
                    inner.unindex(&entry);
                    removed += 1;
                }
            }
        }
        removed
    }

    fn insert(&self, entry: MemoryEntry) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            inner.index(&entry);
            inner.entries.insert(entry.id.clone(), entry.clone());
        }
        self.persist(&entry)?;
        self.evict();
        Ok(())
    }

    fn persist(&self, entry: &MemoryEntry) -> Result<()> {
        let project = entry.project_id.clone().unwrap_or_else(|| GLOBAL_PROJECT.to_string());
        let path = self.dir.join(format!("memory_{project}.jsonl"));
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let line = serde_json::to_string(entry).map_err(Error::from)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MemoryStats {
    pub total: usize,
    pub by_type: HashMap<String, usize>,
    pub by_project: HashMap<String, usize>,
    pub avg_confidence: f64,
    pub expired: usize,
}

/// Rehydrate every non-expired entry from every `memory_*.jsonl` file in
/// `dir`. Updates append — readers must reconcile by `id`; since each
/// version carries its own `id`, every line simply becomes its own entry.
fn load_from_disk(dir: &PathBuf, inner: &mut Inner) -> Result<()> {
    let now = Utc::now();
    let read_dir = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(_) => return Ok(()),
    };
    for item in read_dir {
        let item = item?;
        let path = item.path();
        let is_memory_file = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("memory_") && n.ends_with(".jsonl"));
        if !is_memory_file {
            continue;
        }
        let file = fs::File::open(&path)?;
        let reader = std::io::BufReader::new(file);
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: MemoryEntry = match serde_json::from_str(&line) {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(error = %e, file = %path.display(), "skipping unreadable memory entry");
                    continue;
                }
            };
            if entry.is_expired(now) {
                continue;
            }
            inner.index(&entry);
            inner.entries.insert(entry.id.clone(), entry);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &std::path::Path, max_entries: usize) -> MemoryStore {
        MemoryStore::new(&MemoryConfig {
            dir: dir.to_path_buf(),
            max_entries,
        })
        .unwrap()
    }

    #[test]
    fn remember_then_recall_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 100);
        let entry = store
            .remember(
                "the sky is blue",
                MemoryType::Fact,
                0.8,
                Some("acme".to_string()),
                vec!["sky".to_string()],
                vec![],
                Importance::Medium,
                None,
                None,
            )
            .unwrap();

        let mut query = RecallQuery::new();
        query.project_id = Some("acme".to_string());
        let results = store.recall(&query);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, entry.id);
    }

    #[test]
    fn recall_sorts_by_confidence_then_recency() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 100);
        store
            .remember("low", MemoryType::Fact, 0.3, None, vec![], vec![], Importance::Low, None, None)
            .unwrap();
        let high = store
            .remember("high", MemoryType::Fact, 0.9, None, vec![], vec![], Importance::Low, None, None)
            .unwrap();

        let query = RecallQuery {
            limit: 10,
            ..RecallQuery::new()
        };
        let results = store.recall(&query);
        assert_eq!(results[0].id, high.id);
    }

    #[test]
    fn recall_excludes_expired_unless_requested() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 100);
        store
            .remember(
                "soon gone",
                MemoryType::Fact,
                0.8,
                None,
                vec![],
                vec![],
                Importance::Low,
                Some(0),
                None,
            )
            .unwrap();

        let mut query = RecallQuery::new();
        let hidden = store.recall(&query);
        assert!(hidden.is_empty());

        query.include_expired = true;
        let shown = store.recall(&query);
        assert_eq!(shown.len(), 1);
    }

    #[test]
    fn update_creates_new_version_and_preserves_old() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 100);
        let original = store
            .remember("v1", MemoryType::Fact, 0.5, None, vec![], vec![], Importance::Low, None, None)
            .unwrap();

        let updated = store.update(&original.id, Some("v2".to_string()), None).unwrap().unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.previous_version_id.as_deref(), Some(original.id.as_str()));

        let old_still_there = store.get(&original.id).unwrap();
        assert_eq!(old_still_there.content, "v1");
        assert_eq!(old_still_there.version, 1);
    }

    #[test]
    fn validate_is_idempotent_per_caller_and_invalidate_floors_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 100);
        let entry = store
            .remember("fact", MemoryType::Fact, 0.9, None, vec![], vec![], Importance::Low, None, None)
            .unwrap();

        let v1 = store.validate(&entry.id, "gpt").unwrap().unwrap();
        assert!((v1.confidence - 0.95).abs() < f32::EPSILON);
        let v2 = store.validate(&entry.id, "gpt").unwrap().unwrap();
        assert!((v2.confidence - 0.95).abs() < f32::EPSILON);

        for _ in 0..20 {
            store.invalidate(&entry.id).unwrap();
        }
        assert_eq!(store.get(&entry.id).unwrap().confidence, 0.0);
    }

    #[test]
    fn history_walks_the_full_lineage_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 100);
        let v1 = store
            .remember("v1", MemoryType::Fact, 0.5, None, vec![], vec![], Importance::Low, None, None)
            .unwrap();
        let v2 = store.update(&v1.id, Some("v2".to_string()), None).unwrap().unwrap();
        let v3 = store.update(&v2.id, Some("v3".to_string()), None).unwrap().unwrap();

        let chain = store.history(&v3.id);
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0].id, v1.id);
        assert_eq!(chain[2].id, v3.id);
    }

    #[test]
    fn eviction_prefers_expired_then_oldest_by_updated_at() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 1);
        store
            .remember("first", MemoryType::Fact, 0.5, None, vec![], vec![], Importance::Low, None, None)
            .unwrap();
        store
            .remember("second", MemoryType::Fact, 0.5, None, vec![], vec![], Importance::Low, None, None)
            .unwrap();

        let mut query = RecallQuery::new();
        query.limit = 10;
        let remaining = store.recall(&query);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].content, "second");
    }

    #[test]
    fn persisted_entries_rehydrate_on_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = store(dir.path(), 100);
            store
                .remember(
                    "durable",
                    MemoryType::Decision,
                    0.7,
                    Some("proj".to_string()),
                    vec![],
                    vec![],
                    Importance::High,
                    None,
                    None,
                )
                .unwrap();
        }

        let reopened = store(dir.path(), 100);
        let mut query = RecallQuery::new();
        query.project_id = Some("proj".to_string());
        let results = reopened.recall(&query);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "durable");
    }
}
