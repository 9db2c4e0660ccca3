//! Append-only audit log: bounded in-memory ring, daily-rotated JSONL on
//! disk, subscriber fan-out, and a small query surface (§4.2).

use chrono::{NaiveDate, Utc};
use llmesh_domain::audit_entry::{AuditEntry, AuditLevel};
use llmesh_domain::config::AuditConfig;
use llmesh_domain::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender};

const REDACT_KEYS: &[&str] = &["password", "api_key", "secret", "token", "credential"];
const MAX_VALUE_CHARS: usize = 500;

struct Inner {
    ring: VecDeque<AuditEntry>,
    pending: Vec<AuditEntry>,
    subscribers: Vec<Sender<AuditEntry>>,
}

/// Process-wide audit log. One instance is shared (behind an `Arc`) across
/// every guarded component.
pub struct AuditLog {
    inner: Mutex<Inner>,
    dir: PathBuf,
    ring_capacity: usize,
    flush_every: usize,
}

impl AuditLog {
    pub fn new(config: &AuditConfig) -> Result<Self> {
        fs::create_dir_all(&config.dir)?;
        Ok(Self {
            inner: Mutex::new(Inner {
                ring: VecDeque::with_capacity(config.ring_capacity),
                pending: Vec::new(),
                subscribers: Vec::new(),
            }),
            dir: config.dir.clone(),
            ring_capacity: config.ring_capacity,
            flush_every: config.flush_every,
        })
    }

    /// Record one entry: sanitize its params, push into the ring (evicting
    /// the oldest if full), deliver to subscribers, and flush to disk once
    /// `flush_every` entries have accumulated.
    pub fn record(&self, mut entry: AuditEntry) {
        entry.params = sanitize_params(entry.params);

        match entry.level {
            AuditLevel::Security => tracing::warn!(action = %entry.action, caller = %entry.caller, "security audit event"),
            AuditLevel::Error => tracing::error!(action = %entry.action, caller = %entry.caller, "error audit event"),
            AuditLevel::Info => tracing::debug!(action = %entry.action, caller = %entry.caller, "audit event"),
        }

        let mut inner = self.inner.lock();
        if inner.ring.len() >= self.ring_capacity {
            inner.ring.pop_front();
        }
        inner.ring.push_back(entry.clone());
        inner.pending.push(entry.clone());
        inner.subscribers.retain(|tx| tx.send(entry.clone()).is_ok());

        if inner.pending.len() >= self.flush_every {
            if let Err(e) = self.flush_locked(&mut inner) {
                tracing::error!(error = %e, "audit log flush failed, continuing with degraded durability");
            }
        }
    }

    /// Force an immediate flush of any pending entries to disk.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.flush_locked(&mut inner)
    }

    fn flush_locked(&self, inner: &mut Inner) -> Result<()> {
        if inner.pending.is_empty() {
            return Ok(());
        }
        let path = self.file_path_for(Utc::now().date_naive());
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        for entry in inner.pending.drain(..) {
            let line = serde_json::to_string(&entry)?;
            writeln!(file, "{line}")?;
        }
        Ok(())
    }

    fn file_path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("audit_{}.jsonl", date.format("%Y-%m-%d")))
    }

    /// Register a live subscriber. A failed delivery (receiver dropped)
    /// removes the subscriber on the next `record`.
    pub fn subscribe(&self) -> Receiver<AuditEntry> {
        let (tx, rx) = channel();
        self.inner.lock().subscribers.push(tx);
        rx
    }

    pub fn latest(&self, n: usize) -> Vec<AuditEntry> {
        let inner = self.inner.lock();
        inner.ring.iter().rev().take(n).cloned().collect()
    }

    pub fn by_trace(&self, trace_id: &str) -> Vec<AuditEntry> {
        let inner = self.inner.lock();
        inner
            .ring
            .iter()
            .filter(|e| e.trace_id.as_deref() == Some(trace_id))
            .cloned()
            .collect()
    }

    pub fn by_caller(&self, caller: &str) -> Vec<AuditEntry> {
        let inner = self.inner.lock();
        inner.ring.iter().filter(|e| e.caller == caller).cloned().collect()
    }

    pub fn security_only(&self) -> Vec<AuditEntry> {
        let inner = self.inner.lock();
        inner
            .ring
            .iter()
            .filter(|e| e.level == AuditLevel::Security)
            .cloned()
            .collect()
    }

    pub fn errors_only(&self) -> Vec<AuditEntry> {
        let inner = self.inner.lock();
        inner.ring.iter().filter(|e| e.level == AuditLevel::Error).cloned().collect()
    }

    /// Reload a past day's entries straight from its rotated file.
    pub fn by_date(&self, date: NaiveDate) -> Result<Vec<AuditEntry>> {
        let path = self.file_path_for(date);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            out.push(serde_json::from_str(&line).map_err(Error::from)?);
        }
        Ok(out)
    }
}

/// Redact secret-bearing keys and truncate long string values before an
/// entry's `params` reach the ring or disk (§4.2).
pub fn sanitize_params(value: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                let lower = key.to_lowercase();
                if REDACT_KEYS.iter().any(|needle| lower.contains(needle)) {
                    out.insert(key, Value::String("***redacted***".into()));
                } else {
                    out.insert(key, sanitize_params(val));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_params).collect()),
        Value::String(s) if s.chars().count() > MAX_VALUE_CHARS => {
            let truncated: String = s.chars().take(MAX_VALUE_CHARS).collect();
            Value::String(format!("{truncated}...[truncated]"))
        }
        other => other,
    }
}
