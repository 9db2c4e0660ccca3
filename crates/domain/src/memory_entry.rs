use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Fact,
    Decision,
    Code,
    Summary,
    Context,
    Todo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Importance {
    fn default() -> Self {
        Importance::Medium
    }
}

/// A content-addressed memory record (§4.3). Updates never mutate an
/// existing entry in place: `supersede` on an existing head writes a new
/// entry whose `previous_version_id` points at the one it replaces, with
/// `version` incremented; the old entry is left intact for lineage queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MemoryType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confidence: f32,
    pub ttl_hours: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub version: u32,
    pub previous_version_id: Option<String>,
    pub source_endpoint: Option<String>,
    pub validated_by: Vec<String>,
    pub tags: Vec<String>,
    pub importance: Importance,
    pub project_id: Option<String>,
    pub keywords: Vec<String>,
}

impl MemoryEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        content: impl Into<String>,
        kind: MemoryType,
        confidence: f32,
        project_id: Option<String>,
        tags: Vec<String>,
        keywords: Vec<String>,
        importance: Importance,
        ttl_hours: Option<i64>,
        source_endpoint: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: format!("mem_{}", Uuid::new_v4().simple()),
            content: content.into(),
            kind,
            created_at: now,
            updated_at: now,
            confidence: confidence.clamp(0.0, 1.0),
            ttl_hours,
            expires_at: ttl_hours.map(|h| now + Duration::hours(h)),
            version: 1,
            previous_version_id: None,
            source_endpoint,
            validated_by: Vec::new(),
            tags,
            importance,
            project_id,
            keywords,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// Raise confidence by 0.05 (capped at 1.0) and record the caller,
    /// idempotently — a caller already in `validated_by` is a no-op.
    pub fn validate(&mut self, caller: &str) -> bool {
        if self.validated_by.iter().any(|c| c == caller) {
            return false;
        }
        self.validated_by.push(caller.to_string());
        self.confidence = (self.confidence + 0.05).min(1.0);
        self.updated_at = Utc::now();
        true
    }

    /// Lower confidence by 0.10 (floored at 0.0).
    pub fn invalidate(&mut self) {
        self.confidence = (self.confidence - 0.10).max(0.0);
        self.updated_at = Utc::now();
    }

    /// Build the entry that supersedes `self`: same identity lineage,
    /// next version, pointing back at this one. `self` is left untouched.
    pub fn supersede(&self, content: impl Into<String>, confidence: Option<f32>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("mem_{}", Uuid::new_v4().simple()),
            content: content.into(),
            kind: self.kind,
            created_at: self.created_at,
            updated_at: now,
            confidence: confidence.unwrap_or(self.confidence).clamp(0.0, 1.0),
            ttl_hours: self.ttl_hours,
            expires_at: self.expires_at,
            version: self.version + 1,
            previous_version_id: Some(self.id.clone()),
            source_endpoint: self.source_endpoint.clone(),
            validated_by: self.validated_by.clone(),
            tags: self.tags.clone(),
            importance: self.importance,
            project_id: self.project_id.clone(),
            keywords: self.keywords.clone(),
        }
    }

    pub fn matches_query(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.content.to_lowercase().contains(&query)
            || self.keywords.iter().any(|k| k.to_lowercase().contains(&query))
            || self.tags.iter().any(|t| t.to_lowercase().contains(&query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(content: &str, confidence: f32) -> MemoryEntry {
        MemoryEntry::new(
            content,
            MemoryType::Fact,
            confidence,
            Some("acme".to_string()),
            Vec::new(),
            Vec::new(),
            Importance::Medium,
            None,
            None,
        )
    }

    #[test]
    fn confidence_is_clamped_to_unit_interval() {
        assert_eq!(entry("v", 1.5).confidence, 1.0);
        assert_eq!(entry("v", -0.5).confidence, 0.0);
    }

    #[test]
    fn ttl_hours_sets_expires_at() {
        let e = MemoryEntry::new(
            "v",
            MemoryType::Fact,
            0.8,
            None,
            Vec::new(),
            Vec::new(),
            Importance::Medium,
            Some(1),
            None,
        );
        let expires = e.expires_at.expect("ttl should set expires_at");
        assert_eq!(expires, e.created_at + Duration::hours(1));
    }

    #[test]
    fn is_expired_checks_ttl() {
        let mut e = entry("v", 0.9);
        let now = Utc::now();
        assert!(!e.is_expired(now));
        e.expires_at = Some(now - Duration::seconds(1));
        assert!(e.is_expired(now));
    }

    #[test]
    fn validate_raises_confidence_once_per_caller() {
        let mut e = entry("v", 0.9);
        assert!(e.validate("gpt"));
        assert!((e.confidence - 0.95).abs() < f32::EPSILON);
        assert!(!e.validate("gpt"));
        assert!((e.confidence - 0.95).abs() < f32::EPSILON);
    }

    #[test]
    fn validate_caps_at_one() {
        let mut e = entry("v", 0.99);
        e.validate("gpt");
        assert_eq!(e.confidence, 1.0);
    }

    #[test]
    fn invalidate_floors_at_zero() {
        let mut e = entry("v", 0.03);
        e.invalidate();
        assert_eq!(e.confidence, 0.0);
    }

    #[test]
    fn supersede_preserves_identity_and_links_back() {
        let original = entry("old", 0.5);
        let updated = original.supersede("new", Some(0.9));
        assert_eq!(updated.project_id, original.project_id);
        assert_eq!(updated.version, original.version + 1);
        assert_eq!(updated.previous_version_id.as_deref(), Some(original.id.as_str()));
        assert_ne!(updated.id, original.id);
        assert_eq!(updated.created_at, original.created_at);
    }

    #[test]
    fn matches_query_checks_content_keywords_and_tags() {
        let mut e = entry("the quick fox", 0.5);
        e.keywords = vec!["vulpine".to_string()];
        e.tags = vec!["animals".to_string()];
        assert!(e.matches_query("quick"));
        assert!(e.matches_query("VULPINE"));
        assert!(e.matches_query("animals"));
        assert!(!e.matches_query("bear"));
    }
}
