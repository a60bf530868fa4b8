//! Memory entry model.
//!
//! An entry is an immutable, kind-specific payload ([`MemoryContent`]) wrapped
//! in mutable bookkeeping ([`EntryMetadata`]). Corrections never edit content;
//! they are recorded as new feedback entries pointing back at the original.

use crate::error::{EngramError, Result};
use crate::id::MemoryId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Schema version stamped on every new entry.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Caller-owned structured data captured with an analysis.
pub type Snapshot = serde_json::Map<String, Value>;

// ============================================================================
// Kinds
// ============================================================================

/// Kind of memory being stored
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// One past analysis run
    Episodic,
    /// A standalone fact about a subject
    Semantic,
    /// A synthesized, reusable recommendation
    Procedural,
    /// An expert correction of a past analysis
    Feedback,
}

impl MemoryKind {
    pub const ALL: [MemoryKind; 4] = [
        MemoryKind::Episodic,
        MemoryKind::Semantic,
        MemoryKind::Procedural,
        MemoryKind::Feedback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
            Self::Procedural => "procedural",
            Self::Feedback => "feedback",
        }
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type of expert feedback
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    ScoreAdjustment,
    ReasoningCorrection,
    WeightModification,
    Validation,
    Rejection,
}

impl FeedbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScoreAdjustment => "score_adjustment",
            Self::ReasoningCorrection => "reasoning_correction",
            Self::WeightModification => "weight_modification",
            Self::Validation => "validation",
            Self::Rejection => "rejection",
        }
    }
}

impl std::str::FromStr for FeedbackKind {
    type Err = EngramError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "score_adjustment" => Ok(Self::ScoreAdjustment),
            "reasoning_correction" => Ok(Self::ReasoningCorrection),
            "weight_modification" => Ok(Self::WeightModification),
            "validation" => Ok(Self::Validation),
            "rejection" => Ok(Self::Rejection),
            other => Err(EngramError::validation(format!(
                "Unknown feedback kind '{}'",
                other
            ))),
        }
    }
}

/// How far a piece of feedback should propagate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ImpactScope {
    Specific,
    Category,
    Global,
}

impl ImpactScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Specific => "specific",
            Self::Category => "category",
            Self::Global => "global",
        }
    }
}

// ============================================================================
// Kind-specific payloads
// ============================================================================

/// Record of one analysis run by a scoring agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpisodicContent {
    pub agent_name: String,
    pub subject: String,
    pub period: String,
    #[serde(default)]
    pub input: Snapshot,
    #[serde(default)]
    pub output: Snapshot,
    /// Wall-clock execution time in seconds
    pub execution_time: f64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EpisodicContent {
    /// Score produced by the agent, if the output carries a numeric one.
    pub fn score(&self) -> Option<f64> {
        self.output.get("score").and_then(value_as_f64)
    }

    /// Free-text justification attached to the output.
    pub fn justification(&self) -> Option<&str> {
        self.output
            .get("justification")
            .or_else(|| self.output.get("reasoning"))
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// Descriptive text used as the embedding source for this analysis.
    pub fn describe(&self) -> String {
        let mut parts = vec![
            format!("subject: {}", self.subject),
            format!("agent: {}", self.agent_name),
        ];
        if !self.period.is_empty() {
            parts.push(format!("period: {}", self.period));
        }
        for (key, value) in &self.input {
            parts.push(format!("{}: {}", key, value_to_text(value)));
        }
        if let Some(justification) = self.justification() {
            parts.push(justification.to_string());
        }
        parts.join(" | ")
    }
}

/// A standalone fact about a subject
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SemanticContent {
    pub subject: String,
    pub fact_type: String,
    pub fact: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,
}

/// A reusable recommendation derived from a recognized pattern
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProceduralContent {
    pub pattern_name: String,
    pub pattern_type: String,
    #[serde(default)]
    pub context: Snapshot,
    pub recommended_action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_outcome: Option<String>,
    pub confidence_score: f64,
}

/// An expert correction linked to a past analysis
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackContent {
    pub feedback_kind: FeedbackKind,
    /// Reference to the analysis being corrected
    pub analysis_id: String,
    pub expert_id: String,
    pub original_value: Value,
    pub corrected_value: Value,
    pub reasoning: String,
    pub impact_scope: ImpactScope,
    /// Subject the corrected analysis was about
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Agent whose output was corrected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Parameter name targeted by a weight modification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl FeedbackContent {
    /// `corrected - original` when both values are numeric.
    pub fn delta(&self) -> Option<f64> {
        let original = value_as_f64(&self.original_value)?;
        let corrected = value_as_f64(&self.corrected_value)?;
        Some(corrected - original)
    }
}

/// Kind-specific payload of a memory entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MemoryContent {
    Episodic(EpisodicContent),
    Semantic(SemanticContent),
    Procedural(ProceduralContent),
    Feedback(FeedbackContent),
}

impl MemoryContent {
    pub fn kind(&self) -> MemoryKind {
        match self {
            Self::Episodic(_) => MemoryKind::Episodic,
            Self::Semantic(_) => MemoryKind::Semantic,
            Self::Procedural(_) => MemoryKind::Procedural,
            Self::Feedback(_) => MemoryKind::Feedback,
        }
    }
}

// ============================================================================
// Entry
// ============================================================================

/// Mutable bookkeeping attached to an entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntryMetadata {
    pub source: String,
    /// Confidence in `[0, 1]`
    pub confidence: f64,
    #[serde(default)]
    pub access_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<DateTime<Utc>>,
    pub schema_version: u32,
}

impl EntryMetadata {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            confidence: 1.0,
            access_count: 0,
            last_accessed: None,
            schema_version: CURRENT_SCHEMA_VERSION,
        }
    }
}

/// A complete memory record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryEntry {
    pub id: MemoryId,
    pub category: String,
    pub timestamp: DateTime<Utc>,
    pub content: MemoryContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub metadata: EntryMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<MemoryId>,
}

impl MemoryEntry {
    pub fn new(category: impl Into<String>, content: MemoryContent, source: impl Into<String>) -> Self {
        Self {
            id: MemoryId::new(),
            category: category.into(),
            timestamp: Utc::now(),
            content,
            embedding: None,
            metadata: EntryMetadata::new(source),
            expires_at: None,
            parent_id: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.metadata.confidence = confidence;
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Expire `ttl` after the entry's creation time. A TTL past the last
    /// representable instant never expires.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expires_at = self.timestamp.checked_add_signed(ttl);
        self
    }

    pub fn with_parent(mut self, parent_id: MemoryId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn kind(&self) -> MemoryKind {
        self.content.kind()
    }

    /// Subject the entry is about, when its kind carries one.
    pub fn subject(&self) -> Option<&str> {
        match &self.content {
            MemoryContent::Episodic(c) => Some(c.subject.as_str()),
            MemoryContent::Semantic(c) => Some(c.subject.as_str()),
            MemoryContent::Procedural(c) => c.context.get("subject").and_then(Value::as_str),
            MemoryContent::Feedback(c) => c.subject.as_deref(),
        }
    }

    /// Agent the entry is associated with, when its kind carries one.
    pub fn agent(&self) -> Option<&str> {
        match &self.content {
            MemoryContent::Episodic(c) => Some(c.agent_name.as_str()),
            MemoryContent::Semantic(_) => None,
            MemoryContent::Procedural(c) => c.context.get("agent").and_then(Value::as_str),
            MemoryContent::Feedback(c) => c.agent.as_deref(),
        }
    }

    pub fn as_episodic(&self) -> Option<&EpisodicContent> {
        match &self.content {
            MemoryContent::Episodic(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_feedback(&self) -> Option<&FeedbackContent> {
        match &self.content {
            MemoryContent::Feedback(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_procedural(&self) -> Option<&ProceduralContent> {
        match &self.content {
            MemoryContent::Procedural(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }

    /// Age in fractional days relative to `now`, never negative.
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        let seconds = (now - self.timestamp).num_seconds().max(0) as f64;
        seconds / 86_400.0
    }

    /// Bump access bookkeeping; called by stores on a successful retrieve.
    pub fn record_access(&mut self, now: DateTime<Utc>) {
        self.metadata.access_count += 1;
        self.metadata.last_accessed = Some(now);
    }

    /// Text used for lexical matching when no embedding is available.
    pub fn searchable_text(&self) -> String {
        match &self.content {
            MemoryContent::Episodic(c) => c.describe(),
            MemoryContent::Semantic(c) => format!("{} {} {}", c.subject, c.fact_type, c.fact),
            MemoryContent::Procedural(c) => {
                format!("{} {} {}", c.pattern_name, c.pattern_type, c.recommended_action)
            }
            MemoryContent::Feedback(c) => format!(
                "{} {} {}",
                c.feedback_kind.as_str(),
                c.subject.as_deref().unwrap_or_default(),
                c.reasoning
            ),
        }
    }

    /// Check the record-level invariants.
    pub fn validate(&self) -> Result<()> {
        if self.category.trim().is_empty() {
            return Err(EngramError::validation(format!(
                "Entry {} has an empty category",
                self.id
            )));
        }
        validate_confidence(self.metadata.confidence)?;
        if let Some(embedding) = &self.embedding {
            validate_embedding(embedding)?;
        }
        match &self.content {
            MemoryContent::Feedback(c) if c.reasoning.trim().is_empty() => {
                Err(EngramError::validation("Feedback reasoning must not be empty"))
            }
            MemoryContent::Procedural(c) if !(0.0..=1.0).contains(&c.confidence_score) => {
                Err(EngramError::validation(format!(
                    "Procedural confidence {} outside [0, 1]",
                    c.confidence_score
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Partial metadata update. Content is deliberately absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryPatch {
    pub category: Option<String>,
    pub source: Option<String>,
    pub confidence: Option<f64>,
    /// `Some(None)` clears the expiry
    pub expires_at: Option<Option<DateTime<Utc>>>,
    /// `Some(None)` drops the embedding
    pub embedding: Option<Option<Vec<f32>>>,
    pub parent_id: Option<Option<MemoryId>>,
}

impl EntryPatch {
    pub fn is_empty(&self) -> bool {
        self.category.is_none()
            && self.source.is_none()
            && self.confidence.is_none()
            && self.expires_at.is_none()
            && self.embedding.is_none()
            && self.parent_id.is_none()
    }

    /// Apply onto `entry`, leaving it untouched if the patch is invalid.
    pub fn apply(&self, entry: &mut MemoryEntry) -> Result<()> {
        if let Some(confidence) = self.confidence {
            validate_confidence(confidence)?;
        }
        if let Some(Some(embedding)) = &self.embedding {
            validate_embedding(embedding)?;
        }
        if let Some(category) = &self.category {
            if category.trim().is_empty() {
                return Err(EngramError::validation("Category must not be empty"));
            }
            entry.category = category.clone();
        }
        if let Some(source) = &self.source {
            entry.metadata.source = source.clone();
        }
        if let Some(confidence) = self.confidence {
            entry.metadata.confidence = confidence;
        }
        if let Some(expires_at) = self.expires_at {
            entry.expires_at = expires_at;
        }
        if let Some(embedding) = &self.embedding {
            entry.embedding = embedding.clone();
        }
        if let Some(parent_id) = self.parent_id {
            entry.parent_id = parent_id;
        }
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn validate_confidence(confidence: f64) -> Result<()> {
    if (0.0..=1.0).contains(&confidence) {
        Ok(())
    } else {
        Err(EngramError::validation(format!(
            "Confidence {} outside [0, 1]",
            confidence
        )))
    }
}

fn validate_embedding(embedding: &[f32]) -> Result<()> {
    if embedding.is_empty() {
        return Err(EngramError::validation("Embedding must not be empty"));
    }
    if embedding.iter().any(|x| !x.is_finite()) {
        return Err(EngramError::validation("Embedding contains non-finite values"));
    }
    Ok(())
}

/// Numeric view of a JSON value; numeric strings are accepted.
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Comparable text form of a JSON value (strings are not re-quoted).
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn episodic() -> EpisodicContent {
        let mut output = Snapshot::new();
        output.insert("score".into(), json!(7.5));
        output.insert("justification".into(), json!("Strong institutions"));
        EpisodicContent {
            agent_name: "governance_agent".into(),
            subject: "Chile".into(),
            period: "2024Q1".into(),
            input: Snapshot::new(),
            output,
            execution_time: 1.2,
            success: true,
            error: None,
        }
    }

    #[test]
    fn test_kind_derived_from_content() {
        let entry = MemoryEntry::new("analysis", MemoryContent::Episodic(episodic()), "test");
        assert_eq!(entry.kind(), MemoryKind::Episodic);
        assert_eq!(entry.subject(), Some("Chile"));
        assert_eq!(entry.agent(), Some("governance_agent"));
    }

    #[test]
    fn test_content_serializes_with_kind_tag() {
        let content = MemoryContent::Episodic(episodic());
        let value = serde_json::to_value(&content).unwrap();
        assert_eq!(value["kind"], "episodic");

        let back: MemoryContent = serde_json::from_value(value).unwrap();
        assert_eq!(back, content);
    }

    #[test]
    fn test_score_and_justification() {
        let content = episodic();
        assert_eq!(content.score(), Some(7.5));
        assert_eq!(content.justification(), Some("Strong institutions"));
    }

    #[test]
    fn test_numeric_string_score() {
        let mut content = episodic();
        content.output.insert("score".into(), json!("6.0"));
        assert_eq!(content.score(), Some(6.0));
    }

    #[test]
    fn test_feedback_delta() {
        let feedback = FeedbackContent {
            feedback_kind: FeedbackKind::ScoreAdjustment,
            analysis_id: "a1".into(),
            expert_id: "e1".into(),
            original_value: json!(6.0),
            corrected_value: json!(7.5),
            reasoning: "Underweighted reforms".into(),
            impact_scope: ImpactScope::Specific,
            subject: None,
            agent: None,
            target: None,
        };
        assert_eq!(feedback.delta(), Some(1.5));
    }

    #[test]
    fn test_validate_rejects_empty_feedback_reasoning() {
        let feedback = FeedbackContent {
            feedback_kind: FeedbackKind::Validation,
            analysis_id: "a1".into(),
            expert_id: "e1".into(),
            original_value: Value::Null,
            corrected_value: Value::Null,
            reasoning: "   ".into(),
            impact_scope: ImpactScope::Specific,
            subject: None,
            agent: None,
            target: None,
        };
        let entry = MemoryEntry::new("feedback", MemoryContent::Feedback(feedback), "expert:e1");
        assert!(entry.validate().unwrap_err().is_validation());
    }

    #[test]
    fn test_validate_rejects_bad_confidence_and_embedding() {
        let entry = MemoryEntry::new("analysis", MemoryContent::Episodic(episodic()), "test")
            .with_confidence(1.5);
        assert!(entry.validate().is_err());

        let entry = MemoryEntry::new("analysis", MemoryContent::Episodic(episodic()), "test")
            .with_embedding(vec![]);
        assert!(entry.validate().is_err());
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let entry = MemoryEntry::new("analysis", MemoryContent::Episodic(episodic()), "test")
            .with_expiry(now - Duration::hours(1));
        assert!(entry.is_expired(now));
        assert!(!entry.clone().with_expiry(now + Duration::hours(1)).is_expired(now));
    }

    #[test]
    fn test_ttl_beyond_calendar_never_expires() {
        let entry = MemoryEntry::new("analysis", MemoryContent::Episodic(episodic()), "test");
        let created = entry.timestamp;

        let short = entry.clone().with_ttl(Duration::days(30));
        assert_eq!(short.expires_at, Some(created + Duration::days(30)));

        let endless = entry.with_ttl(Duration::days(1_000_000_000));
        assert_eq!(endless.expires_at, None);
        assert!(!endless.is_expired(Utc::now()));
    }

    #[test]
    fn test_record_access() {
        let mut entry = MemoryEntry::new("analysis", MemoryContent::Episodic(episodic()), "test");
        let now = Utc::now();
        entry.record_access(now);
        entry.record_access(now);
        assert_eq!(entry.metadata.access_count, 2);
        assert_eq!(entry.metadata.last_accessed, Some(now));
    }

    #[test]
    fn test_patch_leaves_entry_untouched_when_invalid() {
        let mut entry = MemoryEntry::new("analysis", MemoryContent::Episodic(episodic()), "test");
        let patch = EntryPatch {
            category: Some("renamed".into()),
            confidence: Some(2.0),
            ..Default::default()
        };
        assert!(patch.apply(&mut entry).is_err());
        assert_eq!(entry.category, "analysis");

        let patch = EntryPatch {
            confidence: Some(0.4),
            expires_at: Some(None),
            ..Default::default()
        };
        patch.apply(&mut entry).unwrap();
        assert_eq!(entry.metadata.confidence, 0.4);
    }
}
