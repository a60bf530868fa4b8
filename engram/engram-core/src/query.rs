//! Query and filter descriptors shared by every store backend.

use crate::entry::{MemoryEntry, MemoryKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of results returned by a search
pub const DEFAULT_TOP_K: usize = 10;

/// Default similarity threshold applied when a query carries text or an embedding
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.0;

/// Inclusive creation-time window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn since(start: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.is_none_or(|start| at >= start) && self.end.is_none_or(|end| at <= end)
    }
}

/// Structural filters. Empty lists mean "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryFilter {
    #[serde(default)]
    pub kinds: Vec<MemoryKind>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default)]
    pub time_range: Option<TimeRange>,
    #[serde(default)]
    pub include_expired: bool,
}

impl MemoryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: MemoryKind) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.categories.push(category.into());
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subjects.push(subject.into());
        self
    }

    pub fn agent(mut self, agent: impl Into<String>) -> Self {
        self.agents.push(agent.into());
        self
    }

    pub fn time_range(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }

    pub fn include_expired(mut self, include: bool) -> Self {
        self.include_expired = include;
        self
    }

    /// Whether `entry` passes every supplied constraint at time `now`.
    pub fn matches(&self, entry: &MemoryEntry, now: DateTime<Utc>) -> bool {
        if !self.include_expired && entry.is_expired(now) {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&entry.kind()) {
            return false;
        }
        if !self.categories.is_empty() && !self.categories.iter().any(|c| c == &entry.category) {
            return false;
        }
        if !self.subjects.is_empty() {
            match entry.subject() {
                Some(subject) if self.subjects.iter().any(|s| s == subject) => {}
                _ => return false,
            }
        }
        if !self.agents.is_empty() {
            match entry.agent() {
                Some(agent) if self.agents.iter().any(|a| a == agent) => {}
                _ => return false,
            }
        }
        if let Some(range) = &self.time_range {
            if !range.contains(entry.timestamp) {
                return false;
            }
        }
        true
    }
}

/// Search descriptor: filters plus optional similarity criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryQuery {
    #[serde(default)]
    pub filter: MemoryFilter,
    #[serde(default)]
    pub query_text: Option<String>,
    #[serde(default)]
    pub query_embedding: Option<Vec<f32>>,
    pub similarity_threshold: f32,
    pub top_k: usize,
}

impl Default for MemoryQuery {
    fn default() -> Self {
        Self {
            filter: MemoryFilter::default(),
            query_text: None,
            query_embedding: None,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            top_k: DEFAULT_TOP_K,
        }
    }
}

impl MemoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: MemoryFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.query_text = Some(text.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.query_embedding = Some(embedding);
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_limit(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Whether the query asks for similarity filtering at all.
    pub fn has_similarity_criteria(&self) -> bool {
        self.query_embedding.is_some()
            || self
                .query_text
                .as_deref()
                .is_some_and(|t| !t.trim().is_empty())
    }
}
