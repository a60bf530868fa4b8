//! Precedent retrieval.
//!
//! Five base strategies rank past episodic entries against a subject, agent
//! and optional context; [`RetrievalStrategy::Hybrid`] fuses three of them
//! into one weighted score.

use crate::embedding::Embedder;
use crate::scan;
use chrono::{DateTime, Utc};
use engram_core::entry::value_to_text;
use engram_core::{
    EngramError, MemoryEntry, MemoryFilter, MemoryId, MemoryKind, Result, Snapshot,
};
use engram_storage::MemoryStore;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Default newest-first window for candidate scans
pub const DEFAULT_SCAN_LIMIT: usize = 5_000;

/// Weights of the hybrid fusion
pub const HYBRID_SIMILARITY_WEIGHT: f64 = 0.5;
pub const HYBRID_TEMPORAL_WEIGHT: f64 = 0.3;
pub const HYBRID_FREQUENCY_WEIGHT: f64 = 0.2;

/// Weights of the relevance re-scoring
pub const RELEVANCE_STRUCTURAL_WEIGHT: f64 = 0.7;
pub const RELEVANCE_CONTEXT_WEIGHT: f64 = 0.3;

/// Decay constant of the temporal strategy, in days
pub const TEMPORAL_DECAY_DAYS: f64 = 30.0;

/// How candidates are ranked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    /// Embedding nearest neighbours; structural when no embedding is available
    Similarity,
    /// Additive subject/agent/success/recency score
    Structural,
    /// Pure recency decay
    Temporal,
    /// Access count relative to the most accessed candidate
    Frequency,
    /// Weighted fusion of similarity, temporal and frequency
    #[default]
    Hybrid,
    /// Structural re-scored by context agreement
    Relevance,
}

impl RetrievalStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Similarity => "similarity",
            Self::Structural => "structural",
            Self::Temporal => "temporal",
            Self::Frequency => "frequency",
            Self::Hybrid => "hybrid",
            Self::Relevance => "relevance",
        }
    }
}

impl fmt::Display for RetrievalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetrievalStrategy {
    type Err = EngramError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "similarity" => Ok(Self::Similarity),
            "structural" => Ok(Self::Structural),
            "temporal" => Ok(Self::Temporal),
            "frequency" => Ok(Self::Frequency),
            "hybrid" => Ok(Self::Hybrid),
            "relevance" => Ok(Self::Relevance),
            other => Err(EngramError::validation(format!(
                "Unknown retrieval strategy '{}'",
                other
            ))),
        }
    }
}

/// A retrieved precedent and its score under the strategy that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarMatch {
    pub entry: MemoryEntry,
    pub score: f64,
    pub strategy: RetrievalStrategy,
}

/// Bucketed mean score of a match set
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    None,
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl ConfidenceLevel {
    pub fn from_score(mean: f64) -> Self {
        match mean {
            m if m < 0.3 => Self::VeryLow,
            m if m < 0.5 => Self::Low,
            m if m < 0.7 => Self::Medium,
            m if m < 0.9 => Self::High,
            _ => Self::VeryHigh,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::VeryLow => "very_low",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::VeryHigh => "very_high",
        }
    }
}

/// An output value shared by several precedents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonPattern {
    pub attribute: String,
    pub value: String,
    pub frequency: usize,
    pub confidence: f64,
}

/// Retrieval of similar past analyses
pub struct SimilarityEngine {
    store: Arc<dyn MemoryStore>,
    embedder: Embedder,
    scan_limit: usize,
}

impl SimilarityEngine {
    pub fn new(store: Arc<dyn MemoryStore>, embedder: Embedder) -> Self {
        Self {
            store,
            embedder,
            scan_limit: DEFAULT_SCAN_LIMIT,
        }
    }

    pub fn with_scan_limit(mut self, scan_limit: usize) -> Self {
        self.scan_limit = scan_limit.max(1);
        self
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    /// Embed text through the configured provider; never fails
    pub async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        self.embedder.embed(text).await
    }

    /// Rank past episodic entries for `subject`/`agent` under `strategy`
    #[instrument(skip(self, context), fields(strategy = %strategy))]
    pub async fn find_similar(
        &self,
        subject: &str,
        agent: &str,
        context: &Snapshot,
        top_k: usize,
        strategy: RetrievalStrategy,
    ) -> Result<Vec<SimilarMatch>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let now = Utc::now();

        let matches = match strategy {
            RetrievalStrategy::Similarity => {
                self.similarity(subject, agent, context, top_k, now).await?
            }
            RetrievalStrategy::Structural => {
                let candidates = self.candidates(subject).await?;
                rank(structural(&candidates, subject, agent, now), top_k)
            }
            RetrievalStrategy::Temporal => {
                let candidates = self.candidates(subject).await?;
                rank(temporal(&candidates, now), top_k)
            }
            RetrievalStrategy::Frequency => {
                let candidates = self.candidates(subject).await?;
                rank(frequency(&candidates), top_k)
            }
            RetrievalStrategy::Hybrid => {
                let by_similarity = self.similarity(subject, agent, context, top_k, now).await?;
                let candidates = self.candidates(subject).await?;
                let by_recency = rank(temporal(&candidates, now), top_k);
                let by_frequency = rank(frequency(&candidates), top_k);
                fuse_hybrid(by_similarity, by_recency, by_frequency, top_k)
            }
            RetrievalStrategy::Relevance => {
                let candidates = self.candidates(subject).await?;
                let pool = top_k.saturating_mul(2);
                let base = rank(structural(&candidates, subject, agent, now), pool);
                rank(rescore_by_context(base, context), top_k)
            }
        };

        debug!(count = matches.len(), "Similar analyses found");
        Ok(matches)
    }

    async fn similarity(
        &self,
        subject: &str,
        agent: &str,
        context: &Snapshot,
        top_k: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<SimilarMatch>> {
        let query = describe_query(subject, agent, context);
        let Some(embedding) = self.embedder.embed(&query).await else {
            debug!("No query embedding, using structural retrieval");
            let candidates = self.candidates(subject).await?;
            return Ok(rank(structural(&candidates, subject, agent, now), top_k));
        };

        let filter = MemoryFilter::new().kind(MemoryKind::Episodic);
        let neighbours = self.store.search_similar(&embedding, top_k, &filter).await?;
        Ok(neighbours
            .into_iter()
            .map(|scored| SimilarMatch {
                score: f64::from(scored.similarity),
                entry: scored.entry,
                strategy: RetrievalStrategy::Similarity,
            })
            .collect())
    }

    /// Subject-filtered episodic window
    async fn candidates(&self, subject: &str) -> Result<Vec<MemoryEntry>> {
        let mut filter = MemoryFilter::new().kind(MemoryKind::Episodic);
        if !subject.is_empty() {
            filter = filter.subject(subject);
        }
        scan::recent(self.store.as_ref(), filter, self.scan_limit).await
    }

    /// Bucketed mean score of `matches`
    pub fn confidence(matches: &[SimilarMatch]) -> ConfidenceLevel {
        if matches.is_empty() {
            return ConfidenceLevel::None;
        }
        let mean = matches.iter().map(|m| m.score).sum::<f64>() / matches.len() as f64;
        ConfidenceLevel::from_score(mean)
    }

    /// Output values shared by at least `min_frequency` of `entries`
    pub fn common_patterns(entries: &[MemoryEntry], min_frequency: usize) -> Vec<CommonPattern> {
        if entries.is_empty() {
            return Vec::new();
        }

        let mut tally: HashMap<(String, String), usize> = HashMap::new();
        for content in entries.iter().filter_map(MemoryEntry::as_episodic) {
            for (attribute, value) in &content.output {
                *tally
                    .entry((attribute.clone(), value_to_text(value)))
                    .or_insert(0) += 1;
            }
        }

        let total = entries.len() as f64;
        let mut patterns: Vec<CommonPattern> = tally
            .into_iter()
            .filter(|(_, count)| *count >= min_frequency.max(1))
            .map(|((attribute, value), frequency)| CommonPattern {
                attribute,
                value,
                frequency,
                confidence: frequency as f64 / total,
            })
            .collect();

        patterns.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.attribute.cmp(&b.attribute))
                .then_with(|| a.value.cmp(&b.value))
        });
        patterns
    }
}

/// Query text in the same shape as an analysis description
pub fn describe_query(subject: &str, agent: &str, context: &Snapshot) -> String {
    let mut parts = vec![format!("subject: {}", subject), format!("agent: {}", agent)];
    for (key, value) in context {
        parts.push(format!("{}: {}", key, value_to_text(value)));
    }
    parts.join(" | ")
}

/// Additive structural score of one candidate
pub fn structural_score(entry: &MemoryEntry, subject: &str, agent: &str, now: DateTime<Utc>) -> f64 {
    let Some(content) = entry.as_episodic() else {
        return 0.0;
    };

    let mut score = 0.0;
    if content.subject == subject {
        score += 0.4;
    }
    if agent_matches(&content.agent_name, agent) {
        score += 0.3;
    }
    if content.success {
        score += 0.2;
    }
    let age = entry.age_days(now);
    if age < 30.0 {
        score += 0.1;
    } else if age < 90.0 {
        score += 0.05;
    }
    score
}

fn agent_matches(candidate: &str, wanted: &str) -> bool {
    if wanted.is_empty() || candidate.is_empty() {
        return false;
    }
    let candidate = candidate.to_lowercase();
    let wanted = wanted.to_lowercase();
    candidate.contains(&wanted) || wanted.contains(&candidate)
}

/// `e^(-age_days / 30)`
pub fn temporal_score(entry: &MemoryEntry, now: DateTime<Utc>) -> f64 {
    (-entry.age_days(now) / TEMPORAL_DECAY_DAYS).exp()
}

/// Fraction of `context` keys whose value equals the entry's input field
pub fn context_match(entry: &MemoryEntry, context: &Snapshot) -> f64 {
    if context.is_empty() {
        return 0.0;
    }
    let Some(content) = entry.as_episodic() else {
        return 0.0;
    };
    let matched = context
        .iter()
        .filter(|(key, wanted)| {
            content
                .input
                .get(key.as_str())
                .is_some_and(|have| have == *wanted || value_to_text(have) == value_to_text(wanted))
        })
        .count();
    matched as f64 / context.len() as f64
}

fn structural(
    candidates: &[MemoryEntry],
    subject: &str,
    agent: &str,
    now: DateTime<Utc>,
) -> Vec<SimilarMatch> {
    candidates
        .iter()
        .map(|entry| SimilarMatch {
            score: structural_score(entry, subject, agent, now),
            entry: entry.clone(),
            strategy: RetrievalStrategy::Structural,
        })
        .collect()
}

fn temporal(candidates: &[MemoryEntry], now: DateTime<Utc>) -> Vec<SimilarMatch> {
    candidates
        .iter()
        .map(|entry| SimilarMatch {
            score: temporal_score(entry, now),
            entry: entry.clone(),
            strategy: RetrievalStrategy::Temporal,
        })
        .collect()
}

fn frequency(candidates: &[MemoryEntry]) -> Vec<SimilarMatch> {
    let max_access = candidates
        .iter()
        .map(|entry| entry.metadata.access_count)
        .max()
        .unwrap_or(0);

    candidates
        .iter()
        .map(|entry| SimilarMatch {
            score: if max_access == 0 {
                0.0
            } else {
                entry.metadata.access_count as f64 / max_access as f64
            },
            entry: entry.clone(),
            strategy: RetrievalStrategy::Frequency,
        })
        .collect()
}

/// Re-score structural matches: `0.7 * structural + 0.3 * context_match`.
/// Without context the structural score stands.
fn rescore_by_context(matches: Vec<SimilarMatch>, context: &Snapshot) -> Vec<SimilarMatch> {
    matches
        .into_iter()
        .map(|m| {
            let score = if context.is_empty() {
                m.score
            } else {
                RELEVANCE_STRUCTURAL_WEIGHT * m.score
                    + RELEVANCE_CONTEXT_WEIGHT * context_match(&m.entry, context)
            };
            SimilarMatch {
                score,
                strategy: RetrievalStrategy::Relevance,
                ..m
            }
        })
        .collect()
}

/// Fold three independent rankings into one weighted score per entry id.
///
/// An id missing from a ranking contributes 0 for that strategy.
pub fn fuse_hybrid(
    similarity: Vec<SimilarMatch>,
    temporal: Vec<SimilarMatch>,
    frequency: Vec<SimilarMatch>,
    top_k: usize,
) -> Vec<SimilarMatch> {
    let weighted = [
        (similarity, HYBRID_SIMILARITY_WEIGHT),
        (temporal, HYBRID_TEMPORAL_WEIGHT),
        (frequency, HYBRID_FREQUENCY_WEIGHT),
    ];

    let accumulated = weighted
        .into_iter()
        .flat_map(|(matches, weight)| matches.into_iter().map(move |m| (m, weight)))
        .fold(HashMap::<MemoryId, SimilarMatch>::new(), |mut acc, (m, weight)| {
            let contribution = weight * m.score;
            acc.entry(m.entry.id)
                .and_modify(|fused| fused.score += contribution)
                .or_insert(SimilarMatch {
                    entry: m.entry,
                    score: contribution,
                    strategy: RetrievalStrategy::Hybrid,
                });
            acc
        });

    rank(accumulated.into_values().collect(), top_k)
}

/// Sort by score, newest first on ties, and keep `top_k`
fn rank(mut matches: Vec<SimilarMatch>, top_k: usize) -> Vec<SimilarMatch> {
    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.entry.timestamp.cmp(&a.entry.timestamp))
            .then_with(|| a.entry.id.cmp(&b.entry.id))
    });
    matches.truncate(top_k);
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::Duration;
    use engram_core::{EpisodicContent, MemoryContent};
    use serde_json::json;

    fn analysis(subject: &str, agent: &str, age_days: i64, success: bool) -> MemoryEntry {
        let mut input = Snapshot::new();
        input.insert("region".into(), json!("andes"));
        input.insert("year".into(), json!(2024));
        MemoryEntry::new(
            "analysis",
            MemoryContent::Episodic(EpisodicContent {
                agent_name: agent.into(),
                subject: subject.into(),
                period: "2024".into(),
                input,
                output: Snapshot::new(),
                execution_time: 0.2,
                success,
                error: None,
            }),
            "test",
        )
        .with_timestamp(Utc::now() - Duration::days(age_days))
    }

    fn matched(entry: &MemoryEntry, score: f64, strategy: RetrievalStrategy) -> SimilarMatch {
        SimilarMatch {
            entry: entry.clone(),
            score,
            strategy,
        }
    }

    #[test]
    fn test_structural_score_components() {
        let now = Utc::now();
        let fresh = analysis("Peru", "political_risk_agent", 1, true);
        assert_relative_eq!(structural_score(&fresh, "Peru", "political_risk", now), 1.0, epsilon = 1e-9);

        let mid = analysis("Peru", "fiscal_agent", 45, true);
        assert_relative_eq!(structural_score(&mid, "Peru", "political_risk", now), 0.65, epsilon = 1e-9);

        let old_failed = analysis("Chile", "fiscal_agent", 200, false);
        assert_relative_eq!(structural_score(&old_failed, "Peru", "fiscal_agent", now), 0.3, epsilon = 1e-9);
    }

    #[test]
    fn test_temporal_decay() {
        let now = Utc::now();
        let entry = analysis("Peru", "a", 30, true);
        assert_relative_eq!(temporal_score(&entry, now), (-1.0f64).exp(), epsilon = 1e-4);
    }

    #[test]
    fn test_frequency_relative_to_max() {
        let mut busy = analysis("Peru", "a", 1, true);
        busy.metadata.access_count = 4;
        let mut quiet = analysis("Peru", "a", 1, true);
        quiet.metadata.access_count = 1;
        let scores = frequency(&[busy, quiet]);
        assert_relative_eq!(scores[0].score, 1.0);
        assert_relative_eq!(scores[1].score, 0.25);

        let never = frequency(&[analysis("Peru", "a", 1, true)]);
        assert_eq!(never[0].score, 0.0);
    }

    #[test]
    fn test_hybrid_missing_strategy_counts_as_zero() {
        let entry = analysis("Peru", "a", 1, true);
        let fused = fuse_hybrid(
            vec![matched(&entry, 0.8, RetrievalStrategy::Similarity)],
            Vec::new(),
            vec![matched(&entry, 0.5, RetrievalStrategy::Frequency)],
            5,
        );
        assert_eq!(fused.len(), 1);
        assert_relative_eq!(fused[0].score, 0.50, epsilon = 1e-12);
        assert_eq!(fused[0].strategy, RetrievalStrategy::Hybrid);
    }

    #[test]
    fn test_hybrid_unions_and_ranks() {
        let a = analysis("Peru", "a", 1, true);
        let b = analysis("Peru", "a", 2, true);
        let fused = fuse_hybrid(
            vec![matched(&a, 0.2, RetrievalStrategy::Similarity)],
            vec![matched(&b, 1.0, RetrievalStrategy::Temporal)],
            Vec::new(),
            1,
        );
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].entry.id, b.id);
        assert_relative_eq!(fused[0].score, 0.3);
    }

    #[test]
    fn test_context_match() {
        let entry = analysis("Peru", "a", 1, true);
        let mut context = Snapshot::new();
        context.insert("region".into(), json!("andes"));
        context.insert("year".into(), json!("2024"));
        context.insert("sector".into(), json!("mining"));
        assert_relative_eq!(context_match(&entry, &context), 2.0 / 3.0);
        assert_eq!(context_match(&entry, &Snapshot::new()), 0.0);
    }

    #[test]
    fn test_relevance_rescoring() {
        let entry = analysis("Peru", "a", 1, true);
        let mut context = Snapshot::new();
        context.insert("region".into(), json!("andes"));
        let rescored = rescore_by_context(vec![matched(&entry, 0.9, RetrievalStrategy::Structural)], &context);
        assert_relative_eq!(rescored[0].score, 0.93, epsilon = 1e-9);
        assert_eq!(rescored[0].strategy, RetrievalStrategy::Relevance);
    }

    #[test]
    fn test_confidence_buckets() {
        let entry = analysis("Peru", "a", 1, true);
        assert_eq!(SimilarityEngine::confidence(&[]), ConfidenceLevel::None);
        let level = |score| SimilarityEngine::confidence(&[matched(&entry, score, RetrievalStrategy::Hybrid)]);
        assert_eq!(level(0.1), ConfidenceLevel::VeryLow);
        assert_eq!(level(0.3), ConfidenceLevel::Low);
        assert_eq!(level(0.69), ConfidenceLevel::Medium);
        assert_eq!(level(0.7), ConfidenceLevel::High);
        assert_eq!(level(0.95), ConfidenceLevel::VeryHigh);
    }

    #[test]
    fn test_common_patterns() {
        let with_output = |rating: &str| {
            let mut entry = analysis("Peru", "a", 1, true);
            if let MemoryContent::Episodic(content) = &mut entry.content {
                content.output.insert("rating".into(), json!(rating));
                content.output.insert("score".into(), json!(6));
            }
            entry
        };
        let entries = vec![with_output("BB"), with_output("BB"), with_output("B"), with_output("BB")];
        let patterns = SimilarityEngine::common_patterns(&entries, 3);

        assert_eq!(patterns.len(), 2);
        assert_eq!(patterns[0].attribute, "score");
        assert_eq!(patterns[0].value, "6");
        assert_relative_eq!(patterns[0].confidence, 1.0);
        assert_eq!(patterns[1].value, "BB");
        assert_relative_eq!(patterns[1].confidence, 0.75);
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("HYBRID".parse::<RetrievalStrategy>().unwrap(), RetrievalStrategy::Hybrid);
        assert!("nearest".parse::<RetrievalStrategy>().is_err());
        assert_eq!(RetrievalStrategy::default(), RetrievalStrategy::Hybrid);
    }
}
