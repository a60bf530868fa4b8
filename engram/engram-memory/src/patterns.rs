//! Statistical regularities across historical analyses.
//!
//! Three scoring analyses run over the same bounded window of episodic
//! entries: score clustering, input/score correlation and per-context score
//! ranges. A fourth analysis mines recurring phrases from justifications.

use crate::scan::{self, context_key};
use crate::stats::{Summary, pearson};
use chrono::{Duration, Utc};
use engram_core::entry::value_to_text;
use engram_core::{
    EpisodicContent, LearningConfig, MemoryContent, MemoryEntry, MemoryFilter, MemoryId,
    MemoryKind, ProceduralContent, Result, Snapshot, TimeRange,
};
use engram_storage::MemoryStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use unicode_segmentation::UnicodeSegmentation;

/// Maximum phrases reported by [`PatternRecognizer::reasoning_patterns`]
pub const MAX_PHRASES: usize = 10;

/// Category of procedural entries synthesized from patterns
pub const PROCEDURAL_CATEGORY: &str = "pattern";

const CLUSTER_CONFIDENCE_BOOST: f64 = 1.5;
const CATEGORICAL_MIN_SPREAD: f64 = 1.0;
const NUMERIC_MIN_CORRELATION: f64 = 0.5;
const RANGE_MAX_STD: f64 = 1.5;
const MIN_TOKEN_CHARS: usize = 3;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "has", "have", "been", "from", "with", "this", "that", "these", "those",
    "they", "them", "their", "there", "which", "while", "will", "would", "could", "should",
    "into", "than", "then", "also", "its", "were", "being", "more", "most", "such",
    "very", "over", "under", "about", "due", "other", "some", "what", "when", "where", "who",
];

// ============================================================================
// Pattern types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Clustering,
    Correlation,
    ContextRange,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clustering => "clustering",
            Self::Correlation => "correlation",
            Self::ContextRange => "context_range",
        }
    }
}

/// Scores sharing one half-point bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreCluster {
    pub center: f64,
    pub count: usize,
    /// Share of all scored entries, in `[0, 1]`
    pub percentage: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationDirection {
    Positive,
    Negative,
}

/// How an input field relates to the produced score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field_type", rename_all = "snake_case")]
pub enum FieldCorrelation {
    Numeric {
        field: String,
        coefficient: f64,
        direction: CorrelationDirection,
        strength: f64,
        samples: usize,
    },
    Categorical {
        field: String,
        category_means: BTreeMap<String, f64>,
        spread: f64,
        strength: f64,
        samples: usize,
    },
}

impl FieldCorrelation {
    pub fn field(&self) -> &str {
        match self {
            Self::Numeric { field, .. } | Self::Categorical { field, .. } => field,
        }
    }

    pub fn strength(&self) -> f64 {
        match self {
            Self::Numeric { strength, .. } | Self::Categorical { strength, .. } => *strength,
        }
    }
}

/// Score statistics of one subject/agent context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRange {
    pub context: String,
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std: f64,
    pub consistency: f64,
}

/// Pattern-specific findings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "pattern_type", rename_all = "snake_case")]
pub enum PatternDetail {
    Clustering { clusters: Vec<ScoreCluster> },
    Correlation { correlations: Vec<FieldCorrelation> },
    ContextRange { ranges: Vec<ContextRange> },
}

/// A recognized regularity in historical scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringPattern {
    pub name: String,
    pub confidence: f64,
    pub sample_size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub detail: PatternDetail,
}

impl ScoringPattern {
    pub fn pattern_type(&self) -> PatternType {
        match self.detail {
            PatternDetail::Clustering { .. } => PatternType::Clustering,
            PatternDetail::Correlation { .. } => PatternType::Correlation,
            PatternDetail::ContextRange { .. } => PatternType::ContextRange,
        }
    }

    /// One-line, human-readable recommendation
    pub fn recommendation(&self) -> String {
        match &self.detail {
            PatternDetail::Clustering { clusters } => match clusters.first() {
                Some(top) => format!(
                    "Scores cluster around {:.1} in {:.0}% of cases",
                    top.center,
                    top.percentage * 100.0
                ),
                None => "No dominant score cluster".to_string(),
            },
            PatternDetail::Correlation { correlations } => match correlations.first() {
                Some(FieldCorrelation::Numeric {
                    field,
                    coefficient,
                    direction,
                    ..
                }) => format!(
                    "Score {} with {} (r = {:.2})",
                    match direction {
                        CorrelationDirection::Positive => "rises",
                        CorrelationDirection::Negative => "falls",
                    },
                    field,
                    coefficient
                ),
                Some(FieldCorrelation::Categorical { field, spread, .. }) => format!(
                    "Mean score shifts by {:.1} points across values of {}",
                    spread, field
                ),
                None => "No significant input correlation".to_string(),
            },
            PatternDetail::ContextRange { ranges } => match ranges.first() {
                Some(range) => format!(
                    "Scores for {} stay within {:.1}-{:.1} (mean {:.1})",
                    range.context, range.min, range.max, range.mean
                ),
                None => "No consistent score range".to_string(),
            },
        }
    }
}

/// A recurring justification phrase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhrasePattern {
    pub phrase: String,
    pub frequency: usize,
    /// Share of texts containing the phrase, in `[0, 1]`
    pub percentage_of_texts: f64,
}

// ============================================================================
// Recognizer
// ============================================================================

/// Mines patterns from episodic history
pub struct PatternRecognizer {
    store: Arc<dyn MemoryStore>,
    min_occurrences: usize,
    min_confidence: f64,
    scan_limit: usize,
}

impl PatternRecognizer {
    pub fn new(store: Arc<dyn MemoryStore>, learning: &LearningConfig) -> Self {
        Self {
            store,
            min_occurrences: learning.min_pattern_occurrences.max(1),
            min_confidence: learning.min_pattern_confidence,
            scan_limit: learning.scan_limit.max(1),
        }
    }

    /// Clustering, correlation and context-range patterns for the given slice
    /// of history. Patterns below the configured confidence are dropped.
    #[instrument(skip(self))]
    pub async fn scoring_patterns(
        &self,
        subject: Option<&str>,
        agent: Option<&str>,
        time_window: Option<Duration>,
    ) -> Result<Vec<ScoringPattern>> {
        let mut filter = episodic_filter(subject, agent);
        // A window reaching past the earliest representable instant is unbounded
        if let Some(since) = time_window.and_then(|window| Utc::now().checked_sub_signed(window)) {
            filter = filter.time_range(TimeRange::since(since));
        }
        let entries = scan::recent(self.store.as_ref(), filter, self.scan_limit).await?;

        let scored: Vec<(&EpisodicContent, f64)> = entries
            .iter()
            .filter_map(MemoryEntry::as_episodic)
            .filter_map(|content| content.score().map(|score| (content, score)))
            .collect();
        debug!(entries = entries.len(), scored = scored.len(), "Scanning for scoring patterns");

        let key = context_key(subject, agent);
        let label = if key.is_empty() { "global".to_string() } else { key };
        let build = |pattern_type: PatternType, confidence: f64, detail: PatternDetail| ScoringPattern {
            name: format!("{}:{}", pattern_type.as_str(), label),
            confidence,
            sample_size: scored.len(),
            subject: subject.map(str::to_string),
            agent: agent.map(str::to_string),
            detail,
        };

        let scores: Vec<f64> = scored.iter().map(|(_, score)| *score).collect();
        let mut patterns = Vec::new();

        if let Some((clusters, confidence)) = cluster_scores(&scores, self.min_occurrences) {
            patterns.push(build(
                PatternType::Clustering,
                confidence,
                PatternDetail::Clustering { clusters },
            ));
        }
        if let Some((correlations, confidence)) = correlate_inputs(&scored, self.min_occurrences) {
            patterns.push(build(
                PatternType::Correlation,
                confidence,
                PatternDetail::Correlation { correlations },
            ));
        }
        if let Some((ranges, confidence)) = context_ranges(&scored, self.min_occurrences) {
            patterns.push(build(
                PatternType::ContextRange,
                confidence,
                PatternDetail::ContextRange { ranges },
            ));
        }

        patterns.retain(|pattern| pattern.confidence >= self.min_confidence);
        info!(count = patterns.len(), "Scoring patterns recognized");
        Ok(patterns)
    }

    /// Most frequent phrases in justification texts
    #[instrument(skip(self))]
    pub async fn reasoning_patterns(
        &self,
        agent: Option<&str>,
        subject: Option<&str>,
    ) -> Result<Vec<PhrasePattern>> {
        let entries = scan::recent(
            self.store.as_ref(),
            episodic_filter(subject, agent),
            self.scan_limit,
        )
        .await?;

        let texts: Vec<&str> = entries
            .iter()
            .filter_map(MemoryEntry::as_episodic)
            .filter_map(EpisodicContent::justification)
            .collect();

        Ok(extract_phrases(&texts, self.min_occurrences))
    }

    /// Persist `pattern` as a procedural entry carrying its recommendation
    #[instrument(skip(self, pattern, context), fields(pattern = %pattern.name))]
    pub async fn create_procedural_memory(
        &self,
        pattern: &ScoringPattern,
        context: &Snapshot,
    ) -> Result<MemoryId> {
        let mut applicability = context.clone();
        if let Some(subject) = &pattern.subject {
            applicability.insert("subject".into(), Value::String(subject.clone()));
        }
        if let Some(agent) = &pattern.agent {
            applicability.insert("agent".into(), Value::String(agent.clone()));
        }

        let confidence = pattern.confidence.clamp(0.0, 1.0);
        let content = ProceduralContent {
            pattern_name: pattern.name.clone(),
            pattern_type: pattern.pattern_type().as_str().to_string(),
            context: applicability,
            recommended_action: pattern.recommendation(),
            observed_outcome: None,
            confidence_score: confidence,
        };

        let entry = MemoryEntry::new(
            PROCEDURAL_CATEGORY,
            MemoryContent::Procedural(content),
            "pattern_recognizer",
        )
        .with_confidence(confidence);

        let id = self.store.store(entry).await?;
        info!(%id, "Procedural memory created");
        Ok(id)
    }
}

fn episodic_filter(subject: Option<&str>, agent: Option<&str>) -> MemoryFilter {
    let mut filter = MemoryFilter::new().kind(MemoryKind::Episodic);
    if let Some(subject) = subject {
        filter = filter.subject(subject);
    }
    if let Some(agent) = agent {
        filter = filter.agent(agent);
    }
    filter
}

// ============================================================================
// Analyses
// ============================================================================

/// Half-point buckets with at least `min_occurrences` members.
///
/// Returns the kept clusters (largest first) and the pattern confidence
/// `min(1, largest / total * 1.5)`, or `None` when no bucket qualifies.
pub fn cluster_scores(scores: &[f64], min_occurrences: usize) -> Option<(Vec<ScoreCluster>, f64)> {
    let finite: Vec<f64> = scores.iter().copied().filter(|s| s.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    let total = finite.len() as f64;

    let mut buckets: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
    for score in &finite {
        buckets.entry((score * 2.0).round() as i64).or_default().push(*score);
    }

    let mut clusters: Vec<ScoreCluster> = buckets
        .into_iter()
        .filter(|(_, members)| members.len() >= min_occurrences)
        .filter_map(|(bucket, members)| {
            let summary = Summary::of(&members)?;
            Some(ScoreCluster {
                center: bucket as f64 / 2.0,
                count: summary.count,
                percentage: summary.count as f64 / total,
                min: summary.min,
                max: summary.max,
            })
        })
        .collect();

    clusters.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.center.partial_cmp(&b.center).unwrap_or(Ordering::Equal))
    });

    let largest = clusters.first()?.count as f64;
    let confidence = (largest / total * CLUSTER_CONFIDENCE_BOOST).min(1.0);
    Some((clusters, confidence))
}

/// Significant relations between input fields and scores.
///
/// Fields whose every observed value is a JSON number are correlated with
/// Pearson's r; other scalar fields are treated as categories. Returns the
/// significant correlations (strongest first) and the maximum strength.
pub fn correlate_inputs(
    scored: &[(&EpisodicContent, f64)],
    min_occurrences: usize,
) -> Option<(Vec<FieldCorrelation>, f64)> {
    let mut samples: BTreeMap<&str, Vec<(&Value, f64)>> = BTreeMap::new();
    for (content, score) in scored {
        for (field, value) in &content.input {
            if matches!(value, Value::Number(_) | Value::String(_) | Value::Bool(_)) {
                samples.entry(field.as_str()).or_default().push((value, *score));
            }
        }
    }

    let mut correlations: Vec<FieldCorrelation> = samples
        .into_iter()
        .filter(|(_, values)| values.len() >= min_occurrences)
        .filter_map(|(field, values)| correlate_field(field, &values))
        .collect();

    correlations.sort_by(|a, b| {
        b.strength()
            .partial_cmp(&a.strength())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.field().cmp(b.field()))
    });

    let confidence = correlations.first()?.strength();
    Some((correlations, confidence))
}

fn correlate_field(field: &str, values: &[(&Value, f64)]) -> Option<FieldCorrelation> {
    let numeric: Option<Vec<f64>> = values.iter().map(|(value, _)| value.as_f64()).collect();
    let scores: Vec<f64> = values.iter().map(|(_, score)| *score).collect();

    if let Some(xs) = numeric {
        let r = pearson(&xs, &scores)?;
        if r.abs() < NUMERIC_MIN_CORRELATION {
            return None;
        }
        return Some(FieldCorrelation::Numeric {
            field: field.to_string(),
            coefficient: r,
            direction: if r >= 0.0 {
                CorrelationDirection::Positive
            } else {
                CorrelationDirection::Negative
            },
            strength: r.abs(),
            samples: values.len(),
        });
    }

    let mut groups: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for (value, score) in values {
        groups.entry(value_to_text(value)).or_default().push(*score);
    }
    if groups.len() < 2 {
        return None;
    }

    let category_means: BTreeMap<String, f64> = groups
        .into_iter()
        .filter_map(|(category, scores)| Some((category, Summary::of(&scores)?.mean)))
        .collect();
    let (lo, hi) = category_means
        .values()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &m| (lo.min(m), hi.max(m)));
    let spread = hi - lo;
    if spread < CATEGORICAL_MIN_SPREAD {
        return None;
    }

    Some(FieldCorrelation::Categorical {
        field: field.to_string(),
        category_means,
        spread,
        strength: (spread / 10.0).min(1.0),
        samples: values.len(),
    })
}

/// Consistent score ranges per subject/agent context.
///
/// Returns ranges sorted by consistency and the mean consistency of the top 3.
pub fn context_ranges(
    scored: &[(&EpisodicContent, f64)],
    min_occurrences: usize,
) -> Option<(Vec<ContextRange>, f64)> {
    let mut groups: HashMap<String, Vec<f64>> = HashMap::new();
    for (content, score) in scored {
        let key = context_key(Some(&content.subject), Some(&content.agent_name));
        groups.entry(key).or_default().push(*score);
    }

    let mut ranges: Vec<ContextRange> = groups
        .into_iter()
        .filter(|(_, scores)| scores.len() >= min_occurrences)
        .filter_map(|(context, scores)| {
            let summary = Summary::of(&scores)?;
            (summary.std < RANGE_MAX_STD).then(|| ContextRange {
                context,
                count: summary.count,
                mean: summary.mean,
                min: summary.min,
                max: summary.max,
                std: summary.std,
                consistency: (1.0 - summary.std / 3.0).max(0.0),
            })
        })
        .collect();

    ranges.sort_by(|a, b| {
        b.consistency
            .partial_cmp(&a.consistency)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.context.cmp(&b.context))
    });

    let top: Vec<f64> = ranges.iter().take(3).map(|r| r.consistency).collect();
    let confidence = Summary::of(&top)?.mean;
    Some((ranges, confidence))
}

fn phrase_tokens(text: &str) -> Vec<String> {
    text.unicode_words()
        .map(str::to_lowercase)
        .filter(|word| word.chars().count() >= MIN_TOKEN_CHARS && !STOP_WORDS.contains(&word.as_str()))
        .collect()
}

/// Unigrams, bigrams and trigrams occurring at least `min_occurrences` times
pub fn extract_phrases(texts: &[&str], min_occurrences: usize) -> Vec<PhrasePattern> {
    if texts.is_empty() {
        return Vec::new();
    }

    let mut frequency: HashMap<String, usize> = HashMap::new();
    let mut documents: HashMap<String, usize> = HashMap::new();

    for text in texts {
        let tokens = phrase_tokens(text);
        let mut seen: HashSet<String> = HashSet::new();
        for n in 1..=3 {
            for window in tokens.windows(n) {
                let phrase = window.join(" ");
                *frequency.entry(phrase.clone()).or_insert(0) += 1;
                seen.insert(phrase);
            }
        }
        for phrase in seen {
            *documents.entry(phrase).or_insert(0) += 1;
        }
    }

    let total = texts.len() as f64;
    let mut phrases: Vec<PhrasePattern> = frequency
        .into_iter()
        .filter(|(_, count)| *count >= min_occurrences.max(1))
        .map(|(phrase, count)| {
            let containing = documents.get(&phrase).copied().unwrap_or(0);
            PhrasePattern {
                phrase,
                frequency: count,
                percentage_of_texts: containing as f64 / total,
            }
        })
        .collect();

    phrases.sort_by(|a, b| b.frequency.cmp(&a.frequency).then_with(|| a.phrase.cmp(&b.phrase)));
    phrases.truncate(MAX_PHRASES);
    phrases
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    fn content(subject: &str, agent: &str, input: Snapshot) -> EpisodicContent {
        EpisodicContent {
            agent_name: agent.into(),
            subject: subject.into(),
            period: "2024".into(),
            input,
            output: Snapshot::new(),
            execution_time: 0.1,
            success: true,
            error: None,
        }
    }

    fn input(pairs: &[(&str, Value)]) -> Snapshot {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_clustering_reference_case() {
        let (clusters, confidence) = cluster_scores(&[5.0, 5.0, 5.0, 5.0, 7.0, 7.0], 3).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].center, 5.0);
        assert_eq!(clusters[0].count, 4);
        assert_relative_eq!(clusters[0].percentage, 4.0 / 6.0);
        assert_relative_eq!(confidence, 1.0);
    }

    #[test]
    fn test_clustering_buckets_to_half_points() {
        let (clusters, confidence) =
            cluster_scores(&[6.1, 6.2, 5.9, 6.4, 6.6, 2.0, 9.0, 1.0, 3.0, 4.0], 3).unwrap();
        assert_eq!(clusters[0].center, 6.0);
        assert_eq!(clusters[0].count, 3);
        assert_eq!((clusters[0].min, clusters[0].max), (5.9, 6.2));
        assert_relative_eq!(confidence, 0.3 * 1.5, epsilon = 1e-12);

        assert!(cluster_scores(&[1.0, 3.0, 5.0], 2).is_none());
    }

    #[test]
    fn test_numeric_correlation_perfect() {
        let contents: Vec<EpisodicContent> = (1..=5)
            .map(|i| content("Peru", "a", input(&[("inflation", json!(i))])))
            .collect();
        let scored: Vec<(&EpisodicContent, f64)> = contents
            .iter()
            .enumerate()
            .map(|(i, c)| (c, 10.0 - i as f64))
            .collect();

        let (correlations, confidence) = correlate_inputs(&scored, 3).unwrap();
        match &correlations[0] {
            FieldCorrelation::Numeric {
                coefficient,
                direction,
                ..
            } => {
                assert_relative_eq!(*coefficient, -1.0, epsilon = 1e-12);
                assert_eq!(*direction, CorrelationDirection::Negative);
            }
            other => panic!("expected numeric correlation, got {:?}", other),
        }
        assert_relative_eq!(confidence, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_categorical_correlation_spread() {
        let contents = vec![
            content("Peru", "a", input(&[("regime", json!("democracy"))])),
            content("Peru", "a", input(&[("regime", json!("democracy"))])),
            content("Peru", "a", input(&[("regime", json!("hybrid"))])),
            content("Peru", "a", input(&[("regime", json!("hybrid"))])),
        ];
        let scores = [8.0, 7.0, 4.0, 5.0];
        let scored: Vec<(&EpisodicContent, f64)> = contents.iter().zip(scores).collect();

        let (correlations, confidence) = correlate_inputs(&scored, 3).unwrap();
        match &correlations[0] {
            FieldCorrelation::Categorical { spread, category_means, .. } => {
                assert_relative_eq!(*spread, 3.0);
                assert_relative_eq!(category_means["democracy"], 7.5);
            }
            other => panic!("expected categorical correlation, got {:?}", other),
        }
        assert_relative_eq!(confidence, 0.3);
    }

    #[test]
    fn test_weak_correlation_ignored() {
        let contents = vec![
            content("Peru", "a", input(&[("regime", json!("x"))])),
            content("Peru", "a", input(&[("regime", json!("y"))])),
            content("Peru", "a", input(&[("regime", json!("x"))])),
        ];
        let scored: Vec<(&EpisodicContent, f64)> = contents.iter().zip([5.0, 5.5, 5.2]).collect();
        assert!(correlate_inputs(&scored, 3).is_none());
    }

    #[test]
    fn test_context_ranges() {
        let steady = content("Peru", "risk", Snapshot::new());
        let noisy = content("Chile", "risk", Snapshot::new());
        let mut scored: Vec<(&EpisodicContent, f64)> =
            [6.0, 6.0, 6.0].into_iter().map(|s| (&steady, s)).collect();
        scored.extend([1.0, 9.0, 5.0].into_iter().map(|s| (&noisy, s)));

        let (ranges, confidence) = context_ranges(&scored, 3).unwrap();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].context, "subject:Peru|agent:risk");
        assert_relative_eq!(ranges[0].consistency, 1.0);
        assert_relative_eq!(confidence, 1.0);
    }

    #[test]
    fn test_extract_phrases() {
        let texts = [
            "Fiscal deficit remains high",
            "The fiscal deficit widened",
            "Fiscal deficit and debt rising",
            "Strong reserves",
        ];
        let phrases = extract_phrases(&texts, 3);
        let found: Vec<&str> = phrases.iter().map(|p| p.phrase.as_str()).collect();
        assert_eq!(found, vec!["deficit", "fiscal", "fiscal deficit"]);
        assert_relative_eq!(phrases[0].percentage_of_texts, 0.75);
    }

    #[test]
    fn test_phrase_tokens_drop_stop_words_and_short_tokens() {
        assert_eq!(phrase_tokens("The GDP of it is up"), vec!["gdp".to_string()]);
    }

    #[test]
    fn test_recommendation_text() {
        let pattern = ScoringPattern {
            name: "clustering:global".into(),
            confidence: 1.0,
            sample_size: 6,
            subject: None,
            agent: None,
            detail: PatternDetail::Clustering {
                clusters: vec![ScoreCluster {
                    center: 5.0,
                    count: 4,
                    percentage: 4.0 / 6.0,
                    min: 5.0,
                    max: 5.0,
                }],
            },
        };
        assert_eq!(pattern.recommendation(), "Scores cluster around 5.0 in 67% of cases");
        assert_eq!(pattern.pattern_type(), PatternType::Clustering);
    }
}
