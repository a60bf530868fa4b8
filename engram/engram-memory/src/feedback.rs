//! Expert feedback: recording, aggregation and the adjustments learned from it.

use crate::scan::{self, context_key};
use crate::stats::Summary;
use engram_core::{
    EngramError, FeedbackContent, FeedbackKind, ImpactScope, LearningConfig, MemoryContent,
    MemoryEntry, MemoryFilter, MemoryId, MemoryKind, Result,
};
use engram_storage::MemoryStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Category of stored feedback entries
pub const FEEDBACK_CATEGORY: &str = "expert_feedback";

/// Suggestions below this confidence are withheld
pub const MIN_SUGGESTION_CONFIDENCE: f64 = 0.3;

/// Occurrences at which an adjustment pattern reaches full confidence
const FULL_CONFIDENCE_OCCURRENCES: f64 = 10.0;

/// A correction submitted by an expert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSubmission {
    pub kind: FeedbackKind,
    pub analysis_id: String,
    pub expert_id: String,
    pub original_value: Value,
    pub corrected_value: Value,
    pub reasoning: String,
    pub impact_scope: ImpactScope,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
}

impl FeedbackSubmission {
    pub fn new(
        kind: FeedbackKind,
        analysis_id: impl Into<String>,
        expert_id: impl Into<String>,
        original_value: Value,
        corrected_value: Value,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            analysis_id: analysis_id.into(),
            expert_id: expert_id.into(),
            original_value,
            corrected_value,
            reasoning: reasoning.into(),
            impact_scope: ImpactScope::Specific,
            subject: None,
            agent: None,
            target: None,
        }
    }

    pub fn with_scope(mut self, scope: ImpactScope) -> Self {
        self.impact_scope = scope;
        self
    }

    /// Subject and agent of the corrected analysis
    pub fn with_context(mut self, subject: impl Into<String>, agent: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self.agent = Some(agent.into());
        self
    }

    /// Parameter targeted by a weight modification
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    fn into_entry(self) -> MemoryEntry {
        let parent = MemoryId::parse(&self.analysis_id).ok();
        let source = format!("expert:{}", self.expert_id);
        let content = FeedbackContent {
            feedback_kind: self.kind,
            analysis_id: self.analysis_id,
            expert_id: self.expert_id,
            original_value: self.original_value,
            corrected_value: self.corrected_value,
            reasoning: self.reasoning,
            impact_scope: self.impact_scope,
            subject: self.subject,
            agent: self.agent,
            target: self.target,
        };

        let entry = MemoryEntry::new(FEEDBACK_CATEGORY, MemoryContent::Feedback(content), source);
        match parent {
            Some(parent) => entry.with_parent(parent),
            None => entry,
        }
    }
}

/// Aggregate view over recorded feedback
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackStatistics {
    pub total: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub by_expert: BTreeMap<String, usize>,
    pub by_scope: BTreeMap<String, usize>,
    /// Mean `|corrected - original|` over numeric score adjustments
    pub mean_absolute_delta: Option<f64>,
}

/// Recurring score correction for one subject/agent context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentPattern {
    pub context: String,
    pub subject: Option<String>,
    pub agent: Option<String>,
    pub occurrences: usize,
    pub mean_delta: f64,
    pub min_delta: f64,
    pub max_delta: f64,
    pub std_delta: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSuggestion {
    pub current: f64,
    pub suggested: f64,
    pub delta: f64,
    pub confidence: f64,
    pub rationale: String,
}

/// Agreement of experts on one analysis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpertConsensus {
    pub analysis_id: String,
    pub total: usize,
    pub validations: usize,
    pub rejections: usize,
    pub adjustments: usize,
    pub consensus_score: f64,
    pub needs_revision: bool,
}

impl ExpertConsensus {
    fn from_feedback<'a>(
        analysis_id: &str,
        feedback: impl IntoIterator<Item = &'a FeedbackContent>,
    ) -> Self {
        let mut consensus = Self {
            analysis_id: analysis_id.to_string(),
            ..Self::default()
        };
        for content in feedback {
            consensus.total += 1;
            match content.feedback_kind {
                FeedbackKind::Validation => consensus.validations += 1,
                FeedbackKind::Rejection => consensus.rejections += 1,
                FeedbackKind::ScoreAdjustment => consensus.adjustments += 1,
                _ => {}
            }
        }
        if consensus.total > 0 {
            consensus.consensus_score = (consensus.validations as f64
                - consensus.rejections as f64)
                / consensus.total as f64;
        }
        consensus.needs_revision = consensus.rejections > consensus.validations;
        consensus
    }
}

/// How feedback is folded back into agent parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptationStrategy {
    #[default]
    WeightAdaptation,
    ThresholdTuning,
    PatternReinforcement,
}

impl AdaptationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WeightAdaptation => "weight_adaptation",
            Self::ThresholdTuning => "threshold_tuning",
            Self::PatternReinforcement => "pattern_reinforcement",
        }
    }
}

impl fmt::Display for AdaptationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdaptationStrategy {
    type Err = EngramError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "weight_adaptation" => Ok(Self::WeightAdaptation),
            "threshold_tuning" => Ok(Self::ThresholdTuning),
            "pattern_reinforcement" => Ok(Self::PatternReinforcement),
            other => Err(EngramError::validation(format!(
                "Unknown adaptation strategy '{}'",
                other
            ))),
        }
    }
}

/// Records expert feedback and learns from it
pub struct FeedbackProcessor {
    store: Arc<dyn MemoryStore>,
    learning: LearningConfig,
}

impl FeedbackProcessor {
    pub fn new(store: Arc<dyn MemoryStore>, learning: LearningConfig) -> Self {
        Self { store, learning }
    }

    /// Persist a feedback entry tagged with `expert:<id>`
    #[instrument(skip(self, submission), fields(kind = submission.kind.as_str(), expert = %submission.expert_id))]
    pub async fn record_feedback(&self, submission: FeedbackSubmission) -> Result<MemoryId> {
        if submission.reasoning.trim().is_empty() {
            return Err(EngramError::validation("Feedback reasoning must not be empty"));
        }
        if submission.expert_id.trim().is_empty() {
            return Err(EngramError::validation("Expert id must not be empty"));
        }

        let id = self.store.store(submission.into_entry()).await?;
        info!(%id, "Feedback recorded");
        Ok(id)
    }

    async fn feedback(
        &self,
        subject: Option<&str>,
        agent: Option<&str>,
        kind: Option<FeedbackKind>,
    ) -> Result<Vec<FeedbackContent>> {
        let mut filter = MemoryFilter::new().kind(MemoryKind::Feedback);
        if let Some(subject) = subject {
            filter = filter.subject(subject);
        }
        if let Some(agent) = agent {
            filter = filter.agent(agent);
        }

        let entries = scan::recent(self.store.as_ref(), filter, self.learning.scan_limit).await?;
        let feedback: Vec<FeedbackContent> = entries
            .into_iter()
            .filter_map(|entry| match entry.content {
                MemoryContent::Feedback(content) => Some(content),
                _ => None,
            })
            .filter(|content| kind.is_none_or(|k| content.feedback_kind == k))
            .collect();
        debug!(count = feedback.len(), "Feedback loaded");
        Ok(feedback)
    }

    /// Counts by kind, expert and scope plus the mean absolute score delta
    pub async fn feedback_statistics(
        &self,
        subject: Option<&str>,
        agent: Option<&str>,
        kind: Option<FeedbackKind>,
    ) -> Result<FeedbackStatistics> {
        let feedback = self.feedback(subject, agent, kind).await?;

        let mut stats = FeedbackStatistics {
            total: feedback.len(),
            ..FeedbackStatistics::default()
        };
        let mut deltas = Vec::new();
        for content in &feedback {
            *stats
                .by_kind
                .entry(content.feedback_kind.as_str().to_string())
                .or_insert(0) += 1;
            *stats.by_expert.entry(content.expert_id.clone()).or_insert(0) += 1;
            *stats
                .by_scope
                .entry(content.impact_scope.as_str().to_string())
                .or_insert(0) += 1;
            if content.feedback_kind == FeedbackKind::ScoreAdjustment {
                if let Some(delta) = content.delta() {
                    deltas.push(delta.abs());
                }
            }
        }
        stats.mean_absolute_delta = Summary::of(&deltas).map(|s| s.mean);
        Ok(stats)
    }

    /// Score-adjustment deltas grouped per subject/agent context, most
    /// confident first
    #[instrument(skip(self))]
    pub async fn extract_score_adjustment_patterns(
        &self,
        subject: Option<&str>,
        agent: Option<&str>,
        min_occurrences: usize,
    ) -> Result<Vec<AdjustmentPattern>> {
        let feedback = self
            .feedback(subject, agent, Some(FeedbackKind::ScoreAdjustment))
            .await?;
        Ok(adjustment_patterns(&feedback, min_occurrences))
    }

    /// Suggested score for `subject`/`agent` learned from past adjustments
    #[instrument(skip(self))]
    pub async fn suggest_score_adjustment(
        &self,
        subject: &str,
        agent: &str,
        current_score: f64,
    ) -> Result<Option<ScoreSuggestion>> {
        let patterns = self
            .extract_score_adjustment_patterns(
                Some(subject),
                Some(agent),
                self.learning.min_feedback_count,
            )
            .await?;
        Ok(patterns
            .first()
            .and_then(|best| suggestion(best, current_score, &self.learning)))
    }

    /// Validation/rejection balance for one analysis
    pub async fn expert_consensus(&self, analysis_id: &str) -> Result<ExpertConsensus> {
        let feedback = self.feedback(None, None, None).await?;
        Ok(ExpertConsensus::from_feedback(
            analysis_id,
            feedback.iter().filter(|c| c.analysis_id == analysis_id),
        ))
    }

    /// Updated copy of `weights` under `strategy`
    #[instrument(skip(self, weights))]
    pub async fn apply_feedback_to_config(
        &self,
        weights: &BTreeMap<String, f64>,
        strategy: AdaptationStrategy,
    ) -> Result<BTreeMap<String, f64>> {
        match strategy {
            AdaptationStrategy::WeightAdaptation => {
                let feedback = self
                    .feedback(None, None, Some(FeedbackKind::WeightModification))
                    .await?;
                Ok(adapt_weights(weights, &feedback, &self.learning))
            }
            AdaptationStrategy::ThresholdTuning | AdaptationStrategy::PatternReinforcement => {
                debug!("Adaptation strategy leaves weights unchanged");
                Ok(weights.clone())
            }
        }
    }
}

/// Group score-adjustment deltas by context; confidence = min(n / 10, 1)
pub fn adjustment_patterns(
    feedback: &[FeedbackContent],
    min_occurrences: usize,
) -> Vec<AdjustmentPattern> {
    let mut groups: HashMap<String, (Option<&str>, Option<&str>, Vec<f64>)> = HashMap::new();
    for content in feedback
        .iter()
        .filter(|c| c.feedback_kind == FeedbackKind::ScoreAdjustment)
    {
        let Some(delta) = content.delta() else {
            continue;
        };
        let subject = content.subject.as_deref();
        let agent = content.agent.as_deref();
        groups
            .entry(context_key(subject, agent))
            .or_insert_with(|| (subject, agent, Vec::new()))
            .2
            .push(delta);
    }

    let mut patterns: Vec<AdjustmentPattern> = groups
        .into_iter()
        .filter(|(_, (_, _, deltas))| deltas.len() >= min_occurrences.max(1))
        .filter_map(|(context, (subject, agent, deltas))| {
            let summary = Summary::of(&deltas)?;
            Some(AdjustmentPattern {
                context,
                subject: subject.map(str::to_string),
                agent: agent.map(str::to_string),
                occurrences: summary.count,
                mean_delta: summary.mean,
                min_delta: summary.min,
                max_delta: summary.max,
                std_delta: summary.std,
                confidence: (summary.count as f64 / FULL_CONFIDENCE_OCCURRENCES).min(1.0),
            })
        })
        .collect();

    patterns.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.context.cmp(&b.context))
    });
    patterns
}

/// Apply `pattern` to `current`; `None` below [`MIN_SUGGESTION_CONFIDENCE`]
pub fn suggestion(
    pattern: &AdjustmentPattern,
    current: f64,
    learning: &LearningConfig,
) -> Option<ScoreSuggestion> {
    if pattern.confidence < MIN_SUGGESTION_CONFIDENCE {
        return None;
    }
    let suggested = learning.score_scale.clamp(current + pattern.mean_delta);
    Some(ScoreSuggestion {
        current,
        suggested,
        delta: suggested - current,
        confidence: pattern.confidence,
        rationale: format!(
            "Experts adjusted {} scores by {:+.2} on average across {} corrections",
            if pattern.context.is_empty() { "these" } else { pattern.context.as_str() },
            pattern.mean_delta,
            pattern.occurrences
        ),
    })
}

/// Weight adaptation: `max(0, w + learning_rate * mean_delta)` for every
/// existing weight with enough targeted modifications
pub fn adapt_weights(
    weights: &BTreeMap<String, f64>,
    feedback: &[FeedbackContent],
    learning: &LearningConfig,
) -> BTreeMap<String, f64> {
    let mut deltas: HashMap<&str, Vec<f64>> = HashMap::new();
    for content in feedback
        .iter()
        .filter(|c| c.feedback_kind == FeedbackKind::WeightModification)
    {
        if let (Some(target), Some(delta)) = (content.target.as_deref(), content.delta()) {
            deltas.entry(target).or_default().push(delta);
        }
    }

    let mut adapted = weights.clone();
    for (target, values) in deltas {
        if values.len() < learning.min_feedback_count {
            continue;
        }
        let (Some(weight), Some(summary)) = (adapted.get_mut(target), Summary::of(&values)) else {
            continue;
        };
        let updated = (*weight + learning.learning_rate * summary.mean).max(0.0);
        debug!(parameter = target, from = *weight, to = updated, "Weight adapted");
        *weight = updated;
    }
    adapted
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    fn adjustment(subject: &str, agent: &str, original: f64, corrected: f64) -> FeedbackContent {
        FeedbackContent {
            feedback_kind: FeedbackKind::ScoreAdjustment,
            analysis_id: "a-1".into(),
            expert_id: "e-1".into(),
            original_value: json!(original),
            corrected_value: json!(corrected),
            reasoning: "Too low".into(),
            impact_scope: ImpactScope::Specific,
            subject: Some(subject.into()),
            agent: Some(agent.into()),
            target: None,
        }
    }

    fn verdict(kind: FeedbackKind) -> FeedbackContent {
        FeedbackContent {
            feedback_kind: kind,
            ..adjustment("Peru", "risk", 5.0, 5.0)
        }
    }

    fn weight_change(target: &str, delta: f64) -> FeedbackContent {
        FeedbackContent {
            feedback_kind: FeedbackKind::WeightModification,
            target: Some(target.into()),
            ..adjustment("Peru", "risk", 1.0, 1.0 + delta)
        }
    }

    #[test]
    fn test_adjustment_pattern_confidence() {
        let feedback = vec![
            adjustment("Peru", "risk", 6.0, 6.5),
            adjustment("Peru", "risk", 6.0, 6.5),
            adjustment("Peru", "risk", 6.0, 7.0),
            adjustment("Chile", "risk", 5.0, 4.0),
        ];
        let patterns = adjustment_patterns(&feedback, 3);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].context, "subject:Peru|agent:risk");
        assert_relative_eq!(patterns[0].mean_delta, 2.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(patterns[0].confidence, 0.3);
    }

    #[test]
    fn test_suggestion_clamps_to_scale() {
        let pattern = AdjustmentPattern {
            context: "subject:Peru|agent:risk".into(),
            subject: Some("Peru".into()),
            agent: Some("risk".into()),
            occurrences: 10,
            mean_delta: 2.0,
            min_delta: 2.0,
            max_delta: 2.0,
            std_delta: 0.0,
            confidence: 1.0,
        };
        let suggestion = suggestion(&pattern, 9.5, &LearningConfig::default()).unwrap();
        assert_relative_eq!(suggestion.suggested, 10.0);
        assert_relative_eq!(suggestion.delta, 0.5);
    }

    #[test]
    fn test_low_confidence_suggestion_withheld() {
        let pattern = AdjustmentPattern {
            context: String::new(),
            subject: None,
            agent: None,
            occurrences: 2,
            mean_delta: 1.0,
            min_delta: 1.0,
            max_delta: 1.0,
            std_delta: 0.0,
            confidence: 0.2,
        };
        assert!(suggestion(&pattern, 5.0, &LearningConfig::default()).is_none());
    }

    #[test]
    fn test_consensus() {
        let feedback = vec![
            verdict(FeedbackKind::Validation),
            verdict(FeedbackKind::Validation),
            verdict(FeedbackKind::Validation),
            verdict(FeedbackKind::Rejection),
        ];
        let consensus = ExpertConsensus::from_feedback("a-1", &feedback);
        assert_eq!(consensus.total, 4);
        assert_relative_eq!(consensus.consensus_score, 0.5);
        assert!(!consensus.needs_revision);

        let empty = ExpertConsensus::from_feedback("a-2", &Vec::<FeedbackContent>::new());
        assert_eq!(empty.total, 0);
        assert_eq!(empty.consensus_score, 0.0);
        assert!(!empty.needs_revision);
    }

    #[test]
    fn test_adapt_weights() {
        let weights: BTreeMap<String, f64> =
            [("gdp".to_string(), 0.5), ("debt".to_string(), 0.05)].into_iter().collect();
        let feedback = vec![
            weight_change("gdp", 0.2),
            weight_change("gdp", 0.4),
            weight_change("gdp", 0.3),
            weight_change("debt", -1.0),
            weight_change("debt", -1.0),
            weight_change("debt", -1.0),
            weight_change("unknown", 1.0),
            weight_change("unknown", 1.0),
            weight_change("unknown", 1.0),
        ];
        let adapted = adapt_weights(&weights, &feedback, &LearningConfig::default());
        assert_relative_eq!(adapted["gdp"], 0.53, epsilon = 1e-9);
        assert_eq!(adapted["debt"], 0.0);
        assert!(!adapted.contains_key("unknown"));
    }

    #[test]
    fn test_adapt_weights_needs_enough_feedback() {
        let weights: BTreeMap<String, f64> = [("gdp".to_string(), 0.5)].into_iter().collect();
        let feedback = vec![weight_change("gdp", 0.2), weight_change("gdp", 0.2)];
        let adapted = adapt_weights(&weights, &feedback, &LearningConfig::default());
        assert_eq!(adapted, weights);
    }

    #[test]
    fn test_submission_entry() {
        let analysis = MemoryId::new();
        let entry = FeedbackSubmission::new(
            FeedbackKind::Validation,
            analysis.to_string(),
            "alice",
            Value::Null,
            Value::Null,
            "Looks right",
        )
        .into_entry();
        assert_eq!(entry.metadata.source, "expert:alice");
        assert_eq!(entry.parent_id, Some(analysis));
        assert_eq!(entry.category, FEEDBACK_CATEGORY);

        let unlinked = FeedbackSubmission::new(
            FeedbackKind::Validation,
            "external-42",
            "alice",
            Value::Null,
            Value::Null,
            "Looks right",
        )
        .into_entry();
        assert!(unlinked.parent_id.is_none());
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(
            "threshold_tuning".parse::<AdaptationStrategy>().unwrap(),
            AdaptationStrategy::ThresholdTuning
        );
        assert!("nope".parse::<AdaptationStrategy>().is_err());
    }
}
