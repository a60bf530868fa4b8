//! Fail-soft facade over the store, similarity, pattern and feedback components.
//!
//! A [`MemoryManager`] is either enabled (backend initialized) or disabled.
//! Every public method checks that gate first, and every internal failure is
//! logged and converted into a neutral value, so callers never have to treat
//! a broken memory subsystem specially.

use crate::embedding::Embedder;
use crate::feedback::{
    AdaptationStrategy, AdjustmentPattern, ExpertConsensus, FeedbackProcessor,
    FeedbackStatistics, FeedbackSubmission, ScoreSuggestion,
};
use crate::patterns::{PatternRecognizer, PhrasePattern, ScoringPattern};
use crate::similarity::{
    CommonPattern, ConfidenceLevel, RetrievalStrategy, SimilarMatch, SimilarityEngine,
};
use chrono::Duration;
use engram_core::{
    EngramConfig, EpisodicContent, FeedbackKind, MemoryContent, MemoryEntry, MemoryId, Result,
    SemanticContent, Snapshot, StoreStatistics,
};
use engram_storage::{MemoryStore, StoreRegistry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Category of recorded analyses
pub const ANALYSIS_CATEGORY: &str = "analysis";

/// Category of recorded knowledge
pub const KNOWLEDGE_CATEGORY: &str = "knowledge";

/// One completed analysis as reported by a scoring agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub agent_name: String,
    pub subject: String,
    pub period: String,
    #[serde(default)]
    pub input: Snapshot,
    #[serde(default)]
    pub output: Snapshot,
    pub execution_time: f64,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl AnalysisRecord {
    pub fn new(
        agent_name: impl Into<String>,
        subject: impl Into<String>,
        period: impl Into<String>,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            subject: subject.into(),
            period: period.into(),
            input: Snapshot::new(),
            output: Snapshot::new(),
            execution_time: 0.0,
            success: true,
            error: None,
        }
    }

    pub fn with_input(mut self, input: Snapshot) -> Self {
        self.input = input;
        self
    }

    pub fn with_output(mut self, output: Snapshot) -> Self {
        self.output = output;
        self
    }

    /// Wall-clock execution time in seconds
    pub fn with_execution_time(mut self, seconds: f64) -> Self {
        self.execution_time = seconds;
        self
    }

    /// Mark the analysis as failed
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

impl From<AnalysisRecord> for EpisodicContent {
    fn from(record: AnalysisRecord) -> Self {
        Self {
            agent_name: record.agent_name,
            subject: record.subject,
            period: record.period,
            input: record.input,
            output: record.output,
            execution_time: record.execution_time,
            success: record.success,
            error: record.error,
        }
    }
}

struct Components {
    store: Arc<dyn MemoryStore>,
    similarity: SimilarityEngine,
    patterns: PatternRecognizer,
    feedback: FeedbackProcessor,
}

/// Entry point used by scoring agents
pub struct MemoryManager {
    config: EngramConfig,
    components: Option<Components>,
    cancel: CancellationToken,
}

impl MemoryManager {
    /// Build from configuration, creating the configured backend through
    /// `registry`. A backend that fails to start yields a disabled manager.
    pub async fn new(config: EngramConfig, registry: &StoreRegistry) -> Self {
        if !config.enabled {
            info!("Memory subsystem disabled by configuration");
            return Self::disabled(config);
        }

        match registry.create(&config.store).await {
            Ok(store) => {
                let embedder = Embedder::from_config(&config.embedding);
                Self::with_store(config, store, embedder)
            }
            Err(e) => {
                warn!("Memory subsystem disabled, backend unavailable: {}", e);
                Self::disabled(config)
            }
        }
    }

    /// Build around an already initialized store
    pub fn with_store(config: EngramConfig, store: Arc<dyn MemoryStore>, embedder: Embedder) -> Self {
        let cancel = CancellationToken::new();
        let embedder = embedder.with_cancellation(cancel.clone());
        let learning = config.learning.clone();

        let components = Components {
            similarity: SimilarityEngine::new(store.clone(), embedder)
                .with_scan_limit(learning.scan_limit),
            patterns: PatternRecognizer::new(store.clone(), &learning),
            feedback: FeedbackProcessor::new(store.clone(), learning),
            store,
        };

        info!(
            backend = components.store.backend_name(),
            embeddings = components.similarity.embedder().is_available(),
            "Memory manager ready"
        );
        Self {
            config,
            components: Some(components),
            cancel,
        }
    }

    /// A manager whose every operation returns its neutral value
    pub fn disabled(config: EngramConfig) -> Self {
        Self {
            config,
            components: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.components.is_some()
    }

    pub fn config(&self) -> &EngramConfig {
        &self.config
    }

    pub fn backend_name(&self) -> Option<&str> {
        self.active().map(|c| c.store.backend_name())
    }

    /// Token cancelling in-flight embedding calls and bulk operations
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn shutdown(&self) {
        info!("Memory manager shutting down");
        self.cancel.cancel();
    }

    fn active(&self) -> Option<&Components> {
        let components = self.components.as_ref();
        if components.is_none() {
            debug!("Memory subsystem disabled, returning neutral value");
        }
        components
    }

    // ========================================================================
    // Recording
    // ========================================================================

    /// Store an analysis as an episodic entry, embedding its description
    #[instrument(skip(self, record), fields(agent = %record.agent_name, subject = %record.subject))]
    pub async fn record_analysis(&self, record: AnalysisRecord, ttl: Option<Duration>) -> Option<MemoryId> {
        let c = self.active()?;
        let content = EpisodicContent::from(record);
        let source = format!("agent:{}", content.agent_name);
        let embedding = c.similarity.embed(&content.describe()).await;

        let mut entry = MemoryEntry::new(ANALYSIS_CATEGORY, MemoryContent::Episodic(content), source);
        if let Some(embedding) = embedding {
            entry = entry.with_embedding(embedding);
        }
        if let Some(ttl) = ttl {
            entry = entry.with_ttl(ttl);
        }
        settle("record_analysis", c.store.store(entry).await)
    }

    /// Store a fact about a subject as a semantic entry
    #[instrument(skip(self, fact), fields(subject = %fact.subject))]
    pub async fn record_knowledge(&self, fact: SemanticContent) -> Option<MemoryId> {
        let c = self.active()?;
        let source = fact.source.clone();
        let text = format!("{} {} {}", fact.subject, fact.fact_type, fact.fact);
        let embedding = c.similarity.embed(&text).await;

        let mut entry = MemoryEntry::new(KNOWLEDGE_CATEGORY, MemoryContent::Semantic(fact), source);
        if let Some(embedding) = embedding {
            entry = entry.with_embedding(embedding);
        }
        settle("record_knowledge", c.store.store(entry).await)
    }

    #[instrument(skip(self, submission))]
    pub async fn record_feedback(&self, submission: FeedbackSubmission) -> Option<MemoryId> {
        let c = self.active()?;
        settle("record_feedback", c.feedback.record_feedback(submission).await)
    }

    pub async fn get(&self, id: MemoryId) -> Option<MemoryEntry> {
        let c = self.active()?;
        settle("get", c.store.retrieve(id).await).flatten()
    }

    // ========================================================================
    // Precedents
    // ========================================================================

    #[instrument(skip(self, context))]
    pub async fn find_similar(
        &self,
        subject: &str,
        agent: &str,
        context: &Snapshot,
        top_k: usize,
        strategy: RetrievalStrategy,
    ) -> Vec<SimilarMatch> {
        let Some(c) = self.active() else {
            return Vec::new();
        };
        settle(
            "find_similar",
            c.similarity
                .find_similar(subject, agent, context, top_k, strategy)
                .await,
        )
        .unwrap_or_default()
    }

    pub fn similarity_confidence(&self, matches: &[SimilarMatch]) -> ConfidenceLevel {
        match self.active() {
            Some(_) => SimilarityEngine::confidence(matches),
            None => ConfidenceLevel::None,
        }
    }

    /// Output values shared across `matches`
    pub fn common_patterns(&self, matches: &[SimilarMatch], min_frequency: usize) -> Vec<CommonPattern> {
        if self.active().is_none() {
            return Vec::new();
        }
        let entries: Vec<MemoryEntry> = matches.iter().map(|m| m.entry.clone()).collect();
        SimilarityEngine::common_patterns(&entries, min_frequency)
    }

    // ========================================================================
    // Patterns
    // ========================================================================

    #[instrument(skip(self))]
    pub async fn scoring_patterns(
        &self,
        subject: Option<&str>,
        agent: Option<&str>,
        time_window: Option<Duration>,
    ) -> Vec<ScoringPattern> {
        let Some(c) = self.active() else {
            return Vec::new();
        };
        settle(
            "scoring_patterns",
            c.patterns.scoring_patterns(subject, agent, time_window).await,
        )
        .unwrap_or_default()
    }

    #[instrument(skip(self))]
    pub async fn reasoning_patterns(&self, agent: Option<&str>, subject: Option<&str>) -> Vec<PhrasePattern> {
        let Some(c) = self.active() else {
            return Vec::new();
        };
        settle(
            "reasoning_patterns",
            c.patterns.reasoning_patterns(agent, subject).await,
        )
        .unwrap_or_default()
    }

    /// Recognize scoring patterns and persist each as a procedural entry
    #[instrument(skip(self))]
    pub async fn learn_patterns(
        &self,
        subject: Option<&str>,
        agent: Option<&str>,
        time_window: Option<Duration>,
    ) -> Vec<MemoryId> {
        let Some(c) = self.active() else {
            return Vec::new();
        };
        let patterns = self.scoring_patterns(subject, agent, time_window).await;

        let mut created = Vec::with_capacity(patterns.len());
        for pattern in &patterns {
            let result = c.patterns.create_procedural_memory(pattern, &Snapshot::new()).await;
            if let Some(id) = settle("create_procedural_memory", result) {
                created.push(id);
            }
        }
        info!(count = created.len(), "Procedural memories learned");
        created
    }

    // ========================================================================
    // Feedback learning
    // ========================================================================

    pub async fn adjustment_patterns(&self, subject: Option<&str>, agent: Option<&str>) -> Vec<AdjustmentPattern> {
        let Some(c) = self.active() else {
            return Vec::new();
        };
        let min_occurrences = self.config.learning.min_feedback_count;
        settle(
            "adjustment_patterns",
            c.feedback
                .extract_score_adjustment_patterns(subject, agent, min_occurrences)
                .await,
        )
        .unwrap_or_default()
    }

    #[instrument(skip(self))]
    pub async fn suggest_score_adjustment(
        &self,
        subject: &str,
        agent: &str,
        current_score: f64,
    ) -> Option<ScoreSuggestion> {
        let c = self.active()?;
        settle(
            "suggest_score_adjustment",
            c.feedback
                .suggest_score_adjustment(subject, agent, current_score)
                .await,
        )
        .flatten()
    }

    pub async fn expert_consensus(&self, analysis_id: &str) -> Option<ExpertConsensus> {
        let c = self.active()?;
        settle("expert_consensus", c.feedback.expert_consensus(analysis_id).await)
    }

    pub async fn feedback_statistics(
        &self,
        subject: Option<&str>,
        agent: Option<&str>,
        kind: Option<FeedbackKind>,
    ) -> FeedbackStatistics {
        let Some(c) = self.active() else {
            return FeedbackStatistics::default();
        };
        settle(
            "feedback_statistics",
            c.feedback.feedback_statistics(subject, agent, kind).await,
        )
        .unwrap_or_default()
    }

    /// Adapted copy of `weights`; unchanged when disabled or on failure
    #[instrument(skip(self, weights))]
    pub async fn apply_feedback_to_weights(
        &self,
        weights: &BTreeMap<String, f64>,
        strategy: AdaptationStrategy,
    ) -> BTreeMap<String, f64> {
        let Some(c) = self.active() else {
            return weights.clone();
        };
        settle(
            "apply_feedback_to_weights",
            c.feedback.apply_feedback_to_config(weights, strategy).await,
        )
        .unwrap_or_else(|| weights.clone())
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    pub async fn statistics(&self) -> Option<StoreStatistics> {
        let c = self.active()?;
        settle("statistics", c.store.statistics().await)
    }

    /// Delete expired entries, returning how many were removed
    pub async fn cleanup_expired(&self) -> usize {
        let Some(c) = self.active() else {
            return 0;
        };
        let removed = settle("cleanup_expired", c.store.delete_expired(&self.cancel).await).unwrap_or(0);
        if removed > 0 {
            info!(removed, "Expired memories removed");
        }
        removed
    }

    /// Delete every entry
    pub async fn clear_all(&self) -> bool {
        let Some(c) = self.active() else {
            return false;
        };
        warn!(backend = c.store.backend_name(), "Clearing all memories");
        settle("clear_all", c.store.clear_all(&self.cancel).await).unwrap_or(false)
    }
}

impl std::fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryManager")
            .field("enabled", &self.is_enabled())
            .field("backend", &self.backend_name())
            .finish()
    }
}

/// Log a failed operation and drop its error
fn settle<T>(operation: &'static str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(operation, "Memory operation failed: {}", e);
            None
        }
    }
}
