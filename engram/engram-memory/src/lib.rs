//! Memory and learning components for Engram.
//!
//! - [`SimilarityEngine`]: precedent retrieval under six strategies
//! - [`PatternRecognizer`]: score clustering, correlation, context ranges and
//!   justification phrases
//! - [`FeedbackProcessor`]: expert corrections and what is learned from them
//! - [`MemoryManager`]: the fail-soft facade used by scoring agents

pub mod embedding;
pub mod feedback;
pub mod manager;
pub mod patterns;
pub mod similarity;
pub mod stats;

mod scan;

pub use embedding::{
    Embedder, EmbeddingError, EmbeddingModel, EmbeddingProvider, MockProvider, OllamaProvider,
    OpenAIProvider, build_provider,
};
pub use feedback::{
    AdaptationStrategy, AdjustmentPattern, ExpertConsensus, FeedbackProcessor,
    FeedbackStatistics, FeedbackSubmission, ScoreSuggestion,
};
pub use manager::{AnalysisRecord, MemoryManager};
pub use patterns::{
    ContextRange, FieldCorrelation, PatternDetail, PatternRecognizer, PatternType, PhrasePattern,
    ScoreCluster, ScoringPattern,
};
pub use scan::context_key;
pub use similarity::{
    CommonPattern, ConfidenceLevel, RetrievalStrategy, SimilarMatch, SimilarityEngine,
};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::embedding::{Embedder, EmbeddingProvider};
    pub use crate::feedback::{AdaptationStrategy, FeedbackSubmission};
    pub use crate::manager::{AnalysisRecord, MemoryManager};
    pub use crate::similarity::{ConfidenceLevel, RetrievalStrategy, SimilarMatch};
    pub use engram_core::prelude::*;
    pub use engram_storage::prelude::*;
}
