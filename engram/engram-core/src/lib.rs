//! Core types for the Engram memory and learning subsystem.
//!
//! This crate holds the entry model, query descriptors, error taxonomy and
//! configuration shared by the storage and memory crates.

pub mod config;
pub mod entry;
pub mod error;
pub mod id;
pub mod query;
pub mod stats;

pub use config::{EmbeddingConfig, EngramConfig, LearningConfig, ScoreScale, StoreConfig};
pub use entry::{
    EntryMetadata, EntryPatch, EpisodicContent, FeedbackContent, FeedbackKind, ImpactScope,
    MemoryContent, MemoryEntry, MemoryKind, ProceduralContent, SemanticContent, Snapshot,
};
pub use error::{EngramError, Result};
pub use id::MemoryId;
pub use query::{MemoryFilter, MemoryQuery, TimeRange};
pub use stats::StoreStatistics;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{EngramConfig, LearningConfig, ScoreScale};
    pub use crate::entry::*;
    pub use crate::error::{EngramError, Result};
    pub use crate::id::MemoryId;
    pub use crate::query::{MemoryFilter, MemoryQuery, TimeRange};
    pub use crate::stats::StoreStatistics;
}
