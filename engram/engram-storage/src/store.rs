//! The backend-agnostic store contract.

use async_trait::async_trait;
use engram_core::{
    EntryPatch, MemoryEntry, MemoryFilter, MemoryId, MemoryQuery, Result, StoreStatistics,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// An entry paired with its similarity to a query vector, in `[0, 1]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredEntry {
    pub entry: MemoryEntry,
    pub similarity: f32,
}

/// Persistence and retrieval of memory entries.
///
/// Implementations must:
/// - treat `content` as write-once; only metadata is ever mutated
/// - bump `access_count` by exactly one per successful [`retrieve`](Self::retrieve),
///   atomically with respect to concurrent callers
/// - surface an unreachable backend from [`initialize`](Self::initialize) rather
///   than from individual calls
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Registry name of the backend, used in logs and statistics
    fn backend_name(&self) -> &str;

    /// Prepare the backend (schema, connection checks)
    async fn initialize(&self) -> Result<()>;

    /// Persist a new entry. Reusing an id is rejected.
    async fn store(&self, entry: MemoryEntry) -> Result<MemoryId>;

    /// Fetch an entry, recording the access on a hit
    async fn retrieve(&self, id: MemoryId) -> Result<Option<MemoryEntry>>;

    /// Filtered entries, newest first, capped at `query.top_k`.
    ///
    /// When the query carries text or an embedding, only entries whose
    /// similarity reaches `query.similarity_threshold` are kept.
    async fn search(&self, query: &MemoryQuery) -> Result<Vec<MemoryEntry>>;

    /// Nearest neighbours by cosine similarity, most similar first
    async fn search_similar(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: &MemoryFilter,
    ) -> Result<Vec<ScoredEntry>>;

    /// Apply a metadata patch; `false` when the id is unknown
    async fn update(&self, id: MemoryId, patch: EntryPatch) -> Result<bool>;

    /// Remove an entry; `false` when the id is unknown
    async fn delete(&self, id: MemoryId) -> Result<bool>;

    /// Remove every entry whose `expires_at` lies in the past.
    ///
    /// Stops early when `cancel` fires and returns the number removed so far.
    async fn delete_expired(&self, cancel: &CancellationToken) -> Result<usize>;

    /// Number of entries matching `filter`
    async fn count(&self, filter: &MemoryFilter) -> Result<usize>;

    async fn statistics(&self) -> Result<StoreStatistics>;

    /// Remove everything. Returns `false` if cancelled before completion.
    async fn clear_all(&self, cancel: &CancellationToken) -> Result<bool>;
}
