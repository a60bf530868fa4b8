//! In-process store backend.
//!
//! Entries live in a [`DashMap`]. `get_mut` holds the shard write lock for the
//! duration of the access bump, which makes it atomic per entry.

use crate::search::{evaluate_query, rank_by_embedding};
use crate::store::{MemoryStore, ScoredEntry};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use engram_core::{
    EngramError, EntryPatch, MemoryEntry, MemoryFilter, MemoryId, MemoryQuery, Result,
    StoreStatistics,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const BACKEND_NAME: &str = "memory";

/// Volatile store, the default backend
#[derive(Default)]
pub struct InMemoryStore {
    entries: DashMap<MemoryId, MemoryEntry>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn snapshot(&self, filter: &MemoryFilter) -> Vec<MemoryEntry> {
        let now = Utc::now();
        self.entries
            .iter()
            .filter(|item| filter.matches(item.value(), now))
            .map(|item| item.value().clone())
            .collect()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    fn backend_name(&self) -> &str {
        BACKEND_NAME
    }

    async fn initialize(&self) -> Result<()> {
        debug!("In-memory store ready");
        Ok(())
    }

    async fn store(&self, entry: MemoryEntry) -> Result<MemoryId> {
        entry.validate()?;
        let id = entry.id;
        match self.entries.entry(id) {
            Entry::Occupied(_) => Err(EngramError::validation(format!(
                "Entry id {} is already in use",
                id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                debug!(%id, "Stored memory entry");
                Ok(id)
            }
        }
    }

    async fn retrieve(&self, id: MemoryId) -> Result<Option<MemoryEntry>> {
        Ok(self.entries.get_mut(&id).map(|mut item| {
            item.record_access(Utc::now());
            item.value().clone()
        }))
    }

    async fn search(&self, query: &MemoryQuery) -> Result<Vec<MemoryEntry>> {
        let candidates = self.snapshot(&query.filter);
        Ok(evaluate_query(candidates, query, Utc::now()))
    }

    async fn search_similar(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: &MemoryFilter,
    ) -> Result<Vec<ScoredEntry>> {
        let candidates = self.snapshot(filter);
        Ok(rank_by_embedding(candidates, embedding, top_k, filter, Utc::now()))
    }

    async fn update(&self, id: MemoryId, patch: EntryPatch) -> Result<bool> {
        match self.entries.get_mut(&id) {
            Some(mut item) => {
                patch.apply(&mut item)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: MemoryId) -> Result<bool> {
        Ok(self.entries.remove(&id).is_some())
    }

    async fn delete_expired(&self, cancel: &CancellationToken) -> Result<usize> {
        let now = Utc::now();
        let expired: Vec<MemoryId> = self
            .entries
            .iter()
            .filter(|item| item.is_expired(now))
            .map(|item| *item.key())
            .collect();

        let mut removed = 0;
        for id in expired {
            if cancel.is_cancelled() {
                warn!(removed, "Expiry sweep cancelled");
                break;
            }
            if self.entries.remove_if(&id, |_, entry| entry.is_expired(now)).is_some() {
                removed += 1;
            }
        }

        info!(removed, "Deleted expired entries");
        Ok(removed)
    }

    async fn count(&self, filter: &MemoryFilter) -> Result<usize> {
        let now = Utc::now();
        Ok(self
            .entries
            .iter()
            .filter(|item| filter.matches(item.value(), now))
            .count())
    }

    async fn statistics(&self) -> Result<StoreStatistics> {
        let entries: Vec<MemoryEntry> =
            self.entries.iter().map(|item| item.value().clone()).collect();
        Ok(StoreStatistics::from_entries(BACKEND_NAME, &entries, Utc::now()))
    }

    async fn clear_all(&self, cancel: &CancellationToken) -> Result<bool> {
        warn!("Clearing all entries from in-memory store");
        let ids: Vec<MemoryId> = self.entries.iter().map(|item| *item.key()).collect();
        for id in ids {
            if cancel.is_cancelled() {
                warn!(remaining = self.entries.len(), "Clear cancelled");
                return Ok(false);
            }
            self.entries.remove(&id);
        }
        Ok(true)
    }
}
