//! SurrealDB store backend.
//!
//! Each entry is one row of the `memory_entry` table holding the entry id, the
//! JSON-encoded entry and the columns used for filtering (kind, category,
//! subject, agent). Those predicates run in the SurrealQL `WHERE` clause; time
//! ranges, expiry and ranking are evaluated in-process on the narrowed rows.
//! Any engine reachable through `surrealdb::engine::any` works (`mem://`,
//! `rocksdb://<path>`, `ws://...`).

use crate::search::{evaluate_query, rank_by_embedding};
use crate::store::{MemoryStore, ScoredEntry};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use engram_core::{
    EngramError, EntryPatch, MemoryEntry, MemoryFilter, MemoryId, MemoryQuery, Result,
    StoreConfig, StoreStatistics,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const BACKEND_NAME: &str = "surrealdb";

const TABLE: &str = "memory_entry";

const SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS memory_entry SCHEMALESS;
DEFINE INDEX IF NOT EXISTS memory_entry_id ON memory_entry FIELDS entry_id UNIQUE;
DEFINE INDEX IF NOT EXISTS memory_entry_subject ON memory_entry FIELDS subject;
DEFINE INDEX IF NOT EXISTS memory_entry_kind ON memory_entry FIELDS kind;
"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryRow {
    entry_id: String,
    payload: String,
    #[serde(default)]
    kind: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    agent: Option<String>,
}

impl EntryRow {
    fn encode(entry: &MemoryEntry) -> Result<Self> {
        Ok(Self {
            entry_id: entry.id.to_string(),
            payload: serde_json::to_string(entry)?,
            kind: entry.kind().as_str().to_string(),
            category: entry.category.clone(),
            subject: entry.subject().map(str::to_string),
            agent: entry.agent().map(str::to_string),
        })
    }

    fn decode(&self) -> Result<MemoryEntry> {
        let entry: MemoryEntry = serde_json::from_str(&self.payload).map_err(|e| {
            EngramError::validation(format!("Malformed row {}: {}", self.entry_id, e))
        })?;
        entry.validate()?;
        Ok(entry)
    }
}

/// Store backed by a SurrealDB connection
pub struct SurrealStore {
    db: Surreal<Any>,
    /// Serializes read-modify-write cycles per entry
    locks: DashMap<MemoryId, Arc<Mutex<()>>>,
}

impl SurrealStore {
    /// Connect using the store section of the configuration.
    ///
    /// Connection failures are reported as [`EngramError::BackendUnavailable`].
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        debug!("Connecting to SurrealDB at {}", config.endpoint);

        let db = surrealdb::engine::any::connect(config.endpoint.as_str())
            .await
            .map_err(|e| EngramError::backend_unavailable(format!("Failed to connect: {}", e)))?;

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .map_err(|e| {
                EngramError::backend_unavailable(format!(
                    "Failed to use namespace/database: {}",
                    e
                ))
            })?;

        Ok(Self {
            db,
            locks: DashMap::new(),
        })
    }

    fn lock_for(&self, id: MemoryId) -> Arc<Mutex<()>> {
        self.locks.entry(id).or_default().clone()
    }

    /// Drop the lock slot of an id that has no row, unless another caller
    /// still holds a handle to it.
    fn release_absent(&self, id: MemoryId, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.locks.remove_if(&id, |_, slot| Arc::strong_count(slot) == 1);
    }

    async fn load_row(&self, id: MemoryId) -> Result<Option<EntryRow>> {
        self.db
            .select((TABLE, id.to_string()))
            .await
            .map_err(|e| EngramError::storage(format!("Failed to load entry {}: {}", id, e)))
    }

    async fn save_row(&self, row: EntryRow) -> Result<()> {
        let _: Option<EntryRow> = self
            .db
            .upsert((TABLE, row.entry_id.clone()))
            .content(row)
            .await
            .map_err(|e| EngramError::storage(format!("Failed to save entry: {}", e)))?;
        Ok(())
    }

    /// Every decodable entry. Malformed rows are logged and skipped.
    async fn load_all(&self) -> Result<Vec<MemoryEntry>> {
        self.load_matching(&MemoryFilter::default()).await
    }

    /// Decodable entries whose columns satisfy the structural part of
    /// `filter`. Callers still apply `filter.matches` for time and expiry.
    async fn load_matching(&self, filter: &MemoryFilter) -> Result<Vec<MemoryEntry>> {
        let (clause, params) = where_clause(filter);
        let statement = format!("SELECT entry_id, payload FROM type::table($table){}", clause);

        let mut query = self.db.query(statement).bind(("table", TABLE));
        for (key, value) in params {
            query = query.bind((key, value));
        }
        let mut response = query
            .await
            .map_err(|e| EngramError::storage(format!("Failed to scan entries: {}", e)))?;

        let rows: Vec<EntryRow> = response
            .take(0)
            .map_err(|e| EngramError::storage(format!("Failed to read entries: {}", e)))?;

        Ok(rows
            .iter()
            .filter_map(|row| match row.decode() {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping stored entry: {}", e);
                    None
                }
            })
            .collect())
    }
}

#[async_trait]
impl MemoryStore for SurrealStore {
    fn backend_name(&self) -> &str {
        BACKEND_NAME
    }

    async fn initialize(&self) -> Result<()> {
        info!("Initializing SurrealDB memory schema");
        self.db
            .query(SCHEMA)
            .await
            .and_then(|response| response.check())
            .map_err(|e| EngramError::backend_unavailable(format!("Failed to define schema: {}", e)))?;
        Ok(())
    }

    async fn store(&self, entry: MemoryEntry) -> Result<MemoryId> {
        entry.validate()?;
        let id = entry.id;
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        if self.load_row(id).await?.is_some() {
            return Err(EngramError::validation(format!(
                "Entry id {} is already in use",
                id
            )));
        }

        let row = EntryRow::encode(&entry)?;
        let _: Option<EntryRow> = self
            .db
            .create((TABLE, id.to_string()))
            .content(row)
            .await
            .map_err(|e| EngramError::storage(format!("Failed to store entry {}: {}", id, e)))?;

        debug!(%id, "Stored memory entry");
        Ok(id)
    }

    async fn retrieve(&self, id: MemoryId) -> Result<Option<MemoryEntry>> {
        let lock = self.lock_for(id);
        let guard = lock.lock().await;

        let Some(row) = self.load_row(id).await? else {
            drop(guard);
            self.release_absent(id, lock);
            return Ok(None);
        };
        let mut entry = match row.decode() {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Unreadable entry {}: {}", id, e);
                return Ok(None);
            }
        };

        entry.record_access(Utc::now());
        self.save_row(EntryRow::encode(&entry)?).await?;
        Ok(Some(entry))
    }

    async fn search(&self, query: &MemoryQuery) -> Result<Vec<MemoryEntry>> {
        let entries = self.load_matching(&query.filter).await?;
        Ok(evaluate_query(entries, query, Utc::now()))
    }

    async fn search_similar(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: &MemoryFilter,
    ) -> Result<Vec<ScoredEntry>> {
        let entries = self.load_matching(filter).await?;
        Ok(rank_by_embedding(entries, embedding, top_k, filter, Utc::now()))
    }

    async fn update(&self, id: MemoryId, patch: EntryPatch) -> Result<bool> {
        let lock = self.lock_for(id);
        let guard = lock.lock().await;

        let Some(row) = self.load_row(id).await? else {
            drop(guard);
            self.release_absent(id, lock);
            return Ok(false);
        };
        let mut entry = row.decode()?;
        patch.apply(&mut entry)?;
        self.save_row(EntryRow::encode(&entry)?).await?;
        Ok(true)
    }

    async fn delete(&self, id: MemoryId) -> Result<bool> {
        let lock = self.lock_for(id);
        let deleted: Option<EntryRow> = {
            let _guard = lock.lock().await;
            self.db
                .delete((TABLE, id.to_string()))
                .await
                .map_err(|e| EngramError::storage(format!("Failed to delete entry {}: {}", id, e)))?
        };
        self.locks.remove(&id);
        Ok(deleted.is_some())
    }

    async fn delete_expired(&self, cancel: &CancellationToken) -> Result<usize> {
        let now = Utc::now();
        let expired: Vec<MemoryId> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|entry| entry.is_expired(now))
            .map(|entry| entry.id)
            .collect();

        let mut removed = 0;
        for id in expired {
            if cancel.is_cancelled() {
                warn!(removed, "Expiry sweep cancelled");
                break;
            }
            if self.delete(id).await? {
                removed += 1;
            }
        }

        info!(removed, "Deleted expired entries");
        Ok(removed)
    }

    async fn count(&self, filter: &MemoryFilter) -> Result<usize> {
        let now = Utc::now();
        Ok(self
            .load_matching(filter)
            .await?
            .iter()
            .filter(|entry| filter.matches(entry, now))
            .count())
    }

    async fn statistics(&self) -> Result<StoreStatistics> {
        let entries = self.load_all().await?;
        Ok(StoreStatistics::from_entries(BACKEND_NAME, &entries, Utc::now()))
    }

    async fn clear_all(&self, cancel: &CancellationToken) -> Result<bool> {
        if cancel.is_cancelled() {
            return Ok(false);
        }
        warn!("Clearing all entries from SurrealDB store");
        self.db
            .query("DELETE type::table($table)")
            .bind(("table", TABLE))
            .await
            .and_then(|response| response.check())
            .map_err(|e| EngramError::storage(format!("Failed to clear entries: {}", e)))?;
        self.locks.clear();
        Ok(true)
    }
}

/// SurrealQL `WHERE` clause and bind parameters for the column predicates
/// of `filter`. Empty lists add no constraint.
fn where_clause(filter: &MemoryFilter) -> (String, Vec<(&'static str, Value)>) {
    let kinds = filter.kinds.iter().map(|kind| kind.as_str().to_string()).collect();
    let columns: [(&'static str, Vec<String>); 4] = [
        ("kind", kinds),
        ("category", filter.categories.clone()),
        ("subject", filter.subjects.clone()),
        ("agent", filter.agents.clone()),
    ];

    let mut conditions = Vec::new();
    let mut params = Vec::new();
    for (column, values) in columns {
        if values.is_empty() {
            continue;
        }
        conditions.push(format!("{column} IN ${column}"));
        params.push((column, Value::from(values)));
    }

    if conditions.is_empty() {
        (String::new(), params)
    } else {
        (format!(" WHERE {}", conditions.join(" AND ")), params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_rejects_malformed_payload() {
        let row = EntryRow {
            entry_id: "broken".into(),
            payload: "{\"not\": \"an entry\"}".into(),
            kind: String::new(),
            category: String::new(),
            subject: None,
            agent: None,
        };
        assert!(row.decode().unwrap_err().is_validation());
    }

    async fn mem_store() -> SurrealStore {
        let store = SurrealStore::connect(&StoreConfig::default()).await.unwrap();
        store.initialize().await.unwrap();
        store
    }

    fn fact(subject: &str, category: &str) -> MemoryEntry {
        MemoryEntry::new(
            category,
            engram_core::MemoryContent::Semantic(engram_core::SemanticContent {
                subject: subject.into(),
                fact_type: "macro".into(),
                fact: format!("{} fact", subject),
                source: "imf".into(),
                valid_from: None,
                valid_until: None,
            }),
            "test",
        )
    }

    #[test]
    fn test_where_clause_only_constrains_supplied_columns() {
        let (clause, params) = where_clause(&MemoryFilter::new());
        assert!(clause.is_empty());
        assert!(params.is_empty());

        let filter = MemoryFilter::new()
            .kind(engram_core::MemoryKind::Episodic)
            .subject("Peru")
            .subject("Chile");
        let (clause, params) = where_clause(&filter);
        assert_eq!(clause, " WHERE kind IN $kind AND subject IN $subject");
        assert_eq!(params[0], ("kind", serde_json::json!(["episodic"])));
        assert_eq!(params[1], ("subject", serde_json::json!(["Peru", "Chile"])));
    }

    #[test]
    fn test_row_carries_filter_columns() {
        let row = EntryRow::encode(&fact("Peru", "knowledge")).unwrap();
        assert_eq!(row.kind, "semantic");
        assert_eq!(row.category, "knowledge");
        assert_eq!(row.subject.as_deref(), Some("Peru"));
        assert_eq!(row.agent, None);
    }

    #[tokio::test]
    async fn test_filtered_scan_runs_in_query() {
        let store = mem_store().await;
        let peru = fact("Peru", "knowledge");
        store.store(peru.clone()).await.unwrap();
        store.store(fact("Chile", "knowledge")).await.unwrap();
        store.store(fact("Peru", "notes")).await.unwrap();

        let filter = MemoryFilter::new().subject("Peru").category("knowledge");
        let rows = store.load_matching(&filter).await.unwrap();
        assert_eq!(rows.iter().map(|e| e.id).collect::<Vec<_>>(), vec![peru.id]);
        assert_eq!(store.count(&filter).await.unwrap(), 1);
        assert_eq!(store.count(&MemoryFilter::new().subject("Peru")).await.unwrap(), 2);
        assert_eq!(store.load_all().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_missing_ids_leave_no_lock_slots() {
        let store = mem_store().await;
        for _ in 0..16 {
            assert!(store.retrieve(MemoryId::new()).await.unwrap().is_none());
            assert!(!store.update(MemoryId::new(), EntryPatch::default()).await.unwrap());
        }
        assert!(store.locks.is_empty());

        let entry = fact("Peru", "knowledge");
        store.store(entry.clone()).await.unwrap();
        assert!(store.retrieve(entry.id).await.unwrap().is_some());
        assert_eq!(store.locks.len(), 1);
        assert!(store.delete(entry.id).await.unwrap());
        assert!(store.locks.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_backend_unavailable() {
        let config = StoreConfig {
            endpoint: "nosuchscheme://nowhere".into(),
            ..StoreConfig::default()
        };
        let err = SurrealStore::connect(&config).await.err().unwrap();
        assert!(err.is_backend_unavailable());
    }
}
