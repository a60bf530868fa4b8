//! Aggregate statistics reported by stores.

use crate::entry::MemoryEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Store-wide statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStatistics {
    pub backend: String,
    pub total_entries: u64,
    pub by_kind: BTreeMap<String, u64>,
    pub by_category: BTreeMap<String, u64>,
    pub expired_entries: u64,
    pub with_embedding: u64,
    pub total_accesses: u64,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

impl StoreStatistics {
    /// Fold a full scan of entries into statistics.
    pub fn from_entries<'a>(
        backend: impl Into<String>,
        entries: impl IntoIterator<Item = &'a MemoryEntry>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut stats = Self {
            backend: backend.into(),
            ..Default::default()
        };
        for entry in entries {
            stats.total_entries += 1;
            *stats.by_kind.entry(entry.kind().as_str().to_string()).or_insert(0) += 1;
            *stats.by_category.entry(entry.category.clone()).or_insert(0) += 1;
            if entry.is_expired(now) {
                stats.expired_entries += 1;
            }
            if entry.embedding.is_some() {
                stats.with_embedding += 1;
            }
            stats.total_accesses += entry.metadata.access_count;
            stats.oldest_entry = Some(match stats.oldest_entry {
                Some(t) if t <= entry.timestamp => t,
                _ => entry.timestamp,
            });
            stats.newest_entry = Some(match stats.newest_entry {
                Some(t) if t >= entry.timestamp => t,
                _ => entry.timestamp,
            });
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{MemoryContent, SemanticContent};
    use chrono::Duration;

    fn fact(category: &str) -> MemoryEntry {
        MemoryEntry::new(
            category,
            MemoryContent::Semantic(SemanticContent {
                subject: "Kenya".into(),
                fact_type: "policy".into(),
                fact: "Central bank raised rates".into(),
                source: "news".into(),
                valid_from: None,
                valid_until: None,
            }),
            "test",
        )
    }

    #[test]
    fn test_from_entries() {
        let now = Utc::now();
        let old = fact("macro").with_timestamp(now - Duration::days(3));
        let expired = fact("macro").with_expiry(now - Duration::hours(1));
        let other = fact("politics").with_embedding(vec![0.1, 0.2]);

        let stats = StoreStatistics::from_entries("memory", [&old, &expired, &other], now);
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.by_kind.get("semantic"), Some(&3));
        assert_eq!(stats.by_category.get("macro"), Some(&2));
        assert_eq!(stats.expired_entries, 1);
        assert_eq!(stats.with_embedding, 1);
        assert_eq!(stats.oldest_entry, Some(old.timestamp));
    }

    #[test]
    fn test_empty_statistics() {
        let stats = StoreStatistics::from_entries("memory", std::iter::empty(), Utc::now());
        assert_eq!(stats.total_entries, 0);
        assert!(stats.oldest_entry.is_none());
    }
}
