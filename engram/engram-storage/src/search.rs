//! Query evaluation shared by backends that filter in-process.

use crate::store::ScoredEntry;
use crate::vector::{cosine_similarity, lexical_similarity};
use chrono::{DateTime, Utc};
use engram_core::{MemoryEntry, MemoryFilter, MemoryQuery};
use std::cmp::Ordering;

/// Similarity of `entry` to the query's text or embedding.
///
/// The embedding is preferred when both sides have one; otherwise the query
/// text is compared lexically with the entry's searchable text. `None` means
/// the query carries nothing the entry can be compared with.
pub fn query_similarity(query: &MemoryQuery, entry: &MemoryEntry) -> Option<f32> {
    if let (Some(wanted), Some(have)) = (&query.query_embedding, &entry.embedding) {
        return Some(cosine_similarity(wanted, have));
    }
    match query.query_text.as_deref() {
        Some(text) if !text.trim().is_empty() => {
            Some(lexical_similarity(text, &entry.searchable_text()))
        }
        _ => None,
    }
}

/// Evaluate `query` against candidate entries: filter, threshold, newest first, cap.
pub fn evaluate_query<I>(candidates: I, query: &MemoryQuery, now: DateTime<Utc>) -> Vec<MemoryEntry>
where
    I: IntoIterator<Item = MemoryEntry>,
{
    let similarity_required = query.has_similarity_criteria();
    let mut results: Vec<MemoryEntry> = candidates
        .into_iter()
        .filter(|entry| query.filter.matches(entry, now))
        .filter(|entry| {
            !similarity_required
                || query_similarity(query, entry)
                    .is_some_and(|score| score >= query.similarity_threshold)
        })
        .collect();

    results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    results.truncate(query.top_k);
    results
}

/// Rank embedded candidates by cosine similarity to `embedding`.
pub fn rank_by_embedding<I>(
    candidates: I,
    embedding: &[f32],
    top_k: usize,
    filter: &MemoryFilter,
    now: DateTime<Utc>,
) -> Vec<ScoredEntry>
where
    I: IntoIterator<Item = MemoryEntry>,
{
    let mut scored: Vec<ScoredEntry> = candidates
        .into_iter()
        .filter(|entry| filter.matches(entry, now))
        .filter_map(|entry| {
            let similarity = cosine_similarity(embedding, entry.embedding.as_deref()?);
            Some(ScoredEntry { entry, similarity })
        })
        .collect();

    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.entry.timestamp.cmp(&a.entry.timestamp))
    });
    scored.truncate(top_k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use engram_core::{MemoryContent, MemoryKind, SemanticContent};

    fn fact(text: &str, age_days: i64) -> MemoryEntry {
        MemoryEntry::new(
            "knowledge",
            MemoryContent::Semantic(SemanticContent {
                subject: "Ghana".into(),
                fact_type: "economy".into(),
                fact: text.into(),
                source: "report".into(),
                valid_from: None,
                valid_until: None,
            }),
            "test",
        )
        .with_timestamp(Utc::now() - Duration::days(age_days))
    }

    #[test]
    fn test_newest_first_and_capped() {
        let entries = vec![fact("a", 3), fact("b", 1), fact("c", 2)];
        let query = MemoryQuery::new().with_limit(2);
        let results = evaluate_query(entries, &query, Utc::now());
        assert_eq!(results.len(), 2);
        assert!(results[0].timestamp > results[1].timestamp);
    }

    #[test]
    fn test_text_threshold() {
        let entries = vec![fact("cocoa exports fell sharply", 1), fact("new parliament sworn in", 1)];
        let query = MemoryQuery::new()
            .with_text("cocoa exports")
            .with_threshold(0.2);
        let results = evaluate_query(entries, &query, Utc::now());
        assert_eq!(results.len(), 1);
        assert!(results[0].searchable_text().contains("cocoa"));
    }

    #[test]
    fn test_embedding_preferred_over_text() {
        let entry = fact("unrelated words", 1).with_embedding(vec![1.0, 0.0]);
        let query = MemoryQuery::new()
            .with_text("cocoa")
            .with_embedding(vec![1.0, 0.0]);
        assert_eq!(query_similarity(&query, &entry), Some(1.0));
    }

    #[test]
    fn test_rank_skips_unembedded_and_orders() {
        let near = fact("near", 1).with_embedding(vec![1.0, 0.1]);
        let far = fact("far", 1).with_embedding(vec![0.1, 1.0]);
        let bare = fact("bare", 1);
        let filter = MemoryFilter::new().kind(MemoryKind::Semantic);
        let ranked = rank_by_embedding(vec![far, bare, near.clone()], &[1.0, 0.0], 5, &filter, Utc::now());
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].entry.id, near.id);
        assert!(ranked[0].similarity >= ranked[1].similarity);
    }
}
