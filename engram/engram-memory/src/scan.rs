//! Bounded history scans shared by the analytics components.

use engram_core::{MemoryEntry, MemoryFilter, MemoryQuery, Result};
use engram_storage::MemoryStore;

/// Newest-first window of at most `limit` entries matching `filter`
pub(crate) async fn recent(
    store: &dyn MemoryStore,
    filter: MemoryFilter,
    limit: usize,
) -> Result<Vec<MemoryEntry>> {
    let query = MemoryQuery::new().with_filter(filter).with_limit(limit);
    store.search(&query).await
}

/// Composite grouping key: `"subject:<x>|agent:<y>"`, absent parts omitted
pub fn context_key(subject: Option<&str>, agent: Option<&str>) -> String {
    let mut parts = Vec::with_capacity(2);
    if let Some(subject) = subject.filter(|s| !s.is_empty()) {
        parts.push(format!("subject:{}", subject));
    }
    if let Some(agent) = agent.filter(|a| !a.is_empty()) {
        parts.push(format!("agent:{}", agent));
    }
    parts.join("|")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_key() {
        assert_eq!(context_key(Some("Peru"), Some("risk")), "subject:Peru|agent:risk");
        assert_eq!(context_key(Some("Peru"), None), "subject:Peru");
        assert_eq!(context_key(None, Some("risk")), "agent:risk");
        assert_eq!(context_key(None, Some("")), "");
    }
}
