//! Command implementations. Each prints its result as JSON on stdout.

use crate::output;
use anyhow::{Context, Result, bail};
use chrono::Duration;
use engram_core::{EngramConfig, EngramError, Snapshot};
use engram_memory::{MemoryManager, RetrievalStrategy};
use engram_storage::StoreRegistry;
use serde_json::{Value, json};
use std::path::Path;
use tracing::info;

/// Load configuration and build an enabled manager
pub async fn open(config_path: Option<&Path>) -> Result<MemoryManager> {
    let config = match config_path {
        Some(path) => EngramConfig::load_from_path(path).await,
        None => EngramConfig::load().await,
    }
    .context("Failed to load configuration")?;

    let manager = MemoryManager::new(config, &StoreRegistry::with_builtin()).await;
    if !manager.is_enabled() {
        bail!("Memory subsystem is disabled or its backend is unavailable");
    }
    info!(backend = manager.backend_name(), "Connected to memory store");
    Ok(manager)
}

pub async fn stats(manager: &MemoryManager) -> Result<()> {
    let stats = manager
        .statistics()
        .await
        .context("Failed to collect statistics")?;
    output::json(&stats)
}

pub async fn purge_expired(manager: &MemoryManager) -> Result<()> {
    let removed = manager.cleanup_expired().await;
    output::success(format!("Removed {} expired entries", removed));
    output::json(&json!({ "removed": removed }))
}

pub async fn similar(
    manager: &MemoryManager,
    subject: &str,
    agent: &str,
    context: &[String],
    top_k: usize,
    strategy: RetrievalStrategy,
) -> Result<()> {
    let context = parse_context(context)?;
    let matches = manager
        .find_similar(subject, agent, &context, top_k, strategy)
        .await;
    let confidence = manager.similarity_confidence(&matches);
    let common = manager.common_patterns(&matches, 2);

    output::json(&json!({
        "strategy": strategy,
        "confidence": confidence,
        "matches": matches,
        "common_patterns": common,
    }))
}

pub async fn patterns(
    manager: &MemoryManager,
    subject: Option<&str>,
    agent: Option<&str>,
    window_days: Option<i64>,
    learn: bool,
) -> Result<()> {
    let window = window_days.map(window_from_days).transpose()?;
    let patterns = manager.scoring_patterns(subject, agent, window).await;

    let learned = if learn {
        let ids = manager.learn_patterns(subject, agent, window).await;
        output::success(format!("Stored {} procedural memories", ids.len()));
        ids
    } else {
        Vec::new()
    };

    output::json(&json!({ "patterns": patterns, "learned": learned }))
}

pub async fn phrases(manager: &MemoryManager, agent: Option<&str>, subject: Option<&str>) -> Result<()> {
    let phrases = manager.reasoning_patterns(agent, subject).await;
    output::json(&phrases)
}

pub async fn suggest(manager: &MemoryManager, subject: &str, agent: &str, score: f64) -> Result<()> {
    match manager.suggest_score_adjustment(subject, agent, score).await {
        Some(suggestion) => output::json(&suggestion),
        None => {
            output::warning("Not enough expert feedback for a confident suggestion");
            output::json(&Value::Null)
        }
    }
}

pub async fn consensus(manager: &MemoryManager, analysis_id: &str) -> Result<()> {
    let consensus = manager
        .expert_consensus(analysis_id)
        .await
        .context("Failed to compute consensus")?;
    output::json(&consensus)
}

pub async fn clear(manager: &MemoryManager, confirmed: bool) -> Result<()> {
    if !confirmed {
        bail!("Refusing to delete every memory without --yes");
    }
    if !manager.clear_all().await {
        bail!("Clear did not complete");
    }
    output::success("All memories cleared");
    Ok(())
}

/// Look-back window of `days` days, rejecting negative or unrepresentable spans
pub fn window_from_days(days: i64) -> Result<Duration> {
    if days < 0 {
        return Err(EngramError::validation(format!("Window of {} days is negative", days)).into());
    }
    Duration::try_days(days).ok_or_else(|| {
        EngramError::validation(format!("Window of {} days is out of range", days)).into()
    })
}

/// Parse `key=value` pairs; values are JSON when they parse as JSON,
/// strings otherwise
pub fn parse_context(pairs: &[String]) -> Result<Snapshot> {
    let mut context = Snapshot::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("Invalid context '{}', expected key=value", pair);
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("Invalid context '{}', empty key", pair);
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        context.insert(key.to_string(), value);
    }
    Ok(context)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_context() {
        let context = parse_context(&[
            "inflation=3.5".to_string(),
            "regime=democracy".to_string(),
            "stable=true".to_string(),
        ])
        .unwrap();
        assert_eq!(context["inflation"], json!(3.5));
        assert_eq!(context["regime"], json!("democracy"));
        assert_eq!(context["stable"], json!(true));
    }

    #[test]
    fn test_parse_context_rejects_malformed() {
        assert!(parse_context(&["no_separator".to_string()]).is_err());
        assert!(parse_context(&["=3".to_string()]).is_err());
    }

    #[test]
    fn test_window_bounds() {
        assert_eq!(window_from_days(7).unwrap(), Duration::days(7));
        assert!(window_from_days(-1).is_err());

        let err = window_from_days(i64::MAX).unwrap_err();
        let cause = err.downcast_ref::<EngramError>().unwrap();
        assert!(cause.is_validation());
    }

    #[tokio::test]
    async fn test_open_with_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engram.toml");
        tokio::fs::write(&path, "[store]\nbackend = \"memory\"\n")
            .await
            .unwrap();

        let manager = open(Some(path.as_path())).await.unwrap();
        assert_eq!(manager.backend_name(), Some("memory"));
    }

    #[tokio::test]
    async fn test_open_rejects_disabled_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engram.toml");
        tokio::fs::write(&path, "enabled = false\n").await.unwrap();

        assert!(open(Some(path.as_path())).await.is_err());
    }
}
