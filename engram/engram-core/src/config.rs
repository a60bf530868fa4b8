//! Configuration for the Engram memory subsystem.
//!
//! Configuration is a TOML document. Every section and field has a default,
//! so an empty file is a valid configuration.
//!
//! ```toml
//! enabled = true
//! log_level = "info"
//!
//! [store]
//! backend = "surrealdb"
//! endpoint = "rocksdb://./data/engram"
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//! timeout_ms = 2000
//!
//! [learning]
//! min_pattern_occurrences = 3
//! learning_rate = 0.1
//! ```
//!
//! Environment variables prefixed with `ENGRAM_` override file values.

use crate::error::{EngramError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

// Environment variable names
pub const ENV_CONFIG_PATH: &str = "ENGRAM_CONFIG_PATH";
pub const ENV_ENABLED: &str = "ENGRAM_ENABLED";
pub const ENV_LOG_LEVEL: &str = "ENGRAM_LOG_LEVEL";
pub const ENV_STORE_BACKEND: &str = "ENGRAM_STORE_BACKEND";
pub const ENV_STORE_ENDPOINT: &str = "ENGRAM_STORE_ENDPOINT";
pub const ENV_EMBEDDING_PROVIDER: &str = "ENGRAM_EMBEDDING_PROVIDER";
pub const ENV_EMBEDDING_ENDPOINT: &str = "ENGRAM_EMBEDDING_ENDPOINT";
pub const ENV_EMBEDDING_MODEL: &str = "ENGRAM_EMBEDDING_MODEL";
pub const ENV_EMBEDDING_API_KEY: &str = "ENGRAM_EMBEDDING_API_KEY";

/// Embedding providers understood by the memory crate
pub const KNOWN_EMBEDDING_PROVIDERS: [&str; 4] = ["none", "mock", "ollama", "openai"];

/// Top-level configuration, passed to the memory manager at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngramConfig {
    /// Master switch; when false the manager never touches a backend
    pub enabled: bool,
    pub log_level: String,
    pub store: StoreConfig,
    pub embedding: EmbeddingConfig,
    pub learning: LearningConfig,
}

impl Default for EngramConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: "info".to_string(),
            store: StoreConfig::default(),
            embedding: EmbeddingConfig::default(),
            learning: LearningConfig::default(),
        }
    }
}

/// Store backend selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Registry name of the backend (`memory`, `surrealdb`, ...)
    pub backend: String,
    /// Backend-specific connection string
    pub endpoint: String,
    pub namespace: String,
    pub database: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            endpoint: "mem://".to_string(),
            namespace: "engram".to_string(),
            database: "memory".to_string(),
        }
    }
}

/// Embedding provider selection.
///
/// `model`, `endpoint` and `dimension` fall back to per-provider defaults
/// when unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// One of [`KNOWN_EMBEDDING_PROVIDERS`]
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,
    /// Upper bound on a single embedding call
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "none".to_string(),
            model: None,
            endpoint: None,
            api_key: None,
            dimension: None,
            timeout_ms: 2_000,
        }
    }
}

/// Valid score range produced by the scoring agents
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreScale {
    pub min: f64,
    pub max: f64,
}

impl Default for ScoreScale {
    fn default() -> Self {
        Self { min: 0.0, max: 10.0 }
    }
}

impl ScoreScale {
    /// Bound `score` to the scale. Never panics, even on an unvalidated scale.
    pub fn clamp(&self, score: f64) -> f64 {
        score.max(self.min).min(self.max)
    }
}

/// Thresholds for pattern mining and feedback learning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub min_pattern_occurrences: usize,
    pub min_pattern_confidence: f64,
    pub min_feedback_count: usize,
    pub learning_rate: f64,
    /// Newest-first cap on entries loaded by any analytics scan
    pub scan_limit: usize,
    pub score_scale: ScoreScale,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            min_pattern_occurrences: 3,
            min_pattern_confidence: 0.6,
            min_feedback_count: 3,
            learning_rate: 0.1,
            scan_limit: 5_000,
            score_scale: ScoreScale::default(),
        }
    }
}

impl EngramConfig {
    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation
    pub async fn load_from_path(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| EngramError::config(format!("Failed to read config file: {}", e)))?;

        let mut config = Self::from_toml(&content)?;
        config.merge_env_vars()?;
        config.validate()?;

        info!("Configuration loaded successfully from {}", path.display());
        Ok(config)
    }

    /// Load from `ENGRAM_CONFIG_PATH` if set, otherwise defaults plus env overrides
    pub async fn load() -> Result<Self> {
        match std::env::var(ENV_CONFIG_PATH) {
            Ok(path) => Self::load_from_path(Path::new(&path)).await,
            Err(_) => {
                let mut config = Self::default();
                config.merge_env_vars()?;
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Parse a TOML document without applying overrides
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| EngramError::config(format!("Failed to parse config file: {}", e)))
    }

    /// Save configuration atomically (temp file, then rename)
    pub async fn save_to_path(&self, path: &Path) -> Result<()> {
        debug!("Saving configuration to: {}", path.display());
        self.validate()?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    EngramError::config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| EngramError::config(format!("Failed to serialize config: {}", e)))?;

        let temp_path = path.with_extension("toml.tmp");
        tokio::fs::write(&temp_path, content)
            .await
            .map_err(|e| EngramError::config(format!("Failed to write config file: {}", e)))?;
        tokio::fs::rename(&temp_path, path)
            .await
            .map_err(|e| EngramError::config(format!("Failed to rename config file: {}", e)))?;

        info!("Configuration saved successfully to {}", path.display());
        Ok(())
    }

    /// Merge `ENGRAM_*` environment variable overrides
    pub fn merge_env_vars(&mut self) -> Result<()> {
        self.merge_overrides(|key| std::env::var(key).ok())
    }

    /// Merge overrides from an arbitrary key lookup
    pub fn merge_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(enabled) = lookup(ENV_ENABLED) {
            self.enabled = enabled.parse().map_err(|_| {
                EngramError::config(format!("Invalid {} value '{}'", ENV_ENABLED, enabled))
            })?;
            debug!("Overriding enabled from environment: {}", self.enabled);
        }

        if let Some(log_level) = lookup(ENV_LOG_LEVEL) {
            debug!("Overriding log_level from environment: {}", log_level);
            self.log_level = log_level;
        }

        if let Some(backend) = lookup(ENV_STORE_BACKEND) {
            debug!("Overriding store backend from environment: {}", backend);
            self.store.backend = backend;
        }

        if let Some(endpoint) = lookup(ENV_STORE_ENDPOINT) {
            debug!("Overriding store endpoint from environment");
            self.store.endpoint = endpoint;
        }

        if let Some(provider) = lookup(ENV_EMBEDDING_PROVIDER) {
            debug!("Overriding embedding provider from environment: {}", provider);
            self.embedding.provider = provider;
        }

        if let Some(endpoint) = lookup(ENV_EMBEDDING_ENDPOINT) {
            debug!("Overriding embedding endpoint from environment");
            self.embedding.endpoint = Some(endpoint);
        }

        if let Some(model) = lookup(ENV_EMBEDDING_MODEL) {
            debug!("Overriding embedding model from environment: {}", model);
            self.embedding.model = Some(model);
        }

        if let Some(api_key) = lookup(ENV_EMBEDDING_API_KEY) {
            debug!("Overriding embedding API key from environment");
            self.embedding.api_key = Some(api_key);
        }

        Ok(())
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid
    pub fn validate(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(EngramError::config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.store.backend.trim().is_empty() {
            return Err(EngramError::config("Store backend name must not be empty"));
        }

        if !KNOWN_EMBEDDING_PROVIDERS.contains(&self.embedding.provider.to_lowercase().as_str()) {
            return Err(EngramError::config(format!(
                "Invalid embedding provider '{}'. Must be one of: {}",
                self.embedding.provider,
                KNOWN_EMBEDDING_PROVIDERS.join(", ")
            )));
        }

        if self.embedding.dimension == Some(0) {
            return Err(EngramError::config("Embedding dimension must be greater than 0"));
        }

        if self.embedding.timeout_ms == 0 {
            return Err(EngramError::config("Embedding timeout must be greater than 0"));
        }

        let learning = &self.learning;
        if learning.min_pattern_occurrences == 0 {
            return Err(EngramError::config("min_pattern_occurrences must be at least 1"));
        }
        if !(0.0..=1.0).contains(&learning.min_pattern_confidence) {
            return Err(EngramError::config(format!(
                "min_pattern_confidence {} must be within [0, 1]",
                learning.min_pattern_confidence
            )));
        }
        if learning.min_feedback_count == 0 {
            return Err(EngramError::config("min_feedback_count must be at least 1"));
        }
        if !(learning.learning_rate > 0.0 && learning.learning_rate <= 1.0) {
            return Err(EngramError::config(format!(
                "learning_rate {} must be within (0, 1]",
                learning.learning_rate
            )));
        }
        if learning.scan_limit == 0 {
            return Err(EngramError::config("scan_limit must be at least 1"));
        }
        if !learning.score_scale.min.is_finite() || !learning.score_scale.max.is_finite() {
            return Err(EngramError::config(format!(
                "Score scale bounds must be finite, got [{}, {}]",
                learning.score_scale.min, learning.score_scale.max
            )));
        }
        if learning.score_scale.min >= learning.score_scale.max {
            return Err(EngramError::config(format!(
                "Score scale min {} must be below max {}",
                learning.score_scale.min, learning.score_scale.max
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngramConfig::default();
        config.validate().unwrap();
        assert_eq!(config.store.backend, "memory");
        assert_eq!(config.embedding.provider, "none");
        assert_eq!(config.learning.min_pattern_occurrences, 3);
        assert_eq!(config.learning.score_scale, ScoreScale { min: 0.0, max: 10.0 });
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let config = EngramConfig::from_toml(
            r#"
            enabled = false

            [learning]
            learning_rate = 0.25
            "#,
        )
        .unwrap();
        assert!(!config.enabled);
        assert_eq!(config.learning.learning_rate, 0.25);
        assert_eq!(config.learning.min_feedback_count, 3);
        assert_eq!(config.store, StoreConfig::default());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_ENABLED, "false"),
            (ENV_STORE_BACKEND, "surrealdb"),
            (ENV_EMBEDDING_PROVIDER, "mock"),
        ]);
        let mut config = EngramConfig::default();
        config
            .merge_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert!(!config.enabled);
        assert_eq!(config.store.backend, "surrealdb");
        assert_eq!(config.embedding.provider, "mock");
    }

    #[test]
    fn test_invalid_enabled_override() {
        let mut config = EngramConfig::default();
        let result = config.merge_overrides(|key| (key == ENV_ENABLED).then(|| "maybe".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_failures() {
        let mut config = EngramConfig::default();
        config.embedding.provider = "word2vec".into();
        assert!(config.validate().is_err());

        let mut config = EngramConfig::default();
        config.learning.score_scale = ScoreScale { min: 10.0, max: 0.0 };
        assert!(config.validate().is_err());

        let mut config = EngramConfig::default();
        config.learning.learning_rate = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_score_scale_clamp() {
        let scale = ScoreScale::default();
        assert_eq!(scale.clamp(11.5), 10.0);
        assert_eq!(scale.clamp(-1.0), 0.0);
        assert_eq!(scale.clamp(4.2), 4.2);

        let broken = ScoreScale { min: f64::NAN, max: 10.0 };
        assert_eq!(broken.clamp(12.0), 10.0);
    }

    #[test]
    fn test_non_finite_score_scale_rejected() {
        let config = EngramConfig::from_toml("[learning.score_scale]\nmin = nan\nmax = 10.0\n").unwrap();
        assert!(config.learning.score_scale.min.is_nan());
        assert!(config.validate().unwrap_err().to_string().contains("finite"));

        let mut config = EngramConfig::default();
        config.learning.score_scale = ScoreScale { min: 0.0, max: f64::INFINITY };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("engram.toml");

        let mut config = EngramConfig::default();
        config.learning.min_feedback_count = 5;
        config.save_to_path(&path).await.unwrap();

        let loaded = EngramConfig::from_toml(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.learning.min_feedback_count, 5);
        assert!(!path.with_extension("toml.tmp").exists());
    }
}
