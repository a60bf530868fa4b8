//! Name-to-constructor registry for store backends.

use crate::memory::{self, InMemoryStore};
use crate::store::MemoryStore;
use crate::surreal::{self, SurrealStore};
use engram_core::{EngramError, Result, StoreConfig};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info};

/// Constructor for a backend. Receives the store section of the configuration.
pub type StoreFactory =
    Arc<dyn Fn(StoreConfig) -> BoxFuture<'static, Result<Arc<dyn MemoryStore>>> + Send + Sync>;

/// Registry of backend constructors, looked up by case-insensitive name
pub struct StoreRegistry {
    factories: RwLock<HashMap<String, StoreFactory>>,
}

impl StoreRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// A registry with the bundled `memory` and `surrealdb` backends
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        registry.register(memory::BACKEND_NAME, |_config| async {
            Ok(Arc::new(InMemoryStore::new()) as Arc<dyn MemoryStore>)
        });
        registry.register(surreal::BACKEND_NAME, |config| async move {
            let store = SurrealStore::connect(&config).await?;
            Ok(Arc::new(store) as Arc<dyn MemoryStore>)
        });
        registry
    }

    /// Register (or replace) a backend constructor
    pub fn register<F, Fut>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn(StoreConfig) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn MemoryStore>>> + Send + 'static,
    {
        let name = name.into().to_lowercase();
        let factory: StoreFactory = Arc::new(move |config| Box::pin(factory(config)));
        self.factories.write().insert(name, factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.read().contains_key(&name.to_lowercase())
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Construct and initialize the backend named in `config`.
    ///
    /// Unknown names and any construction or initialization failure are
    /// reported as [`EngramError::BackendUnavailable`].
    pub async fn create(&self, config: &StoreConfig) -> Result<Arc<dyn MemoryStore>> {
        let factory = self
            .factories
            .read()
            .get(&config.backend.to_lowercase())
            .cloned();
        let Some(factory) = factory else {
            return Err(EngramError::backend_unavailable(format!(
                "Unknown store backend '{}'. Registered: {}",
                config.backend,
                self.names().join(", ")
            )));
        };

        let store = factory(config.clone()).await.map_err(into_unavailable)?;
        store.initialize().await.map_err(into_unavailable)?;

        info!("Store backend '{}' initialized", store.backend_name());
        Ok(store)
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

fn into_unavailable(err: EngramError) -> EngramError {
    error!("Store backend failed to start: {}", err);
    if err.is_backend_unavailable() {
        err
    } else {
        EngramError::backend_unavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_builtin_memory_backend() {
        let registry = StoreRegistry::with_builtin();
        assert_eq!(registry.names(), vec!["memory".to_string(), "surrealdb".to_string()]);

        let store = registry.create(&StoreConfig::default()).await.unwrap();
        assert_eq!(store.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_unknown_backend_is_unavailable() {
        let registry = StoreRegistry::with_builtin();
        let config = StoreConfig {
            backend: "cassandra".into(),
            ..StoreConfig::default()
        };
        let err = registry.create(&config).await.err().unwrap();
        assert!(err.is_backend_unavailable());
    }

    #[tokio::test]
    async fn test_factory_failure_is_unavailable() {
        let registry = StoreRegistry::new();
        registry.register("flaky", |_config| async {
            Err::<Arc<dyn MemoryStore>, _>(EngramError::storage("connection refused"))
        });
        assert!(registry.contains("FLAKY"));

        let config = StoreConfig {
            backend: "flaky".into(),
            ..StoreConfig::default()
        };
        let err = registry.create(&config).await.err().unwrap();
        assert!(err.is_backend_unavailable());
    }
}
