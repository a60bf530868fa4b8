//! Storage layer for Engram.
//!
//! Defines the [`MemoryStore`] contract, a name-keyed [`StoreRegistry`], and
//! two bundled backends: an in-process map and SurrealDB.

pub mod memory;
pub mod registry;
pub mod search;
pub mod store;
pub mod surreal;
pub mod vector;

pub use memory::InMemoryStore;
pub use registry::{StoreFactory, StoreRegistry};
pub use store::{MemoryStore, ScoredEntry};
pub use surreal::SurrealStore;
pub use vector::{cosine_similarity, lexical_similarity};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::memory::InMemoryStore;
    pub use crate::registry::StoreRegistry;
    pub use crate::store::{MemoryStore, ScoredEntry};
    pub use crate::surreal::SurrealStore;
    pub use crate::vector::{cosine_similarity, lexical_similarity};
}
