//! Error types for the Engram memory subsystem.
//!
//! Only [`EngramError::BackendUnavailable`] is allowed to disable the whole
//! subsystem. Every other variant is recoverable at the manager boundary.

/// Result type alias for Engram operations.
pub type Result<T> = std::result::Result<T, EngramError>;

/// Main error type for the Engram system.
#[derive(Debug, thiserror::Error)]
pub enum EngramError {
    /// Store backend could not be constructed or reached at startup
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Embedding provider failed, timed out, or rejected the input
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// A single record is malformed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors
    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// Storage layer errors after successful construction
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Bulk operation stopped by its cancellation token
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// Wrapped anyhow errors for compatibility
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngramError {
    /// Create a new backend-unavailable error
    pub fn backend_unavailable(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    /// Create a new embedding-unavailable error
    pub fn embedding_unavailable(msg: impl Into<String>) -> Self {
        Self::EmbeddingUnavailable(msg.into())
    }

    /// Create a new validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new not found error
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create a new storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this error disables the subsystem
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_))
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(EngramError::backend_unavailable("down").is_backend_unavailable());
        assert!(EngramError::not_found("memory", "abc").is_not_found());
        assert!(EngramError::validation("bad").is_validation());
        assert!(!EngramError::storage("io").is_backend_unavailable());
    }

    #[test]
    fn test_error_display() {
        let err = EngramError::not_found("memory", "42");
        assert_eq!(err.to_string(), "Not found: memory with id 42");
    }
}
