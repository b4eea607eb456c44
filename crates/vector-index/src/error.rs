use thiserror::Error;

/// Result type for vector index operations
pub type Result<T> = std::result::Result<T, VectorIndexError>;

/// Errors that can occur in a vector index backend
#[derive(Error, Debug)]
pub enum VectorIndexError {
    /// Embedding the input failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Backend-specific failure
    #[error("Backend error: {0}")]
    Backend(String),
}
