use thiserror::Error;

/// Result type for content store operations
pub type Result<T> = std::result::Result<T, ContentStoreError>;

/// Errors that can occur in the fingerprint and content stores
#[derive(Error, Debug)]
pub enum ContentStoreError {
    /// Reference id is unknown or has expired
    #[error("Reference '{0}' not found or expired")]
    ReferenceNotFound(String),

    /// Requested line range is invalid
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// Search pattern failed to compile
    #[error("Invalid regex pattern: {0}")]
    RegexError(String),

    /// Search produced no matches
    #[error("No matches found for '{0}'")]
    NoMatches(String),

    /// IO error occurred
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ContentStoreError {
    /// Create an invalid range error
    pub fn invalid_range(msg: impl Into<String>) -> Self {
        Self::InvalidRange(msg.into())
    }
}
