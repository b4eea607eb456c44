use std::path::PathBuf;
use thiserror::Error;

/// Result type for file tool operations
pub type Result<T> = std::result::Result<T, FileToolsError>;

/// Errors that can occur while editing or viewing files
#[derive(Error, Debug)]
pub enum FileToolsError {
    /// File or directory does not exist
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Path escapes the workspace, target exists, or a protected path was hit
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Replacement target absent from the searched region
    #[error("String not found: {context}")]
    NoMatch {
        context: String,
        backup_path: Option<PathBuf>,
    },

    /// Replacement target occurs more than once; line numbers disambiguate
    #[error("Multiple matches found at lines {lines:?}; use line numbers to disambiguate")]
    MultipleMatches {
        lines: Vec<usize>,
        backup_path: Option<PathBuf>,
    },

    /// Search pattern failed to compile
    #[error("Invalid regex pattern: {0}")]
    RegexError(String),

    /// Requested line range is invalid
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// Filesystem refused the operation
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// IO error occurred
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl FileToolsError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }
}
