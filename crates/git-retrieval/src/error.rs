use std::path::PathBuf;
use thiserror::Error;

/// Result type for git retrieval operations
pub type Result<T> = std::result::Result<T, GitError>;

/// Errors that can occur while querying git history
#[derive(Error, Debug)]
pub enum GitError {
    /// Path is not inside a git repository
    #[error("Not a git repository: {0}")]
    NotARepository(PathBuf),

    /// Repository has no commits on HEAD
    #[error("Repository has no commits")]
    NoCommits,

    /// Nothing matched the query
    #[error("No commits matched query: {0}")]
    NoMatches(String),

    /// Commit hash is unknown
    #[error("Commit not found: {0}")]
    CommitNotFound(String),

    /// Git command exceeded the 30 s budget
    #[error("Git command timed out: {0}")]
    Timeout(String),

    /// Git command exited non-zero
    #[error("Git error: {0}")]
    CommandFailed(String),

    /// Git binary missing or other IO failure
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
