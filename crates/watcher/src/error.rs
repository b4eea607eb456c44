use thiserror::Error;

/// Result type for watcher operations
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Errors that can occur while managing file watches
#[derive(Error, Debug)]
pub enum WatcherError {
    /// Watch id is unknown
    #[error("Watch {0} not found")]
    WatchNotFound(u64),

    /// Watch root does not exist
    #[error("Watch path does not exist: {0}")]
    InvalidPath(String),

    /// A glob pattern failed to compile
    #[error("Invalid glob pattern: {0}")]
    InvalidPattern(String),

    /// IO error occurred
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
