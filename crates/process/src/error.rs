use thiserror::Error;

/// Result type for process operations
pub type Result<T> = std::result::Result<T, ProcessError>;

/// Errors that can occur while supervising subprocesses
#[derive(Error, Debug)]
pub enum ProcessError {
    /// Terminal id is unknown
    #[error("Terminal {0} not found")]
    TerminalNotFound(u64),

    /// Stream id is unknown
    #[error("Stream {0} not found")]
    StreamNotFound(u64),

    /// Working directory does not exist
    #[error("Working directory not found: {0}")]
    InvalidCwd(String),

    /// Operation requires a running process
    #[error("Process in terminal {0} is no longer running")]
    NotRunning(u64),

    /// IO error occurred
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
