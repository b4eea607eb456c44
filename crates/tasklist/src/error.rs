use thiserror::Error;
use uuid::Uuid;

/// Result type for task list operations
pub type Result<T> = std::result::Result<T, TaskListError>;

/// Errors that can occur while managing the task hierarchy
#[derive(Error, Debug)]
pub enum TaskListError {
    /// Task id is unknown
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    /// Parent task id is unknown
    #[error("Parent task not found: {0}")]
    ParentNotFound(Uuid),

    /// Hierarchy would exceed the maximum depth
    #[error("Task hierarchy exceeds maximum depth of {max_depth}")]
    DepthExceeded { max_depth: usize },

    /// Move or dependency would create a cycle
    #[error("Cycle detected: {0}")]
    CycleDetected(String),

    /// A task cannot depend on itself
    #[error("Task cannot depend on itself")]
    SelfDependency,

    /// Template name is not registered
    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    /// Markdown failed validation; nothing was applied
    #[error("Markdown validation failed: {}", errors.join("; "))]
    InvalidMarkdown { errors: Vec<String> },

    /// Persistence serialization failed
    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    /// IO error occurred
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
