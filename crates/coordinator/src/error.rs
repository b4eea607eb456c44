use crate::types::TaskStatus;
use thiserror::Error;

/// Result type for coordinator operations
pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// Errors that can occur in the registry, queue, or coordinator
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// Agent id is unknown
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// Task id is unknown
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Queue is at capacity; never retried by the core
    #[error("Task queue is full ({max} tasks)")]
    QueueFull { max: usize },

    /// Operation is not legal from the task's current status
    #[error("Task {task_id} cannot transition from {from:?}")]
    InvalidTransition { task_id: String, from: TaskStatus },

    /// External key-value backend is unreachable
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Record failed to serialize or deserialize
    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    /// Unexpected backend failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<redis::RedisError> for CoordinatorError {
    fn from(e: redis::RedisError) -> Self {
        CoordinatorError::Unavailable(e.to_string())
    }
}
