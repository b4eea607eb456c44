use crate::error::Result;
use crate::types::{
    AgentInfo, AgentRegistration, AgentStatus, HeartbeatRequest, QueueStats, RegistryStats,
    TaskInfo, TaskRequest, TaskResult, TaskStatus,
};
use async_trait::async_trait;
use std::time::Duration;

/// Contract for the agent registry; backed in memory or by an external KV store
#[async_trait]
pub trait AgentRegistry: Send + Sync {
    /// Register an agent: assigns an id, stamps the heartbeat, status ONLINE
    async fn register(&self, registration: AgentRegistration) -> Result<AgentInfo>;

    /// Remove an agent; returns whether it existed
    async fn deregister(&self, agent_id: &str) -> Result<bool>;

    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentInfo>>;

    /// List agents, optionally filtered by status
    async fn list_agents(&self, status: Option<AgentStatus>) -> Result<Vec<AgentInfo>>;

    /// Agents whose capability list contains `capability`
    async fn find_agents_by_capability(&self, capability: &str) -> Result<Vec<AgentInfo>>;

    /// Least-loaded ONLINE agent with free slots and every required capability
    ///
    /// Ties break by registration order, so the choice is deterministic.
    async fn find_available_agent(&self, required: &[String]) -> Result<Option<AgentInfo>>;

    /// Record a heartbeat; returns false when the agent is unknown
    async fn heartbeat(&self, request: HeartbeatRequest) -> Result<bool>;

    /// Mark ONLINE/BUSY agents with stale heartbeats UNHEALTHY
    ///
    /// Returns the ids that newly became unhealthy.
    async fn check_health(&self, heartbeat_timeout: Duration) -> Result<Vec<String>>;

    /// Adjust an agent's task counter; never goes below zero
    async fn update_agent_tasks(&self, agent_id: &str, delta: i64) -> Result<()>;

    async fn stats(&self) -> Result<RegistryStats>;
}

/// Contract for the priority task queue
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Store a task as QUEUED; rejects with QueueFull at capacity
    async fn submit(&self, request: TaskRequest) -> Result<TaskInfo>;

    async fn get_task(&self, task_id: &str) -> Result<Option<TaskInfo>>;

    /// Highest-priority QUEUED task without changing its state
    async fn peek_next_task(&self) -> Result<Option<TaskInfo>>;

    /// Atomically pop the highest-priority QUEUED task into RUNNING
    ///
    /// Priority descending, then `created_at` ascending. No other caller can
    /// observe the popped task as QUEUED afterwards.
    async fn get_next_task(&self) -> Result<Option<TaskInfo>>;

    /// Record the agent a task was handed to
    async fn assign_task(&self, task_id: &str, agent_id: &str) -> Result<bool>;

    /// RUNNING -> COMPLETED (no error) or FAILED (error); stores the result
    async fn complete_task(
        &self,
        task_id: &str,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<TaskInfo>;

    /// Any non-terminal status -> CANCELLED; false when already terminal
    async fn cancel_task(&self, task_id: &str) -> Result<bool>;

    /// RUNNING -> QUEUED with assignment and start time cleared
    async fn requeue_task(&self, task_id: &str) -> Result<bool>;

    /// List tasks, optionally filtered by status
    async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<TaskInfo>>;

    /// Stored result of a finished task
    async fn get_result(&self, task_id: &str) -> Result<Option<TaskResult>>;

    async fn stats(&self) -> Result<QueueStats>;
}
