//! # Forge Coordinator
//!
//! Remote-agent coordination: a registry of worker agents, a priority task
//! queue, and a coordinator that dispatches queued tasks to capable agents
//! and re-queues work from agents whose heartbeats go stale.
//!
//! The registry and queue are traits with two interchangeable backends: an
//! in-memory implementation and a Redis-backed one (hashes for records, a
//! sorted set for the priority index). The coordinator depends only on the
//! contracts and falls back to in-memory when Redis is unreachable at
//! startup.

mod coordinator;
mod error;
mod memory;
mod redis_backend;
mod traits;
mod types;

pub use coordinator::{Coordinator, CoordinatorConfig, CoordinatorStats, Subscription};
pub use error::{CoordinatorError, Result};
pub use memory::{InMemoryAgentRegistry, InMemoryTaskQueue};
pub use redis_backend::{RedisAgentRegistry, RedisTaskQueue};
pub use traits::{AgentRegistry, TaskQueue};
pub use types::{
    AgentInfo, AgentRegistration, AgentStatus, HeartbeatRequest, QueueStats, RegistryStats,
    TaskInfo, TaskPriority, TaskRequest, TaskResult, TaskStatus,
};
