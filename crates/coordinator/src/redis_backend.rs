use crate::error::{CoordinatorError, Result};
use crate::traits::{AgentRegistry, TaskQueue};
use crate::types::{
    AgentInfo, AgentRegistration, AgentStatus, HeartbeatRequest, QueueStats, RegistryStats,
    TaskInfo, TaskRequest, TaskResult, TaskStatus,
};
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

const AGENTS_KEY: &str = "contextforge:agents";
const AGENT_SEQ_KEY: &str = "contextforge:agents:seq";
const TASKS_KEY: &str = "contextforge:tasks";
const RESULTS_KEY: &str = "contextforge:results";
const QUEUE_KEY: &str = "contextforge:task_queue";

/// Sorted-set score ordering by (priority desc, created_at asc)
fn queue_score(task: &TaskInfo) -> f64 {
    let priority_rank = task.priority as i64;
    let created_ms = task.created_at.timestamp_millis();
    ((3 - priority_rank) as f64) * 1e15 + created_ms as f64
}

/// Agent registry backed by a Redis hash
///
/// Records live in one hash keyed by agent id; registration order comes from
/// an INCR counter stored in each record for deterministic tie-breaking.
pub struct RedisAgentRegistry {
    manager: ConnectionManager,
}

impl RedisAgentRegistry {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    async fn load_all(&self) -> Result<Vec<AgentInfo>> {
        let mut con = self.manager.clone();
        let raw: HashMap<String, String> = con.hgetall(AGENTS_KEY).await?;
        let mut agents = Vec::with_capacity(raw.len());
        for value in raw.values() {
            agents.push(serde_json::from_str(value)?);
        }
        Ok(agents)
    }

    async fn save(&self, agent: &AgentInfo) -> Result<()> {
        let mut con = self.manager.clone();
        let value = serde_json::to_string(agent)?;
        con.hset::<_, _, _, ()>(AGENTS_KEY, &agent.agent_id, value)
            .await?;
        Ok(())
    }
}

fn agent_seq(agent: &AgentInfo) -> i64 {
    agent
        .metadata
        .get("registered_seq")
        .and_then(|v| v.as_i64())
        .unwrap_or(i64::MAX)
}

#[async_trait]
impl AgentRegistry for RedisAgentRegistry {
    async fn register(&self, registration: AgentRegistration) -> Result<AgentInfo> {
        let mut con = self.manager.clone();
        let seq: i64 = con.incr(AGENT_SEQ_KEY, 1).await?;

        let mut metadata = registration.metadata;
        metadata.insert("registered_seq".to_string(), serde_json::json!(seq));

        let info = AgentInfo {
            agent_id: Uuid::new_v4().to_string(),
            name: registration.name,
            capabilities: registration.capabilities,
            status: AgentStatus::Online,
            current_tasks: 0,
            max_concurrent_tasks: registration.max_concurrent_tasks.max(1),
            last_heartbeat: Utc::now(),
            endpoint: registration.endpoint,
            metadata,
        };
        self.save(&info).await?;

        log::info!("Registered agent {} ({})", info.name, info.agent_id);
        Ok(info)
    }

    async fn deregister(&self, agent_id: &str) -> Result<bool> {
        let mut con = self.manager.clone();
        let removed: i64 = con.hdel(AGENTS_KEY, agent_id).await?;
        Ok(removed > 0)
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentInfo>> {
        let mut con = self.manager.clone();
        let raw: Option<String> = con.hget(AGENTS_KEY, agent_id).await?;
        Ok(match raw {
            Some(value) => Some(serde_json::from_str(&value)?),
            None => None,
        })
    }

    async fn list_agents(&self, status: Option<AgentStatus>) -> Result<Vec<AgentInfo>> {
        let mut agents = self.load_all().await?;
        if let Some(status) = status {
            agents.retain(|agent| agent.status == status);
        }
        agents.sort_by_key(agent_seq);
        Ok(agents)
    }

    async fn find_agents_by_capability(&self, capability: &str) -> Result<Vec<AgentInfo>> {
        let mut agents = self.load_all().await?;
        agents.retain(|agent| agent.capabilities.iter().any(|c| c == capability));
        agents.sort_by_key(agent_seq);
        Ok(agents)
    }

    async fn find_available_agent(&self, required: &[String]) -> Result<Option<AgentInfo>> {
        let agents = self.load_all().await?;
        Ok(agents
            .into_iter()
            .filter(|agent| agent.is_available() && agent.has_capabilities(required))
            .min_by_key(|agent| (agent.current_tasks, agent_seq(agent))))
    }

    async fn heartbeat(&self, request: HeartbeatRequest) -> Result<bool> {
        let Some(mut agent) = self.get_agent(&request.agent_id).await? else {
            return Ok(false);
        };
        agent.status = request.status;
        agent.current_tasks = request.current_tasks;
        agent.last_heartbeat = Utc::now();
        self.save(&agent).await?;
        Ok(true)
    }

    async fn check_health(&self, heartbeat_timeout: Duration) -> Result<Vec<String>> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(heartbeat_timeout)
                .map_err(|e| CoordinatorError::Internal(e.to_string()))?;

        let mut newly_unhealthy = Vec::new();
        for mut agent in self.load_all().await? {
            let live = matches!(agent.status, AgentStatus::Online | AgentStatus::Busy);
            if live && agent.last_heartbeat < cutoff {
                agent.status = AgentStatus::Unhealthy;
                self.save(&agent).await?;
                log::warn!("Agent {} marked unhealthy", agent.agent_id);
                newly_unhealthy.push(agent.agent_id);
            }
        }
        Ok(newly_unhealthy)
    }

    async fn update_agent_tasks(&self, agent_id: &str, delta: i64) -> Result<()> {
        let mut agent = self
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| CoordinatorError::AgentNotFound(agent_id.to_string()))?;

        let current = agent.current_tasks as i64 + delta;
        agent.current_tasks = current.max(0) as usize;
        self.save(&agent).await
    }

    async fn stats(&self) -> Result<RegistryStats> {
        let agents = self.load_all().await?;
        let mut stats = RegistryStats {
            total_agents: agents.len(),
            ..Default::default()
        };
        for agent in &agents {
            match agent.status {
                AgentStatus::Online => stats.online += 1,
                AgentStatus::Busy => stats.busy += 1,
                AgentStatus::Unhealthy => stats.unhealthy += 1,
                AgentStatus::Offline => stats.offline += 1,
            }
        }
        Ok(stats)
    }
}

/// Priority task queue backed by Redis
///
/// Task records live in a hash; the priority index is a sorted set scored by
/// (priority desc, created_at asc). Pops use ZRANGE + ZREM with optimistic
/// retry: whoever wins the ZREM owns the task.
pub struct RedisTaskQueue {
    manager: ConnectionManager,
    max_queue_size: usize,
}

impl RedisTaskQueue {
    pub fn new(manager: ConnectionManager, max_queue_size: usize) -> Self {
        Self {
            manager,
            max_queue_size,
        }
    }

    async fn load(&self, task_id: &str) -> Result<Option<TaskInfo>> {
        let mut con = self.manager.clone();
        let raw: Option<String> = con.hget(TASKS_KEY, task_id).await?;
        Ok(match raw {
            Some(value) => Some(serde_json::from_str(&value)?),
            None => None,
        })
    }

    async fn save(&self, task: &TaskInfo) -> Result<()> {
        let mut con = self.manager.clone();
        let value = serde_json::to_string(task)?;
        con.hset::<_, _, _, ()>(TASKS_KEY, &task.task_id, value)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn submit(&self, request: TaskRequest) -> Result<TaskInfo> {
        let mut con = self.manager.clone();
        let queued: usize = con.zcard(QUEUE_KEY).await?;
        if queued >= self.max_queue_size {
            return Err(CoordinatorError::QueueFull {
                max: self.max_queue_size,
            });
        }

        let task = TaskInfo {
            task_id: Uuid::new_v4().to_string(),
            task_type: request.task_type,
            payload: request.payload,
            priority: request.priority,
            status: TaskStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            timeout_seconds: request.timeout_seconds,
            required_capabilities: request.required_capabilities,
            assigned_agent: None,
            result: None,
            error: None,
            metadata: request.metadata,
        };

        self.save(&task).await?;
        con.zadd::<_, _, _, ()>(QUEUE_KEY, &task.task_id, queue_score(&task))
            .await?;
        Ok(task)
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<TaskInfo>> {
        self.load(task_id).await
    }

    async fn peek_next_task(&self) -> Result<Option<TaskInfo>> {
        let mut con = self.manager.clone();
        let ids: Vec<String> = con.zrange(QUEUE_KEY, 0, 0).await?;
        match ids.into_iter().next() {
            Some(id) => self.load(&id).await,
            None => Ok(None),
        }
    }

    async fn get_next_task(&self) -> Result<Option<TaskInfo>> {
        let mut con = self.manager.clone();
        loop {
            let ids: Vec<String> = con.zrange(QUEUE_KEY, 0, 0).await?;
            let Some(task_id) = ids.into_iter().next() else {
                return Ok(None);
            };

            // Optimistic claim: losing the ZREM race means retrying
            let removed: i64 = con.zrem(QUEUE_KEY, &task_id).await?;
            if removed == 0 {
                continue;
            }

            let Some(mut task) = self.load(&task_id).await? else {
                continue;
            };
            task.status = TaskStatus::Running;
            task.started_at = Some(Utc::now());
            self.save(&task).await?;
            return Ok(Some(task));
        }
    }

    async fn assign_task(&self, task_id: &str, agent_id: &str) -> Result<bool> {
        let Some(mut task) = self.load(task_id).await? else {
            return Ok(false);
        };
        task.assigned_agent = Some(agent_id.to_string());
        self.save(&task).await?;
        Ok(true)
    }

    async fn complete_task(
        &self,
        task_id: &str,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<TaskInfo> {
        let mut task = self
            .load(task_id)
            .await?
            .ok_or_else(|| CoordinatorError::TaskNotFound(task_id.to_string()))?;

        if task.status != TaskStatus::Running {
            return Err(CoordinatorError::InvalidTransition {
                task_id: task_id.to_string(),
                from: task.status,
            });
        }

        task.status = if error.is_none() {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        task.completed_at = Some(Utc::now());
        task.result = result.clone();
        task.error = error.clone();
        self.save(&task).await?;

        let stored = TaskResult {
            task_id: task_id.to_string(),
            status: task.status,
            result,
            error,
            completed_at: task.completed_at.expect("set above"),
        };
        let mut con = self.manager.clone();
        con.hset::<_, _, _, ()>(RESULTS_KEY, task_id, serde_json::to_string(&stored)?)
            .await?;

        Ok(task)
    }

    async fn cancel_task(&self, task_id: &str) -> Result<bool> {
        let mut task = self
            .load(task_id)
            .await?
            .ok_or_else(|| CoordinatorError::TaskNotFound(task_id.to_string()))?;

        if task.status.is_terminal() {
            return Ok(false);
        }

        if task.status == TaskStatus::Queued {
            let mut con = self.manager.clone();
            con.zrem::<_, _, ()>(QUEUE_KEY, task_id).await?;
        }
        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(Utc::now());
        self.save(&task).await?;
        Ok(true)
    }

    async fn requeue_task(&self, task_id: &str) -> Result<bool> {
        let Some(mut task) = self.load(task_id).await? else {
            return Ok(false);
        };
        if task.status != TaskStatus::Running {
            return Ok(false);
        }

        task.status = TaskStatus::Queued;
        task.assigned_agent = None;
        task.started_at = None;
        self.save(&task).await?;

        let mut con = self.manager.clone();
        con.zadd::<_, _, _, ()>(QUEUE_KEY, task_id, queue_score(&task))
            .await?;
        Ok(true)
    }

    async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<TaskInfo>> {
        let mut con = self.manager.clone();
        let raw: HashMap<String, String> = con.hgetall(TASKS_KEY).await?;

        let mut tasks = Vec::with_capacity(raw.len());
        for value in raw.values() {
            let task: TaskInfo = serde_json::from_str(value)?;
            if status.is_none_or(|s| task.status == s) {
                tasks.push(task);
            }
        }
        tasks.sort_by_key(|task| task.created_at);
        Ok(tasks)
    }

    async fn get_result(&self, task_id: &str) -> Result<Option<TaskResult>> {
        let mut con = self.manager.clone();
        let raw: Option<String> = con.hget(RESULTS_KEY, task_id).await?;
        Ok(match raw {
            Some(value) => Some(serde_json::from_str(&value)?),
            None => None,
        })
    }

    async fn stats(&self) -> Result<QueueStats> {
        let tasks = self.list_tasks(None).await?;
        let mut stats = QueueStats {
            total_tasks: tasks.len(),
            ..Default::default()
        };
        for task in &tasks {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Queued => stats.queued += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        Ok(stats)
    }
}
