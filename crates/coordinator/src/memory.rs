use crate::error::{CoordinatorError, Result};
use crate::traits::{AgentRegistry, TaskQueue};
use crate::types::{
    AgentInfo, AgentRegistration, AgentStatus, HeartbeatRequest, QueueStats, RegistryStats,
    TaskInfo, TaskRequest, TaskResult, TaskStatus,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

struct AgentEntry {
    /// Registration order, used as the deterministic tie-breaker
    seq: u64,
    info: AgentInfo,
}

struct RegistryState {
    next_seq: u64,
    agents: HashMap<String, AgentEntry>,
}

/// In-memory agent registry; every operation is one critical section
pub struct InMemoryAgentRegistry {
    state: Mutex<RegistryState>,
}

impl InMemoryAgentRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                next_seq: 0,
                agents: HashMap::new(),
            }),
        }
    }
}

impl Default for InMemoryAgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentRegistry for InMemoryAgentRegistry {
    async fn register(&self, registration: AgentRegistration) -> Result<AgentInfo> {
        let info = AgentInfo {
            agent_id: Uuid::new_v4().to_string(),
            name: registration.name,
            capabilities: registration.capabilities,
            status: AgentStatus::Online,
            current_tasks: 0,
            max_concurrent_tasks: registration.max_concurrent_tasks.max(1),
            last_heartbeat: Utc::now(),
            endpoint: registration.endpoint,
            metadata: registration.metadata,
        };

        let mut state = self.state.lock().expect("registry poisoned");
        let seq = state.next_seq;
        state.next_seq += 1;
        state.agents.insert(
            info.agent_id.clone(),
            AgentEntry {
                seq,
                info: info.clone(),
            },
        );

        log::info!("Registered agent {} ({})", info.name, info.agent_id);
        Ok(info)
    }

    async fn deregister(&self, agent_id: &str) -> Result<bool> {
        let mut state = self.state.lock().expect("registry poisoned");
        Ok(state.agents.remove(agent_id).is_some())
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentInfo>> {
        let state = self.state.lock().expect("registry poisoned");
        Ok(state.agents.get(agent_id).map(|entry| entry.info.clone()))
    }

    async fn list_agents(&self, status: Option<AgentStatus>) -> Result<Vec<AgentInfo>> {
        let state = self.state.lock().expect("registry poisoned");
        let mut entries: Vec<&AgentEntry> = state
            .agents
            .values()
            .filter(|entry| status.is_none_or(|s| entry.info.status == s))
            .collect();
        entries.sort_by_key(|entry| entry.seq);
        Ok(entries.into_iter().map(|entry| entry.info.clone()).collect())
    }

    async fn find_agents_by_capability(&self, capability: &str) -> Result<Vec<AgentInfo>> {
        let state = self.state.lock().expect("registry poisoned");
        let mut entries: Vec<&AgentEntry> = state
            .agents
            .values()
            .filter(|entry| entry.info.capabilities.iter().any(|c| c == capability))
            .collect();
        entries.sort_by_key(|entry| entry.seq);
        Ok(entries.into_iter().map(|entry| entry.info.clone()).collect())
    }

    async fn find_available_agent(&self, required: &[String]) -> Result<Option<AgentInfo>> {
        let state = self.state.lock().expect("registry poisoned");
        Ok(state
            .agents
            .values()
            .filter(|entry| entry.info.is_available() && entry.info.has_capabilities(required))
            .min_by_key(|entry| (entry.info.current_tasks, entry.seq))
            .map(|entry| entry.info.clone()))
    }

    async fn heartbeat(&self, request: HeartbeatRequest) -> Result<bool> {
        let mut state = self.state.lock().expect("registry poisoned");
        let Some(entry) = state.agents.get_mut(&request.agent_id) else {
            return Ok(false);
        };
        entry.info.status = request.status;
        entry.info.current_tasks = request.current_tasks;
        entry.info.last_heartbeat = Utc::now();
        Ok(true)
    }

    async fn check_health(&self, heartbeat_timeout: Duration) -> Result<Vec<String>> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(heartbeat_timeout)
                .map_err(|e| CoordinatorError::Internal(e.to_string()))?;

        let mut state = self.state.lock().expect("registry poisoned");
        let mut newly_unhealthy = Vec::new();
        for entry in state.agents.values_mut() {
            let live = matches!(entry.info.status, AgentStatus::Online | AgentStatus::Busy);
            if live && entry.info.last_heartbeat < cutoff {
                entry.info.status = AgentStatus::Unhealthy;
                newly_unhealthy.push(entry.info.agent_id.clone());
                log::warn!("Agent {} marked unhealthy", entry.info.agent_id);
            }
        }
        Ok(newly_unhealthy)
    }

    async fn update_agent_tasks(&self, agent_id: &str, delta: i64) -> Result<()> {
        let mut state = self.state.lock().expect("registry poisoned");
        let entry = state
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| CoordinatorError::AgentNotFound(agent_id.to_string()))?;

        let current = entry.info.current_tasks as i64 + delta;
        entry.info.current_tasks = current.max(0) as usize;
        Ok(())
    }

    async fn stats(&self) -> Result<RegistryStats> {
        let state = self.state.lock().expect("registry poisoned");
        let mut stats = RegistryStats {
            total_agents: state.agents.len(),
            ..Default::default()
        };
        for entry in state.agents.values() {
            match entry.info.status {
                AgentStatus::Online => stats.online += 1,
                AgentStatus::Busy => stats.busy += 1,
                AgentStatus::Unhealthy => stats.unhealthy += 1,
                AgentStatus::Offline => stats.offline += 1,
            }
        }
        Ok(stats)
    }
}

struct QueueState {
    tasks: HashMap<String, TaskInfo>,
    results: HashMap<String, TaskResult>,
}

/// In-memory priority task queue
///
/// `get_next_task` pops inside one critical section, so a QUEUED task is
/// never visible to two consumers.
pub struct InMemoryTaskQueue {
    max_queue_size: usize,
    state: Mutex<QueueState>,
}

impl InMemoryTaskQueue {
    pub fn new(max_queue_size: usize) -> Self {
        Self {
            max_queue_size,
            state: Mutex::new(QueueState {
                tasks: HashMap::new(),
                results: HashMap::new(),
            }),
        }
    }
}

impl Default for InMemoryTaskQueue {
    fn default() -> Self {
        Self::new(10_000)
    }
}

fn next_queued(tasks: &HashMap<String, TaskInfo>) -> Option<&TaskInfo> {
    tasks
        .values()
        .filter(|task| task.status == TaskStatus::Queued)
        .min_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        })
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn submit(&self, request: TaskRequest) -> Result<TaskInfo> {
        let mut state = self.state.lock().expect("queue poisoned");

        let queued = state
            .tasks
            .values()
            .filter(|task| task.status == TaskStatus::Queued)
            .count();
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
        state.tasks.insert(task.task_id.clone(), task.clone());

        log::debug!("Submitted task {} ({:?})", task.task_id, task.priority);
        Ok(task)
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<TaskInfo>> {
        let state = self.state.lock().expect("queue poisoned");
        Ok(state.tasks.get(task_id).cloned())
    }

    async fn peek_next_task(&self) -> Result<Option<TaskInfo>> {
        let state = self.state.lock().expect("queue poisoned");
        Ok(next_queued(&state.tasks).cloned())
    }

    async fn get_next_task(&self) -> Result<Option<TaskInfo>> {
        let mut state = self.state.lock().expect("queue poisoned");
        let Some(task_id) = next_queued(&state.tasks).map(|task| task.task_id.clone()) else {
            return Ok(None);
        };

        let task = state.tasks.get_mut(&task_id).expect("selected above");
        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        Ok(Some(task.clone()))
    }

    async fn assign_task(&self, task_id: &str, agent_id: &str) -> Result<bool> {
        let mut state = self.state.lock().expect("queue poisoned");
        let Some(task) = state.tasks.get_mut(task_id) else {
            return Ok(false);
        };
        task.assigned_agent = Some(agent_id.to_string());
        Ok(true)
    }

    async fn complete_task(
        &self,
        task_id: &str,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<TaskInfo> {
        let mut state = self.state.lock().expect("queue poisoned");
        let task = state
            .tasks
            .get_mut(task_id)
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
        let task = task.clone();

        state.results.insert(
            task_id.to_string(),
            TaskResult {
                task_id: task_id.to_string(),
                status: task.status,
                result,
                error,
                completed_at: task.completed_at.expect("set above"),
            },
        );
        Ok(task)
    }

    async fn cancel_task(&self, task_id: &str) -> Result<bool> {
        let mut state = self.state.lock().expect("queue poisoned");
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| CoordinatorError::TaskNotFound(task_id.to_string()))?;

        if task.status.is_terminal() {
            return Ok(false);
        }
        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(Utc::now());
        Ok(true)
    }

    async fn requeue_task(&self, task_id: &str) -> Result<bool> {
        let mut state = self.state.lock().expect("queue poisoned");
        let Some(task) = state.tasks.get_mut(task_id) else {
            return Ok(false);
        };
        if task.status != TaskStatus::Running {
            return Ok(false);
        }

        task.status = TaskStatus::Queued;
        task.assigned_agent = None;
        task.started_at = None;
        Ok(true)
    }

    async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<TaskInfo>> {
        let state = self.state.lock().expect("queue poisoned");
        let mut tasks: Vec<TaskInfo> = state
            .tasks
            .values()
            .filter(|task| status.is_none_or(|s| task.status == s))
            .cloned()
            .collect();
        tasks.sort_by_key(|task| task.created_at);
        Ok(tasks)
    }

    async fn get_result(&self, task_id: &str) -> Result<Option<TaskResult>> {
        let state = self.state.lock().expect("queue poisoned");
        Ok(state.results.get(task_id).cloned())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let state = self.state.lock().expect("queue poisoned");
        let mut stats = QueueStats {
            total_tasks: state.tasks.len(),
            ..Default::default()
        };
        for task in state.tasks.values() {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskPriority;

    #[tokio::test]
    async fn test_register_and_find_by_capability() {
        let registry = InMemoryAgentRegistry::new();
        let agent = registry
            .register(AgentRegistration::new("Worker").capability("code_analysis"))
            .await
            .unwrap();
        assert_eq!(agent.status, AgentStatus::Online);

        let found = registry.find_agents_by_capability("code_analysis").await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(registry
            .find_agents_by_capability("missing")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_find_available_prefers_least_loaded() {
        let registry = InMemoryAgentRegistry::new();
        let busy = registry
            .register(AgentRegistration::new("busy").max_concurrent(5))
            .await
            .unwrap();
        let idle = registry
            .register(AgentRegistration::new("idle").max_concurrent(5))
            .await
            .unwrap();

        registry.update_agent_tasks(&busy.agent_id, 3).await.unwrap();

        let chosen = registry.find_available_agent(&[]).await.unwrap().unwrap();
        assert_eq!(chosen.agent_id, idle.agent_id);
    }

    #[tokio::test]
    async fn test_find_available_respects_capacity_and_capabilities() {
        let registry = InMemoryAgentRegistry::new();
        let agent = registry
            .register(AgentRegistration::new("solo").capability("echo"))
            .await
            .unwrap();

        registry.update_agent_tasks(&agent.agent_id, 1).await.unwrap();
        assert!(registry.find_available_agent(&[]).await.unwrap().is_none());

        registry.update_agent_tasks(&agent.agent_id, -1).await.unwrap();
        assert!(registry
            .find_available_agent(&["echo".to_string()])
            .await
            .unwrap()
            .is_some());
        assert!(registry
            .find_available_agent(&["other".to_string()])
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_heartbeat_updates_fields() {
        let registry = InMemoryAgentRegistry::new();
        let agent = registry.register(AgentRegistration::new("hb")).await.unwrap();

        let accepted = registry
            .heartbeat(HeartbeatRequest {
                agent_id: agent.agent_id.clone(),
                status: AgentStatus::Busy,
                current_tasks: 3,
            })
            .await
            .unwrap();
        assert!(accepted);

        let updated = registry.get_agent(&agent.agent_id).await.unwrap().unwrap();
        assert_eq!(updated.status, AgentStatus::Busy);
        assert_eq!(updated.current_tasks, 3);

        let unknown = registry
            .heartbeat(HeartbeatRequest {
                agent_id: "ghost".into(),
                status: AgentStatus::Online,
                current_tasks: 0,
            })
            .await
            .unwrap();
        assert!(!unknown);
    }

    #[tokio::test]
    async fn test_check_health_marks_stale_agents() {
        let registry = InMemoryAgentRegistry::new();
        let agent = registry.register(AgentRegistration::new("stale")).await.unwrap();

        // Zero timeout: any heartbeat is stale
        let unhealthy = registry.check_health(Duration::from_secs(0)).await.unwrap();
        assert_eq!(unhealthy, vec![agent.agent_id.clone()]);

        let updated = registry.get_agent(&agent.agent_id).await.unwrap().unwrap();
        assert_eq!(updated.status, AgentStatus::Unhealthy);

        // Already unhealthy agents are not re-reported
        assert!(registry.check_health(Duration::from_secs(0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_task_counter_never_below_zero() {
        let registry = InMemoryAgentRegistry::new();
        let agent = registry.register(AgentRegistration::new("c")).await.unwrap();

        registry.update_agent_tasks(&agent.agent_id, -5).await.unwrap();
        assert_eq!(
            registry.get_agent(&agent.agent_id).await.unwrap().unwrap().current_tasks,
            0
        );
    }

    #[tokio::test]
    async fn test_priority_fifo_pop_order() {
        let queue = InMemoryTaskQueue::default();
        let a = queue
            .submit(TaskRequest::new("a").priority(TaskPriority::Low))
            .await
            .unwrap();
        let b = queue
            .submit(TaskRequest::new("b").priority(TaskPriority::High))
            .await
            .unwrap();
        let c = queue
            .submit(TaskRequest::new("c").priority(TaskPriority::High))
            .await
            .unwrap();
        let d = queue
            .submit(TaskRequest::new("d").priority(TaskPriority::Normal))
            .await
            .unwrap();

        let order: Vec<String> = [
            queue.get_next_task().await.unwrap().unwrap(),
            queue.get_next_task().await.unwrap().unwrap(),
            queue.get_next_task().await.unwrap().unwrap(),
            queue.get_next_task().await.unwrap().unwrap(),
        ]
        .iter()
        .map(|task| task.task_id.clone())
        .collect();

        assert_eq!(order, vec![b.task_id, c.task_id, d.task_id, a.task_id]);
        assert!(queue.get_next_task().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_next_task_transitions_to_running() {
        let queue = InMemoryTaskQueue::default();
        queue.submit(TaskRequest::new("t")).await.unwrap();

        let popped = queue.get_next_task().await.unwrap().unwrap();
        assert_eq!(popped.status, TaskStatus::Running);
        assert!(popped.started_at.is_some());
    }

    #[tokio::test]
    async fn test_complete_task_success_and_failure() {
        let queue = InMemoryTaskQueue::default();
        let first = queue.submit(TaskRequest::new("ok")).await.unwrap();
        let second = queue.submit(TaskRequest::new("bad")).await.unwrap();
        queue.get_next_task().await.unwrap();
        queue.get_next_task().await.unwrap();

        let done = queue
            .complete_task(&first.task_id, Some(serde_json::json!("out")), None)
            .await
            .unwrap();
        assert_eq!(done.status, TaskStatus::Completed);

        let failed = queue
            .complete_task(&second.task_id, None, Some("boom".into()))
            .await
            .unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);

        let result = queue.get_result(&first.task_id).await.unwrap().unwrap();
        assert_eq!(result.result, Some(serde_json::json!("out")));
    }

    #[tokio::test]
    async fn test_complete_refuses_non_running() {
        let queue = InMemoryTaskQueue::default();
        let task = queue.submit(TaskRequest::new("t")).await.unwrap();

        let err = queue.complete_task(&task.task_id, None, None).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_cancel_task() {
        let queue = InMemoryTaskQueue::default();
        let task = queue.submit(TaskRequest::new("t")).await.unwrap();

        assert!(queue.cancel_task(&task.task_id).await.unwrap());
        assert_eq!(
            queue.get_task(&task.task_id).await.unwrap().unwrap().status,
            TaskStatus::Cancelled
        );

        // Terminal tasks cannot be cancelled again
        assert!(!queue.cancel_task(&task.task_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_requeue_running_task() {
        let queue = InMemoryTaskQueue::default();
        let task = queue.submit(TaskRequest::new("t")).await.unwrap();
        queue.get_next_task().await.unwrap();
        queue.assign_task(&task.task_id, "agent-1").await.unwrap();

        assert!(queue.requeue_task(&task.task_id).await.unwrap());
        let requeued = queue.get_task(&task.task_id).await.unwrap().unwrap();
        assert_eq!(requeued.status, TaskStatus::Queued);
        assert_eq!(requeued.assigned_agent, None);
        assert_eq!(requeued.started_at, None);
    }

    #[tokio::test]
    async fn test_queue_full() {
        let queue = InMemoryTaskQueue::new(2);
        queue.submit(TaskRequest::new("1")).await.unwrap();
        queue.submit(TaskRequest::new("2")).await.unwrap();

        let err = queue.submit(TaskRequest::new("3")).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::QueueFull { max: 2 }));
    }

    #[tokio::test]
    async fn test_stats() {
        let queue = InMemoryTaskQueue::default();
        queue.submit(TaskRequest::new("a")).await.unwrap();
        queue.submit(TaskRequest::new("b")).await.unwrap();
        queue.get_next_task().await.unwrap();

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.total_tasks, 2);
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.running, 1);
    }
}
