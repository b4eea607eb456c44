use crate::error::Result;
use crate::memory::{InMemoryAgentRegistry, InMemoryTaskQueue};
use crate::redis_backend::{RedisAgentRegistry, RedisTaskQueue};
use crate::traits::{AgentRegistry, TaskQueue};
use crate::types::{
    AgentInfo, AgentRegistration, AgentStatus, HeartbeatRequest, QueueStats, RegistryStats,
    TaskInfo, TaskRequest, TaskResult, TaskStatus,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Configuration for the coordinator's background loops
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How often the dispatcher scans for assignable work
    pub dispatch_interval: Duration,

    /// How often the health monitor runs
    pub health_check_interval: Duration,

    /// Heartbeats older than this mark an agent UNHEALTHY
    pub heartbeat_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            dispatch_interval: Duration::from_millis(500),
            health_check_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(30),
        }
    }
}

/// Aggregate registry and queue counters
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStats {
    pub agents: RegistryStats,
    pub tasks: QueueStats,
}

/// Handle to a per-task subscription
pub struct Subscription {
    pub task_id: String,
    pub id: u64,
    pub receiver: mpsc::UnboundedReceiver<TaskInfo>,
}

struct SubscriberMap {
    next_id: u64,
    channels: HashMap<String, Vec<(u64, mpsc::UnboundedSender<TaskInfo>)>>,
}

struct Background {
    stop: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Remote-agent coordinator
///
/// Runs two periodic background tasks while started: a dispatcher that
/// hands queued tasks to capable, least-loaded agents, and a health monitor
/// that re-queues the running work of agents whose heartbeats went stale.
pub struct Coordinator {
    registry: Arc<dyn AgentRegistry>,
    queue: Arc<dyn TaskQueue>,
    config: CoordinatorConfig,
    subscribers: Arc<Mutex<SubscriberMap>>,
    background: Mutex<Option<Background>>,
}

impl Coordinator {
    pub fn new(
        registry: Arc<dyn AgentRegistry>,
        queue: Arc<dyn TaskQueue>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            registry,
            queue,
            config,
            subscribers: Arc::new(Mutex::new(SubscriberMap {
                next_id: 0,
                channels: HashMap::new(),
            })),
            background: Mutex::new(None),
        }
    }

    /// In-memory coordinator with default limits
    pub fn in_memory(config: CoordinatorConfig) -> Self {
        Self::new(
            Arc::new(InMemoryAgentRegistry::new()),
            Arc::new(InMemoryTaskQueue::default()),
            config,
        )
    }

    /// Redis-backed coordinator, degrading to in-memory when unreachable
    pub async fn with_redis(redis_url: &str, config: CoordinatorConfig) -> Self {
        match connect_redis(redis_url).await {
            Ok((registry, queue)) => {
                log::info!("Coordinator using redis backend at {}", redis_url);
                Self::new(registry, queue, config)
            }
            Err(e) => {
                log::warn!(
                    "Redis backend unreachable ({}); falling back to in-memory",
                    e
                );
                Self::in_memory(config)
            }
        }
    }

    pub fn registry(&self) -> Arc<dyn AgentRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn queue(&self) -> Arc<dyn TaskQueue> {
        Arc::clone(&self.queue)
    }

    // ---- lifecycle ----

    /// Start the dispatcher and health monitor loops
    pub async fn start(&self) {
        let mut background = self.background.lock().expect("coordinator poisoned");
        if background.is_some() {
            return;
        }

        let (stop_tx, stop_rx) = watch::channel(false);

        let dispatcher = tokio::spawn(dispatch_loop(
            Arc::clone(&self.registry),
            Arc::clone(&self.queue),
            Arc::clone(&self.subscribers),
            self.config.dispatch_interval,
            stop_rx.clone(),
        ));
        let health = tokio::spawn(health_loop(
            Arc::clone(&self.registry),
            Arc::clone(&self.queue),
            Arc::clone(&self.subscribers),
            self.config.health_check_interval,
            self.config.heartbeat_timeout,
            stop_rx,
        ));

        *background = Some(Background {
            stop: stop_tx,
            handles: vec![dispatcher, health],
        });
        log::info!("Coordinator started");
    }

    /// Stop the background loops and drain them cleanly
    pub async fn stop(&self) {
        let background = {
            let mut guard = self.background.lock().expect("coordinator poisoned");
            guard.take()
        };
        let Some(background) = background else {
            return;
        };

        let _ = background.stop.send(true);
        for handle in background.handles {
            if handle.await.is_err() {
                log::warn!("Coordinator background task ended abnormally");
            }
        }
        log::info!("Coordinator stopped");
    }

    /// Whether the background loops are running
    pub fn is_running(&self) -> bool {
        self.background.lock().expect("coordinator poisoned").is_some()
    }

    // ---- agent passthroughs ----

    pub async fn register_agent(&self, registration: AgentRegistration) -> Result<AgentInfo> {
        self.registry.register(registration).await
    }

    pub async fn deregister_agent(&self, agent_id: &str) -> Result<bool> {
        self.registry.deregister(agent_id).await
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentInfo>> {
        self.registry.get_agent(agent_id).await
    }

    pub async fn list_agents(&self, status: Option<AgentStatus>) -> Result<Vec<AgentInfo>> {
        self.registry.list_agents(status).await
    }

    pub async fn agent_heartbeat(&self, request: HeartbeatRequest) -> Result<bool> {
        self.registry.heartbeat(request).await
    }

    // ---- task passthroughs ----

    pub async fn submit_task(&self, request: TaskRequest) -> Result<TaskInfo> {
        self.queue.submit(request).await
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Option<TaskInfo>> {
        self.queue.get_task(task_id).await
    }

    pub async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<TaskInfo>> {
        self.queue.list_tasks(status).await
    }

    pub async fn get_result(&self, task_id: &str) -> Result<Option<TaskResult>> {
        self.queue.get_result(task_id).await
    }

    /// Complete a running task and release its agent slot
    pub async fn complete_task(
        &self,
        task_id: &str,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<TaskInfo> {
        let task = self.queue.complete_task(task_id, result, error).await?;

        if let Some(agent_id) = &task.assigned_agent {
            if let Err(e) = self.registry.update_agent_tasks(agent_id, -1).await {
                log::warn!("Failed to decrement agent {}: {}", agent_id, e);
            }
        }

        notify(&self.subscribers, &task);
        Ok(task)
    }

    /// Cancel a non-terminal task
    pub async fn cancel_task(&self, task_id: &str) -> Result<bool> {
        let cancelled = self.queue.cancel_task(task_id).await?;
        if cancelled {
            if let Some(task) = self.queue.get_task(task_id).await? {
                if let Some(agent_id) = &task.assigned_agent {
                    let _ = self.registry.update_agent_tasks(agent_id, -1).await;
                }
                notify(&self.subscribers, &task);
            }
        }
        Ok(cancelled)
    }

    pub async fn get_stats(&self) -> Result<CoordinatorStats> {
        Ok(CoordinatorStats {
            agents: self.registry.stats().await?,
            tasks: self.queue.stats().await?,
        })
    }

    // ---- subscriptions ----

    /// Subscribe to a task's state changes; one notification per change
    pub fn subscribe_to_task(&self, task_id: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.subscribers.lock().expect("subscribers poisoned");
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers
            .channels
            .entry(task_id.to_string())
            .or_default()
            .push((id, tx));

        Subscription {
            task_id: task_id.to_string(),
            id,
            receiver: rx,
        }
    }

    /// Remove one subscription without disturbing others
    pub fn unsubscribe_from_task(&self, subscription: &Subscription) {
        let mut subscribers = self.subscribers.lock().expect("subscribers poisoned");
        if let Some(channels) = subscribers.channels.get_mut(&subscription.task_id) {
            channels.retain(|(id, _)| *id != subscription.id);
            if channels.is_empty() {
                subscribers.channels.remove(&subscription.task_id);
            }
        }
    }
}

async fn connect_redis(
    redis_url: &str,
) -> std::result::Result<(Arc<dyn AgentRegistry>, Arc<dyn TaskQueue>), redis::RedisError> {
    let client = redis::Client::open(redis_url)?;
    let manager = client.get_connection_manager().await?;
    Ok((
        Arc::new(RedisAgentRegistry::new(manager.clone())),
        Arc::new(RedisTaskQueue::new(manager, 10_000)),
    ))
}

fn notify(subscribers: &Arc<Mutex<SubscriberMap>>, task: &TaskInfo) {
    let subscribers = subscribers.lock().expect("subscribers poisoned");
    if let Some(channels) = subscribers.channels.get(&task.task_id) {
        for (_, tx) in channels {
            let _ = tx.send(task.clone());
        }
    }
}

/// Hand queued tasks to capable agents until the queue or capacity runs dry
async fn dispatch_once(
    registry: &Arc<dyn AgentRegistry>,
    queue: &Arc<dyn TaskQueue>,
    subscribers: &Arc<Mutex<SubscriberMap>>,
) -> Result<usize> {
    let mut dispatched = 0;

    loop {
        let Some(candidate) = queue.peek_next_task().await? else {
            break;
        };
        if registry
            .find_available_agent(&candidate.required_capabilities)
            .await?
            .is_none()
        {
            break;
        }

        let Some(task) = queue.get_next_task().await? else {
            break;
        };
        // The head may have changed between peek and pop; re-match on the
        // popped task's own requirements
        match registry
            .find_available_agent(&task.required_capabilities)
            .await?
        {
            Some(agent) => {
                queue.assign_task(&task.task_id, &agent.agent_id).await?;
                registry.update_agent_tasks(&agent.agent_id, 1).await?;
                dispatched += 1;

                log::info!("Dispatched task {} to agent {}", task.task_id, agent.agent_id);
                if let Some(updated) = queue.get_task(&task.task_id).await? {
                    notify(subscribers, &updated);
                }
            }
            None => {
                queue.requeue_task(&task.task_id).await?;
                break;
            }
        }
    }

    Ok(dispatched)
}

async fn dispatch_loop(
    registry: Arc<dyn AgentRegistry>,
    queue: Arc<dyn TaskQueue>,
    subscribers: Arc<Mutex<SubscriberMap>>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        if let Err(e) = dispatch_once(&registry, &queue, &subscribers).await {
            log::error!("Dispatch pass failed: {}", e);
        }
    }
}

/// One health pass: mark stale agents and re-queue their running work
async fn health_once(
    registry: &Arc<dyn AgentRegistry>,
    queue: &Arc<dyn TaskQueue>,
    subscribers: &Arc<Mutex<SubscriberMap>>,
    heartbeat_timeout: Duration,
) -> Result<Vec<String>> {
    let newly_unhealthy = registry.check_health(heartbeat_timeout).await?;

    for agent_id in &newly_unhealthy {
        let running = queue.list_tasks(Some(TaskStatus::Running)).await?;
        for task in running
            .iter()
            .filter(|task| task.assigned_agent.as_deref() == Some(agent_id))
        {
            if queue.requeue_task(&task.task_id).await? {
                registry.update_agent_tasks(agent_id, -1).await?;
                log::warn!(
                    "Re-queued task {} from unhealthy agent {}",
                    task.task_id,
                    agent_id
                );
                if let Some(updated) = queue.get_task(&task.task_id).await? {
                    notify(subscribers, &updated);
                }
            }
        }
    }

    Ok(newly_unhealthy)
}

async fn health_loop(
    registry: Arc<dyn AgentRegistry>,
    queue: Arc<dyn TaskQueue>,
    subscribers: Arc<Mutex<SubscriberMap>>,
    interval: Duration,
    heartbeat_timeout: Duration,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        if let Err(e) = health_once(&registry, &queue, &subscribers, heartbeat_timeout).await {
            log::error!("Health pass failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskPriority;

    fn fast_config() -> CoordinatorConfig {
        CoordinatorConfig {
            dispatch_interval: Duration::from_millis(50),
            health_check_interval: Duration::from_millis(100),
            heartbeat_timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_start_stop() {
        let coordinator = Coordinator::in_memory(fast_config());
        coordinator.start().await;
        assert!(coordinator.is_running());

        coordinator.stop().await;
        assert!(!coordinator.is_running());
    }

    #[tokio::test]
    async fn test_dispatch_assigns_to_capable_agent() {
        let coordinator = Coordinator::in_memory(fast_config());
        let agent = coordinator
            .register_agent(AgentRegistration::new("worker").capability("echo"))
            .await
            .unwrap();
        let task = coordinator
            .submit_task(TaskRequest::new("echo").requires("echo"))
            .await
            .unwrap();

        let dispatched = dispatch_once(
            &coordinator.registry(),
            &coordinator.queue(),
            &coordinator.subscribers,
        )
        .await
        .unwrap();
        assert_eq!(dispatched, 1);

        let assigned = coordinator.get_task(&task.task_id).await.unwrap().unwrap();
        assert_eq!(assigned.status, TaskStatus::Running);
        assert_eq!(assigned.assigned_agent, Some(agent.agent_id.clone()));
        assert_eq!(
            coordinator.get_agent(&agent.agent_id).await.unwrap().unwrap().current_tasks,
            1
        );
    }

    #[tokio::test]
    async fn test_dispatch_waits_for_matching_capability() {
        let coordinator = Coordinator::in_memory(fast_config());
        coordinator
            .register_agent(AgentRegistration::new("generic"))
            .await
            .unwrap();
        let task = coordinator
            .submit_task(TaskRequest::new("special").requires("gpu"))
            .await
            .unwrap();

        let dispatched = dispatch_once(
            &coordinator.registry(),
            &coordinator.queue(),
            &coordinator.subscribers,
        )
        .await
        .unwrap();
        assert_eq!(dispatched, 0);
        assert_eq!(
            coordinator.get_task(&task.task_id).await.unwrap().unwrap().status,
            TaskStatus::Queued
        );
    }

    #[tokio::test]
    async fn test_dispatch_respects_concurrency_cap() {
        let coordinator = Coordinator::in_memory(fast_config());
        let agent = coordinator
            .register_agent(AgentRegistration::new("limited").max_concurrent(1))
            .await
            .unwrap();

        coordinator.submit_task(TaskRequest::new("one")).await.unwrap();
        coordinator.submit_task(TaskRequest::new("two")).await.unwrap();

        let dispatched = dispatch_once(
            &coordinator.registry(),
            &coordinator.queue(),
            &coordinator.subscribers,
        )
        .await
        .unwrap();
        assert_eq!(dispatched, 1);

        let agent_now = coordinator.get_agent(&agent.agent_id).await.unwrap().unwrap();
        assert_eq!(agent_now.current_tasks, 1);
        assert_eq!(
            coordinator
                .list_tasks(Some(TaskStatus::Queued))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_complete_task_releases_agent() {
        let coordinator = Coordinator::in_memory(fast_config());
        let agent = coordinator
            .register_agent(AgentRegistration::new("worker"))
            .await
            .unwrap();
        let task = coordinator.submit_task(TaskRequest::new("job")).await.unwrap();

        dispatch_once(
            &coordinator.registry(),
            &coordinator.queue(),
            &coordinator.subscribers,
        )
        .await
        .unwrap();

        let done = coordinator
            .complete_task(&task.task_id, Some(serde_json::json!("ok")), None)
            .await
            .unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(
            coordinator.get_agent(&agent.agent_id).await.unwrap().unwrap().current_tasks,
            0
        );
        assert!(coordinator.get_result(&task.task_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_heartbeat_timeout_requeues_running_work() {
        let coordinator = Coordinator::in_memory(fast_config());
        let agent = coordinator
            .register_agent(AgentRegistration::new("flaky").max_concurrent(1))
            .await
            .unwrap();
        let task = coordinator.submit_task(TaskRequest::new("job")).await.unwrap();

        dispatch_once(
            &coordinator.registry(),
            &coordinator.queue(),
            &coordinator.subscribers,
        )
        .await
        .unwrap();
        assert_eq!(
            coordinator.get_task(&task.task_id).await.unwrap().unwrap().status,
            TaskStatus::Running
        );

        // No heartbeats arrive; a zero-timeout health pass fires the re-queue
        let unhealthy = health_once(
            &coordinator.registry(),
            &coordinator.queue(),
            &coordinator.subscribers,
            Duration::from_secs(0),
        )
        .await
        .unwrap();
        assert_eq!(unhealthy, vec![agent.agent_id.clone()]);

        let requeued = coordinator.get_task(&task.task_id).await.unwrap().unwrap();
        assert_eq!(requeued.status, TaskStatus::Queued);
        assert_eq!(requeued.assigned_agent, None);
        assert_eq!(
            coordinator.get_agent(&agent.agent_id).await.unwrap().unwrap().current_tasks,
            0
        );
    }

    #[tokio::test]
    async fn test_background_loop_dispatches() {
        let coordinator = Coordinator::in_memory(fast_config());
        coordinator.start().await;

        coordinator
            .register_agent(AgentRegistration::new("bg"))
            .await
            .unwrap();
        let task = coordinator.submit_task(TaskRequest::new("job")).await.unwrap();

        let mut status = TaskStatus::Queued;
        for _ in 0..50 {
            status = coordinator.get_task(&task.task_id).await.unwrap().unwrap().status;
            if status == TaskStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(status, TaskStatus::Running);

        coordinator.stop().await;
    }

    #[tokio::test]
    async fn test_subscribers_get_state_changes() {
        let coordinator = Coordinator::in_memory(fast_config());
        coordinator
            .register_agent(AgentRegistration::new("worker"))
            .await
            .unwrap();
        let task = coordinator.submit_task(TaskRequest::new("job")).await.unwrap();

        let mut subscription = coordinator.subscribe_to_task(&task.task_id);
        let other = coordinator.subscribe_to_task(&task.task_id);

        dispatch_once(
            &coordinator.registry(),
            &coordinator.queue(),
            &coordinator.subscribers,
        )
        .await
        .unwrap();
        coordinator.complete_task(&task.task_id, None, None).await.unwrap();

        let first = subscription.receiver.recv().await.unwrap();
        assert_eq!(first.status, TaskStatus::Running);
        let second = subscription.receiver.recv().await.unwrap();
        assert_eq!(second.status, TaskStatus::Completed);

        // Unsubscribing one channel leaves the other intact
        coordinator.unsubscribe_from_task(&other);
        let subscribers = coordinator.subscribers.lock().unwrap();
        assert_eq!(subscribers.channels.get(&task.task_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_priority_fifo_scenario() {
        // Submit A(LOW), B(HIGH), C(HIGH), D(NORMAL); pops are B, C, D, A
        let coordinator = Coordinator::in_memory(fast_config());
        let queue = coordinator.queue();

        let a = queue.submit(TaskRequest::new("a").priority(TaskPriority::Low)).await.unwrap();
        let b = queue.submit(TaskRequest::new("b").priority(TaskPriority::High)).await.unwrap();
        let c = queue.submit(TaskRequest::new("c").priority(TaskPriority::High)).await.unwrap();
        let d = queue.submit(TaskRequest::new("d").priority(TaskPriority::Normal)).await.unwrap();

        let mut popped = Vec::new();
        while let Some(task) = queue.get_next_task().await.unwrap() {
            popped.push(task.task_id);
        }
        assert_eq!(popped, vec![b.task_id, c.task_id, d.task_id, a.task_id]);
    }
}
