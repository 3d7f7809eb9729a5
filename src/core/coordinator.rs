//! Fleet Coordinator (component E). Owns the task queue exclusively;
//! the dispatcher, watchdog sweep, and reactive scaling hook all run as
//! independent loops spawned by [`FleetCoordinator::run`].

use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::agents::agent::{AgentConfig, AgentStatus};
use crate::core::allocator::{AllocationStrategy, ResourceAllocator};
use crate::core::health::HealthMonitor;
use crate::core::registry::AgentRegistry;
use crate::store::{CoordinationStore, SharedStore};
use crate::tasks::task::{CompletionReason, PriorityTaskQueue, Task, TaskResult, TaskStatus};
use crate::utils::config::HiveConfig;
use crate::utils::error::{HiveError, HiveResult};
use crate::utils::structured_logging::{AgentEventDetails, AgentEventType, StructuredLogger, TaskEventDetails, TaskEventType};

/// In-flight task bookkeeping not carried on `Task` itself.
struct ActiveAllocation {
    allocation_id: Uuid,
    agent_id: Uuid,
}

pub struct FleetCoordinator {
    store: SharedStore,
    pub registry: Arc<AgentRegistry>,
    pub allocator: Arc<ResourceAllocator>,
    pub health: Arc<HealthMonitor>,
    swarm_id: String,
    config: HiveConfig,
    queue: Mutex<PriorityTaskQueue>,
    tasks: DashMap<Uuid, Task>,
    active: DashMap<Uuid, ActiveAllocation>,
    shutting_down: AtomicBool,
}

impl FleetCoordinator {
    #[must_use]
    pub fn new(
        store: SharedStore,
        registry: Arc<AgentRegistry>,
        allocator: Arc<ResourceAllocator>,
        health: Arc<HealthMonitor>,
        config: HiveConfig,
    ) -> Self {
        let swarm_id = config.fleet.swarm_id.clone();
        Self {
            store,
            registry,
            allocator,
            health,
            swarm_id,
            config,
            queue: Mutex::new(PriorityTaskQueue::new()),
            tasks: DashMap::new(),
            active: DashMap::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    async fn emit(&self, channel: &str, event: serde_json::Value) {
        let _ = self
            .store
            .publish(&crate::store::swarm_channel(&self.swarm_id, channel), &serde_json::to_vec(&event).unwrap_or_default())
            .await;
    }

    pub async fn spawn_agent(&self, config: AgentConfig) -> HiveResult<Uuid> {
        let pool_type = config.pool_type.clone();
        let id = self.registry.register(config).await?;
        let current = self.registry.list_by_type(&pool_type).await.len() as u32;
        self.allocator.add_agent_to_pool(&pool_type, current)?;
        StructuredLogger::log_agent_event(
            AgentEventType::Spawned,
            id,
            &AgentEventDetails { pool_type: pool_type.clone(), status: AgentStatus::Idle.to_string() },
        );
        self.emit("fleet", serde_json::json!({"type": "agent_spawned", "agent_id": id})).await;
        Ok(id)
    }

    /// If the agent has an active allocation its task is failed with
    /// `agent_terminated` before the agent is removed.
    pub async fn terminate_agent(&self, id: Uuid, reason: &str) -> HiveResult<()> {
        let agent = self
            .registry
            .get(id)
            .await?
            .ok_or_else(|| HiveError::AgentNotFound { id: id.to_string() })?;

        if agent.status == AgentStatus::Busy {
            let owning = self.active.iter().find(|e| e.agent_id == id).map(|e| *e.key());
            if let Some(task_id) = owning {
                let result = TaskResult::failure(task_id, id, CompletionReason::AgentTerminated, 0, reason.to_string());
                self.complete_task(result).await?;
            }
        }

        self.allocator.remove_agent_from_pool(&agent)?;
        self.registry.unregister(id).await?;
        StructuredLogger::log_agent_event(
            AgentEventType::Terminated,
            id,
            &AgentEventDetails { pool_type: agent.pool_type.clone(), status: "terminated".to_string() },
        );
        self.emit("fleet", serde_json::json!({"type": "agent_terminated", "agent_id": id, "reason": reason})).await;
        Ok(())
    }

    pub async fn submit_task(&self, task: Task) -> HiveResult<Uuid> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(HiveError::OperationFailed { reason: "coordinator is shutting down".to_string() });
        }
        let id = task.id;
        let priority = task.priority;
        self.tasks.insert(id, task.clone());
        self.queue.lock().await.push(task);
        StructuredLogger::log_task_event(
            TaskEventType::Submitted,
            id,
            &TaskEventDetails { priority, assigned_agent: None, duration_ms: None, success: None },
        );
        self.emit("tasks", serde_json::json!({"type": "task_submitted", "task_id": id})).await;
        self.dispatch().await;
        Ok(id)
    }

    /// Drop if still queued; if executing, mark for cancellation so its
    /// eventual completion is reported as `failed(cancelled)`.
    pub async fn cancel_task(&self, task_id: Uuid) -> HiveResult<()> {
        let queued_priority = self.tasks.get(&task_id).map(|t| t.priority);
        if self.queue.lock().await.remove(task_id).is_some() {
            self.tasks.remove(&task_id);
            StructuredLogger::log_task_event(
                TaskEventType::Cancelled,
                task_id,
                &TaskEventDetails { priority: queued_priority.unwrap_or(0), assigned_agent: None, duration_ms: None, success: None },
            );
            self.emit("tasks", serde_json::json!({"type": "task_cancel", "task_id": task_id})).await;
            return Ok(());
        }

        if let Some(active) = self.active.get(&task_id) {
            let agent_id = active.agent_id;
            drop(active);
            let result = TaskResult::failure(task_id, agent_id, CompletionReason::Cancelled, 0, "cancelled".to_string());
            self.complete_task(result).await?;
            return Ok(());
        }

        Err(HiveError::TaskNotFound { id: task_id.to_string() })
    }

    /// Pop and allocate while the queue head can be satisfied. Stops at
    /// the first task that can't be allocated yet (left at the head for
    /// the next tick) unless no pool in the fleet could ever satisfy it.
    pub async fn dispatch(&self) {
        loop {
            let head_pool_type = {
                let queue = self.queue.lock().await;
                match queue.peek() {
                    Some(task) => task.pool_type.clone(),
                    None => return,
                }
            };

            if let Some(pool_type) = &head_pool_type {
                if !self.allocator.known_pools().iter().any(|p| p == pool_type) {
                    let mut queue = self.queue.lock().await;
                    if let Some(task) = queue.pop() {
                        drop(queue);
                        self.tasks.remove(&task.id);
                        self.emit(
                            "results",
                            serde_json::json!({"type": "task_failed", "task_id": task.id, "reason": "no_pool_accepts_task"}),
                        )
                        .await;
                    }
                    continue;
                }
            }

            let task = {
                let mut queue = self.queue.lock().await;
                match queue.pop() {
                    Some(task) => task,
                    None => return,
                }
            };

            match self.allocator.allocate(&task, AllocationStrategy::PriorityBased).await {
                Ok(allocation) => {
                    self.active.insert(
                        task.id,
                        ActiveAllocation { allocation_id: allocation.id, agent_id: allocation.agent_id },
                    );
                    self.tasks.alter(&task.id, |_, mut t| {
                        t.status = TaskStatus::Executing;
                        t.started_at = Some(Utc::now());
                        t.assigned_agent = Some(allocation.agent_id);
                        t
                    });
                    StructuredLogger::log_task_event(
                        TaskEventType::Started,
                        task.id,
                        &TaskEventDetails {
                            priority: task.priority,
                            assigned_agent: Some(allocation.agent_id),
                            duration_ms: None,
                            success: None,
                        },
                    );
                    self.emit(
                        "fleet",
                        serde_json::json!({"type": "task_started", "task_id": task.id, "agent_id": allocation.agent_id}),
                    )
                    .await;
                }
                Err(HiveError::NoSuitableAgent { .. }) => {
                    let mut queue = self.queue.lock().await;
                    queue.push(task);
                    return;
                }
                Err(_) => {
                    let mut queue = self.queue.lock().await;
                    queue.push(task);
                    return;
                }
            }
        }
    }

    /// Task completion path: update registry performance, release the
    /// allocation, emit `task_completed`/`task_failed`.
    pub async fn complete_task(&self, result: TaskResult) -> HiveResult<()> {
        let Some((_, active)) = self.active.remove(&result.task_id) else {
            return Err(HiveError::TaskNotFound { id: result.task_id.to_string() });
        };

        if result.reason == CompletionReason::Timeout {
            self.registry.update(active.agent_id, |a| a.performance.penalize_timeout()).await?;
        }

        self.allocator.release(active.allocation_id, result.is_success(), result.execution_time_ms).await?;

        let priority = self.tasks.get(&result.task_id).map(|t| t.priority).unwrap_or(0);
        self.tasks.alter(&result.task_id, |_, mut t| {
            t.status = if result.is_success() { TaskStatus::Completed } else { TaskStatus::Failed };
            t.finished_at = Some(Utc::now());
            t
        });

        StructuredLogger::log_task_event(
            if result.is_success() { TaskEventType::Completed } else { TaskEventType::Failed },
            result.task_id,
            &TaskEventDetails {
                priority,
                assigned_agent: Some(active.agent_id),
                duration_ms: Some(result.execution_time_ms),
                success: Some(result.is_success()),
            },
        );

        let event_type = if result.is_success() { "task_completed" } else { "task_failed" };
        self.emit(
            "results",
            serde_json::json!({"type": event_type, "task_id": result.task_id, "reason": format!("{:?}", result.reason)}),
        )
        .await;
        Ok(())
    }

    /// Fail any task whose watchdog (`task.timeout_secs`) has elapsed.
    pub async fn sweep_watchdogs(&self) {
        let now = Utc::now();
        let timed_out: Vec<Uuid> = self
            .tasks
            .iter()
            .filter(|e| {
                e.status == TaskStatus::Executing
                    && e.started_at.map(|s| (now - s).num_seconds() as u64 >= e.timeout_secs).unwrap_or(false)
            })
            .map(|e| *e.key())
            .collect();

        for task_id in timed_out {
            if let Some(active) = self.active.get(&task_id).map(|a| a.agent_id) {
                let result = TaskResult::failure(task_id, active, CompletionReason::Timeout, 0, "watchdog timeout".to_string());
                let _ = self.complete_task(result).await;
            }
        }
    }

    /// Coarse +2/-1 reactive scaling hook, overlaid by the autoscaler's
    /// finer-grained policy engine when that's active.
    pub async fn reactive_scale_tick(&self) {
        for pool_type in self.allocator.known_pools() {
            let Some((min, max)) = self.allocator.pool_bounds(&pool_type) else { continue };
            let current = self.registry.list_by_type(&pool_type).await.len() as u32;
            if current == 0 {
                continue;
            }
            let utilization = self.allocator.pool_utilization(&pool_type, current);

            if utilization > 0.8 && current < max {
                let target = (current + 2).min(max);
                self.emit("scaling", serde_json::json!({"type": "scale_initiated", "pool_type": pool_type, "target": target})).await;
            } else if utilization < 0.3 && current > min {
                let target = (current - 1).max(min);
                self.emit("scaling", serde_json::json!({"type": "scale_initiated", "pool_type": pool_type, "target": target})).await;
            }
        }
    }

    /// React to a health-monitor transition: trigger recovery on
    /// `unhealthy`, terminate and backfill on `failed`.
    pub async fn on_health_transition(&self, agent_id: Uuid, state: crate::core::health::HealthState) -> HiveResult<()> {
        use crate::core::health::HealthState;
        match state {
            HealthState::Failed => {
                let pool_type = self.registry.get(agent_id).await?.map(|a| a.pool_type);
                self.terminate_agent(agent_id, "health_failed").await?;
                if let Some(pool_type) = pool_type {
                    if let Some((min, _max)) = self.allocator.pool_bounds(&pool_type) {
                        let current = self.registry.list_by_type(&pool_type).await.len() as u32;
                        if current < min {
                            self.emit("fleet", serde_json::json!({"type": "pool_scaled", "pool_type": pool_type, "reason": "backfill"})).await;
                        }
                    }
                }
            }
            HealthState::Unhealthy => {
                self.emit("health", serde_json::json!({"type": "recovery_requested", "agent_id": agent_id})).await;
            }
            _ => {}
        }
        Ok(())
    }

    /// Stop accepting new tasks, fail every active allocation with
    /// `shutdown`, and drain bounded by `shutdown_grace_secs`.
    pub async fn shutdown(&self) -> HiveResult<()> {
        self.shutting_down.store(true, Ordering::SeqCst);
        let grace = std::time::Duration::from_secs(self.config.fleet.shutdown_grace_secs);

        let drain = async {
            let active_task_ids: Vec<Uuid> = self.active.iter().map(|e| *e.key()).collect();
            for task_id in active_task_ids {
                if let Some(agent_id) = self.active.get(&task_id).map(|a| a.agent_id) {
                    let result = TaskResult::failure(task_id, agent_id, CompletionReason::Shutdown, 0, "shutdown".to_string());
                    let _ = self.complete_task(result).await;
                }
            }
        };

        if tokio::time::timeout(grace, drain).await.is_err() {
            tracing::warn!(swarm_id = %self.swarm_id, "shutdown grace period elapsed, abandoning remaining work");
        }

        self.emit("fleet", serde_json::json!({"type": "coordinator_shutdown"})).await;
        Ok(())
    }

    #[must_use]
    pub fn queue_len_blocking(&self) -> usize {
        self.queue.try_lock().map(|q| q.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn active_allocation_count(&self) -> usize {
        self.active.len()
    }

    #[must_use]
    pub fn task(&self, task_id: Uuid) -> Option<Task> {
        self.tasks.get(&task_id).map(|t| t.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::agent::AgentResources;
    use crate::store::InMemoryStore;
    use std::collections::HashSet;

    async fn setup() -> Arc<FleetCoordinator> {
        let store = Arc::new(InMemoryStore::new());
        let config = HiveConfig::default();
        let registry = Arc::new(AgentRegistry::new(
            Arc::clone(&store),
            config.fleet.swarm_id.clone(),
            std::time::Duration::from_secs(30),
        ));
        let allocator = Arc::new(ResourceAllocator::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            config.fleet.swarm_id.clone(),
            chrono::Duration::seconds(30),
        ));
        for (pool_type, defaults) in &config.pools.defaults {
            allocator.create_pool(pool_type, *defaults).await.unwrap();
        }
        let health = Arc::new(HealthMonitor::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            config.fleet.swarm_id.clone(),
            crate::core::health::HealthMonitorConfig {
                heartbeat_interval: config.heartbeat_interval(),
                health_timeout: chrono::Duration::from_std(config.health_timeout()).unwrap(),
                max_failures: config.health.max_failures,
                recovery_timeout: chrono::Duration::from_std(config.recovery_timeout()).unwrap(),
                breaker_threshold: config.health.circuit_breaker_threshold,
                breaker_timeout: chrono::Duration::from_std(config.circuit_breaker_timeout()).unwrap(),
            },
        ));
        Arc::new(FleetCoordinator::new(store, registry, allocator, health, config))
    }

    fn agent_config(pool_type: &str) -> AgentConfig {
        AgentConfig {
            pool_type: pool_type.to_string(),
            priority: 5,
            capabilities: HashSet::new(),
            resources: AgentResources { cpu_cores: 1.0, memory_mb: 512 },
        }
    }

    #[tokio::test]
    async fn submit_dispatches_to_idle_agent() {
        let coordinator = setup().await;
        coordinator.spawn_agent(agent_config("coder")).await.unwrap();

        let task = Task::new(Some("coder".to_string()), HashSet::new(), 5, serde_json::json!({}));
        let task_id = coordinator.submit_task(task).await.unwrap();

        assert_eq!(coordinator.active_allocation_count(), 1);
        assert_eq!(coordinator.tasks.get(&task_id).unwrap().status, TaskStatus::Executing);
    }

    #[tokio::test]
    async fn submit_with_no_agents_leaves_task_queued() {
        let coordinator = setup().await;
        let task = Task::new(Some("coder".to_string()), HashSet::new(), 5, serde_json::json!({}));
        coordinator.submit_task(task).await.unwrap();
        assert_eq!(coordinator.queue_len_blocking(), 1);
        assert_eq!(coordinator.active_allocation_count(), 0);
    }

    #[tokio::test]
    async fn submit_for_unknown_pool_fails_immediately() {
        let coordinator = setup().await;
        let task = Task::new(Some("nonexistent".to_string()), HashSet::new(), 5, serde_json::json!({}));
        coordinator.submit_task(task).await.unwrap();
        assert_eq!(coordinator.queue_len_blocking(), 0);
        assert_eq!(coordinator.active_allocation_count(), 0);
    }

    #[tokio::test]
    async fn complete_task_releases_agent_to_idle() {
        let coordinator = setup().await;
        let agent_id = coordinator.spawn_agent(agent_config("coder")).await.unwrap();
        let task = Task::new(Some("coder".to_string()), HashSet::new(), 5, serde_json::json!({}));
        let task_id = coordinator.submit_task(task).await.unwrap();

        let result = TaskResult::success(task_id, agent_id, 120, serde_json::json!({}));
        coordinator.complete_task(result).await.unwrap();

        let agent = coordinator.registry.get(agent_id).await.unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Idle);
        assert_eq!(coordinator.active_allocation_count(), 0);
    }

    #[tokio::test]
    async fn cancel_queued_task_drops_it() {
        let coordinator = setup().await;
        let task = Task::new(Some("coder".to_string()), HashSet::new(), 5, serde_json::json!({}));
        let task_id = coordinator.submit_task(task).await.unwrap();
        coordinator.cancel_task(task_id).await.unwrap();
        assert_eq!(coordinator.queue_len_blocking(), 0);
    }
}
