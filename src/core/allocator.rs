//! Resource Allocator (component C). Owns the pools map and selects an
//! agent for a task using one of five strategies.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::agents::agent::{Agent, AgentStatus};
use crate::core::registry::AgentRegistry;
use crate::store::{CoordinationStore, SharedStore};
use crate::tasks::task::Task;
use crate::utils::config::PoolDefaults;
use crate::utils::error::{HiveError, HiveResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStrategy {
    PriorityBased,
    RoundRobin,
    LeastLoaded,
    CapabilityMatch,
    PerformanceBased,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    Allocated,
    Released,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub pool_type: String,
    pub task_id: Uuid,
    pub strategy: AllocationStrategy,
    pub allocated_at: DateTime<Utc>,
    pub timeout_at: DateTime<Utc>,
    pub status: AllocationStatus,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PoolMetrics {
    pub total_allocations: u64,
    pub active_allocations: u64,
    pub last_allocation_time: Option<DateTime<Utc>>,
    pub last_scale_time: Option<DateTime<Utc>>,
}

pub struct Pool {
    pub pool_type: String,
    pub defaults: PoolDefaults,
    pub metrics: PoolMetrics,
    round_robin_cursor: AtomicU64,
}

impl Pool {
    fn new(pool_type: String, defaults: PoolDefaults) -> Self {
        Self {
            pool_type,
            defaults,
            metrics: PoolMetrics::default(),
            round_robin_cursor: AtomicU64::new(0),
        }
    }
}

pub struct ResourceAllocator {
    store: SharedStore,
    registry: Arc<AgentRegistry>,
    swarm_id: String,
    pools: DashMap<String, Pool>,
    allocations: DashMap<Uuid, Allocation>,
    allocation_timeout: chrono::Duration,
}

impl ResourceAllocator {
    #[must_use]
    pub fn new(
        store: SharedStore,
        registry: Arc<AgentRegistry>,
        swarm_id: String,
        allocation_timeout: chrono::Duration,
    ) -> Self {
        Self {
            store,
            registry,
            swarm_id,
            pools: DashMap::new(),
            allocations: DashMap::new(),
            allocation_timeout,
        }
    }

    pub async fn create_pool(&self, pool_type: &str, defaults: PoolDefaults) -> HiveResult<()> {
        self.pools
            .insert(pool_type.to_string(), Pool::new(pool_type.to_string(), defaults));
        self.store
            .hash_set(
                &crate::store::swarm_channel(&self.swarm_id, &format!("fleet:pools:{pool_type}")),
                "defaults",
                &defaults,
            )
            .await
    }

    /// `current_agents ∈ [min, max]` is checked here; the registry has
    /// already assigned the agent to this pool via its `pool_type` field.
    pub fn add_agent_to_pool(&self, pool_type: &str, current_agents: u32) -> HiveResult<()> {
        let pool = self
            .pools
            .get(pool_type)
            .ok_or_else(|| HiveError::PoolNotFound { pool_type: pool_type.to_string() })?;
        if current_agents > pool.defaults.max_agents {
            return Err(HiveError::CapacityExceeded {
                pool_type: pool_type.to_string(),
                max: pool.defaults.max_agents,
            });
        }
        Ok(())
    }

    pub fn remove_agent_from_pool(&self, agent: &Agent) -> HiveResult<()> {
        if agent.status == AgentStatus::Busy {
            return Err(HiveError::AgentHasActiveAllocation { id: agent.id.to_string() });
        }
        Ok(())
    }

    fn candidate_set(&self, agents: Vec<Agent>, task: &Task) -> Vec<Agent> {
        agents
            .into_iter()
            .filter(|a| a.is_selectable())
            .filter(|a| a.has_capabilities(&task.capabilities))
            .filter(|a| self.fits_resource_limits(a, task))
            .collect()
    }

    fn fits_resource_limits(&self, agent: &Agent, task: &Task) -> bool {
        let Some(request) = &task.resource_request else {
            return true;
        };
        let Some(pool) = self.pools.get(&agent.pool_type) else {
            return true;
        };
        request.cpu_cores <= pool.defaults.cpu_cores && request.memory_mb <= pool.defaults.memory_mb
    }

    async fn candidates_for(&self, task: &Task) -> Vec<Agent> {
        match &task.pool_type {
            Some(pool_type) => self.registry.list_by_type(pool_type).await,
            None => self.registry.list_all().await,
        }
    }

    /// `priority`, then `success_rate`, then `average_task_time_ms`
    /// (faster wins), in that order. Used both as the `PriorityBased`
    /// strategy outright and as the tie-break for other strategies.
    fn priority_based_order(a: &Agent, b: &Agent) -> std::cmp::Ordering {
        a.priority
            .cmp(&b.priority)
            .then_with(|| {
                a.performance
                    .success_rate
                    .partial_cmp(&b.performance.success_rate)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| {
                b.performance
                    .average_task_time_ms
                    .partial_cmp(&a.performance.average_task_time_ms)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }

    fn select(
        &self,
        pool_type: &str,
        candidates: Vec<Agent>,
        task: &Task,
        strategy: AllocationStrategy,
    ) -> Option<Agent> {
        if candidates.is_empty() {
            return None;
        }

        match strategy {
            AllocationStrategy::PriorityBased => candidates.into_iter().max_by(Self::priority_based_order),
            AllocationStrategy::RoundRobin => {
                let cursor = self
                    .pools
                    .get(pool_type)
                    .map(|p| p.round_robin_cursor.fetch_add(1, Ordering::SeqCst))
                    .unwrap_or(0);
                let idx = (cursor as usize) % candidates.len();
                candidates.into_iter().nth(idx)
            }
            AllocationStrategy::LeastLoaded => {
                // Within the already-idle candidate set, any idle agent
                // satisfies "lowest active allocations" (idle == 0 active).
                candidates.into_iter().next()
            }
            AllocationStrategy::CapabilityMatch => candidates.into_iter().max_by(|a, b| {
                a.capability_match_ratio(&task.capabilities)
                    .partial_cmp(&b.capability_match_ratio(&task.capabilities))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| Self::priority_based_order(a, b))
            }),
            AllocationStrategy::PerformanceBased => candidates.into_iter().max_by(|a, b| {
                a.performance_score()
                    .partial_cmp(&b.performance_score())
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
        }
    }

    /// Select an agent for `task` per `strategy`, transition it to
    /// `busy`, and record an `Allocation` with `timeout_at = now +
    /// allocation_timeout`.
    pub async fn allocate(&self, task: &Task, strategy: AllocationStrategy) -> HiveResult<Allocation> {
        let pool_type = task
            .pool_type
            .clone()
            .unwrap_or_else(|| "coordinator".to_string());
        let candidates = self.candidate_set(self.candidates_for(task).await, task);

        let Some(chosen) = self.select(&pool_type, candidates, task, strategy) else {
            return Err(HiveError::NoSuitableAgent {
                task_id: task.id.to_string(),
                pool_type,
            });
        };

        let now = Utc::now();
        let allocation = Allocation {
            id: Uuid::new_v4(),
            agent_id: chosen.id,
            pool_type: chosen.pool_type.clone(),
            task_id: task.id,
            strategy,
            allocated_at: now,
            timeout_at: now + self.allocation_timeout,
            status: AllocationStatus::Allocated,
        };

        self.registry
            .update(chosen.id, |a| a.status = AgentStatus::Busy)
            .await?;

        if let Some(mut pool) = self.pools.get_mut(&allocation.pool_type) {
            pool.metrics.total_allocations += 1;
            pool.metrics.active_allocations += 1;
            pool.metrics.last_allocation_time = Some(now);
        }

        self.allocations.insert(allocation.id, allocation.clone());
        self.store
            .hash_set(
                &crate::store::swarm_channel(&self.swarm_id, &format!("fleet:allocations:{}", allocation.id)),
                "allocation",
                &allocation,
            )
            .await?;

        let _ = self
            .store
            .publish(
                &crate::store::swarm_channel(&self.swarm_id, "allocation"),
                &serde_json::to_vec(&serde_json::json!({
                    "type": "allocation_created",
                    "allocation_id": allocation.id,
                    "agent_id": allocation.agent_id,
                }))?,
            )
            .await;

        Ok(allocation)
    }

    /// Update pool counters, record success/latency into the agent's
    /// performance, return the agent to idle, and delete the allocation.
    pub async fn release(&self, allocation_id: Uuid, success: bool, duration_ms: u64) -> HiveResult<Allocation> {
        let (_, mut allocation) = self
            .allocations
            .remove(&allocation_id)
            .ok_or_else(|| HiveError::AllocationNotFound { id: allocation_id.to_string() })?;
        allocation.status = AllocationStatus::Released;

        if let Some(mut pool) = self.pools.get_mut(&allocation.pool_type) {
            pool.metrics.active_allocations = pool.metrics.active_allocations.saturating_sub(1);
        }

        self.registry
            .update(allocation.agent_id, |a| {
                a.performance.record_completion(success, duration_ms);
                a.status = AgentStatus::Idle;
            })
            .await?;

        self.store
            .delete(&crate::store::swarm_channel(
                &self.swarm_id,
                &format!("fleet:allocations:{allocation_id}"),
            ))
            .await?;

        let _ = self
            .store
            .publish(
                &crate::store::swarm_channel(&self.swarm_id, "allocation"),
                &serde_json::to_vec(&serde_json::json!({
                    "type": "allocation_released",
                    "allocation_id": allocation.id,
                }))?,
            )
            .await;

        Ok(allocation)
    }

    /// Mark allocations past `timeout_at` as `timeout` and release their
    /// agents. Returns the timed-out allocations so the coordinator can
    /// fail their owning tasks with `allocation_timeout`.
    pub async fn reap_expired(&self) -> Vec<Allocation> {
        let now = Utc::now();
        let expired_ids: Vec<Uuid> = self
            .allocations
            .iter()
            .filter(|e| e.timeout_at <= now)
            .map(|e| *e.key())
            .collect();

        let mut reaped = Vec::new();
        for id in expired_ids {
            if let Some((_, mut allocation)) = self.allocations.remove(&id) {
                allocation.status = AllocationStatus::Timeout;
                let _ = self
                    .registry
                    .update(allocation.agent_id, |a| a.status = AgentStatus::Idle)
                    .await;
                if let Some(mut pool) = self.pools.get_mut(&allocation.pool_type) {
                    pool.metrics.active_allocations = pool.metrics.active_allocations.saturating_sub(1);
                }
                let _ = self
                    .store
                    .publish(
                        &crate::store::swarm_channel(&self.swarm_id, "allocation"),
                        &serde_json::to_vec(&serde_json::json!({
                            "type": "allocation_timeout",
                            "allocation_id": allocation.id,
                        }))
                        .unwrap_or_default(),
                    )
                    .await;
                reaped.push(allocation);
            }
        }
        reaped
    }

    #[must_use]
    pub fn pool_bounds(&self, pool_type: &str) -> Option<(u32, u32)> {
        self.pools.get(pool_type).map(|p| (p.defaults.min_agents, p.defaults.max_agents))
    }

    #[must_use]
    pub fn known_pools(&self) -> Vec<String> {
        self.pools.iter().map(|e| e.key().clone()).collect()
    }

    #[must_use]
    pub fn pool_utilization(&self, pool_type: &str, current_agents: u32) -> f64 {
        self.pools
            .get(pool_type)
            .map(|p| {
                if current_agents == 0 {
                    0.0
                } else {
                    p.metrics.active_allocations as f64 / current_agents as f64
                }
            })
            .unwrap_or(0.0)
    }
}
