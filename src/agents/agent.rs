//! # Agent data model
//!
//! An `Agent` is a registered worker slot in one of the fleet's typed
//! pools. The registry owns the canonical record; the health monitor
//! writes only the `health` sub-structure; the allocator flips `status`
//! between `idle` and `busy` as part of allocate/release.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// EWMA smoothing factor applied to `performance.success_rate` on each
/// task completion.
const SUCCESS_RATE_ALPHA: f64 = 0.2;

/// Operational status of an agent within its pool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Available for allocation.
    Idle,
    /// Holds exactly one active allocation.
    Busy,
    /// Selected but not yet confirmed busy (transient).
    Active,
    /// Unhealthy, attempting recovery; not selectable.
    Recovering,
    /// Failed health checks past the recovery window; never selectable.
    Failed,
    /// Being terminated; finishing its current allocation, then removed.
    Draining,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Busy => "busy",
            AgentStatus::Active => "active",
            AgentStatus::Recovering => "recovering",
            AgentStatus::Failed => "failed",
            AgentStatus::Draining => "draining",
        };
        write!(f, "{s}")
    }
}

/// Requested resource footprint for an agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AgentResources {
    pub cpu_cores: f64,
    pub memory_mb: u64,
}

/// Rolling performance statistics, updated by the coordinator on task
/// completion/failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AgentPerformance {
    pub tasks_completed: u64,
    /// EWMA of task success, in `[0, 1]`.
    pub success_rate: f64,
    /// Running mean task duration in milliseconds.
    pub average_task_time_ms: f64,
}

impl Default for AgentPerformance {
    fn default() -> Self {
        Self {
            tasks_completed: 0,
            success_rate: 1.0,
            average_task_time_ms: 0.0,
        }
    }
}

impl AgentPerformance {
    /// Fold a completed task's outcome into the rolling statistics.
    pub fn record_completion(&mut self, success: bool, duration_ms: u64) {
        let outcome = if success { 1.0 } else { 0.0 };
        self.success_rate =
            SUCCESS_RATE_ALPHA * outcome + (1.0 - SUCCESS_RATE_ALPHA) * self.success_rate;
        self.tasks_completed += 1;
        let n = self.tasks_completed as f64;
        self.average_task_time_ms += (duration_ms as f64 - self.average_task_time_ms) / n;
    }

    /// Penalize the score after a watchdog timeout, distinct from a clean
    /// task failure.
    pub fn penalize_timeout(&mut self) {
        self.success_rate *= 0.8;
    }
}

/// Health sub-structure, owned by the health monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHealth {
    pub last_heartbeat: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub recovery_attempts: u32,
    pub circuit_breaker_tripped: bool,
    pub circuit_breaker_tripped_at: Option<DateTime<Utc>>,
}

impl AgentHealth {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            last_heartbeat: now,
            consecutive_failures: 0,
            recovery_attempts: 0,
            circuit_breaker_tripped: false,
            circuit_breaker_tripped_at: None,
        }
    }
}

/// Parameters used to register a new agent with the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub pool_type: String,
    pub priority: u8,
    pub capabilities: HashSet<String>,
    pub resources: AgentResources,
}

/// A registered worker slot. `status = busy` holds iff exactly one active
/// allocation references this agent; a `failed` agent is never
/// selectable; `circuit_breaker_tripped` blocks selection until its
/// timeout elapses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub pool_type: String,
    pub status: AgentStatus,
    pub priority: u8,
    pub capabilities: HashSet<String>,
    pub resources: AgentResources,
    pub performance: AgentPerformance,
    pub health: AgentHealth,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Agent {
    #[must_use]
    pub fn new(config: AgentConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            pool_type: config.pool_type,
            status: AgentStatus::Idle,
            priority: config.priority,
            capabilities: config.capabilities,
            resources: config.resources,
            performance: AgentPerformance::default(),
            health: AgentHealth::new(now),
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// True iff `required` is a subset of this agent's capabilities.
    #[must_use]
    pub fn has_capabilities(&self, required: &HashSet<String>) -> bool {
        required.is_subset(&self.capabilities)
    }

    /// Fraction of `required` capabilities this agent satisfies, in
    /// `[0, 1]`. Used by the `capability_match` allocation strategy.
    #[must_use]
    pub fn capability_match_ratio(&self, required: &HashSet<String>) -> f64 {
        if required.is_empty() {
            return 1.0;
        }
        let matched = required.intersection(&self.capabilities).count();
        matched as f64 / required.len() as f64
    }

    /// Score used by the `performance_based` allocation strategy.
    #[must_use]
    pub fn performance_score(&self) -> f64 {
        0.7 * self.performance.success_rate
            + 0.3 * (1.0 / self.performance.average_task_time_ms.max(1.0))
    }

    #[must_use]
    pub fn is_selectable(&self) -> bool {
        self.status == AgentStatus::Idle && !self.health.circuit_breaker_tripped
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.version += 1;
    }
}
