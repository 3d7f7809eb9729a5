use serde::{Deserialize, Serialize};
use tracing::{Level, event};
use uuid::Uuid;

/// Structured logging helpers for fleet lifecycle and task events.
pub struct StructuredLogger;

impl StructuredLogger {
    /// Log agent lifecycle events (spawn, terminate, state change) with structured fields.
    pub fn log_agent_event(event_type: AgentEventType, agent_id: Uuid, details: &AgentEventDetails) {
        event!(
            Level::INFO,
            agent_id = %agent_id,
            event_type = ?event_type,
            pool_type = %details.pool_type,
            status = %details.status,
            "agent lifecycle event"
        );
    }

    /// Log task lifecycle events (submit, start, complete, fail, timeout).
    pub fn log_task_event(event_type: TaskEventType, task_id: Uuid, details: &TaskEventDetails) {
        event!(
            Level::INFO,
            task_id = %task_id,
            event_type = ?event_type,
            priority = details.priority,
            assigned_agent = ?details.assigned_agent,
            duration_ms = ?details.duration_ms,
            success = ?details.success,
            "task lifecycle event"
        );
    }

    /// Log a fleet-wide metrics snapshot.
    pub fn log_fleet_metrics(metrics: &FleetMetricsSnapshot) {
        event!(
            Level::INFO,
            agent_count = metrics.agent_count,
            queued_tasks = metrics.queued_tasks,
            active_allocations = metrics.active_allocations,
            cpu_utilization = metrics.cpu_utilization,
            "fleet metrics snapshot"
        );
    }

    /// Log a scale decision made by the autoscaler or the coordinator's reactive hook.
    pub fn log_scale_event(pool_type: &str, previous: u32, new: u32, reason: &str) {
        event!(
            Level::INFO,
            pool_type = pool_type,
            previous_count = previous,
            new_count = new,
            reason = reason,
            "pool scaled"
        );
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentEventType {
    Spawned,
    Allocated,
    Released,
    HealthChanged,
    Terminated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEventDetails {
    pub pool_type: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskEventType {
    Submitted,
    Started,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEventDetails {
    pub priority: u8,
    pub assigned_agent: Option<Uuid>,
    pub duration_ms: Option<u64>,
    pub success: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetMetricsSnapshot {
    pub agent_count: usize,
    pub queued_tasks: usize,
    pub active_allocations: usize,
    pub cpu_utilization: f64,
}

#[macro_export]
macro_rules! log_agent_event {
    ($event_type:expr, $agent_id:expr, $details:expr) => {
        $crate::utils::structured_logging::StructuredLogger::log_agent_event(
            $event_type,
            $agent_id,
            &$details,
        );
    };
}

#[macro_export]
macro_rules! log_task_event {
    ($event_type:expr, $task_id:expr, $details:expr) => {
        $crate::utils::structured_logging::StructuredLogger::log_task_event(
            $event_type,
            $task_id,
            &$details,
        );
    };
}
