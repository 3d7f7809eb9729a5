use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use uuid::Uuid;

/// Default numeric priority assigned to a task when the caller doesn't
/// specify one.
pub const DEFAULT_TASK_PRIORITY: u8 = 5;

/// Default task execution timeout.
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 5 * 60;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Executing,
    Completed,
    Failed,
    Timeout,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Executing => "executing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Timeout => "timeout",
        };
        write!(f, "{s}")
    }
}

/// A unit of work submitted to the fleet coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub pool_type: Option<String>,
    pub capabilities: HashSet<String>,
    /// 1..=10, higher is preferred; defaults to [`DEFAULT_TASK_PRIORITY`].
    pub priority: u8,
    /// Opaque to the core; interpreted by whatever executes the task.
    pub payload: serde_json::Value,
    /// Requested CPU/memory footprint, checked against the pool's
    /// resource limits during allocation. `None` means no explicit ask.
    pub resource_request: Option<crate::agents::agent::AgentResources>,
    pub estimated_duration_ms: Option<u64>,
    pub timeout_secs: u64,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub assigned_agent: Option<Uuid>,
}

impl Task {
    #[must_use]
    pub fn new(
        pool_type: Option<String>,
        capabilities: HashSet<String>,
        priority: u8,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            pool_type,
            capabilities,
            priority: priority.clamp(1, 10),
            payload,
            resource_request: None,
            estimated_duration_ms: None,
            timeout_secs: DEFAULT_TASK_TIMEOUT_SECS,
            status: TaskStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            assigned_agent: None,
        }
    }

    #[must_use]
    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    #[must_use]
    pub fn with_estimated_duration_ms(mut self, duration_ms: u64) -> Self {
        self.estimated_duration_ms = Some(duration_ms);
        self
    }

    #[must_use]
    pub fn with_resource_request(mut self, resources: crate::agents::agent::AgentResources) -> Self {
        self.resource_request = Some(resources);
        self
    }
}

/// Reason a task completion or failure is being reported, distinct from
/// a clean task-level failure: watchdog timeouts penalize agent
/// performance more heavily.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CompletionReason {
    Success,
    Failed,
    Timeout,
    Cancelled,
    AgentTerminated,
    Shutdown,
}

/// Outcome of a task's execution, reported back to the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub agent_id: Uuid,
    pub reason: CompletionReason,
    pub execution_time_ms: u64,
    pub output: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl TaskResult {
    #[must_use]
    pub fn success(task_id: Uuid, agent_id: Uuid, execution_time_ms: u64, output: serde_json::Value) -> Self {
        Self {
            task_id,
            agent_id,
            reason: CompletionReason::Success,
            execution_time_ms,
            output: Some(output),
            error_message: None,
            completed_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn failure(
        task_id: Uuid,
        agent_id: Uuid,
        reason: CompletionReason,
        execution_time_ms: u64,
        error_message: String,
    ) -> Self {
        Self {
            task_id,
            agent_id,
            reason,
            execution_time_ms,
            output: None,
            error_message: Some(error_message),
            completed_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.reason == CompletionReason::Success
    }
}

/// Priority-ordered task queue: highest `priority` first, FIFO within a
/// priority tier. Backed by a `BTreeMap` keyed on priority so pop-max is
/// O(log n) and insertion order within a tier is preserved by the inner
/// `VecDeque`.
#[derive(Debug, Default)]
pub struct PriorityTaskQueue {
    tiers: BTreeMap<u8, VecDeque<Task>>,
    len: usize,
}

impl PriorityTaskQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tiers: BTreeMap::new(),
            len: 0,
        }
    }

    pub fn push(&mut self, task: Task) {
        self.tiers.entry(task.priority).or_default().push_back(task);
        self.len += 1;
    }

    /// Remove and return the highest-priority, oldest-queued task.
    pub fn pop(&mut self) -> Option<Task> {
        let &highest = self.tiers.keys().next_back()?;
        let tier = self.tiers.get_mut(&highest)?;
        let task = tier.pop_front();
        if tier.is_empty() {
            self.tiers.remove(&highest);
        }
        if task.is_some() {
            self.len -= 1;
        }
        task
    }

    /// Inspect the head without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<&Task> {
        let &highest = self.tiers.keys().next_back()?;
        self.tiers.get(&highest).and_then(|tier| tier.front())
    }

    /// Remove a queued task by id (used by `cancelTask` before it starts
    /// executing). Returns the removed task if it was still queued.
    pub fn remove(&mut self, task_id: Uuid) -> Option<Task> {
        for tier in self.tiers.values_mut() {
            if let Some(pos) = tier.iter().position(|t| t.id == task_id) {
                let task = tier.remove(pos);
                if tier.is_empty() {
                    // leave cleanup of the now-empty tier to the next pop;
                    // cheap and avoids a second borrow here.
                }
                self.len -= 1;
                return task;
            }
        }
        None
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_with_priority(priority: u8) -> Task {
        Task::new(None, HashSet::new(), priority, serde_json::json!({}))
    }

    #[test]
    fn pops_highest_priority_first() {
        let mut queue = PriorityTaskQueue::new();
        queue.push(task_with_priority(3));
        queue.push(task_with_priority(9));
        queue.push(task_with_priority(5));

        assert_eq!(queue.pop().unwrap().priority, 9);
        assert_eq!(queue.pop().unwrap().priority, 5);
        assert_eq!(queue.pop().unwrap().priority, 3);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn fifo_within_same_priority() {
        let mut queue = PriorityTaskQueue::new();
        let first = task_with_priority(5);
        let second = task_with_priority(5);
        let first_id = first.id;
        let second_id = second.id;
        queue.push(first);
        queue.push(second);

        assert_eq!(queue.pop().unwrap().id, first_id);
        assert_eq!(queue.pop().unwrap().id, second_id);
    }

    #[test]
    fn remove_drops_queued_task_by_id() {
        let mut queue = PriorityTaskQueue::new();
        let task = task_with_priority(4);
        let id = task.id;
        queue.push(task);
        assert_eq!(queue.len(), 1);
        assert!(queue.remove(id).is_some());
        assert!(queue.is_empty());
    }

    #[test]
    fn default_priority_is_clamped() {
        let task = Task::new(None, HashSet::new(), 0, serde_json::json!({}));
        assert_eq!(task.priority, 1);
        let task = Task::new(None, HashSet::new(), 200, serde_json::json!({}));
        assert_eq!(task.priority, 10);
    }
}
