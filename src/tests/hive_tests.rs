//! Engine-level scenarios grounded in the seed scenarios: happy-path
//! dispatch, priority ordering, and task completion bookkeeping.

use std::collections::HashSet;

use crate::agents::agent::AgentStatus;
use crate::tasks::task::{Task, TaskResult, TaskStatus};
use crate::tests::test_utils::{coder_config, test_engine};

#[tokio::test]
async fn happy_path_dispatches_to_an_idle_coder() {
    let engine = test_engine().await;
    for _ in 0..3 {
        engine.spawn_agent(coder_config(5)).await.unwrap();
    }

    let task = Task::new(Some("coder".to_string()), HashSet::new(), 5, serde_json::json!({}));
    let task_id = engine.submit_task(task).await.unwrap();

    let agents = engine.registry.list_by_type("coder").await;
    let busy_agent = agents.iter().find(|a| a.status == AgentStatus::Busy).expect("one coder should be busy");

    let result = TaskResult::success(task_id, busy_agent.id, 1200, serde_json::json!({"ok": true}));
    engine.report_task_result(result).await.unwrap();

    let agent = engine.registry.get(busy_agent.id).await.unwrap().unwrap();
    assert_eq!(agent.status, AgentStatus::Idle);
    assert_eq!(agent.performance.tasks_completed, 1);
    assert_eq!(agent.performance.average_task_time_ms, 1200.0);
}

#[tokio::test]
async fn higher_priority_task_is_allocated_first() {
    let engine = test_engine().await;
    engine.spawn_agent(coder_config(5)).await.unwrap();

    let low = Task::new(Some("coder".to_string()), HashSet::new(), 3, serde_json::json!({}));
    let high = Task::new(Some("coder".to_string()), HashSet::new(), 9, serde_json::json!({}));
    let low_id = engine.submit_task(low).await.unwrap();
    let high_id = engine.submit_task(high).await.unwrap();

    let high_task = engine.coordinator.task(high_id).unwrap();
    let low_task = engine.coordinator.task(low_id).unwrap();
    assert_eq!(high_task.status, TaskStatus::Executing);
    assert_eq!(low_task.status, TaskStatus::Queued);
}

#[tokio::test]
async fn task_for_unknown_pool_fails_immediately() {
    let engine = test_engine().await;
    let task = Task::new(Some("nonexistent".to_string()), HashSet::new(), 5, serde_json::json!({}));
    let task_id = engine.submit_task(task).await.unwrap();
    assert!(engine.coordinator.task(task_id).is_none());
}

#[tokio::test]
async fn watchdog_times_out_stalled_task_and_penalizes_agent() {
    let engine = test_engine().await;
    let agent_id = engine.spawn_agent(coder_config(5)).await.unwrap();

    let task = Task::new(Some("coder".to_string()), HashSet::new(), 5, serde_json::json!({})).with_timeout_secs(0);
    engine.submit_task(task).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    engine.coordinator.sweep_watchdogs().await;

    let agent = engine.registry.get(agent_id).await.unwrap().unwrap();
    assert_eq!(agent.status, AgentStatus::Idle);
    assert!(agent.performance.success_rate < 1.0);
}
