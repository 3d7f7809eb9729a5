//! Error-path coverage at the engine boundary: operations on unknown
//! ids, out-of-range scale requests, and double-completion.

use uuid::Uuid;

use crate::tasks::task::{Task, TaskResult};
use crate::tests::test_utils::{coder_config, test_engine};
use crate::utils::error::HiveError;
use std::collections::HashSet;

#[tokio::test]
async fn terminating_an_unknown_agent_fails() {
    let engine = test_engine().await;
    let result = engine.terminate_agent(Uuid::new_v4(), "test").await;
    assert!(matches!(result, Err(HiveError::AgentNotFound { .. })));
}

#[tokio::test]
async fn cancelling_an_unknown_task_fails() {
    let engine = test_engine().await;
    let result = engine.cancel_task(Uuid::new_v4()).await;
    assert!(matches!(result, Err(HiveError::TaskNotFound { .. })));
}

#[tokio::test]
async fn reporting_a_result_for_an_untracked_task_fails() {
    let engine = test_engine().await;
    let result = engine
        .report_task_result(TaskResult::success(Uuid::new_v4(), Uuid::new_v4(), 10, serde_json::json!({})))
        .await;
    assert!(matches!(result, Err(HiveError::TaskNotFound { .. })));
}

#[tokio::test]
async fn scaling_an_unknown_pool_fails() {
    let engine = test_engine().await;
    let result = engine.scale_pool("not-a-real-pool", 5).await;
    assert!(matches!(result, Err(HiveError::PoolNotFound { .. })));
}

#[tokio::test]
async fn scaling_a_pool_past_its_configured_max_fails() {
    let engine = test_engine().await;
    let (_min, max) = engine.allocator.pool_bounds("coder").unwrap();
    let result = engine.scale_pool("coder", max + 1).await;
    assert!(matches!(result, Err(HiveError::CapacityExceeded { .. })));
}

#[tokio::test]
async fn completing_the_same_task_twice_fails_on_the_second_call() {
    let engine = test_engine().await;
    let agent_id = engine.spawn_agent(coder_config(5)).await.unwrap();
    let task = Task::new(Some("coder".to_string()), HashSet::new(), 5, serde_json::json!({}));
    let task_id = engine.submit_task(task).await.unwrap();

    let first = TaskResult::success(task_id, agent_id, 50, serde_json::json!({}));
    engine.report_task_result(first).await.unwrap();

    let second = TaskResult::success(task_id, agent_id, 50, serde_json::json!({}));
    let result = engine.report_task_result(second).await;
    assert!(matches!(result, Err(HiveError::TaskNotFound { .. })));
}
