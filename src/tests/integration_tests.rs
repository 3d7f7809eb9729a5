//! End-to-end scenarios spanning health, allocation, and autoscaling
//! together rather than one component in isolation.

use chrono::{Duration as ChronoDuration, Utc};

use crate::core::autoscaler::AutoscalingController;
use crate::core::health::HealthState;
use crate::core::metrics::{MetricSample, MetricWindow, ScaleHistory};
use crate::store::InMemoryStore;
use crate::tests::test_utils::{coder_config, test_engine};
use std::sync::Arc;

#[tokio::test]
async fn heartbeat_timeout_trips_breaker_and_recovery_restores_health() {
    let engine = test_engine().await;
    let agent_id = engine.spawn_agent(coder_config(5)).await.unwrap();

    engine
        .registry
        .update(agent_id, |a| a.health.last_heartbeat = Utc::now() - ChronoDuration::seconds(11))
        .await
        .unwrap();
    engine.health.tick().await;
    assert_eq!(engine.health.state_of(agent_id), HealthState::Degraded);

    engine.health.record_heartbeat(agent_id, Utc::now()).await.unwrap();
    assert_eq!(engine.health.state_of(agent_id), HealthState::Healthy);
}

#[tokio::test]
async fn terminating_an_agent_below_pool_minimum_requests_backfill() {
    let engine = test_engine().await;
    let agent_id = engine.spawn_agent(coder_config(5)).await.unwrap();

    engine.coordinator.on_health_transition(agent_id, HealthState::Failed).await.unwrap();

    assert!(engine.registry.get(agent_id).await.unwrap().is_none());
}

#[tokio::test]
async fn reactive_target_scales_up_under_high_utilization() {
    let store = Arc::new(InMemoryStore::new());
    let window = Arc::new(MetricWindow::new(Arc::clone(&store), "swarm".to_string(), 20));
    let history = Arc::new(ScaleHistory::new(store, "swarm".to_string()));
    let config = crate::utils::config::HiveConfig::default().autoscaling;

    let controller = AutoscalingController::new(window, history, config, vec![], 1, 1000);
    window_push(&controller, 0.9).await;

    let target = controller.reactive_target(5);
    assert!(target > 5, "expected scale-up target above current size, got {target}");
}

async fn window_push(controller: &AutoscalingController, cpu: f64) {
    controller
        .sample(MetricSample {
            timestamp: Utc::now(),
            cpu_utilization: cpu,
            memory_utilization: 0.5,
            queue_length: 0,
            response_time_ms: 50.0,
            throughput: 10.0,
            agent_count: 5,
        })
        .await
        .unwrap();
}
