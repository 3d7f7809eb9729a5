//! Health Monitor (component D). Drives each agent through a 5-state
//! health machine from periodic heartbeat ticks and owns the per-agent
//! circuit breaker. Writes only `agent.health.*`; never touches
//! `agent.status` — the coordinator decides whether to terminate.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::agents::agent::AgentStatus;
use crate::core::registry::AgentRegistry;
use crate::infrastructure::metrics::FleetMetricsRegistry;
use crate::store::{CoordinationStore, SharedStore};
use crate::utils::error::HiveResult;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
    Failed,
    Recovering,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Unhealthy => "unhealthy",
            HealthState::Failed => "failed",
            HealthState::Recovering => "recovering",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct AgentHealthTracking {
    state: HealthState,
    breaker: BreakerState,
    breaker_opened_at: Option<DateTime<Utc>>,
    entered_recovering_at: Option<DateTime<Utc>>,
}

impl Default for AgentHealthTracking {
    fn default() -> Self {
        Self {
            state: HealthState::Healthy,
            breaker: BreakerState::Closed,
            breaker_opened_at: None,
            entered_recovering_at: None,
        }
    }
}

pub struct HealthMonitorConfig {
    pub heartbeat_interval: std::time::Duration,
    pub health_timeout: Duration,
    pub max_failures: u32,
    pub recovery_timeout: Duration,
    pub breaker_threshold: u32,
    pub breaker_timeout: Duration,
}

pub struct HealthMonitor {
    store: SharedStore,
    registry: Arc<AgentRegistry>,
    swarm_id: String,
    config: HealthMonitorConfig,
    tracking: DashMap<Uuid, AgentHealthTracking>,
    metrics: std::sync::Mutex<Option<Arc<FleetMetricsRegistry>>>,
}

impl HealthMonitor {
    #[must_use]
    pub fn new(
        store: SharedStore,
        registry: Arc<AgentRegistry>,
        swarm_id: String,
        config: HealthMonitorConfig,
    ) -> Self {
        Self {
            store,
            registry,
            swarm_id,
            config,
            tracking: DashMap::new(),
            metrics: std::sync::Mutex::new(None),
        }
    }

    /// Attach the metrics registry used to record circuit breaker trips.
    /// Optional: a monitor with none attached simply skips recording.
    pub fn attach_metrics(&self, metrics: Arc<FleetMetricsRegistry>) {
        *self.metrics.lock().expect("health metrics mutex poisoned") = Some(metrics);
    }

    #[must_use]
    pub fn state_of(&self, agent_id: Uuid) -> HealthState {
        self.tracking.get(&agent_id).map(|t| t.state).unwrap_or(HealthState::Healthy)
    }

    #[must_use]
    pub fn is_circuit_open(&self, agent_id: Uuid) -> bool {
        self.tracking
            .get(&agent_id)
            .map(|t| matches!(t.breaker, BreakerState::Open))
            .unwrap_or(false)
    }

    async fn emit(&self, event: serde_json::Value) {
        let _ = self
            .store
            .publish(&crate::store::swarm_channel(&self.swarm_id, "health"), &serde_json::to_vec(&event).unwrap_or_default())
            .await;
    }

    async fn trip_breaker(&self, agent_id: Uuid, now: DateTime<Utc>) {
        {
            let mut entry = self.tracking.entry(agent_id).or_default();
            entry.breaker = BreakerState::Open;
            entry.breaker_opened_at = Some(now);
        }
        let agent = self
            .registry
            .update(agent_id, |a| {
                a.health.circuit_breaker_tripped = true;
                a.health.circuit_breaker_tripped_at = Some(now);
            })
            .await
            .ok();
        if let Some(agent) = agent {
            let metrics = self.metrics.lock().expect("health metrics mutex poisoned").clone();
            if let Some(metrics) = metrics {
                metrics.record_circuit_breaker_trip(&self.swarm_id, &agent.pool_type);
            }
        }
        self.emit(serde_json::json!({"type": "circuit_breaker_tripped", "agent_id": agent_id})).await;
    }

    async fn reset_breaker(&self, agent_id: Uuid) {
        {
            let mut entry = self.tracking.entry(agent_id).or_default();
            entry.breaker = BreakerState::Closed;
            entry.breaker_opened_at = None;
        }
        let _ = self
            .registry
            .update(agent_id, |a| {
                a.health.circuit_breaker_tripped = false;
                a.health.circuit_breaker_tripped_at = None;
            })
            .await;
        self.emit(serde_json::json!({"type": "circuit_breaker_reset", "agent_id": agent_id})).await;
    }

    async fn transition(&self, agent_id: Uuid, next: HealthState, now: DateTime<Utc>) {
        let previous = {
            let mut entry = self.tracking.entry(agent_id).or_default();
            let previous = entry.state;
            if previous == next {
                return;
            }
            entry.state = next;
            if next == HealthState::Recovering {
                entry.entered_recovering_at = Some(now);
            }
            previous
        };
        self.emit(serde_json::json!({
            "type": "health_status_changed",
            "agent_id": agent_id,
            "previous": previous.to_string(),
            "current": next.to_string(),
        }))
        .await;
        if next == HealthState::Unhealthy && previous != HealthState::Unhealthy {
            self.emit(serde_json::json!({"type": "recovery_requested", "agent_id": agent_id})).await;
        }
    }

    /// Called by an agent's heartbeat channel; resets the failure
    /// counter and, unless the breaker is still open, returns the agent
    /// to `healthy`.
    pub async fn record_heartbeat(&self, agent_id: Uuid, ts: DateTime<Utc>) -> HiveResult<()> {
        self.registry.update_heartbeat(agent_id, ts).await?;
        self.registry
            .update(agent_id, |a| a.health.consecutive_failures = 0)
            .await?;

        let breaker_open = self.is_circuit_open(agent_id);
        if !breaker_open {
            self.transition(agent_id, HealthState::Healthy, ts).await;
        }
        Ok(())
    }

    /// Evaluate every registered agent against `health_timeout` /
    /// `max_failures` / `recovery_timeout` / `breaker_timeout`. Intended
    /// to run once per `heartbeat_interval`.
    pub async fn tick(&self) {
        let now = Utc::now();
        for agent in self.registry.list_all().await {
            if agent.status == AgentStatus::Draining {
                continue;
            }

            let breaker = self.tracking.get(&agent.id).map(|t| t.breaker).unwrap_or(BreakerState::Closed);
            if breaker == BreakerState::Open {
                let opened_at = self.tracking.get(&agent.id).and_then(|t| t.breaker_opened_at);
                if let Some(opened_at) = opened_at {
                    if now - opened_at >= self.config.breaker_timeout {
                        let mut entry = self.tracking.entry(agent.id).or_default();
                        entry.breaker = BreakerState::HalfOpen;
                    }
                }
                continue;
            }
            if breaker == BreakerState::HalfOpen {
                if now - agent.health.last_heartbeat <= self.config.health_timeout {
                    self.try_close_half_open(agent.id, now).await;
                }
                continue;
            }

            let missed = now - agent.health.last_heartbeat;
            if missed <= self.config.health_timeout {
                continue;
            }

            let state = self.state_of(agent.id);
            if state == HealthState::Recovering {
                let entered_at = self.tracking.get(&agent.id).and_then(|t| t.entered_recovering_at).unwrap_or(now);
                if now - entered_at >= self.config.recovery_timeout {
                    self.transition(agent.id, HealthState::Failed, now).await;
                    self.trip_breaker(agent.id, now).await;
                }
                continue;
            }

            let failures = self
                .registry
                .update(agent.id, |a| a.health.consecutive_failures += 1)
                .await
                .map(|a| a.health.consecutive_failures)
                .unwrap_or(0);

            if failures >= self.config.breaker_threshold {
                self.trip_breaker(agent.id, now).await;
            }

            if failures >= self.config.max_failures {
                self.transition(agent.id, HealthState::Unhealthy, now).await;
                self.transition(agent.id, HealthState::Recovering, now).await;
            } else {
                self.transition(agent.id, HealthState::Degraded, now).await;
            }
        }
    }

    /// Half-open breaker closes on the next successful heartbeat tick,
    /// returning the agent to `recovering` (then `healthy` on the
    /// following tick via [`Self::record_heartbeat`]).
    pub async fn try_close_half_open(&self, agent_id: Uuid, now: DateTime<Utc>) {
        let is_half_open = self.tracking.get(&agent_id).map(|t| matches!(t.breaker, BreakerState::HalfOpen)).unwrap_or(false);
        if is_half_open {
            self.reset_breaker(agent_id).await;
            self.transition(agent_id, HealthState::Recovering, now).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::agent::{AgentConfig, AgentResources};
    use crate::store::InMemoryStore;
    use std::collections::HashSet;

    fn config() -> HealthMonitorConfig {
        HealthMonitorConfig {
            heartbeat_interval: std::time::Duration::from_secs(5),
            health_timeout: Duration::seconds(10),
            max_failures: 3,
            recovery_timeout: Duration::seconds(60),
            breaker_threshold: 5,
            breaker_timeout: Duration::seconds(30),
        }
    }

    async fn setup() -> (Arc<AgentRegistry>, HealthMonitor, Uuid) {
        let store = Arc::new(InMemoryStore::new());
        let registry = Arc::new(AgentRegistry::new(Arc::clone(&store), "test".to_string(), std::time::Duration::from_secs(30)));
        let id = registry
            .register(AgentConfig {
                pool_type: "coder".to_string(),
                priority: 5,
                capabilities: HashSet::new(),
                resources: AgentResources { cpu_cores: 1.0, memory_mb: 512 },
            })
            .await
            .unwrap();
        let monitor = HealthMonitor::new(store, Arc::clone(&registry), "test".to_string(), config());
        (registry, monitor, id)
    }

    #[tokio::test]
    async fn new_agent_starts_healthy() {
        let (_registry, monitor, id) = setup().await;
        assert_eq!(monitor.state_of(id), HealthState::Healthy);
    }

    #[tokio::test]
    async fn missed_heartbeat_past_timeout_degrades() {
        let (registry, monitor, id) = setup().await;
        registry
            .update(id, |a| a.health.last_heartbeat = Utc::now() - Duration::seconds(11))
            .await
            .unwrap();
        monitor.tick().await;
        assert_eq!(monitor.state_of(id), HealthState::Degraded);
    }

    #[tokio::test]
    async fn reaching_max_failures_enters_recovering_and_requests_recovery() {
        let (registry, monitor, id) = setup().await;
        registry
            .update(id, |a| a.health.last_heartbeat = Utc::now() - Duration::seconds(11))
            .await
            .unwrap();
        monitor.tick().await;
        monitor.tick().await;
        monitor.tick().await;
        assert_eq!(monitor.state_of(id), HealthState::Recovering);
    }

    #[tokio::test]
    async fn heartbeat_resets_failures_and_returns_to_healthy() {
        let (registry, monitor, id) = setup().await;
        registry
            .update(id, |a| a.health.last_heartbeat = Utc::now() - Duration::seconds(11))
            .await
            .unwrap();
        monitor.tick().await;
        assert_eq!(monitor.state_of(id), HealthState::Degraded);

        monitor.record_heartbeat(id, Utc::now()).await.unwrap();
        assert_eq!(monitor.state_of(id), HealthState::Healthy);
        let agent = registry.get(id).await.unwrap().unwrap();
        assert_eq!(agent.health.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn breaker_trips_after_threshold_failures() {
        let (registry, monitor, id) = setup().await;
        for _ in 0..5 {
            registry
                .update(id, |a| a.health.last_heartbeat = Utc::now() - Duration::seconds(11))
                .await
                .unwrap();
            monitor.tick().await;
        }
        assert!(monitor.is_circuit_open(id));
        let agent = registry.get(id).await.unwrap().unwrap();
        assert!(agent.health.circuit_breaker_tripped);
    }
}
