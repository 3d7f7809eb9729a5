//! Top-level wiring for components A-F plus the programmatic API
//! surface consumed by the ambient HTTP layer and `main.rs`.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::agents::agent::AgentConfig;
use crate::core::allocator::ResourceAllocator;
use crate::core::autoscaler::{AutoscalingController, ScalingPolicy};
use crate::core::coordinator::FleetCoordinator;
use crate::core::health::{HealthMonitor, HealthMonitorConfig, HealthState};
use crate::core::metrics::{MetricSample, MetricWindow, ScaleEvent, ScaleHistory};
use crate::core::registry::{AgentRegistry, RegistryStats};
use crate::infrastructure::metrics::FleetMetricsRegistry;
use crate::store::{CoordinationStore, InMemoryStore, SharedStore};
use crate::tasks::task::{Task, TaskResult};
use crate::utils::config::HiveConfig;
use crate::utils::error::{HiveError, HiveResult};
use uuid::Uuid;

/// Snapshot returned by `getFleetStatus`, ready to serialize for
/// `GET /healthz`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetStatus {
    pub swarm_id: String,
    pub registry: RegistryStats,
    pub queued_tasks: usize,
    pub active_allocations: usize,
    pub autoscaler_state: String,
}

/// Snapshot returned by `getFleetMetrics`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetMetrics {
    pub latest_sample: Option<MetricSample>,
    pub window: Vec<MetricSample>,
    pub recent_scale_events: Vec<ScaleEvent>,
}

/// Default, fleet-wide policy evaluated by the autoscaling controller;
/// per-pool policies can be layered on top by callers who build their
/// own [`ScalingPolicy`] list before constructing the engine.
fn default_policies(config: &HiveConfig) -> Vec<ScalingPolicy> {
    vec![ScalingPolicy {
        name: "fleet-cpu".to_string(),
        up_threshold: config.autoscaling.scale_up_cpu_threshold,
        down_threshold: config.autoscaling.scale_down_cpu_threshold,
    }]
}

pub struct HiveEngine {
    pub store: SharedStore,
    pub registry: Arc<AgentRegistry>,
    pub allocator: Arc<ResourceAllocator>,
    pub health: Arc<HealthMonitor>,
    pub coordinator: Arc<FleetCoordinator>,
    pub autoscaler: Arc<AutoscalingController>,
    pub metrics: Arc<FleetMetricsRegistry>,
    config: RwLock<HiveConfig>,
    loops: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl HiveEngine {
    /// Build every component and register the 16 fixed pools from
    /// `config.pools.defaults`. Does not start any background loop;
    /// call [`Self::initialize`] for that.
    pub async fn new(config: HiveConfig) -> HiveResult<Arc<Self>> {
        config.validate()?;

        let store: SharedStore = Arc::new(InMemoryStore::new());
        let swarm_id = config.fleet.swarm_id.clone();

        let registry = Arc::new(AgentRegistry::new(
            Arc::clone(&store),
            swarm_id.clone(),
            std::time::Duration::from_secs(config.fleet.registry_cache_ttl_secs),
        ));

        let allocator = Arc::new(ResourceAllocator::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            swarm_id.clone(),
            chrono::Duration::from_std(config.allocation_timeout()).unwrap_or(chrono::Duration::seconds(30)),
        ));
        for (pool_type, defaults) in &config.pools.defaults {
            allocator.create_pool(pool_type, *defaults).await?;
        }

        let health = Arc::new(HealthMonitor::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            swarm_id.clone(),
            HealthMonitorConfig {
                heartbeat_interval: config.heartbeat_interval(),
                health_timeout: chrono::Duration::from_std(config.health_timeout()).unwrap_or(chrono::Duration::seconds(10)),
                max_failures: config.health.max_failures,
                recovery_timeout: chrono::Duration::from_std(config.recovery_timeout()).unwrap_or(chrono::Duration::seconds(60)),
                breaker_threshold: config.health.circuit_breaker_threshold,
                breaker_timeout: chrono::Duration::from_std(config.circuit_breaker_timeout()).unwrap_or(chrono::Duration::seconds(30)),
            },
        ));

        let coordinator = Arc::new(FleetCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&allocator),
            Arc::clone(&health),
            config.clone(),
        ));

        let window = Arc::new(MetricWindow::new(Arc::clone(&store), swarm_id.clone(), config.autoscaling.window_size));
        let history = Arc::new(ScaleHistory::new(Arc::clone(&store), swarm_id.clone()));
        let autoscaler = Arc::new(AutoscalingController::new(
            window,
            history,
            config.autoscaling.clone(),
            default_policies(&config),
            1,
            config.fleet.max_agents,
        ));

        let metrics = Arc::new(FleetMetricsRegistry::new()?);
        health.attach_metrics(Arc::clone(&metrics));

        Ok(Arc::new(Self {
            store,
            registry,
            allocator,
            health,
            coordinator,
            autoscaler,
            metrics,
            config: RwLock::new(config),
            loops: std::sync::Mutex::new(Vec::new()),
        }))
    }

    /// Spawn the dispatcher idle tick, health tick, allocation reaper,
    /// reactive scaling hook, and (if enabled) the autoscaler's four
    /// loops (sampling, policy evaluation, predictive, cost sweep), each
    /// as an independent `tokio::spawn`ed task.
    pub async fn initialize(&self) -> HiveResult<()> {
        let config = self.config.read().await.clone();
        let mut handles = Vec::new();

        {
            let coordinator = Arc::clone(&self.coordinator);
            let registry = Arc::clone(&self.registry);
            let metrics = Arc::clone(&self.metrics);
            let swarm_id = config.fleet.swarm_id.clone();
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
                loop {
                    ticker.tick().await;
                    coordinator.dispatch().await;
                    coordinator.sweep_watchdogs().await;
                    metrics.set_queue_depth(&swarm_id, coordinator.queue_len_blocking());
                    metrics.set_active_allocations(&swarm_id, coordinator.active_allocation_count());
                    let stats = registry.stats().await;
                    for (pool_type, count) in &stats.by_type {
                        metrics.set_pool_agent_count(&swarm_id, pool_type, *count);
                    }
                }
            }));
        }

        {
            let health = Arc::clone(&self.health);
            let registry = Arc::clone(&self.registry);
            let coordinator = Arc::clone(&self.coordinator);
            let interval = config.heartbeat_interval();
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                let mut previous_states: std::collections::HashMap<uuid::Uuid, HealthState> = std::collections::HashMap::new();
                loop {
                    ticker.tick().await;
                    health.tick().await;
                    for agent in registry.list_all().await {
                        let current = health.state_of(agent.id);
                        let changed = previous_states.get(&agent.id).map(|p| *p != current).unwrap_or(current != HealthState::Healthy);
                        if changed {
                            previous_states.insert(agent.id, current);
                            if let Err(err) = coordinator.on_health_transition(agent.id, current).await {
                                tracing::warn!(agent_id = %agent.id, error = %err, "failed to react to health transition");
                            }
                        }
                    }
                }
            }));
        }

        {
            let allocator = Arc::clone(&self.allocator);
            let interval = config.allocation_timeout();
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    allocator.reap_expired().await;
                }
            }));
        }

        {
            let coordinator = Arc::clone(&self.coordinator);
            let interval = std::time::Duration::from_secs(config.fleet.reactive_scaling_interval_secs);
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    coordinator.reactive_scale_tick().await;
                }
            }));
        }

        if config.autoscaling.enabled {
            let autoscaler = Arc::clone(&self.autoscaler);
            let registry = Arc::clone(&self.registry);
            let metrics = Arc::clone(&self.metrics);
            let swarm_id = config.fleet.swarm_id.clone();
            let interval = std::time::Duration::from_secs(config.autoscaling.policy_eval_interval_secs);
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    let current = registry.stats().await.total as u32;
                    let (verdict, policies) = autoscaler.evaluate_policies();
                    use crate::core::autoscaler::PolicyVerdict;
                    let target = match verdict {
                        PolicyVerdict::ScaleUp | PolicyVerdict::ScaleDown => autoscaler.reactive_target(current),
                        PolicyVerdict::Hold => current,
                    };
                    if let Some(event) = autoscaler.apply_scale(current, target, "policy_evaluation", policies).await {
                        metrics.record_scale_event(&swarm_id, &format!("{:?}", event.direction).to_lowercase());
                    }
                }
            }));

            let autoscaler = Arc::clone(&self.autoscaler);
            let registry = Arc::clone(&self.registry);
            let allocator = Arc::clone(&self.allocator);
            let coordinator = Arc::clone(&self.coordinator);
            let interval = std::time::Duration::from_secs(config.autoscaling.sampling_interval_secs.max(1));
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    let stats = registry.stats().await;
                    let pools = allocator.known_pools();
                    let utilization = if pools.is_empty() {
                        0.0
                    } else {
                        let sum: f64 = pools
                            .iter()
                            .map(|p| allocator.pool_utilization(p, stats.by_type.get(p).copied().unwrap_or(0) as u32))
                            .sum();
                        sum / pools.len() as f64
                    };
                    let sample = MetricSample {
                        timestamp: chrono::Utc::now(),
                        cpu_utilization: utilization,
                        memory_utilization: utilization,
                        queue_length: coordinator.queue_len_blocking() as u64,
                        response_time_ms: 0.0,
                        throughput: 0.0,
                        agent_count: stats.total as u32,
                    };
                    let _ = autoscaler.sample(sample).await;
                }
            }));

            let autoscaler = Arc::clone(&self.autoscaler);
            let registry = Arc::clone(&self.registry);
            let metrics = Arc::clone(&self.metrics);
            let swarm_id = config.fleet.swarm_id.clone();
            let interval = std::time::Duration::from_secs(config.autoscaling.predictive_interval_secs.max(1));
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    let current = registry.stats().await.total as u32;
                    if let Some(target) = autoscaler.predict_scale_up(current) {
                        if let Some(event) = autoscaler
                            .apply_scale(current, target, "predictive_scale_up", vec!["predictive".to_string()])
                            .await
                        {
                            metrics.record_scale_event(&swarm_id, &format!("{:?}", event.direction).to_lowercase());
                        }
                    }
                }
            }));

            let autoscaler = Arc::clone(&self.autoscaler);
            let registry = Arc::clone(&self.registry);
            let metrics = Arc::clone(&self.metrics);
            let swarm_id = config.fleet.swarm_id.clone();
            let interval = std::time::Duration::from_secs(config.autoscaling.cost_sweep_interval_secs.max(1));
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    let current = registry.stats().await.total as u32;
                    if let Some(target) = autoscaler.cost_optimization_target(current) {
                        if let Some(event) = autoscaler
                            .apply_scale(current, target, "cost_optimization", vec!["cost_sweep".to_string()])
                            .await
                        {
                            metrics.record_scale_event(&swarm_id, &format!("{:?}", event.direction).to_lowercase());
                        }
                    }
                }
            }));
        }

        *self.loops.lock().expect("loop handle mutex poisoned") = handles;
        tracing::info!(swarm_id = %config.fleet.swarm_id, "hive engine initialized");
        Ok(())
    }

    pub async fn spawn_agent(&self, config: AgentConfig) -> HiveResult<Uuid> {
        self.coordinator.spawn_agent(config).await
    }

    pub async fn terminate_agent(&self, id: Uuid, reason: &str) -> HiveResult<()> {
        self.coordinator.terminate_agent(id, reason).await
    }

    pub async fn submit_task(&self, task: Task) -> HiveResult<Uuid> {
        self.coordinator.submit_task(task).await
    }

    pub async fn cancel_task(&self, id: Uuid) -> HiveResult<()> {
        self.coordinator.cancel_task(id).await
    }

    pub async fn report_task_result(&self, result: TaskResult) -> HiveResult<()> {
        self.coordinator.complete_task(result).await
    }

    /// Manual override of a pool's effective target size. Actual agent
    /// provisioning happens outside this engine (it only coordinates
    /// already-registered agents); this records the request and emits
    /// `pool_scaled` for whatever external process is responsible for
    /// spinning agents up or down.
    pub async fn scale_pool(&self, pool_type: &str, target: u32) -> HiveResult<()> {
        let Some((min, max)) = self.allocator.pool_bounds(pool_type) else {
            return Err(HiveError::PoolNotFound { pool_type: pool_type.to_string() });
        };
        if target < min || target > max {
            return Err(HiveError::CapacityExceeded { pool_type: pool_type.to_string(), max });
        }
        let _ = self
            .store
            .publish(
                &crate::store::swarm_channel(&self.config.read().await.fleet.swarm_id, "fleet"),
                &serde_json::to_vec(&serde_json::json!({"type": "pool_scaled", "pool_type": pool_type, "target": target}))?,
            )
            .await;
        Ok(())
    }

    pub async fn get_fleet_status(&self) -> FleetStatus {
        let config = self.config.read().await;
        FleetStatus {
            swarm_id: config.fleet.swarm_id.clone(),
            registry: self.registry.stats().await,
            queued_tasks: self.coordinator.queue_len_blocking(),
            active_allocations: self.coordinator.active_allocation_count(),
            autoscaler_state: format!("{:?}", self.autoscaler.state()),
        }
    }

    #[must_use]
    pub fn get_fleet_metrics(&self) -> FleetMetrics {
        FleetMetrics {
            latest_sample: self.autoscaler.latest_sample(),
            window: self.autoscaler.window_samples(),
            recent_scale_events: self.autoscaler.recent_scale_events(),
        }
    }

    pub async fn manual_scale_up(&self, amount: u32, reason: &str) -> HiveResult<()> {
        let current = self.registry.stats().await.total as u32;
        let target = current.saturating_add(amount).min(self.config.read().await.fleet.max_agents);
        if let Some(event) = self.autoscaler.apply_scale(current, target, reason, vec!["manual".to_string()]).await {
            self.metrics.record_scale_event(&self.config.read().await.fleet.swarm_id, &format!("{:?}", event.direction).to_lowercase());
        }
        Ok(())
    }

    pub async fn manual_scale_down(&self, amount: u32, reason: &str) -> HiveResult<()> {
        let current = self.registry.stats().await.total as u32;
        let target = current.saturating_sub(amount).max(1);
        if let Some(event) = self.autoscaler.apply_scale(current, target, reason, vec!["manual".to_string()]).await {
            self.metrics.record_scale_event(&self.config.read().await.fleet.swarm_id, &format!("{:?}", event.direction).to_lowercase());
        }
        Ok(())
    }

    /// Validate and replace the engine's held configuration snapshot.
    /// Intervals of already-running background loops are unaffected
    /// until the next [`Self::initialize`] (documented limitation: hot
    /// reload of live loop cadence is not yet supported).
    pub async fn update_config(&self, new_config: HiveConfig) -> HiveResult<()> {
        new_config.validate()?;
        *self.config.write().await = new_config;
        Ok(())
    }

    pub async fn current_config(&self) -> HiveConfig {
        self.config.read().await.clone()
    }

    /// Stop accepting new tasks, drain within `shutdown_grace_secs`, and
    /// abort every background loop.
    pub async fn shutdown(&self) -> HiveResult<()> {
        self.coordinator.shutdown().await?;
        for handle in self.loops.lock().expect("loop handle mutex poisoned").drain(..) {
            handle.abort();
        }
        Ok(())
    }
}
