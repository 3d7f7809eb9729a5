//! Prometheus metrics export (ambient, §6's "metrics export" surface).
//! Owns its own [`prometheus::Registry`] rather than a process-global
//! `lazy_static`, so it can be constructed alongside the engine and
//! handed to the axum router as shared state.

use prometheus::{CounterVec, Encoder, GaugeVec, HistogramVec, Registry, TextEncoder};

use crate::utils::error::{HiveError, HiveResult};

/// Counters/gauges scraped by the ambient `GET /metrics` endpoint.
pub struct FleetMetricsRegistry {
    registry: Registry,
    queue_depth: GaugeVec,
    active_allocations: GaugeVec,
    pool_agent_count: GaugeVec,
    circuit_breaker_trips: CounterVec,
    scale_events: CounterVec,
    task_duration_seconds: HistogramVec,
}

impl FleetMetricsRegistry {
    pub fn new() -> HiveResult<Self> {
        let registry = Registry::new();

        let queue_depth = GaugeVec::new(
            prometheus::Opts::new("hive_queue_depth", "Number of tasks currently queued"),
            &["swarm_id"],
        )
        .map_err(prometheus_err)?;
        let active_allocations = GaugeVec::new(
            prometheus::Opts::new("hive_active_allocations", "Number of active allocations"),
            &["swarm_id"],
        )
        .map_err(prometheus_err)?;
        let pool_agent_count = GaugeVec::new(
            prometheus::Opts::new("hive_pool_agent_count", "Registered agent count per pool"),
            &["swarm_id", "pool_type"],
        )
        .map_err(prometheus_err)?;
        let circuit_breaker_trips = CounterVec::new(
            prometheus::Opts::new("hive_circuit_breaker_trips_total", "Circuit breaker trips per agent pool"),
            &["swarm_id", "pool_type"],
        )
        .map_err(prometheus_err)?;
        let scale_events = CounterVec::new(
            prometheus::Opts::new("hive_scale_events_total", "Scale events by direction"),
            &["swarm_id", "direction"],
        )
        .map_err(prometheus_err)?;
        let task_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new("hive_task_duration_seconds", "Task execution duration in seconds")
                .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]),
            &["swarm_id", "outcome"],
        )
        .map_err(prometheus_err)?;

        registry.register(Box::new(queue_depth.clone())).map_err(prometheus_err)?;
        registry.register(Box::new(active_allocations.clone())).map_err(prometheus_err)?;
        registry.register(Box::new(pool_agent_count.clone())).map_err(prometheus_err)?;
        registry.register(Box::new(circuit_breaker_trips.clone())).map_err(prometheus_err)?;
        registry.register(Box::new(scale_events.clone())).map_err(prometheus_err)?;
        registry.register(Box::new(task_duration_seconds.clone())).map_err(prometheus_err)?;

        Ok(Self {
            registry,
            queue_depth,
            active_allocations,
            pool_agent_count,
            circuit_breaker_trips,
            scale_events,
            task_duration_seconds,
        })
    }

    pub fn set_queue_depth(&self, swarm_id: &str, depth: usize) {
        self.queue_depth.with_label_values(&[swarm_id]).set(depth as f64);
    }

    pub fn set_active_allocations(&self, swarm_id: &str, count: usize) {
        self.active_allocations.with_label_values(&[swarm_id]).set(count as f64);
    }

    pub fn set_pool_agent_count(&self, swarm_id: &str, pool_type: &str, count: usize) {
        self.pool_agent_count.with_label_values(&[swarm_id, pool_type]).set(count as f64);
    }

    pub fn record_circuit_breaker_trip(&self, swarm_id: &str, pool_type: &str) {
        self.circuit_breaker_trips.with_label_values(&[swarm_id, pool_type]).inc();
    }

    pub fn record_scale_event(&self, swarm_id: &str, direction: &str) {
        self.scale_events.with_label_values(&[swarm_id, direction]).inc();
    }

    pub fn observe_task_duration(&self, swarm_id: &str, outcome: &str, seconds: f64) {
        self.task_duration_seconds.with_label_values(&[swarm_id, outcome]).observe(seconds);
    }

    /// Render the registry in Prometheus text exposition format for
    /// `GET /metrics`.
    pub fn gather(&self) -> HiveResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).map_err(|e| HiveError::OperationFailed {
            reason: format!("failed to encode metrics: {e}"),
        })?;
        String::from_utf8(buffer).map_err(|e| HiveError::OperationFailed {
            reason: format!("metrics buffer was not valid utf-8: {e}"),
        })
    }
}

fn prometheus_err(err: prometheus::Error) -> HiveError {
    HiveError::OperationFailed { reason: format!("prometheus registration failed: {err}") }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_includes_registered_metric_names() {
        let metrics = FleetMetricsRegistry::new().unwrap();
        metrics.set_queue_depth("swarm-1", 3);
        metrics.set_active_allocations("swarm-1", 2);
        metrics.record_circuit_breaker_trip("swarm-1", "coder");

        let text = metrics.gather().unwrap();
        assert!(text.contains("hive_queue_depth"));
        assert!(text.contains("hive_active_allocations"));
        assert!(text.contains("hive_circuit_breaker_trips_total"));
    }
}
