/// Prometheus metrics export, scraped by the ambient `GET /metrics` endpoint.
pub mod metrics;

pub use metrics::FleetMetricsRegistry;
