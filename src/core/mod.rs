//! Component wiring for the fleet orchestration engine: registry (B),
//! allocator (C), health monitor (D), coordinator (E), autoscaler (F),
//! the shared metric window/scale history, and the top-level engine
//! that ties them together.
pub mod allocator;
pub mod autoscaler;
pub mod coordinator;
pub mod engine;
pub mod health;
pub mod metrics;
pub mod registry;

pub use allocator::{Allocation, AllocationStatus, AllocationStrategy, PoolMetrics, ResourceAllocator};
pub use autoscaler::{AutoscalingController, ControllerState, PolicyVerdict, ScalingPolicy};
pub use coordinator::FleetCoordinator;
pub use engine::{FleetMetrics, FleetStatus, HiveEngine};
pub use health::{BreakerState, HealthMonitor, HealthMonitorConfig, HealthState};
pub use metrics::{MetricSample, MetricWindow, ScaleDirection, ScaleEvent, ScaleHistory};
pub use registry::{AgentRegistry, RegistryStats};
