//! Bounded metric window and scale-event audit trail shared by the
//! Fleet Coordinator's reactive hook and the Autoscaling Controller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::store::SharedStore;
use crate::utils::error::HiveResult;

/// One tick of fleet-wide load, populated by an external metric emitter
/// (see §6) and consumed by the autoscaler's sampling loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub cpu_utilization: f64,
    pub memory_utilization: f64,
    pub queue_length: u64,
    pub response_time_ms: f64,
    pub throughput: f64,
    pub agent_count: u32,
}

/// Audit record of a completed scaling decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleEvent {
    pub timestamp: DateTime<Utc>,
    pub direction: ScaleDirection,
    pub previous_count: u32,
    pub new_count: u32,
    pub reason: String,
    pub triggered_policies: Vec<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScaleDirection {
    Up,
    Down,
}

const MAX_SCALE_HISTORY: usize = 100;

/// Fixed-capacity ring buffer over `MetricSample`s, persisted to the
/// store on every push so a restarted controller can rehydrate its
/// window.
pub struct MetricWindow {
    store: SharedStore,
    swarm_id: String,
    capacity: usize,
    samples: Mutex<VecDeque<MetricSample>>,
}

impl MetricWindow {
    #[must_use]
    pub fn new(store: SharedStore, swarm_id: String, capacity: usize) -> Self {
        Self {
            store,
            swarm_id,
            capacity,
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub async fn push(&self, sample: MetricSample) -> HiveResult<()> {
        {
            let mut samples = self.samples.lock().expect("metric window mutex poisoned");
            if samples.len() == self.capacity {
                samples.pop_front();
            }
            samples.push_back(sample);
        }
        self.store
            .list_push(&crate::store::swarm_channel(&self.swarm_id, "metrics:window"), serde_json::to_value(sample)?)
            .await
    }

    #[must_use]
    pub fn samples(&self) -> Vec<MetricSample> {
        self.samples.lock().expect("metric window mutex poisoned").iter().copied().collect()
    }

    #[must_use]
    pub fn latest(&self) -> Option<MetricSample> {
        self.samples.lock().expect("metric window mutex poisoned").back().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.lock().expect("metric window mutex poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Rolling, store-backed history of scale decisions, capped at
/// [`MAX_SCALE_HISTORY`] entries.
pub struct ScaleHistory {
    store: SharedStore,
    swarm_id: String,
    events: Mutex<VecDeque<ScaleEvent>>,
}

impl ScaleHistory {
    #[must_use]
    pub fn new(store: SharedStore, swarm_id: String) -> Self {
        Self {
            store,
            swarm_id,
            events: Mutex::new(VecDeque::with_capacity(MAX_SCALE_HISTORY)),
        }
    }

    pub async fn record(&self, event: ScaleEvent) -> HiveResult<()> {
        {
            let mut events = self.events.lock().expect("scale history mutex poisoned");
            if events.len() == MAX_SCALE_HISTORY {
                events.pop_front();
            }
            events.push_back(event.clone());
        }
        self.store
            .list_push(&crate::store::swarm_channel(&self.swarm_id, "scaling:history"), serde_json::to_value(event)?)
            .await
    }

    #[must_use]
    pub fn recent(&self) -> Vec<ScaleEvent> {
        self.events.lock().expect("scale history mutex poisoned").iter().cloned().collect()
    }
}
