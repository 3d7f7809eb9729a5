//! Autoscaling Controller (component F). Three independent loops —
//! sampling, policy evaluation, and an optional predictive pass — plus
//! a cost-optimization sweep, overlay the coordinator's coarse reactive
//! hook with a finer-grained policy engine.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use crate::core::metrics::{MetricSample, MetricWindow, ScaleDirection, ScaleEvent, ScaleHistory};
use crate::utils::config::AutoscalingConfig;
use crate::utils::structured_logging::StructuredLogger;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Idle,
    ScalingUp,
    ScalingDown,
    Cooldown,
    PredictiveScaling,
}

/// A user-defined policy: a metric name, an up-threshold with its own
/// sustained period, and a down-threshold with its own.
#[derive(Debug, Clone)]
pub struct ScalingPolicy {
    pub name: String,
    pub up_threshold: f64,
    pub down_threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyVerdict {
    ScaleUp,
    ScaleDown,
    Hold,
}

fn evaluate_sustained(samples: &[MetricSample], metric: impl Fn(&MetricSample) -> f64, threshold: f64, above: bool, required_secs: i64) -> bool {
    if samples.len() < 2 {
        return false;
    }
    let mut sustained_secs: i64 = 0;
    for window in samples.windows(2) {
        let (a, b) = (&window[0], &window[1]);
        let a_ok = if above { metric(a) >= threshold } else { metric(a) <= threshold };
        let b_ok = if above { metric(b) >= threshold } else { metric(b) <= threshold };
        if a_ok && b_ok {
            sustained_secs += (b.timestamp - a.timestamp).num_seconds().max(0);
        } else {
            sustained_secs = 0;
        }
        if sustained_secs >= required_secs {
            return true;
        }
    }
    sustained_secs >= required_secs
}

/// Linear regression over `(index, value)` pairs. Returns `(slope,
/// intercept, r_squared)`.
fn linear_regression(values: &[f64]) -> (f64, f64, f64) {
    let n = values.len() as f64;
    if values.len() < 2 {
        return (0.0, values.first().copied().unwrap_or(0.0), 0.0);
    }
    let xs: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
    let x_mean = xs.iter().sum::<f64>() / n;
    let y_mean = values.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    for (x, y) in xs.iter().zip(values.iter()) {
        cov += (x - x_mean) * (y - y_mean);
        var_x += (x - x_mean).powi(2);
    }
    let slope = if var_x.abs() < f64::EPSILON { 0.0 } else { cov / var_x };
    let intercept = y_mean - slope * x_mean;

    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (x, y) in xs.iter().zip(values.iter()) {
        let predicted = slope * x + intercept;
        ss_res += (y - predicted).powi(2);
        ss_tot += (y - y_mean).powi(2);
    }
    let r_squared = if ss_tot.abs() < f64::EPSILON { 0.0 } else { 1.0 - ss_res / ss_tot };
    (slope, intercept, r_squared)
}

pub struct AutoscalingController {
    window: Arc<MetricWindow>,
    history: Arc<ScaleHistory>,
    config: AutoscalingConfig,
    policies: Vec<ScalingPolicy>,
    state: std::sync::Mutex<ControllerState>,
    last_scale_up_at: AtomicI64,
    last_scale_down_at: AtomicI64,
    min_agents: AtomicU32,
    max_agents: AtomicU32,
}

impl AutoscalingController {
    #[must_use]
    pub fn new(
        window: Arc<MetricWindow>,
        history: Arc<ScaleHistory>,
        config: AutoscalingConfig,
        policies: Vec<ScalingPolicy>,
        min_agents: u32,
        max_agents: u32,
    ) -> Self {
        Self {
            window,
            history,
            config,
            policies,
            state: std::sync::Mutex::new(ControllerState::Idle),
            last_scale_up_at: AtomicI64::new(0),
            last_scale_down_at: AtomicI64::new(0),
            min_agents: AtomicU32::new(min_agents),
            max_agents: AtomicU32::new(max_agents),
        }
    }

    #[must_use]
    pub fn window_samples(&self) -> Vec<MetricSample> {
        self.window.samples()
    }

    #[must_use]
    pub fn latest_sample(&self) -> Option<MetricSample> {
        self.window.latest()
    }

    #[must_use]
    pub fn recent_scale_events(&self) -> Vec<ScaleEvent> {
        self.history.recent()
    }

    #[must_use]
    pub fn state(&self) -> ControllerState {
        *self.state.lock().expect("controller state mutex poisoned")
    }

    fn set_state(&self, state: ControllerState) {
        *self.state.lock().expect("controller state mutex poisoned") = state;
    }

    fn in_cooldown_up(&self) -> bool {
        let now = Utc::now().timestamp();
        now - self.last_scale_up_at.load(Ordering::SeqCst) < self.config.cooldown_up_secs as i64
    }

    fn in_cooldown_down(&self) -> bool {
        let now = Utc::now().timestamp();
        now - self.last_scale_down_at.load(Ordering::SeqCst) < self.config.cooldown_down_secs as i64
    }

    /// Append `sample` to the bounded window. Intended to run on the
    /// `sampling_interval_secs` loop.
    pub async fn sample(&self, sample: MetricSample) -> crate::utils::error::HiveResult<()> {
        self.window.push(sample).await
    }

    /// Evaluate every policy against the current window. A policy
    /// triggers up only if continuously above its threshold for its
    /// full sustained period; conflicts between policies favor up.
    #[must_use]
    pub fn evaluate_policies(&self) -> (PolicyVerdict, Vec<String>) {
        let samples = self.window.samples();
        let mut up_triggered = Vec::new();
        let mut down_triggered = Vec::new();

        for policy in &self.policies {
            if evaluate_sustained(&samples, |s| s.cpu_utilization, policy.up_threshold, true, self.config.sustained_up_period_secs as i64) {
                up_triggered.push(policy.name.clone());
            }
            if evaluate_sustained(&samples, |s| s.cpu_utilization, policy.down_threshold, false, self.config.sustained_down_period_secs as i64) {
                down_triggered.push(policy.name.clone());
            }
        }

        if !up_triggered.is_empty() {
            (PolicyVerdict::ScaleUp, up_triggered)
        } else if !down_triggered.is_empty() {
            (PolicyVerdict::ScaleDown, down_triggered)
        } else {
            (PolicyVerdict::Hold, Vec::new())
        }
    }

    /// Composite reactive target: the max overshoot factor among CPU,
    /// memory, and queue length contributes to scaling up only; the max
    /// undershoot contributes to scaling down only. The two are never
    /// multiplied into one symmetric formula.
    #[must_use]
    pub fn reactive_target(&self, current: u32) -> u32 {
        let Some(sample) = self.window.latest() else { return current };
        let cpu_factor = sample.cpu_utilization / self.config.scale_up_cpu_threshold;
        let mem_factor = sample.memory_utilization / self.config.scale_up_cpu_threshold;
        let queue_factor = if current == 0 { 0.0 } else { sample.queue_length as f64 / current as f64 / self.config.scale_up_cpu_threshold };

        let max_overshoot = [cpu_factor, mem_factor, queue_factor].into_iter().fold(0.0_f64, f64::max);
        let min_undershoot = [
            sample.cpu_utilization / self.config.scale_down_cpu_threshold.max(f64::EPSILON),
            sample.memory_utilization / self.config.scale_down_cpu_threshold.max(f64::EPSILON),
        ]
        .into_iter()
        .fold(f64::INFINITY, f64::min);

        let desired = if max_overshoot >= 1.0 {
            (current as f64 * max_overshoot).ceil() as i64
        } else if min_undershoot <= 1.0 {
            (current as f64 * min_undershoot).floor() as i64
        } else {
            current as i64
        };

        self.clamp_target(current, desired)
    }

    fn clamp_target(&self, current: u32, desired: i64) -> u32 {
        let step_up = self.config.step_limit_up as i64;
        let step_down = self.config.step_limit_down as i64;
        let delta = (desired - current as i64).clamp(-step_down, step_up);
        let min = self.min_agents.load(Ordering::SeqCst) as i64;
        let max = self.max_agents.load(Ordering::SeqCst) as i64;
        (current as i64 + delta).clamp(min, max) as u32
    }

    /// Fit a linear regression over the window's CPU utilization,
    /// project `prediction_horizon_secs` ahead, and size a predictive
    /// scale-up. Returns `None` when the window is too small, the
    /// prediction is below `confidence_threshold`, or the predicted load
    /// doesn't clear both the up-threshold and 1.2x the current load.
    #[must_use]
    pub fn predict_scale_up(&self, current: u32) -> Option<u32> {
        let samples = self.window.samples();
        if samples.len() < 2 {
            return None;
        }
        let values: Vec<f64> = samples.iter().map(|s| s.cpu_utilization).collect();
        let (slope, intercept, r_squared) = linear_regression(&values);
        if r_squared < self.config.confidence_threshold {
            return None;
        }

        let sampling_interval = self.config.sampling_interval_secs.max(1) as f64;
        let steps_ahead = self.config.prediction_horizon_secs as f64 / sampling_interval;
        let predicted_load = slope * (values.len() as f64 - 1.0 + steps_ahead) + intercept;
        let current_load = values.last().copied().unwrap_or(0.0);

        if predicted_load > self.config.scale_up_cpu_threshold && predicted_load > 1.2 * current_load {
            let target = (current as f64 * predicted_load / self.config.scale_up_cpu_threshold).ceil() as u32;
            Some(self.clamp_target(current, target as i64))
        } else {
            None
        }
    }

    /// If utilization is below `cost_sweep_utilization_threshold` and
    /// `current > min`, scale down to `max(ceil(current * utilization),
    /// min)`, subject to cooldowns and rate limits.
    #[must_use]
    pub fn cost_optimization_target(&self, current: u32) -> Option<u32> {
        let sample = self.window.latest()?;
        let min = self.min_agents.load(Ordering::SeqCst);
        if sample.cpu_utilization >= self.config.cost_sweep_utilization_threshold || current <= min {
            return None;
        }
        if self.in_cooldown_down() {
            return None;
        }
        let target = ((current as f64 * sample.cpu_utilization).ceil() as u32).max(min);
        Some(self.clamp_target(current, target as i64))
    }

    /// Apply a scale decision if not blocked by the relevant cooldown,
    /// updating controller state and recording a [`ScaleEvent`].
    pub async fn apply_scale(&self, current: u32, target: u32, reason: &str, triggered_policies: Vec<String>) -> Option<ScaleEvent> {
        if target == current {
            return None;
        }
        let direction = if target > current { ScaleDirection::Up } else { ScaleDirection::Down };
        if direction == ScaleDirection::Up && self.in_cooldown_up() {
            return None;
        }
        if direction == ScaleDirection::Down && self.in_cooldown_down() {
            return None;
        }

        self.set_state(if direction == ScaleDirection::Up { ControllerState::ScalingUp } else { ControllerState::ScalingDown });

        let now = Utc::now();
        match direction {
            ScaleDirection::Up => self.last_scale_up_at.store(now.timestamp(), Ordering::SeqCst),
            ScaleDirection::Down => self.last_scale_down_at.store(now.timestamp(), Ordering::SeqCst),
        }

        let event = ScaleEvent {
            timestamp: now,
            direction,
            previous_count: current,
            new_count: target,
            reason: reason.to_string(),
            triggered_policies,
            duration_ms: 0,
        };
        let _ = self.history.record(event.clone()).await;
        self.set_state(ControllerState::Cooldown);
        StructuredLogger::log_scale_event("fleet", current, target, reason);
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn config() -> AutoscalingConfig {
        AutoscalingConfig {
            enabled: true,
            window_size: 60,
            sampling_interval_secs: 30,
            policy_eval_interval_secs: 60,
            predictive_interval_secs: 300,
            cost_sweep_interval_secs: 600,
            scale_up_cpu_threshold: 0.8,
            scale_down_cpu_threshold: 0.3,
            sustained_up_period_secs: 300,
            sustained_down_period_secs: 600,
            cooldown_up_secs: 60,
            cooldown_down_secs: 120,
            step_limit_up: 50,
            step_limit_down: 20,
            rate_limit_up_per_min: 100,
            rate_limit_down_per_min: 50,
            prediction_horizon_secs: 900,
            confidence_threshold: 0.7,
            cost_sweep_utilization_threshold: 0.2,
        }
    }

    fn sample(cpu: f64, queue_length: u64) -> MetricSample {
        MetricSample {
            timestamp: Utc::now(),
            cpu_utilization: cpu,
            memory_utilization: cpu,
            queue_length,
            response_time_ms: 10.0,
            throughput: 1.0,
            agent_count: 10,
        }
    }

    fn controller() -> AutoscalingController {
        let store = Arc::new(InMemoryStore::new());
        let window = Arc::new(MetricWindow::new(Arc::clone(&store), "test".to_string(), 60));
        let history = Arc::new(ScaleHistory::new(store, "test".to_string()));
        AutoscalingController::new(window, history, config(), vec![], 1, 100)
    }

    #[tokio::test]
    async fn reactive_target_scales_up_on_high_cpu() {
        let controller = controller();
        controller.sample(sample(0.95, 0)).await.unwrap();
        let target = controller.reactive_target(10);
        assert!(target > 10);
    }

    #[tokio::test]
    async fn reactive_target_scales_down_on_low_cpu() {
        let controller = controller();
        controller.sample(sample(0.05, 0)).await.unwrap();
        let target = controller.reactive_target(10);
        assert!(target < 10);
    }

    #[tokio::test]
    async fn reactive_target_holds_steady_in_normal_band() {
        let controller = controller();
        controller.sample(sample(0.5, 0)).await.unwrap();
        let target = controller.reactive_target(10);
        assert_eq!(target, 10);
    }

    #[tokio::test]
    async fn apply_scale_respects_up_cooldown() {
        let controller = controller();
        controller.sample(sample(0.95, 0)).await.unwrap();
        let first = controller.apply_scale(10, 15, "reactive", vec![]).await;
        assert!(first.is_some());
        let second = controller.apply_scale(15, 20, "reactive", vec![]).await;
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn predict_scale_up_requires_minimum_samples() {
        let controller = controller();
        controller.sample(sample(0.5, 0)).await.unwrap();
        assert!(controller.predict_scale_up(10).is_none());
    }

    #[tokio::test]
    async fn cost_sweep_holds_above_threshold() {
        let controller = controller();
        controller.sample(sample(0.5, 0)).await.unwrap();
        assert!(controller.cost_optimization_target(10).is_none());
    }

    #[tokio::test]
    async fn cost_sweep_scales_down_below_threshold() {
        let controller = controller();
        controller.sample(sample(0.1, 0)).await.unwrap();
        let target = controller.cost_optimization_target(10);
        assert_eq!(target, Some(1));
    }

    #[test]
    fn linear_regression_on_rising_series_has_positive_slope() {
        let (slope, _intercept, r_squared) = linear_regression(&[0.1, 0.2, 0.3, 0.4, 0.5]);
        assert!(slope > 0.0);
        assert!(r_squared > 0.99);
    }
}
