//! Unit tests for the agent data model: selectability, capability
//! matching, and the performance EWMA.

use std::collections::HashSet;

use crate::agents::agent::{Agent, AgentConfig, AgentResources, AgentStatus};

fn agent(capabilities: &[&str]) -> Agent {
    Agent::new(AgentConfig {
        pool_type: "coder".to_string(),
        priority: 5,
        capabilities: capabilities.iter().map(|s| s.to_string()).collect(),
        resources: AgentResources { cpu_cores: 1.0, memory_mb: 512 },
    })
}

#[test]
fn new_agent_is_idle_and_selectable() {
    let a = agent(&[]);
    assert_eq!(a.status, AgentStatus::Idle);
    assert!(a.is_selectable());
    assert_eq!(a.version, 1);
}

#[test]
fn failed_agent_is_never_selectable() {
    let mut a = agent(&[]);
    a.status = AgentStatus::Failed;
    assert!(!a.is_selectable());
}

#[test]
fn tripped_breaker_blocks_selection_even_when_idle() {
    let mut a = agent(&[]);
    a.health.circuit_breaker_tripped = true;
    assert!(!a.is_selectable());
}

#[test]
fn has_capabilities_requires_a_subset() {
    let a = agent(&["rust", "python"]);
    let required: HashSet<String> = ["rust".to_string()].into_iter().collect();
    assert!(a.has_capabilities(&required));

    let missing: HashSet<String> = ["go".to_string()].into_iter().collect();
    assert!(!a.has_capabilities(&missing));
}

#[test]
fn capability_match_ratio_is_fraction_matched() {
    let a = agent(&["rust"]);
    let required: HashSet<String> = ["rust".to_string(), "go".to_string()].into_iter().collect();
    assert!((a.capability_match_ratio(&required) - 0.5).abs() < f64::EPSILON);
}

#[test]
fn capability_match_ratio_is_one_when_nothing_required() {
    let a = agent(&[]);
    assert_eq!(a.capability_match_ratio(&HashSet::new()), 1.0);
}

#[test]
fn record_completion_applies_ewma_and_running_mean() {
    let mut a = agent(&[]);
    a.performance.record_completion(true, 100);
    a.performance.record_completion(true, 300);
    assert_eq!(a.performance.tasks_completed, 2);
    assert!((a.performance.average_task_time_ms - 200.0).abs() < f64::EPSILON);
    // EWMA of two successes from a starting rate of 1.0 stays at 1.0.
    assert!((a.performance.success_rate - 1.0).abs() < f64::EPSILON);
}

#[test]
fn a_failure_pulls_success_rate_down_by_the_ewma_factor() {
    let mut a = agent(&[]);
    a.performance.record_completion(false, 500);
    assert!((a.performance.success_rate - 0.8).abs() < 1e-9);
}

#[test]
fn penalize_timeout_multiplies_success_rate_by_point_eight() {
    let mut a = agent(&[]);
    a.performance.penalize_timeout();
    assert!((a.performance.success_rate - 0.8).abs() < 1e-9);
}

#[test]
fn touch_bumps_version_monotonically() {
    let mut a = agent(&[]);
    let first = a.version;
    a.touch();
    assert_eq!(a.version, first + 1);
}
