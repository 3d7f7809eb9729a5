//! Edge cases for configuration loading and validation not already
//! covered by the inline tests in `utils::config`.

use std::env;
use std::sync::Mutex;

use crate::utils::config::HiveConfig;
use crate::utils::error::HiveError;

// Environment variable tests mutate process-global state; serialize them
// so they don't race across threads in the same test binary.
static ENV_GUARD: Mutex<()> = Mutex::new(());

#[test]
fn from_file_rejects_a_missing_path() {
    let _guard = ENV_GUARD.lock().unwrap();
    let result = HiveConfig::from_file("/nonexistent/path/does-not-exist.toml");
    assert!(matches!(result, Err(HiveError::ConfigurationInvalid { .. })));
}

#[test]
fn hive_max_agents_env_var_overrides_default() {
    let _guard = ENV_GUARD.lock().unwrap();
    env::set_var("HIVE_MAX_AGENTS", "42");
    let config = HiveConfig::from_env().unwrap();
    assert_eq!(config.fleet.max_agents, 42);
    env::remove_var("HIVE_MAX_AGENTS");
}

#[test]
fn hive_max_agents_env_var_rejects_non_numeric_values() {
    let _guard = ENV_GUARD.lock().unwrap();
    env::set_var("HIVE_MAX_AGENTS", "not-a-number");
    let result = HiveConfig::from_env();
    assert!(matches!(result, Err(HiveError::ConfigurationInvalid { .. })));
    env::remove_var("HIVE_MAX_AGENTS");
}

#[test]
fn equal_min_and_max_pool_bounds_are_valid() {
    let mut config = HiveConfig::default();
    let coder = config.pools.defaults.get_mut("coder").unwrap();
    coder.min_agents = 5;
    coder.max_agents = 5;
    assert!(config.validate().is_ok());
}

#[test]
fn zero_max_agents_is_rejected() {
    let mut config = HiveConfig::default();
    config.fleet.max_agents = 0;
    assert!(matches!(config.validate(), Err(HiveError::ConfigurationInvalid { .. })));
}

#[test]
fn confidence_threshold_out_of_unit_range_is_rejected() {
    let mut config = HiveConfig::default();
    config.autoscaling.confidence_threshold = 1.5;
    assert!(matches!(config.validate(), Err(HiveError::ConfigurationInvalid { .. })));
}

#[test]
fn save_and_reload_round_trips() {
    let dir = std::env::temp_dir().join(format!("hive-config-test-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("config.toml");

    let config = HiveConfig::default();
    config.save_to_file(&path).unwrap();
    let reloaded = HiveConfig::from_file(&path).unwrap();
    assert_eq!(reloaded.fleet.max_agents, config.fleet.max_agents);
    assert_eq!(reloaded.pools.defaults.len(), config.pools.defaults.len());

    std::fs::remove_dir_all(&dir).ok();
}
