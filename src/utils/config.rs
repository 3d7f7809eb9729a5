use crate::utils::error::{HiveError, HiveResult};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration for the fleet orchestration engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HiveConfig {
    pub fleet: FleetConfig,
    pub health: HealthConfig,
    pub autoscaling: AutoscalingConfig,
    pub pools: PoolsConfig,
    pub logging: LoggingConfig,
    pub monitoring: MonitoringConfig,
}

/// Coordinator-level timeouts and caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    pub swarm_id: String,
    pub max_agents: u32,
    pub allocation_timeout_secs: u64,
    pub task_timeout_default_secs: u64,
    pub reactive_scaling_interval_secs: u64,
    pub shutdown_grace_secs: u64,
    pub registry_cache_ttl_secs: u64,
}

/// Health monitor tunables (§4.D).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    pub heartbeat_interval_secs: u64,
    pub health_timeout_secs: u64,
    pub max_failures: u32,
    pub recovery_timeout_secs: u64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_timeout_secs: u64,
}

/// Autoscaling controller tunables (§4.F).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoscalingConfig {
    pub enabled: bool,
    pub window_size: usize,
    pub sampling_interval_secs: u64,
    pub policy_eval_interval_secs: u64,
    pub predictive_interval_secs: u64,
    pub cost_sweep_interval_secs: u64,
    pub scale_up_cpu_threshold: f64,
    pub scale_down_cpu_threshold: f64,
    pub sustained_up_period_secs: u64,
    pub sustained_down_period_secs: u64,
    pub cooldown_up_secs: u64,
    pub cooldown_down_secs: u64,
    pub step_limit_up: u32,
    pub step_limit_down: u32,
    pub rate_limit_up_per_min: u32,
    pub rate_limit_down_per_min: u32,
    pub prediction_horizon_secs: u64,
    pub confidence_threshold: f64,
    pub cost_sweep_utilization_threshold: f64,
}

/// Default `(min, max, priority, cpu_cores, memory_mb)` per pool type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolsConfig {
    pub defaults: HashMap<String, PoolDefaults>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolDefaults {
    pub min_agents: u32,
    pub max_agents: u32,
    pub priority: u32,
    pub cpu_cores: f64,
    pub memory_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub metrics_bind_addr: String,
}

impl Default for HiveConfig {
    fn default() -> Self {
        Self {
            fleet: FleetConfig {
                swarm_id: uuid::Uuid::new_v4().to_string(),
                max_agents: 1000,
                allocation_timeout_secs: 30,
                task_timeout_default_secs: 300,
                reactive_scaling_interval_secs: 30,
                shutdown_grace_secs: 30,
                registry_cache_ttl_secs: 30,
            },
            health: HealthConfig {
                heartbeat_interval_secs: 5,
                health_timeout_secs: 10,
                max_failures: 3,
                recovery_timeout_secs: 60,
                circuit_breaker_threshold: 5,
                circuit_breaker_timeout_secs: 30,
            },
            autoscaling: AutoscalingConfig {
                enabled: true,
                window_size: 60,
                sampling_interval_secs: 30,
                policy_eval_interval_secs: 60,
                predictive_interval_secs: 300,
                cost_sweep_interval_secs: 600,
                scale_up_cpu_threshold: 0.80,
                scale_down_cpu_threshold: 0.30,
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
            },
            pools: PoolsConfig {
                defaults: default_pool_table(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
            monitoring: MonitoringConfig {
                metrics_bind_addr: "0.0.0.0:9090".to_string(),
            },
        }
    }
}

/// The 16 fixed pool types with their `(min, max, priority, resources)` defaults.
#[must_use]
pub fn default_pool_table() -> HashMap<String, PoolDefaults> {
    let rows: [(&str, u32, u32, u32, f64, u64); 16] = [
        ("coder", 5, 100, 8, 2.0, 2048),
        ("tester", 3, 80, 7, 1.0, 1024),
        ("reviewer", 2, 50, 7, 1.0, 1024),
        ("architect", 1, 20, 9, 2.0, 2048),
        ("researcher", 2, 40, 6, 1.0, 1024),
        ("analyst", 2, 40, 6, 1.0, 1024),
        ("optimizer", 1, 30, 6, 2.0, 2048),
        ("security", 1, 20, 8, 1.0, 1024),
        ("performance", 1, 20, 6, 2.0, 2048),
        ("ui", 2, 50, 5, 1.0, 1024),
        ("mobile", 1, 30, 5, 1.0, 1024),
        ("devops", 2, 40, 7, 1.0, 1024),
        ("database", 1, 20, 7, 2.0, 2048),
        ("network", 1, 20, 6, 1.0, 1024),
        ("infrastructure", 1, 20, 7, 2.0, 2048),
        ("coordinator", 1, 10, 10, 1.0, 1024),
    ];
    rows.into_iter()
        .map(|(name, min_agents, max_agents, priority, cpu_cores, memory_mb)| {
            (
                name.to_string(),
                PoolDefaults {
                    min_agents,
                    max_agents,
                    priority,
                    cpu_cores,
                    memory_mb,
                },
            )
        })
        .collect()
}

impl HiveConfig {
    /// Load configuration from environment variables layered over defaults.
    pub fn from_env() -> HiveResult<Self> {
        let mut config = Self::default();
        config.load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> HiveResult<Self> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| HiveError::ConfigurationInvalid {
                reason: format!("failed to read config file: {e}"),
            })?;
        let config: Self =
            toml::from_str(&content).map_err(|e| HiveError::ConfigurationInvalid {
                reason: format!("failed to parse config file: {e}"),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with precedence: defaults -> file (`HIVE_CONFIG_FILE`) -> env vars.
    pub fn load() -> HiveResult<Self> {
        let mut config = Self::default();

        if let Ok(config_path) = env::var("HIVE_CONFIG_FILE") {
            if Path::new(&config_path).exists() {
                config = Self::from_file(&config_path)?;
            }
        }

        config.load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_env(&mut self) -> HiveResult<()> {
        if let Ok(v) = env::var("HIVE_MAX_AGENTS") {
            self.fleet.max_agents = v.parse().map_err(|_| HiveError::ConfigurationInvalid {
                reason: "HIVE_MAX_AGENTS must be a positive integer".to_string(),
            })?;
        }
        if let Ok(v) = env::var("HIVE_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Ok(v) = env::var("HIVE_LOG_FORMAT") {
            self.logging.format = v;
        }
        if let Ok(v) = env::var("HIVE_METRICS_BIND_ADDR") {
            self.monitoring.metrics_bind_addr = v;
        }
        if let Ok(v) = env::var("HIVE_AUTOSCALING_ENABLED") {
            self.autoscaling.enabled = v.parse().unwrap_or(self.autoscaling.enabled);
        }
        Ok(())
    }

    /// Validate configuration invariants, returning `ConfigurationInvalid` on the first
    /// contradiction found.
    pub fn validate(&self) -> HiveResult<()> {
        if self.fleet.max_agents == 0 {
            return Err(HiveError::ConfigurationInvalid {
                reason: "fleet.max_agents must be greater than zero".to_string(),
            });
        }
        for (pool_type, defaults) in &self.pools.defaults {
            if defaults.min_agents > defaults.max_agents {
                return Err(HiveError::ConfigurationInvalid {
                    reason: format!(
                        "pool {pool_type}: min_agents ({}) exceeds max_agents ({})",
                        defaults.min_agents, defaults.max_agents
                    ),
                });
            }
        }
        if self.autoscaling.scale_down_cpu_threshold >= self.autoscaling.scale_up_cpu_threshold {
            return Err(HiveError::ConfigurationInvalid {
                reason: "autoscaling.scale_down_cpu_threshold must be below scale_up_cpu_threshold"
                    .to_string(),
            });
        }
        if self.health.max_failures == 0 {
            return Err(HiveError::ConfigurationInvalid {
                reason: "health.max_failures must be greater than zero".to_string(),
            });
        }
        if self.autoscaling.confidence_threshold < 0.0 || self.autoscaling.confidence_threshold > 1.0
        {
            return Err(HiveError::ConfigurationInvalid {
                reason: "autoscaling.confidence_threshold must be within [0, 1]".to_string(),
            });
        }
        Ok(())
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> HiveResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| HiveError::ConfigurationInvalid {
            reason: format!("failed to serialize config: {e}"),
        })?;
        fs::write(path, content).map_err(|e| HiveError::ConfigurationInvalid {
            reason: format!("failed to write config file: {e}"),
        })
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.health.heartbeat_interval_secs)
    }

    #[must_use]
    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health.health_timeout_secs)
    }

    #[must_use]
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.health.recovery_timeout_secs)
    }

    #[must_use]
    pub fn circuit_breaker_timeout(&self) -> Duration {
        Duration::from_secs(self.health.circuit_breaker_timeout_secs)
    }

    #[must_use]
    pub fn allocation_timeout(&self) -> Duration {
        Duration::from_secs(self.fleet.allocation_timeout_secs)
    }

    #[must_use]
    pub fn task_timeout_default(&self) -> Duration {
        Duration::from_secs(self.fleet.task_timeout_default_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = HiveConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_pool_table_has_sixteen_entries() {
        assert_eq!(default_pool_table().len(), 16);
        let coder = &default_pool_table()["coder"];
        assert_eq!((coder.min_agents, coder.max_agents, coder.priority), (5, 100, 8));
        let coordinator = &default_pool_table()["coordinator"];
        assert_eq!(
            (coordinator.min_agents, coordinator.max_agents, coordinator.priority),
            (1, 10, 10)
        );
    }

    #[test]
    fn rejects_inverted_pool_bounds() {
        let mut config = HiveConfig::default();
        config
            .pools
            .defaults
            .get_mut("coder")
            .unwrap()
            .min_agents = 200;
        assert!(matches!(
            config.validate(),
            Err(HiveError::ConfigurationInvalid { .. })
        ));
    }

    #[test]
    fn rejects_contradictory_autoscaling_thresholds() {
        let mut config = HiveConfig::default();
        config.autoscaling.scale_down_cpu_threshold = 0.9;
        config.autoscaling.scale_up_cpu_threshold = 0.5;
        assert!(matches!(
            config.validate(),
            Err(HiveError::ConfigurationInvalid { .. })
        ));
    }
}
