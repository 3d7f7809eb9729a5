use crate::utils::{HiveError, HiveResult};

/// Input validation for agent registration and task submission payloads.
pub struct InputValidator;

impl InputValidator {
    /// Validate an agent's declared priority falls within the 1..=10 range.
    pub fn validate_priority(priority: u8) -> HiveResult<()> {
        if !(1..=10).contains(&priority) {
            return Err(HiveError::ValidationError {
                field: "priority".to_string(),
                reason: format!("priority must be in 1..=10, got {priority}"),
            });
        }
        Ok(())
    }

    /// Validate a pool type name is one of the configured pools.
    pub fn validate_pool_type(
        pool_type: &str,
        known_pools: &std::collections::HashMap<String, crate::utils::config::PoolDefaults>,
    ) -> HiveResult<()> {
        if !known_pools.contains_key(pool_type) {
            return Err(HiveError::PoolNotFound {
                pool_type: pool_type.to_string(),
            });
        }
        Ok(())
    }

    /// Validate a capability name is non-empty and reasonably sized.
    pub fn validate_capability(name: &str) -> HiveResult<()> {
        if name.trim().is_empty() {
            return Err(HiveError::ValidationError {
                field: "capability".to_string(),
                reason: "capability name cannot be empty".to_string(),
            });
        }
        if name.len() > 100 {
            return Err(HiveError::ValidationError {
                field: "capability".to_string(),
                reason: "capability name too long (max 100 characters)".to_string(),
            });
        }
        Ok(())
    }

    /// Validate a requested resource fits within a non-negative budget.
    pub fn validate_resource_request(cpu_cores: f64, memory_mb: u64) -> HiveResult<()> {
        if !cpu_cores.is_finite() || cpu_cores < 0.0 {
            return Err(HiveError::ValidationError {
                field: "cpu_cores".to_string(),
                reason: format!("cpu_cores must be a non-negative finite number, got {cpu_cores}"),
            });
        }
        if memory_mb == 0 {
            return Err(HiveError::ValidationError {
                field: "memory_mb".to_string(),
                reason: "memory_mb must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Parse and validate a UUID string.
    pub fn validate_uuid(uuid_str: &str) -> HiveResult<uuid::Uuid> {
        uuid::Uuid::parse_str(uuid_str).map_err(|_| HiveError::ValidationError {
            field: "id".to_string(),
            reason: format!("invalid UUID format: {uuid_str}"),
        })
    }
}
