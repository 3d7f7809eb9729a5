use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Custom error types for the fleet orchestration engine.
///
/// Every fallible public method across the coordinator, registry, allocator,
/// health monitor, and autoscaler returns `HiveResult<T>`. Variants are
/// grouped by owning subsystem.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum HiveError {
    // --- Configuration ---
    #[error("configuration invalid: {reason}")]
    ConfigurationInvalid { reason: String },

    #[error("configuration file not found: {path}")]
    ConfigurationFileNotFound { path: String },

    // --- Coordination store ---
    #[error("coordination store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    #[error("state inconsistent: {operation}, reason: {reason}")]
    StateInconsistent { operation: String, reason: String },

    // --- Agent registry ---
    #[error("agent not found: {id}")]
    AgentNotFound { id: String },

    #[error("agent already registered: {id}")]
    AgentAlreadyRegistered { id: String },

    #[error("agent has active allocation, cannot unregister: {id}")]
    AgentHasActiveAllocation { id: String },

    #[error("agent state transition invalid: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    // --- Resource allocator ---
    #[error("no suitable agent for task: {task_id}, pool: {pool_type}")]
    NoSuitableAgent { task_id: String, pool_type: String },

    #[error("no pool accepts task: {task_id}")]
    NoPoolAcceptsTask { task_id: String },

    #[error("allocation timed out: {allocation_id}")]
    AllocationTimeout { allocation_id: String },

    #[error("allocation not found: {id}")]
    AllocationNotFound { id: String },

    #[error("pool capacity exceeded: {pool_type}, max: {max}")]
    CapacityExceeded { pool_type: String, max: u32 },

    #[error("pool not found: {pool_type}")]
    PoolNotFound { pool_type: String },

    // --- Tasks ---
    #[error("task not found: {id}")]
    TaskNotFound { id: String },

    #[error("task timed out: {task_id}")]
    TaskTimeout { task_id: String },

    // --- Health / circuit breaker ---
    #[error("agent unhealthy: {agent_id}, status: {status}")]
    AgentUnhealthy { agent_id: String, status: String },

    #[error("agent failed: {agent_id}")]
    AgentFailed { agent_id: String },

    #[error("circuit breaker open: {agent_id}")]
    CircuitBreakerOpen { agent_id: String },

    // --- Generic / ambient ---
    #[error("validation error: {field} - {reason}")]
    ValidationError { field: String, reason: String },

    #[error("invalid JSON: {reason}")]
    InvalidJson { reason: String },

    #[error("IO error: {reason}")]
    IoError { reason: String },

    #[error("timeout: {operation} after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    #[error("operation failed: {reason}")]
    OperationFailed { reason: String },
}

impl From<std::time::SystemTimeError> for HiveError {
    fn from(error: std::time::SystemTimeError) -> Self {
        HiveError::ValidationError {
            field: "timestamp".to_string(),
            reason: format!("system time conversion failed: {error}"),
        }
    }
}

/// Result type alias for the fleet engine.
pub type HiveResult<T> = Result<T, HiveError>;

/// Error context for better debugging and observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub operation: String,
    pub component: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub additional_info: std::collections::HashMap<String, String>,
}

impl ErrorContext {
    #[must_use]
    pub fn new(operation: &str, component: &str) -> Self {
        Self {
            operation: operation.to_string(),
            component: component.to_string(),
            timestamp: chrono::Utc::now(),
            additional_info: std::collections::HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_info(mut self, key: &str, value: &str) -> Self {
        self.additional_info
            .insert(key.to_string(), value.to_string());
        self
    }
}

/// Helper macro for creating errors with context.
#[macro_export]
macro_rules! hive_error {
    ($error_type:ident, $($field:ident: $value:expr),*) => {
        $crate::utils::error::HiveError::$error_type {
            $($field: $value.to_string()),*
        }
    };
}

/// Helper trait for adding context to Results.
pub trait ResultExt<T> {
    fn with_context(self, operation: &str, component: &str) -> Result<T, HiveError>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: std::fmt::Display,
{
    fn with_context(self, operation: &str, component: &str) -> Result<T, HiveError> {
        self.map_err(|e| HiveError::OperationFailed {
            reason: format!("{operation} in {component}: {e}"),
        })
    }
}

impl From<std::io::Error> for HiveError {
    fn from(err: std::io::Error) -> Self {
        HiveError::IoError {
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for HiveError {
    fn from(err: serde_json::Error) -> Self {
        HiveError::InvalidJson {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_strings_are_stable() {
        let err = HiveError::AgentNotFound {
            id: "agent-1".to_string(),
        };
        assert_eq!(err.to_string(), "agent not found: agent-1");
    }

    #[test]
    fn hive_error_macro_builds_variant() {
        let err = hive_error!(CapacityExceeded, pool_type: "coder", max: 100u32);
        assert!(matches!(err, HiveError::CapacityExceeded { .. }));
    }
}
