//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Errors loading an [`EngineConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A value is out of range
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Configuration for the query engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Time budget shared by all running queries in one tick, in milliseconds
    pub tick_budget_ms: f64,

    /// Accumulated execution time after which a query is reported as slow
    pub execution_time_warning_ms: f64,

    /// Initial state of time slicing; when off every step runs unbounded
    pub allow_time_slicing: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_budget_ms: 10.0,
            execution_time_warning_ms: 250.0,
            allow_time_slicing: true,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON document. Missing fields use defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check that durations are finite and positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_ms("tick_budget_ms", self.tick_budget_ms)?;
        check_ms("execution_time_warning_ms", self.execution_time_warning_ms)?;
        Ok(())
    }

    /// Per-tick budget.
    pub fn tick_budget(&self) -> Duration {
        ms_to_duration(self.tick_budget_ms)
    }

    /// Slow-query warning threshold.
    pub fn execution_time_warning(&self) -> Duration {
        ms_to_duration(self.execution_time_warning_ms)
    }
}

fn ms_to_duration(ms: f64) -> Duration {
    Duration::from_nanos((ms * 1_000_000.0).round() as u64)
}

fn check_ms(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("expected a positive number of milliseconds, got {}", value),
        })
    }
}
