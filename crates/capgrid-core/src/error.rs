//! Configuration error types.

use thiserror::Error;

/// Result type alias for configuration validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised when a configuration value is outside its valid range.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("controller.lag must be at least 1")]
    ZeroLag,

    #[error("controller.forecast_horizon must be at least 1")]
    ZeroHorizon,

    #[error("{field} must be positive and finite, got {value}")]
    NotPositive { field: &'static str, value: f64 },

    #[error("{field} must be in (0, 1], got {value}")]
    OutOfUnitRange { field: &'static str, value: f64 },

    #[error("controller.schedule_interval must be a positive duration like \"10s\", got {0:?}")]
    InvalidInterval(String),

    #[error("host template {index}: {reason}")]
    InvalidHostTemplate { index: usize, reason: String },
}
