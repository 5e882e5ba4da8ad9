//! Power model error types.

use thiserror::Error;

pub type PowerResult<T> = Result<T, PowerError>;

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum PowerError {
    /// The utilization handed to a power model was outside `[0, 1]`.
    /// Callers clamp before calling, so this is a contract violation.
    #[error("utilization {0} is outside [0, 1]")]
    InvalidUtilization(f64),
}
