//! Forecaster and controller error types.

use thiserror::Error;

use capgrid_metrics::PowerError;

pub type ForecastResult<T> = Result<T, ForecastError>;

pub type ControllerResult<T> = Result<T, ControllerError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ForecastError {
    #[error("forecast window is empty")]
    EmptyWindow,

    #[error("forecast horizon must be at least one step")]
    ZeroHorizon,

    #[error("forecast window holds non-finite sample {0}")]
    NonFiniteInput(f64),

    #[error("forecaster produced non-finite estimate {0}")]
    NonFiniteForecast(f64),
}

/// Reasons a sizing cycle makes no reconfiguration. None of them is fatal;
/// the next cycle tries again.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControllerError {
    #[error("insufficient demand history: have {have} samples, need {need}")]
    InsufficientHistory { have: usize, need: usize },

    #[error("forecast unavailable: {0}")]
    ForecastUnavailable(#[from] ForecastError),

    #[error("target host count is not finite: {0}")]
    NonFiniteTarget(f64),

    #[error("no hosts to size")]
    NoHosts,

    #[error(transparent)]
    Power(#[from] PowerError),
}
