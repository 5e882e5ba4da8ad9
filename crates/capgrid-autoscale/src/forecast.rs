//! Demand forecasters.
//!
//! The controller only relies on the [`Forecaster`] contract: given a
//! chronological window of aggregate demand samples (oldest first), return
//! a point estimate `horizon` steps past the newest one.

use std::fmt;

use capgrid_core::ForecasterConfig;

use crate::error::{ForecastError, ForecastResult};

pub trait Forecaster: fmt::Debug + Send + Sync {
    fn forecast(&self, window: &[f64], horizon: usize) -> ForecastResult<f64>;
}

fn check_inputs(window: &[f64], horizon: usize) -> ForecastResult<()> {
    if window.is_empty() {
        return Err(ForecastError::EmptyWindow);
    }
    if horizon == 0 {
        return Err(ForecastError::ZeroHorizon);
    }
    if let Some(bad) = window.iter().find(|v| !v.is_finite()) {
        return Err(ForecastError::NonFiniteInput(*bad));
    }
    Ok(())
}

fn check_output(estimate: f64) -> ForecastResult<f64> {
    if estimate.is_finite() {
        Ok(estimate)
    } else {
        Err(ForecastError::NonFiniteForecast(estimate))
    }
}

/// Mean of the window, flat for every horizon.
#[derive(Debug, Clone, Default)]
pub struct MovingAverage;

impl Forecaster for MovingAverage {
    fn forecast(&self, window: &[f64], horizon: usize) -> ForecastResult<f64> {
        check_inputs(window, horizon)?;
        check_output(window.iter().sum::<f64>() / window.len() as f64)
    }
}

/// Simple exponential smoothing. Its point forecast equals that of an
/// ARIMA(0,1,1) model with MA coefficient `alpha - 1`, and is flat for
/// every horizon.
#[derive(Debug, Clone)]
pub struct ExponentialSmoothing {
    alpha: f64,
}

impl ExponentialSmoothing {
    pub fn new(alpha: f64) -> Self {
        Self { alpha }
    }
}

impl Forecaster for ExponentialSmoothing {
    fn forecast(&self, window: &[f64], horizon: usize) -> ForecastResult<f64> {
        check_inputs(window, horizon)?;
        let level = window[1..]
            .iter()
            .fold(window[0], |level, x| self.alpha * x + (1.0 - self.alpha) * level);
        check_output(level)
    }
}

/// Holt's linear trend method: smoothed level plus `horizon` times the
/// smoothed trend.
#[derive(Debug, Clone)]
pub struct HoltLinear {
    alpha: f64,
    beta: f64,
}

impl HoltLinear {
    pub fn new(alpha: f64, beta: f64) -> Self {
        Self { alpha, beta }
    }
}

impl Forecaster for HoltLinear {
    fn forecast(&self, window: &[f64], horizon: usize) -> ForecastResult<f64> {
        check_inputs(window, horizon)?;
        let mut level = window[0];
        let mut trend = match window.get(1) {
            Some(second) => second - window[0],
            None => 0.0,
        };
        for x in &window[1..] {
            let previous = level;
            level = self.alpha * x + (1.0 - self.alpha) * (level + trend);
            trend = self.beta * (level - previous) + (1.0 - self.beta) * trend;
        }
        check_output(level + horizon as f64 * trend)
    }
}

pub fn forecaster_from_config(config: &ForecasterConfig) -> Box<dyn Forecaster> {
    match config {
        ForecasterConfig::MovingAverage => Box::new(MovingAverage),
        ForecasterConfig::ExponentialSmoothing { alpha } => Box::new(ExponentialSmoothing::new(*alpha)),
        ForecasterConfig::Holt { alpha, beta } => Box::new(HoltLinear::new(*alpha, *beta)),
    }
}
