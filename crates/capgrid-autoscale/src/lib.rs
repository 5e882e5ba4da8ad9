//! Forecast-driven sizing of the host pool.
//!
//! Once per control interval the controller reads the demand history,
//! forecasts the next interval and powers hosts on or off so that the
//! active pool matches the forecast. The feedback signal is each host's
//! state history (SLA violation) and its idle power draw.
//!
//! # Sizing Algorithm
//!
//! ```text
//! G     = Σ allocated MIPS over active hosts       (appended each cycle)
//! G'    = forecast(last `lag` samples of G, horizon)
//! W     = max over active hosts of G' / capacity
//! PSLA  = violation time / active time over active hosts, 1 if zero
//! Eidle = mean power at 0% utilization over all hosts
//!
//! X      = W + sqrt(N · PSLA · weight_factor · W / (price · Eidle))
//! target = clamp(floor(X) + 1, 1, hosts)
//!
//! target > active: power on dead hosts, lowest id first
//! target < active: power off idle hosts, lowest id first;
//!                  the shortfall is reported as needs_migration
//! ```
//!
//! A cycle with too little history, a failed forecast or a non-finite `X`
//! changes nothing and is logged as skipped.

pub mod controller;
pub mod driver;
pub mod error;
pub mod forecast;
pub mod policy;
pub mod pool;

pub use controller::{CapacityController, CycleOutcome, Sizing, SizingDecision};
pub use driver::{ControlCommand, ControlLoop, TickReport};
pub use error::{ControllerError, ControllerResult, ForecastError, ForecastResult};
pub use forecast::{ExponentialSmoothing, Forecaster, HoltLinear, MovingAverage, forecaster_from_config};
pub use policy::build_policy;
pub use pool::{Deactivation, HostPool};
