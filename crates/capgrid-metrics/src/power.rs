//! Power models and energy accounting.
//!
//! A [`PowerModel`] maps CPU utilization to instantaneous draw. The
//! [`PowerAccountant`] bound to each host turns consecutive utilization
//! samples into energy with the trapezoid rule, and draws nothing while
//! the host is inactive.

use std::fmt;

use tracing::error;

use capgrid_core::{PowerModelConfig, SpecPowerProfile};

use crate::error::{PowerError, PowerResult};

/// Maps CPU utilization to power draw in watts.
pub trait PowerModel: fmt::Debug + Send + Sync {
    /// Power at `utilization`, which must be within `[0, 1]`.
    fn power(&self, utilization: f64) -> PowerResult<f64>;
}

fn check_utilization(utilization: f64) -> PowerResult<()> {
    if (0.0..=1.0).contains(&utilization) {
        Ok(())
    } else {
        Err(PowerError::InvalidUtilization(utilization))
    }
}

/// Linear interpolation between idle and full-load power.
#[derive(Debug, Clone)]
pub struct LinearPowerModel {
    static_power: f64,
    max_power: f64,
}

impl LinearPowerModel {
    /// * `static_power` - draw at 0% utilization in watts.
    /// * `max_power` - draw at 100% utilization in watts.
    pub fn new(static_power: f64, max_power: f64) -> Self {
        Self {
            static_power,
            max_power,
        }
    }
}

impl PowerModel for LinearPowerModel {
    fn power(&self, utilization: f64) -> PowerResult<f64> {
        check_utilization(utilization)?;
        Ok(self.static_power + (self.max_power - self.static_power) * utilization)
    }
}

/// Power curve measured by the SPECpower benchmark at 0%, 10%, ..., 100%
/// load, interpolated linearly in between.
#[derive(Debug, Clone)]
pub struct SpecPowerModel {
    samples: [f64; 11],
}

impl SpecPowerModel {
    pub fn new(samples: [f64; 11]) -> Self {
        Self { samples }
    }

    /// HP ProLiant ML110 G5 (1 x Xeon 3075, 2 cores, 4 GB).
    pub fn hp_proliant_ml110_g5() -> Self {
        Self::new([
            93.7, 97.0, 101.0, 105.0, 110.0, 116.0, 121.0, 125.0, 129.0, 133.0, 135.0,
        ])
    }

    /// HP ProLiant ML110 G4 (1 x Xeon 3040, 2 cores, 4 GB).
    pub fn hp_proliant_ml110_g4() -> Self {
        Self::new([
            86.0, 89.4, 92.6, 96.0, 99.5, 102.0, 106.0, 108.0, 112.0, 114.0, 117.0,
        ])
    }

    pub fn from_profile(profile: SpecPowerProfile) -> Self {
        match profile {
            SpecPowerProfile::HpProliantMl110G5 => Self::hp_proliant_ml110_g5(),
            SpecPowerProfile::HpProliantMl110G4 => Self::hp_proliant_ml110_g4(),
        }
    }
}

impl PowerModel for SpecPowerModel {
    fn power(&self, utilization: f64) -> PowerResult<f64> {
        check_utilization(utilization)?;
        let scaled = utilization * 10.0;
        let lower = scaled.floor() as usize;
        if lower >= 10 {
            return Ok(self.samples[10]);
        }
        let fraction = scaled - lower as f64;
        let from = self.samples[lower];
        let to = self.samples[lower + 1];
        Ok(from + (to - from) * fraction)
    }
}

/// Build the power model a host template asks for.
pub fn power_model_from_config(config: &PowerModelConfig) -> Box<dyn PowerModel> {
    match config {
        PowerModelConfig::Linear {
            static_power,
            max_power,
        } => Box::new(LinearPowerModel::new(*static_power, *max_power)),
        PowerModelConfig::SpecPower { profile } => Box::new(SpecPowerModel::from_profile(*profile)),
    }
}

/// Per-host power and energy accounting.
#[derive(Debug)]
pub struct PowerAccountant {
    model: Box<dyn PowerModel>,
    /// Joules consumed since creation.
    total_energy: f64,
    last_time: Option<f64>,
    last_utilization: f64,
}

impl PowerAccountant {
    pub fn new(model: Box<dyn PowerModel>) -> Self {
        Self {
            model,
            total_energy: 0.0,
            last_time: None,
            last_utilization: 0.0,
        }
    }

    /// Instantaneous power at `utilization`. Callers clamp first; an
    /// out-of-range value panics in debug builds.
    pub fn power(&self, utilization: f64) -> PowerResult<f64> {
        debug_assert!(
            (0.0..=1.0).contains(&utilization),
            "utilization {utilization} outside [0, 1]"
        );
        self.model.power(utilization).inspect_err(|e| {
            error!(error = %e, "power model rejected utilization");
        })
    }

    /// Energy drawn over `duration` while utilization moved from
    /// `from_utilization` to `to_utilization`. Zero for an inactive host.
    pub fn energy(
        &self,
        active: bool,
        from_utilization: f64,
        to_utilization: f64,
        duration: f64,
    ) -> PowerResult<f64> {
        if !active {
            return Ok(0.0);
        }
        let from = self.power(from_utilization)?;
        let to = self.power(to_utilization)?;
        Ok((from + to) / 2.0 * duration)
    }

    /// Integrate energy from the previous observation up to `now` and
    /// remember `utilization` for the next one. Returns the increment.
    pub fn accumulate(&mut self, active: bool, utilization: f64, now: f64) -> PowerResult<f64> {
        let utilization = utilization.clamp(0.0, 1.0);
        let increment = match self.last_time {
            Some(previous) if now > previous => {
                self.energy(active, self.last_utilization, utilization, now - previous)?
            }
            _ => 0.0,
        };
        self.total_energy += increment;
        self.last_time = Some(now);
        self.last_utilization = utilization;
        Ok(increment)
    }

    pub fn total_energy(&self) -> f64 {
        self.total_energy
    }

    /// Power at full load.
    pub fn max_power(&self) -> PowerResult<f64> {
        self.power(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear() -> PowerAccountant {
        PowerAccountant::new(Box::new(LinearPowerModel::new(100.0, 200.0)))
    }

    #[test]
    fn linear_model_interpolates() {
        let model = LinearPowerModel::new(100.0, 200.0);
        assert_eq!(model.power(0.0).unwrap(), 100.0);
        assert_eq!(model.power(0.5).unwrap(), 150.0);
        assert_eq!(model.power(1.0).unwrap(), 200.0);
    }

    #[test]
    fn rejects_out_of_range_utilization() {
        let model = LinearPowerModel::new(100.0, 200.0);
        assert_eq!(model.power(1.5), Err(PowerError::InvalidUtilization(1.5)));
        assert!(model.power(-0.1).is_err());
        assert!(model.power(f64::NAN).is_err());
    }

    #[test]
    fn spec_power_hits_samples_and_interpolates() {
        let model = SpecPowerModel::hp_proliant_ml110_g5();
        assert_eq!(model.power(0.0).unwrap(), 93.7);
        assert_eq!(model.power(1.0).unwrap(), 135.0);
        let mid = model.power(0.05).unwrap();
        assert!((mid - 95.35).abs() < 1e-9);
    }

    #[test]
    fn energy_with_equal_endpoints_is_power_times_duration() {
        let acct = linear();
        let u = 0.3;
        let expected = acct.power(u).unwrap() * 10.0;
        assert_eq!(acct.energy(true, u, u, 10.0).unwrap(), expected);
    }

    #[test]
    fn energy_is_trapezoid() {
        let acct = linear();
        // (100 + 200) / 2 * 4
        assert_eq!(acct.energy(true, 0.0, 1.0, 4.0).unwrap(), 600.0);
    }

    #[test]
    fn inactive_host_draws_nothing() {
        let acct = linear();
        assert_eq!(acct.energy(false, 0.8, 0.9, 100.0).unwrap(), 0.0);
        // Stale, even invalid, samples are ignored while inactive.
        assert_eq!(acct.energy(false, 7.0, -3.0, 100.0).unwrap(), 0.0);
    }

    #[test]
    fn accumulate_integrates_between_observations() {
        let mut acct = linear();
        assert_eq!(acct.accumulate(true, 0.0, 0.0).unwrap(), 0.0);
        assert_eq!(acct.accumulate(true, 1.0, 10.0).unwrap(), 1500.0);
        assert_eq!(acct.accumulate(false, 1.0, 20.0).unwrap(), 0.0);
        assert_eq!(acct.total_energy(), 1500.0);
    }

    #[test]
    fn accumulate_clamps_before_calling_model() {
        let mut acct = linear();
        acct.accumulate(true, 0.0, 0.0).unwrap();
        let increment = acct.accumulate(true, 1.004, 1.0).unwrap();
        assert_eq!(increment, 150.0);
    }

    #[test]
    fn max_power_is_full_load_draw() {
        assert_eq!(linear().max_power().unwrap(), 200.0);
        let acct = PowerAccountant::new(Box::new(SpecPowerModel::hp_proliant_ml110_g4()));
        assert_eq!(acct.max_power().unwrap(), 117.0);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "outside [0, 1]")]
    fn unclamped_utilization_panics_in_debug_builds() {
        let _ = linear().power(1.5);
    }

    #[test]
    fn builds_model_from_config() {
        let model = power_model_from_config(&PowerModelConfig::Linear {
            static_power: 50.0,
            max_power: 100.0,
        });
        assert_eq!(model.power(1.0).unwrap(), 100.0);

        let model = power_model_from_config(&PowerModelConfig::default());
        assert_eq!(model.power(0.0).unwrap(), 93.7);
    }
}
