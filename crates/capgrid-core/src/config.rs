//! capgrid.toml configuration parser.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::types::HostSpec;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CapgridConfig {
    pub controller: ControllerConfig,
    pub policy: PolicyConfig,
    pub hosts: Vec<HostTemplate>,
}

/// Tunables of the predictive capacity controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Number of trailing demand samples read per forecast.
    pub lag: usize,
    /// Forecast horizon in control intervals.
    pub forecast_horizon: usize,
    /// Weight factor of the SLA term in the sizing formula.
    pub weight_factor: f64,
    /// Electricity price used by the sizing formula.
    pub price: f64,
    /// Use the number of pending admissions as the load intensity `N`.
    pub use_pending_count: bool,
    /// Control interval, e.g. "10s" or "1m".
    pub schedule_interval: String,
    /// Factor (< 1) applied to the allocation of VMs migrating out of a host.
    pub migration_overhead: f64,
    /// Maximum number of state-history entries kept per host.
    pub history_limit: usize,
    pub forecaster: ForecasterConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            lag: 2,
            forecast_horizon: 1,
            weight_factor: 121.0,
            price: 0.6,
            use_pending_count: false,
            schedule_interval: "10s".to_string(),
            migration_overhead: 0.9,
            history_limit: 4096,
            forecaster: ForecasterConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Control interval in seconds.
    pub fn schedule_interval_secs(&self) -> u64 {
        parse_duration_secs(&self.schedule_interval)
    }
}

/// Demand forecasting model used by the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ForecasterConfig {
    MovingAverage,
    ExponentialSmoothing { alpha: f64 },
    Holt { alpha: f64, beta: f64 },
}

impl Default for ForecasterConfig {
    fn default() -> Self {
        ForecasterConfig::ExponentialSmoothing { alpha: 0.5 }
    }
}

/// Allocation policy variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyConfig {
    Predictive,
    Simple,
    StaticThreshold { upper_threshold: f64 },
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig::Predictive
    }
}

/// A group of identical hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostTemplate {
    #[serde(default = "default_count")]
    pub count: u32,
    pub pes: u32,
    pub mips_per_pe: f64,
    pub ram: u64,
    pub bw: u64,
    pub storage: u64,
    #[serde(default)]
    pub power_model: PowerModelConfig,
}

fn default_count() -> u32 {
    1
}

impl HostTemplate {
    pub fn spec(&self) -> HostSpec {
        HostSpec {
            pes: self.pes,
            mips_per_pe: self.mips_per_pe,
            ram: self.ram,
            bw: self.bw,
            storage: self.storage,
        }
    }
}

/// Power curve of a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PowerModelConfig {
    Linear { static_power: f64, max_power: f64 },
    SpecPower { profile: SpecPowerProfile },
}

impl Default for PowerModelConfig {
    fn default() -> Self {
        PowerModelConfig::SpecPower {
            profile: SpecPowerProfile::HpProliantMl110G5,
        }
    }
}

/// Published SPECpower benchmark profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecPowerProfile {
    #[serde(rename = "hp_proliant_ml110_g5")]
    HpProliantMl110G5,
    #[serde(rename = "hp_proliant_ml110_g4")]
    HpProliantMl110G4,
}

impl CapgridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: CapgridConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every tunable against its valid range.
    pub fn validate(&self) -> ConfigResult<()> {
        let c = &self.controller;
        if c.lag == 0 {
            return Err(ConfigError::ZeroLag);
        }
        if c.forecast_horizon == 0 {
            return Err(ConfigError::ZeroHorizon);
        }
        match try_parse_duration_secs(&c.schedule_interval) {
            Some(secs) if secs > 0 => {}
            _ => return Err(ConfigError::InvalidInterval(c.schedule_interval.clone())),
        }
        positive("controller.weight_factor", c.weight_factor)?;
        positive("controller.price", c.price)?;
        unit_range("controller.migration_overhead", c.migration_overhead)?;

        match &c.forecaster {
            ForecasterConfig::MovingAverage => {}
            ForecasterConfig::ExponentialSmoothing { alpha } => {
                unit_range("controller.forecaster.alpha", *alpha)?;
            }
            ForecasterConfig::Holt { alpha, beta } => {
                unit_range("controller.forecaster.alpha", *alpha)?;
                unit_range("controller.forecaster.beta", *beta)?;
            }
        }

        if let PolicyConfig::StaticThreshold { upper_threshold } = &self.policy {
            unit_range("policy.upper_threshold", *upper_threshold)?;
        }

        for (index, t) in self.hosts.iter().enumerate() {
            if t.pes == 0 {
                return Err(ConfigError::InvalidHostTemplate {
                    index,
                    reason: "pes must be at least 1".to_string(),
                });
            }
            if !(t.mips_per_pe.is_finite() && t.mips_per_pe > 0.0) {
                return Err(ConfigError::InvalidHostTemplate {
                    index,
                    reason: format!("mips_per_pe must be positive, got {}", t.mips_per_pe),
                });
            }
            if let PowerModelConfig::Linear {
                static_power,
                max_power,
            } = t.power_model
                && !(static_power >= 0.0 && max_power >= static_power)
            {
                return Err(ConfigError::InvalidHostTemplate {
                    index,
                    reason: format!(
                        "linear power model needs 0 <= static_power <= max_power, got {static_power}..{max_power}"
                    ),
                });
            }
        }

        Ok(())
    }

    /// Total number of hosts described by the templates.
    pub fn host_count(&self) -> u32 {
        self.hosts.iter().map(|t| t.count).sum()
    }
}

fn positive(field: &'static str, value: f64) -> ConfigResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { field, value })
    }
}

fn unit_range(field: &'static str, value: f64) -> ConfigResult<()> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfUnitRange { field, value })
    }
}

/// Parse a duration string like "30s", "5m" into seconds, falling back
/// to 10 seconds for anything unparseable. Validated configurations never
/// hit the fallback.
pub fn parse_duration_secs(s: &str) -> u64 {
    try_parse_duration_secs(s).unwrap_or(10)
}

/// Parse "30s", "5m" or a bare number of seconds.
pub fn try_parse_duration_secs(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok()
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok()?.checked_mul(60)
    } else {
        s.parse::<u64>().ok()
    }
}
