//! Predictive capacity controller.
//!
//! Runs once per control interval. Each cycle forecasts aggregate demand
//! from a trailing window of samples, turns the forecast into a target
//! number of active hosts, and powers hosts on or off to match. Newly
//! admitted VMs are placed in the same cycle.

use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;
use tracing::{debug, info, warn};

use capgrid_core::{ControllerConfig, HostId, VmId};
use capgrid_host::{Host, Vm};
use capgrid_metrics::SlaTotals;
use capgrid_placement::{AllocationPolicy, Optimization, PolicyCycle, place_pending};

use crate::error::{ControllerError, ControllerResult, ForecastError};
use crate::forecast::{Forecaster, forecaster_from_config};
use crate::pool::HostPool;

/// What the sizing step of one cycle computed and applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sizing {
    /// Forecast aggregate demand in MIPS.
    pub forecast_demand: f64,
    /// `W`: forecast demand over the smallest active host's capacity.
    pub load_factor: f64,
    /// SLA violation ratio used by the formula, after the zero fallback.
    pub sla_violation: f64,
    /// Unrounded target `X`.
    pub raw_target: f64,
    pub target: usize,
    pub activated: Vec<HostId>,
    pub deactivated: Vec<HostId>,
    /// Hosts that should have been powered off but are still loaded.
    pub needs_migration: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SizingDecision {
    /// The cycle made no reconfiguration.
    Skipped(ControllerError),
    Resized(Sizing),
}

impl SizingDecision {
    pub fn is_skipped(&self) -> bool {
        matches!(self, SizingDecision::Skipped(_))
    }

    pub fn sizing(&self) -> Option<&Sizing> {
        match self {
            SizingDecision::Resized(sizing) => Some(sizing),
            SizingDecision::Skipped(_) => None,
        }
    }

    fn to_optimization(&self) -> Optimization {
        match self {
            SizingDecision::Skipped(reason) => Optimization {
                skipped: Some(reason.to_string()),
                ..Optimization::default()
            },
            SizingDecision::Resized(sizing) => Optimization {
                activated: sizing.activated.clone(),
                deactivated: sizing.deactivated.clone(),
                needs_migration: sizing.needs_migration,
                target_hosts: Some(sizing.target),
                ..Optimization::default()
            },
        }
    }
}

/// Result of one [`CapacityController::reconcile`] call.
#[derive(Debug)]
pub struct CycleOutcome {
    pub now: f64,
    /// Newly placed VMs only.
    pub placements: BTreeMap<VmId, HostId>,
    /// VMs no host accepted; the caller retries them next cycle.
    pub unplaced: Vec<Vm>,
    pub sizing: SizingDecision,
}

#[derive(Debug)]
pub struct CapacityController {
    config: ControllerConfig,
    forecaster: Box<dyn Forecaster>,
    /// Aggregate active demand per cycle, oldest first.
    demand_history: VecDeque<f64>,
    pool: HostPool,
    average_power_off_idle: f64,
}

impl CapacityController {
    pub fn new(config: ControllerConfig) -> Self {
        let forecaster = forecaster_from_config(&config.forecaster);
        Self {
            config,
            forecaster,
            demand_history: VecDeque::new(),
            pool: HostPool::default(),
            average_power_off_idle: 0.0,
        }
    }

    /// Replace the configured forecaster.
    pub fn with_forecaster(mut self, forecaster: Box<dyn Forecaster>) -> Self {
        self.forecaster = forecaster;
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Partition as of the end of the last cycle.
    pub fn pool(&self) -> &HostPool {
        &self.pool
    }

    /// Demand samples, oldest first.
    pub fn demand_history(&self) -> impl Iterator<Item = f64> + '_ {
        self.demand_history.iter().copied()
    }

    pub fn average_power_off_idle(&self) -> f64 {
        self.average_power_off_idle
    }

    /// One control cycle: size the pool, then place `pending` VMs on the
    /// active hosts. Sizing failures skip reconfiguration only; placement
    /// still runs.
    pub fn reconcile(&mut self, hosts: &mut [Host], pending: Vec<Vm>, now: f64) -> CycleOutcome {
        let sizing = self.size_pool(hosts, pending.len(), now);
        let plan = place_pending(hosts, pending);
        self.pool = HostPool::classify(hosts);

        CycleOutcome {
            now,
            placements: plan.placements,
            unplaced: plan.unplaced,
            sizing,
        }
    }

    /// Steps 1 to 8 of a cycle: classify, forecast, compute the target and
    /// reconcile the pool against it.
    pub fn size_pool(&mut self, hosts: &mut [Host], pending_requests: usize, now: f64) -> SizingDecision {
        match self.try_size_pool(hosts, pending_requests) {
            Ok(sizing) => {
                info!(
                    time = now,
                    forecast = sizing.forecast_demand,
                    target = sizing.target,
                    activated = sizing.activated.len(),
                    deactivated = sizing.deactivated.len(),
                    "capacity cycle finished"
                );
                SizingDecision::Resized(sizing)
            }
            Err(reason) => {
                warn!(time = now, reason = %reason, "capacity cycle skipped");
                SizingDecision::Skipped(reason)
            }
        }
    }

    fn try_size_pool(&mut self, hosts: &mut [Host], pending_requests: usize) -> ControllerResult<Sizing> {
        self.pool = HostPool::classify(hosts);
        if hosts.is_empty() {
            return Err(ControllerError::NoHosts);
        }

        self.average_power_off_idle = average_idle_power(hosts)?;

        let demand: f64 = hosts
            .iter()
            .filter(|h| h.is_active())
            .map(Host::allocated_mips)
            .sum();
        self.push_demand(demand);

        let lag = self.config.lag;
        if self.demand_history.len() < lag {
            return Err(ControllerError::InsufficientHistory {
                have: self.demand_history.len(),
                need: lag,
            });
        }

        let window: Vec<f64> = self
            .demand_history
            .iter()
            .skip(self.demand_history.len() - lag)
            .copied()
            .collect();
        let forecast_demand = self
            .forecaster
            .forecast(&window, self.config.forecast_horizon)?;
        if !forecast_demand.is_finite() {
            return Err(ForecastError::NonFiniteForecast(forecast_demand).into());
        }
        let forecast_demand = forecast_demand.max(0.0);

        let load_factor = hosts
            .iter()
            .filter(|h| h.is_active())
            .map(|h| h.spec().total_mips())
            .filter(|capacity| *capacity > 0.0)
            .map(|capacity| forecast_demand / capacity)
            .fold(0.0, f64::max);

        let mut sla_violation = hosts
            .iter()
            .filter(|h| h.is_active())
            .map(|h| h.state_history().sla_totals())
            .fold(SlaTotals::default(), |acc, t| acc + t)
            .ratio();
        if sla_violation == 0.0 {
            sla_violation = 1.0;
        }

        let intensity = if self.config.use_pending_count {
            pending_requests.max(1) as f64
        } else {
            1.0
        };

        let raw_target = load_factor
            + (intensity * sla_violation * self.config.weight_factor * load_factor
                / (self.config.price * self.average_power_off_idle))
                .sqrt();
        if !raw_target.is_finite() {
            return Err(ControllerError::NonFiniteTarget(raw_target));
        }
        let target = (raw_target.floor() as usize + 1).clamp(1, hosts.len());

        debug!(
            demand,
            forecast = forecast_demand,
            load_factor,
            sla_violation,
            raw_target,
            target,
            "sizing formula evaluated"
        );

        let active = self.pool.active_count();
        let mut sizing = Sizing {
            forecast_demand,
            load_factor,
            sla_violation,
            raw_target,
            target,
            activated: Vec::new(),
            deactivated: Vec::new(),
            needs_migration: 0,
        };

        if target > active {
            sizing.activated = self.pool.activate(hosts, target - active);
        } else if target < active {
            let result = self.pool.deactivate(hosts, active - target);
            sizing.deactivated = result.deactivated;
            sizing.needs_migration = result.unmet;
            if result.unmet > 0 {
                warn!(
                    unmet = result.unmet,
                    running = self.pool.running().len(),
                    "not enough idle hosts to shed, vms need migration"
                );
            }
        }

        Ok(sizing)
    }

    fn push_demand(&mut self, demand: f64) {
        let limit = self.config.history_limit.max(self.config.lag);
        if self.demand_history.len() == limit {
            self.demand_history.pop_front();
        }
        self.demand_history.push_back(demand);
    }
}

/// Mean zero-utilization power over every host, active or not.
fn average_idle_power(hosts: &[Host]) -> ControllerResult<f64> {
    let mut sum = 0.0;
    for host in hosts {
        sum += host.idle_power()?;
    }
    Ok(sum / hosts.len() as f64)
}

impl AllocationPolicy for CapacityController {
    fn name(&self) -> &'static str {
        "predictive"
    }

    fn optimize(&mut self, hosts: &mut [Host], cycle: &PolicyCycle) -> Optimization {
        let decision = self.size_pool(hosts, cycle.pending_requests, cycle.now);
        self.pool = HostPool::classify(hosts);
        decision.to_optimization()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capgrid_core::{HostSpec, VmSpec};
    use capgrid_metrics::LinearPowerModel;

    use crate::error::ForecastResult;

    #[derive(Debug)]
    struct Fixed(f64);

    impl Forecaster for Fixed {
        fn forecast(&self, _window: &[f64], _horizon: usize) -> ForecastResult<f64> {
            Ok(self.0)
        }
    }

    #[derive(Debug)]
    struct Failing;

    impl Forecaster for Failing {
        fn forecast(&self, _window: &[f64], _horizon: usize) -> ForecastResult<f64> {
            Err(ForecastError::EmptyWindow)
        }
    }

    fn make_host(id: HostId) -> Host {
        Host::new(
            id,
            HostSpec {
                pes: 4,
                mips_per_pe: 1000.0,
                ram: 2048,
                bw: 10_000,
                storage: 1_000_000,
            },
            Box::new(LinearPowerModel::new(100.0, 200.0)),
        )
    }

    fn make_hosts(n: u32) -> Vec<Host> {
        (0..n).map(make_host).collect()
    }

    fn test_vm(id: VmId) -> Vm {
        Vm::new(VmSpec {
            id,
            pes: 2,
            mips_per_pe: 1000.0,
            ram: 512,
            bw: 1000,
            storage: 10_000,
        })
    }

    fn controller(lag: usize) -> CapacityController {
        CapacityController::new(ControllerConfig {
            lag,
            ..ControllerConfig::default()
        })
    }

    #[test]
    fn skips_until_lag_samples_exist() {
        let mut hosts = make_hosts(4);
        let mut ctl = controller(2);

        let decision = ctl.size_pool(&mut hosts, 0, 0.0);
        assert_eq!(
            decision,
            SizingDecision::Skipped(ControllerError::InsufficientHistory { have: 1, need: 2 })
        );
        assert!(hosts.iter().all(Host::is_active));
        assert!(!ctl.size_pool(&mut hosts, 0, 10.0).is_skipped());
    }

    #[test]
    fn formula_matches_hand_computation() {
        let mut hosts = make_hosts(8);
        let mut ctl = controller(1).with_forecaster(Box::new(Fixed(4000.0)));

        let decision = ctl.size_pool(&mut hosts, 0, 0.0);
        let sizing = decision.sizing().unwrap();
        // W = 1, PSLA = 1, N = 1, Eidle = 100:
        // X = 1 + sqrt(121 / 60)
        let expected = 1.0 + (121.0_f64 / 60.0).sqrt();
        assert!((sizing.raw_target - expected).abs() < 1e-9);
        assert_eq!(sizing.load_factor, 1.0);
        assert_eq!(sizing.sla_violation, 1.0);
        assert_eq!(sizing.target, 3);
        assert_eq!(ctl.average_power_off_idle(), 100.0);
        // Eight idle hosts, target three.
        assert_eq!(sizing.deactivated, vec![0, 1, 2, 3, 4]);
        assert_eq!(ctl.pool().active_count(), 3);
    }

    #[test]
    fn pending_count_scales_intensity() {
        let mut config = ControllerConfig {
            lag: 1,
            use_pending_count: true,
            ..ControllerConfig::default()
        };
        config.history_limit = 8;
        let mut ctl = CapacityController::new(config).with_forecaster(Box::new(Fixed(4000.0)));
        let mut hosts = make_hosts(20);

        let sizing = ctl.size_pool(&mut hosts, 30, 0.0).sizing().cloned().unwrap();
        let expected = 1.0 + (30.0 * 121.0_f64 / 60.0).sqrt();
        assert!((sizing.raw_target - expected).abs() < 1e-9);
        assert_eq!(sizing.target, 9);
    }

    #[test]
    fn target_is_clamped_to_host_count() {
        let mut hosts = make_hosts(2);
        let mut ctl = controller(1).with_forecaster(Box::new(Fixed(1e9)));
        let sizing = ctl.size_pool(&mut hosts, 0, 0.0).sizing().cloned().unwrap();
        assert_eq!(sizing.target, 2);
        assert!(sizing.activated.is_empty());
    }

    #[test]
    fn zero_forecast_keeps_one_host() {
        let mut hosts = make_hosts(3);
        let mut ctl = controller(1).with_forecaster(Box::new(Fixed(0.0)));
        let sizing = ctl.size_pool(&mut hosts, 0, 0.0).sizing().cloned().unwrap();
        assert_eq!(sizing.raw_target, 0.0);
        assert_eq!(sizing.target, 1);
        assert_eq!(hosts.iter().filter(|h| h.is_active()).count(), 1);
    }

    #[test]
    fn forecaster_failure_skips_without_side_effects() {
        let mut hosts = make_hosts(3);
        let mut ctl = controller(1).with_forecaster(Box::new(Failing));
        let decision = ctl.size_pool(&mut hosts, 0, 0.0);
        assert_eq!(
            decision,
            SizingDecision::Skipped(ControllerError::ForecastUnavailable(ForecastError::EmptyWindow))
        );
        assert!(hosts.iter().all(Host::is_active));
    }

    #[test]
    fn zero_idle_power_is_non_finite_target() {
        let mut hosts: Vec<Host> = (0..2)
            .map(|id| {
                Host::new(
                    id,
                    make_host(id).spec().clone(),
                    Box::new(LinearPowerModel::new(0.0, 100.0)),
                )
            })
            .collect();
        let mut ctl = controller(1).with_forecaster(Box::new(Fixed(0.0)));
        // 0 / 0 under the square root.
        assert!(matches!(
            ctl.size_pool(&mut hosts, 0, 0.0),
            SizingDecision::Skipped(ControllerError::NonFiniteTarget(_))
        ));
    }

    #[test]
    fn no_hosts_is_skipped() {
        let mut ctl = controller(1);
        assert_eq!(
            ctl.size_pool(&mut [], 0, 0.0),
            SizingDecision::Skipped(ControllerError::NoHosts)
        );
    }

    #[test]
    fn reconcile_places_even_when_sizing_skips() {
        let mut hosts = make_hosts(2);
        let mut ctl = controller(2);

        let outcome = ctl.reconcile(&mut hosts, vec![test_vm(1), test_vm(2), test_vm(3)], 0.0);
        assert!(outcome.sizing.is_skipped());
        assert_eq!(outcome.placements.get(&1), Some(&0));
        assert_eq!(outcome.placements.get(&2), Some(&1));
        assert_eq!(outcome.placements.get(&3), Some(&0));
        assert!(outcome.unplaced.is_empty());
        assert_eq!(ctl.pool().running().len(), 2);
    }

    #[test]
    fn demand_history_is_oldest_first_and_bounded() {
        let mut config = ControllerConfig {
            lag: 2,
            history_limit: 3,
            ..ControllerConfig::default()
        };
        config.forecaster = capgrid_core::ForecasterConfig::MovingAverage;
        let mut ctl = CapacityController::new(config);
        let mut hosts = make_hosts(4);

        for (i, now) in [0.0, 10.0, 20.0, 30.0].into_iter().enumerate() {
            hosts[0].create_vm(test_vm(i as VmId)).ok();
            ctl.size_pool(&mut hosts, 0, now);
        }
        let history: Vec<f64> = ctl.demand_history().collect();
        assert_eq!(history, vec![4000.0, 4000.0, 4000.0]);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn optimize_reports_sizing() {
        let mut hosts = make_hosts(8);
        let mut ctl = controller(1).with_forecaster(Box::new(Fixed(4000.0)));
        let optimization = ctl.optimize(
            &mut hosts,
            &PolicyCycle {
                now: 0.0,
                pending_requests: 0,
            },
        );
        assert_eq!(optimization.target_hosts, Some(3));
        assert_eq!(optimization.deactivated.len(), 5);
        assert!(optimization.migrations.is_empty());
        assert_eq!(ctl.name(), "predictive");
    }
}
