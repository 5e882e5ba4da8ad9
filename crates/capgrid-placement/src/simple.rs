//! Non-predictive allocation policies.

use std::collections::BTreeMap;

use tracing::{debug, info};

use capgrid_core::HostId;
use capgrid_host::{Host, Vm};

use crate::policy::{AllocationPolicy, Migration, Optimization, PolicyCycle};
use crate::scorer::{HostScore, by_utilization, score_host};

/// Places on the active host with the most free PEs and never migrates.
#[derive(Debug, Default)]
pub struct SimplePolicy;

impl AllocationPolicy for SimplePolicy {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn optimize(&mut self, _hosts: &mut [Host], _cycle: &PolicyCycle) -> Optimization {
        Optimization::default()
    }
}

/// Places like [`SimplePolicy`]; each pass moves the smallest VM off every
/// host above `upper_threshold` utilization.
#[derive(Debug)]
pub struct StaticThresholdPolicy {
    upper_threshold: f64,
}

impl StaticThresholdPolicy {
    pub fn new(upper_threshold: f64) -> Self {
        Self { upper_threshold }
    }

    pub fn upper_threshold(&self) -> f64 {
        self.upper_threshold
    }

    /// Settled resident VM with the smallest allocation, lowest id on ties.
    fn smallest_vm(host: &Host) -> Option<&Vm> {
        host.vms()
            .filter(|vm| !vm.is_in_migration())
            .min_by(|a, b| {
                let a_mips = host.ledger().allocated_mips(a.id());
                let b_mips = host.ledger().allocated_mips(b.id());
                a_mips
                    .partial_cmp(&b_mips)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.id().cmp(&b.id()))
            })
    }

    /// Least utilized host that can take `vm` and stays at or below the
    /// threshold with it, counting MIPS already promised this pass.
    fn pick_target(
        &self,
        hosts: &[Host],
        vm: &Vm,
        source: HostId,
        promised: &BTreeMap<HostId, f64>,
    ) -> Option<HostId> {
        let mut candidates: Vec<HostScore> = hosts
            .iter()
            .filter(|h| h.id() != source)
            .filter_map(|h| {
                let total = h.spec().total_mips();
                if total <= 0.0 {
                    return None;
                }
                let extra = promised.get(&h.id()).copied().unwrap_or(0.0);
                // Reservations for in-flight arrivals occupy capacity too.
                let load = h.ledger().used_mips() + extra;
                let projected = (load + vm.requested_mips()) / total;
                if projected > self.upper_threshold {
                    return None;
                }
                score_host(h, vm).map(|mut score| {
                    score.utilization = load / total;
                    score
                })
            })
            .collect();
        candidates.sort_by(by_utilization);
        candidates.first().map(|s| s.host_id)
    }
}

impl AllocationPolicy for StaticThresholdPolicy {
    fn name(&self) -> &'static str {
        "static_threshold"
    }

    fn optimize(&mut self, hosts: &mut [Host], cycle: &PolicyCycle) -> Optimization {
        let mut optimization = Optimization::default();
        let mut promised: BTreeMap<HostId, f64> = BTreeMap::new();

        for host in hosts.iter() {
            if !host.is_active() || host.is_failed() {
                continue;
            }
            if host.utilization() <= self.upper_threshold {
                continue;
            }
            let Some(vm) = Self::smallest_vm(host) else {
                continue;
            };

            match self.pick_target(hosts, vm, host.id(), &promised) {
                Some(target) => {
                    *promised.entry(target).or_insert(0.0) += vm.requested_mips();
                    debug!(
                        vm = vm.id(),
                        from = host.id(),
                        to = target,
                        utilization = host.utilization(),
                        "host over threshold, proposing migration"
                    );
                    optimization.migrations.push(Migration {
                        vm: vm.id(),
                        from: host.id(),
                        to: target,
                    });
                }
                None => {
                    debug!(
                        host = host.id(),
                        utilization = host.utilization(),
                        "host over threshold, no target below it"
                    );
                }
            }
        }

        if !optimization.migrations.is_empty() {
            info!(
                time = cycle.now,
                migrations = optimization.migrations.len(),
                "static threshold pass proposed migrations"
            );
        }
        optimization
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capgrid_core::{HostSpec, VmId, VmSpec};
    use capgrid_metrics::LinearPowerModel;

    fn make_host(id: HostId) -> Host {
        Host::new(
            id,
            HostSpec {
                pes: 4,
                mips_per_pe: 1000.0,
                ram: 4096,
                bw: 10_000,
                storage: 1_000_000,
            },
            Box::new(LinearPowerModel::new(100.0, 200.0)),
        )
    }

    fn test_vm(id: VmId, pes: u32) -> Vm {
        Vm::new(VmSpec {
            id,
            pes,
            mips_per_pe: 1000.0,
            ram: 256,
            bw: 100,
            storage: 1000,
        })
    }

    fn cycle() -> PolicyCycle {
        PolicyCycle {
            now: 0.0,
            pending_requests: 0,
        }
    }

    #[test]
    fn simple_policy_places_and_never_migrates() {
        let mut policy = SimplePolicy;
        let mut hosts = vec![make_host(0), make_host(1)];
        hosts[0].create_vm(test_vm(10, 4)).unwrap();

        assert_eq!(policy.find_host_for_vm(&hosts, &test_vm(1, 1)), Some(1));
        assert_eq!(policy.allocate_host_for_vm(&mut hosts, test_vm(1, 1)).unwrap(), 1);
        assert_eq!(policy.optimize(&mut hosts, &cycle()), Optimization::default());

        let vm = policy.deallocate_host_for_vm(&mut hosts, 1).unwrap();
        assert_eq!(vm.id(), 1);
        assert!(policy.deallocate_host_for_vm(&mut hosts, 1).is_none());
    }

    #[test]
    fn threshold_moves_smallest_vm_to_least_utilized_host() {
        let mut policy = StaticThresholdPolicy::new(0.8);
        let mut hosts = vec![make_host(0), make_host(1), make_host(2)];
        hosts[0].create_vm(test_vm(1, 3)).unwrap();
        hosts[0].create_vm(test_vm(2, 1)).unwrap();
        hosts[1].create_vm(test_vm(3, 1)).unwrap();

        let optimization = policy.optimize(&mut hosts, &cycle());
        assert_eq!(
            optimization.migrations,
            vec![Migration { vm: 2, from: 0, to: 2 }]
        );
        assert!(optimization.activated.is_empty());
    }

    #[test]
    fn threshold_skips_when_no_target_stays_below() {
        let mut policy = StaticThresholdPolicy::new(0.5);
        let mut hosts = vec![make_host(0), make_host(1)];
        hosts[0].create_vm(test_vm(1, 3)).unwrap();
        hosts[1].create_vm(test_vm(2, 2)).unwrap();

        let optimization = policy.optimize(&mut hosts, &cycle());
        assert!(optimization.migrations.is_empty());
    }

    #[test]
    fn threshold_counts_promised_capacity() {
        let mut policy = StaticThresholdPolicy::new(0.8);
        let mut hosts = vec![make_host(0), make_host(1), make_host(2)];
        hosts[0].create_vm(test_vm(1, 4)).unwrap();
        hosts[1].create_vm(test_vm(2, 4)).unwrap();

        // A whole 4-PE VM would put host 2 at 100%, above the threshold.
        let optimization = policy.optimize(&mut hosts, &cycle());
        assert!(optimization.migrations.is_empty());

        let mut hosts = vec![make_host(0), make_host(1), make_host(2)];
        hosts[0].create_vm(test_vm(1, 3)).unwrap();
        hosts[0].create_vm(test_vm(4, 1)).unwrap();
        hosts[1].create_vm(test_vm(2, 3)).unwrap();
        hosts[1].create_vm(test_vm(5, 1)).unwrap();

        let optimization = policy.optimize(&mut hosts, &cycle());
        let targets: Vec<HostId> = optimization.migrations.iter().map(|m| m.to).collect();
        assert_eq!(targets, vec![2, 2]);
    }

    #[test]
    fn inactive_hosts_are_never_targets() {
        let mut policy = StaticThresholdPolicy::new(0.8);
        let mut hosts = vec![make_host(0), make_host(1)];
        hosts[0].create_vm(test_vm(1, 3)).unwrap();
        hosts[0].create_vm(test_vm(2, 1)).unwrap();
        hosts[1].set_active(false);

        assert!(policy.optimize(&mut hosts, &cycle()).migrations.is_empty());
    }
}
