//! Host ranking for placement decisions.
//!
//! A host is a candidate for a VM when it is active, not failed, and its
//! ledger can fit the VM's compute, memory and bandwidth. Candidates are
//! ranked by free processing elements (most first), so new VMs spread
//! across the least committed machines; ties go to the lowest host id.

use std::cmp::Ordering;

use serde::Serialize;

use capgrid_core::HostId;
use capgrid_host::{Host, Vm};

/// A candidate host for one VM.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostScore {
    pub host_id: HostId,
    /// PEs with no VM bound to them.
    pub free_pes: u32,
    /// CPU utilization before placement.
    pub utilization: f64,
}

/// Score a single host for `vm`. `None` when the host cannot take it.
pub fn score_host(host: &Host, vm: &Vm) -> Option<HostScore> {
    if !host.is_suitable_for_vm(vm) {
        return None;
    }
    Some(HostScore {
        host_id: host.id(),
        free_pes: host.free_pes(),
        utilization: host.utilization(),
    })
}

/// Score all hosts and return the candidates, best first.
pub fn rank_hosts(hosts: &[Host], vm: &Vm) -> Vec<HostScore> {
    let mut scores: Vec<HostScore> = hosts.iter().filter_map(|h| score_host(h, vm)).collect();
    scores.sort_by(|a, b| {
        b.free_pes
            .cmp(&a.free_pes)
            .then(a.host_id.cmp(&b.host_id))
    });
    scores
}

/// Order by utilization ascending, lowest id on ties.
pub(crate) fn by_utilization(a: &HostScore, b: &HostScore) -> Ordering {
    a.utilization
        .partial_cmp(&b.utilization)
        .unwrap_or(Ordering::Equal)
        .then(a.host_id.cmp(&b.host_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use capgrid_core::{HostSpec, VmSpec};
    use capgrid_metrics::LinearPowerModel;

    fn make_host(id: HostId, pes: u32) -> Host {
        Host::new(
            id,
            HostSpec {
                pes,
                mips_per_pe: 1000.0,
                ram: 2048,
                bw: 10_000,
                storage: 1_000_000,
            },
            Box::new(LinearPowerModel::new(100.0, 200.0)),
        )
    }

    fn test_vm(id: u32, pes: u32) -> Vm {
        Vm::new(VmSpec {
            id,
            pes,
            mips_per_pe: 1000.0,
            ram: 512,
            bw: 1000,
            storage: 10_000,
        })
    }

    #[test]
    fn rejects_inactive_and_failed_hosts() {
        let mut inactive = make_host(0, 4);
        inactive.set_active(false);
        let mut failed = make_host(1, 4);
        failed.set_failed(true);

        let vm = test_vm(1, 1);
        assert!(score_host(&inactive, &vm).is_none());
        assert!(score_host(&failed, &vm).is_none());
    }

    #[test]
    fn rejects_host_without_enough_pes() {
        let host = make_host(0, 1);
        assert!(score_host(&host, &test_vm(1, 2)).is_none());
    }

    #[test]
    fn most_free_pes_first() {
        let mut busy = make_host(0, 4);
        busy.create_vm(test_vm(10, 2)).unwrap();
        let hosts = vec![busy, make_host(1, 4), make_host(2, 8)];

        let ranked = rank_hosts(&hosts, &test_vm(1, 1));
        let order: Vec<HostId> = ranked.iter().map(|s| s.host_id).collect();
        assert_eq!(order, vec![2, 1, 0]);
        assert_eq!(ranked[2].free_pes, 2);
    }

    #[test]
    fn ties_break_on_lowest_id() {
        let hosts = vec![make_host(5, 4), make_host(3, 4), make_host(4, 4)];
        let ranked = rank_hosts(&hosts, &test_vm(1, 1));
        let order: Vec<HostId> = ranked.iter().map(|s| s.host_id).collect();
        assert_eq!(order, vec![3, 4, 5]);
    }

    #[test]
    fn utilization_order_is_ascending() {
        let mut scores = vec![
            HostScore { host_id: 2, free_pes: 0, utilization: 0.5 },
            HostScore { host_id: 1, free_pes: 0, utilization: 0.5 },
            HostScore { host_id: 0, free_pes: 0, utilization: 0.9 },
        ];
        scores.sort_by(by_utilization);
        let order: Vec<HostId> = scores.iter().map(|s| s.host_id).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }
}
