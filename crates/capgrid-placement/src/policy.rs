//! The allocation-policy capability.
//!
//! Every policy can place a VM, take one away, and run a periodic
//! optimization pass over the host arena. Policies are selected by
//! configuration and driven through `Box<dyn AllocationPolicy>`.

use serde::Serialize;

use capgrid_core::{HostId, VmId};
use capgrid_host::{Host, Vm};

use crate::error::Unplaced;
use crate::placer;

/// Move `vm` from host `from` to host `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Migration {
    pub vm: VmId,
    pub from: HostId,
    pub to: HostId,
}

/// Inputs of one optimization pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicyCycle {
    /// Simulated time of the pass.
    pub now: f64,
    /// VMs waiting for placement.
    pub pending_requests: usize,
}

/// What one optimization pass decided and already applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Optimization {
    /// Migrations proposed; the caller executes them.
    pub migrations: Vec<Migration>,
    /// Hosts switched on.
    pub activated: Vec<HostId>,
    /// Hosts switched off.
    pub deactivated: Vec<HostId>,
    /// Hosts the pass wanted to switch off but could not without first
    /// migrating VMs away.
    pub needs_migration: usize,
    /// Target number of active hosts, when the policy sizes the pool.
    pub target_hosts: Option<usize>,
    /// Why the sizing step was skipped, when it was.
    pub skipped: Option<String>,
}

pub trait AllocationPolicy: Send {
    fn name(&self) -> &'static str;

    /// Best host for `vm` right now, without committing anything.
    fn find_host_for_vm(&self, hosts: &[Host], vm: &Vm) -> Option<HostId> {
        placer::find_host_for_vm(hosts, vm)
    }

    /// Place `vm` on the best host that accepts it.
    fn allocate_host_for_vm(&mut self, hosts: &mut [Host], vm: Vm) -> Result<HostId, Unplaced> {
        placer::place_vm(hosts, vm)
    }

    /// Remove `vm_id` from whichever host holds it.
    fn deallocate_host_for_vm(&mut self, hosts: &mut [Host], vm_id: VmId) -> Option<Vm> {
        hosts.iter_mut().find_map(|h| h.remove_vm(vm_id))
    }

    /// Periodic pass over the whole arena.
    fn optimize(&mut self, hosts: &mut [Host], cycle: &PolicyCycle) -> Optimization;
}
