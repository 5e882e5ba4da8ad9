//! Placement engine. Applies decisions to the host arena.
//!
//! Given the hosts and a VM, the placer:
//! 1. Ranks candidate hosts (using scorer)
//! 2. Commits the VM on the first candidate whose ledger accepts it
//! 3. Hands the VM back when no host does, so it stays pending
//!
//! Migrations run in two steps: `begin_migration` reserves resources on
//! the target and flags the VM on the source, `complete_migration` commits
//! the reservation and releases the source.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use capgrid_core::{HostId, VmId};
use capgrid_host::{Host, Vm};

use crate::error::{PlacementError, PlacementResult, Unplaced};
use crate::policy::Migration;
use crate::scorer::rank_hosts;

/// Outcome of placing a batch of pending VMs.
#[derive(Debug, Default)]
pub struct PlacementPlan {
    /// Newly placed VMs only.
    pub placements: BTreeMap<VmId, HostId>,
    /// VMs no host accepted; retried next cycle.
    pub unplaced: Vec<Vm>,
}

pub fn host_mut(hosts: &mut [Host], id: HostId) -> PlacementResult<&mut Host> {
    hosts
        .iter_mut()
        .find(|h| h.id() == id)
        .ok_or(PlacementError::HostNotFound(id))
}

fn host_ref(hosts: &[Host], id: HostId) -> PlacementResult<&Host> {
    hosts
        .iter()
        .find(|h| h.id() == id)
        .ok_or(PlacementError::HostNotFound(id))
}

/// The active host with the most free PEs that can take `vm`, lowest id on
/// ties.
pub fn find_host_for_vm(hosts: &[Host], vm: &Vm) -> Option<HostId> {
    rank_hosts(hosts, vm).first().map(|s| s.host_id)
}

/// Commit `vm` on the best candidate that accepts it.
pub fn place_vm(hosts: &mut [Host], vm: Vm) -> Result<HostId, Unplaced> {
    let ranked = rank_hosts(hosts, &vm);
    let mut vm = vm;

    for candidate in &ranked {
        let host = match host_mut(hosts, candidate.host_id) {
            Ok(host) => host,
            Err(error) => return Err(Unplaced { vm, error }),
        };
        match host.create_vm(vm) {
            Ok(()) => {
                debug!(
                    host = candidate.host_id,
                    free_pes = candidate.free_pes,
                    "placed vm"
                );
                return Ok(candidate.host_id);
            }
            Err(rejected) => {
                debug!(
                    host = candidate.host_id,
                    vm = rejected.vm.id(),
                    error = %rejected.error,
                    "host refused vm"
                );
                vm = rejected.vm;
            }
        }
    }

    let vm_id = vm.id();
    Err(Unplaced {
        vm,
        error: PlacementError::NoSuitableHost(vm_id),
    })
}

/// Place every pending VM, in order. VMs no host accepts are returned in
/// the plan and never dropped.
pub fn place_pending(hosts: &mut [Host], pending: Vec<Vm>) -> PlacementPlan {
    let mut plan = PlacementPlan::default();

    for vm in pending {
        let vm_id = vm.id();
        match place_vm(hosts, vm) {
            Ok(host_id) => {
                plan.placements.insert(vm_id, host_id);
            }
            Err(unplaced) => {
                warn!(vm = vm_id, error = %unplaced.error, "placement failed, vm stays pending");
                plan.unplaced.push(unplaced.vm);
            }
        }
    }

    if !plan.placements.is_empty() || !plan.unplaced.is_empty() {
        debug!(
            placed = plan.placements.len(),
            unplaced = plan.unplaced.len(),
            "placement pass finished"
        );
    }

    plan
}

/// Reserve resources on the target and flag the VM as leaving the source.
pub fn begin_migration(hosts: &mut [Host], migration: &Migration) -> PlacementResult<()> {
    let source = host_ref(hosts, migration.from)?;
    let vm = source
        .vm(migration.vm)
        .cloned()
        .ok_or(PlacementError::VmNotFound {
            host: migration.from,
            vm: migration.vm,
        })?;
    if vm.is_in_migration() {
        return Err(PlacementError::AlreadyMigrating(migration.vm));
    }

    host_mut(hosts, migration.to)?
        .begin_migration_in(vm)
        .map_err(|rejected| rejected.error)?;
    host_mut(hosts, migration.from)?.mark_migrating_out(migration.vm)?;

    info!(
        vm = migration.vm,
        from = migration.from,
        to = migration.to,
        "migration started"
    );
    Ok(())
}

/// Commit the target's reservation and release the source.
pub fn complete_migration(hosts: &mut [Host], migration: &Migration) -> PlacementResult<()> {
    host_mut(hosts, migration.to)?.finish_migration_in(migration.vm)?;
    host_mut(hosts, migration.from)?.remove_vm(migration.vm);

    info!(
        vm = migration.vm,
        from = migration.from,
        to = migration.to,
        "migration finished"
    );
    Ok(())
}
