//! Simulated physical host.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use capgrid_core::{CapgridConfig, HostId, HostSpec, VmId};
use capgrid_metrics::{
    HostSnapshot, PowerAccountant, PowerModel, PowerResult, StateHistory, StateHistoryEntry,
    power_model_from_config,
};

use crate::error::{HostError, HostResult, LedgerError, RejectedVm};
use crate::ledger::ResourceLedger;
use crate::vm::Vm;

/// History entries kept per host unless configured otherwise.
pub const DEFAULT_HISTORY_LIMIT: usize = 4096;

/// Share of its allocation a VM still receives while migrating out.
pub const DEFAULT_MIGRATION_OVERHEAD: f64 = 0.9;

/// Utilization this far above 1 is rounding noise and reported as 1.
const UTILIZATION_SNAP: f64 = 1.01;

#[derive(Debug)]
pub struct Host {
    id: HostId,
    spec: HostSpec,
    active: bool,
    failed: bool,
    ledger: ResourceLedger,
    /// Resident VMs, including those migrating out.
    vms: BTreeMap<VmId, Vm>,
    /// VMs whose resources are reserved here but which have not arrived.
    migrating_in: BTreeMap<VmId, Vm>,
    history: StateHistory,
    power: PowerAccountant,
    migration_overhead: f64,
}

impl Host {
    /// An active, empty host.
    pub fn new(id: HostId, spec: HostSpec, power_model: Box<dyn PowerModel>) -> Self {
        Self {
            id,
            ledger: ResourceLedger::new(spec.clone()),
            spec,
            active: true,
            failed: false,
            vms: BTreeMap::new(),
            migrating_in: BTreeMap::new(),
            history: StateHistory::new(DEFAULT_HISTORY_LIMIT),
            power: PowerAccountant::new(power_model),
            migration_overhead: DEFAULT_MIGRATION_OVERHEAD,
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history = StateHistory::new(limit);
        self
    }

    pub fn with_migration_overhead(mut self, overhead: f64) -> Self {
        self.migration_overhead = overhead.clamp(0.0, 1.0);
        self
    }

    pub fn id(&self) -> HostId {
        self.id
    }

    pub fn spec(&self) -> &HostSpec {
        &self.spec
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        if !active && !self.vms.is_empty() {
            warn!(host = self.id, vms = self.vms.len(), "deactivating host with resident vms");
        }
        self.active = active;
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn set_failed(&mut self, failed: bool) {
        self.failed = failed;
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    pub fn vm(&self, vm_id: VmId) -> Option<&Vm> {
        self.vms.get(&vm_id)
    }

    pub fn vms(&self) -> impl Iterator<Item = &Vm> {
        self.vms.values()
    }

    pub fn vm_count(&self) -> usize {
        self.vms.len()
    }

    pub fn migrating_in(&self) -> impl Iterator<Item = &Vm> {
        self.migrating_in.values()
    }

    /// MIPS granted to resident VMs. Reservations for VMs still migrating
    /// in do not count until they arrive.
    pub fn allocated_mips(&self) -> f64 {
        self.ledger.committed_mips()
    }

    /// Allocated MIPS over total MIPS. Values just above 1 are snapped to 1;
    /// a host without compute capacity reports 0.
    pub fn utilization(&self) -> f64 {
        let total = self.spec.total_mips();
        if total <= 0.0 {
            return 0.0;
        }
        let utilization = self.allocated_mips() / total;
        if utilization > 1.0 && utilization < UTILIZATION_SNAP {
            1.0
        } else {
            utilization
        }
    }

    /// Active, with nothing allocated and nothing resident or arriving.
    pub fn is_idle(&self) -> bool {
        self.active
            && self.vms.is_empty()
            && self.migrating_in.is_empty()
            && self.utilization() == 0.0
    }

    /// Free processing elements: those with no VM bound to them.
    pub fn free_pes(&self) -> u32 {
        self.ledger.free_pes()
    }

    /// Whether `vm` could be placed here now. Failed and inactive hosts are
    /// never suitable.
    pub fn is_suitable_for_vm(&self, vm: &Vm) -> bool {
        self.active && !self.failed && self.ledger.is_suitable(vm)
    }

    fn check_placeable(&self) -> HostResult<()> {
        if self.failed {
            return Err(HostError::HostFailed(self.id));
        }
        if !self.active {
            return Err(HostError::HostInactive(self.id));
        }
        Ok(())
    }

    /// Grant `vm` its resources and make it resident. On refusal the VM is
    /// handed back unchanged and the ledger is untouched.
    pub fn create_vm(&mut self, mut vm: Vm) -> Result<(), RejectedVm> {
        if let Err(error) = self.check_placeable() {
            return Err(RejectedVm { vm, error });
        }
        if let Err(error) = self.ledger.try_allocate(&vm, false) {
            return Err(RejectedVm {
                vm,
                error: error.into(),
            });
        }
        debug!(host = self.id, vm = vm.id(), "vm created");
        vm.set_host(Some(self.id));
        self.vms.insert(vm.id(), vm);
        Ok(())
    }

    /// Release everything `vm_id` holds and hand it back. Works for
    /// resident and migrating-in VMs alike.
    pub fn remove_vm(&mut self, vm_id: VmId) -> Option<Vm> {
        let mut vm = self
            .vms
            .remove(&vm_id)
            .or_else(|| self.migrating_in.remove(&vm_id))?;
        self.ledger.release(vm_id);
        vm.set_host(None);
        vm.set_in_migration(false);
        debug!(host = self.id, vm = vm_id, "vm removed");
        Some(vm)
    }

    /// Change a resident VM's demand to `utilization` of its capacity and
    /// re-grant compute. Returns the MIPS granted, which falls short of the
    /// demand when the VM's PEs are contended.
    pub fn update_vm_demand(&mut self, vm_id: VmId, utilization: f64) -> HostResult<f64> {
        if let Some(vm) = self.migrating_in.get_mut(&vm_id) {
            vm.set_utilization(utilization);
            return Ok(self.ledger.allocated_mips(vm_id));
        }
        let vm = self.vms.get_mut(&vm_id).ok_or(HostError::VmNotFound {
            host: self.id,
            vm: vm_id,
        })?;
        vm.set_utilization(utilization);
        let requested = vm.requested_mips();
        let granted = self.ledger.adjust_compute(vm_id, requested).unwrap_or(0.0);
        if granted + 1e-6 < requested {
            debug!(host = self.id, vm = vm_id, requested, granted, "vm demand contended");
        }
        Ok(granted)
    }

    /// Reserve resources for `vm`, which keeps running on its source host
    /// until [`finish_migration_in`](Host::finish_migration_in).
    pub fn begin_migration_in(&mut self, mut vm: Vm) -> Result<(), RejectedVm> {
        if let Err(error) = self.check_placeable() {
            return Err(RejectedVm { vm, error });
        }
        if let Err(error) = self.ledger.try_allocate(&vm, true) {
            return Err(RejectedVm {
                vm,
                error: error.into(),
            });
        }
        debug!(host = self.id, vm = vm.id(), "vm migrating in");
        vm.set_in_migration(true);
        self.migrating_in.insert(vm.id(), vm);
        Ok(())
    }

    /// Flag a resident VM as leaving. Its allocation counts with the
    /// migration overhead applied until it is removed.
    pub fn mark_migrating_out(&mut self, vm_id: VmId) -> HostResult<()> {
        let vm = self.vms.get_mut(&vm_id).ok_or(HostError::VmNotFound {
            host: self.id,
            vm: vm_id,
        })?;
        vm.set_in_migration(true);
        debug!(host = self.id, vm = vm_id, "vm migrating out");
        Ok(())
    }

    /// Commit the reservation of an arrived VM and make it resident. The
    /// quantities were checked when the migration started.
    pub fn finish_migration_in(&mut self, vm_id: VmId) -> HostResult<()> {
        if !self.migrating_in.contains_key(&vm_id) {
            return Err(LedgerError::NotMigratingIn(vm_id).into());
        }
        self.ledger.reallocate_migrating_in(vm_id)?;
        let Some(mut vm) = self.migrating_in.remove(&vm_id) else {
            return Err(LedgerError::NotMigratingIn(vm_id).into());
        };
        vm.set_in_migration(false);
        vm.set_host(Some(self.id));
        self.ledger.adjust_compute(vm_id, vm.requested_mips());
        self.vms.insert(vm_id, vm);
        debug!(host = self.id, vm = vm_id, "vm migration finished");
        Ok(())
    }

    /// Drop a reservation for a migration that will not complete.
    pub fn abort_migration_in(&mut self, vm_id: VmId) -> Option<Vm> {
        if !self.migrating_in.contains_key(&vm_id) {
            return None;
        }
        self.remove_vm(vm_id)
    }

    pub fn state_history(&self) -> &StateHistory {
        &self.history
    }

    pub fn enable_state_history(&mut self) {
        self.history.enable();
    }

    pub fn disable_state_history(&mut self) {
        self.history.disable();
    }

    /// Append a history sample for `now`.
    ///
    /// VMs migrating out count with the migration overhead applied to
    /// their allocation. VMs migrating in count their reserved allocation
    /// but never as under-provisioned.
    pub fn record_state(&mut self, now: f64) -> bool {
        let mut allocated = 0.0;
        let mut requested = 0.0;

        for vm in self.vms.values() {
            let mut granted = self.ledger.allocated_mips(vm.id());
            if vm.is_in_migration() {
                granted *= self.migration_overhead;
            }
            allocated += granted;
            requested += vm.requested_mips();
        }

        for vm in self.migrating_in.values() {
            let granted = self.ledger.allocated_mips(vm.id());
            debug!(
                host = self.id,
                vm = vm.id(),
                granted,
                time = now,
                "vm is migrating in, allocation not yet productive"
            );
            allocated += granted;
            requested += vm.requested_mips().min(granted);
        }

        self.history.record(StateHistoryEntry {
            time: now,
            allocated_mips: allocated,
            requested_mips: requested,
            active: self.active,
        })
    }

    /// Instantaneous power at `utilization`.
    pub fn power(&self, utilization: f64) -> PowerResult<f64> {
        self.power.power(utilization)
    }

    /// Power drawn while active at zero utilization.
    pub fn idle_power(&self) -> PowerResult<f64> {
        self.power.power(0.0)
    }

    /// Trapezoid energy between two utilization samples; zero while the
    /// host is inactive.
    pub fn energy(&self, from_utilization: f64, to_utilization: f64, duration: f64) -> PowerResult<f64> {
        self.power
            .energy(self.active, from_utilization, to_utilization, duration)
    }

    /// Per-tick observation: integrate energy up to `now`, then record a
    /// history sample. Returns the energy increment in joules.
    pub fn observe(&mut self, now: f64) -> HostResult<f64> {
        let increment = self.power.accumulate(self.active, self.utilization(), now)?;
        self.record_state(now);
        Ok(increment)
    }

    pub fn total_energy(&self) -> f64 {
        self.power.total_energy()
    }

    pub fn snapshot(&self) -> HostSnapshot {
        HostSnapshot {
            host_id: self.id,
            active: self.active,
            failed: self.failed,
            utilization: self.utilization().clamp(0.0, 1.0),
            vm_count: self.vms.len(),
            energy_joules: self.total_energy(),
            sla_violation_ratio: self.history.sla_violation_ratio(),
        }
    }
}

/// Expand the configured host templates into hosts with ids `0..n`.
pub fn build_hosts(config: &CapgridConfig) -> Vec<Host> {
    let mut hosts = Vec::with_capacity(config.host_count() as usize);
    for template in &config.hosts {
        for _ in 0..template.count {
            let id = hosts.len() as HostId;
            hosts.push(
                Host::new(id, template.spec(), power_model_from_config(&template.power_model))
                    .with_history_limit(config.controller.history_limit)
                    .with_migration_overhead(config.controller.migration_overhead),
            );
        }
    }
    hosts
}
