//! Per-host resource ledger.
//!
//! Grants storage, memory, bandwidth and compute to VMs all-or-nothing.
//! Compute is accounted per processing element (PE): a VM with `n`
//! virtual PEs is bound to `n` distinct host PEs, each granted the VM's
//! per-PE demand. A PE with no VM bound to it is free.
//!
//! Invariant: for every dimension, the sum of grants never exceeds the
//! host's capacity, including resources reserved for VMs migrating in.

use std::collections::BTreeMap;

use tracing::debug;

use capgrid_core::{HostSpec, Resource, VmId};

use crate::error::{LedgerError, LedgerResult};
use crate::vm::Vm;

/// Resources granted to one VM.
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    /// `(host PE index, MIPS granted on it)` per virtual PE.
    shares: Vec<(usize, f64)>,
    pub ram: u64,
    pub bw: u64,
    pub storage: u64,
}

impl Allocation {
    pub fn total_mips(&self) -> f64 {
        self.shares.iter().map(|(_, mips)| mips).sum()
    }

    pub fn pes(&self) -> impl Iterator<Item = usize> + '_ {
        self.shares.iter().map(|(pe, _)| *pe)
    }
}

/// Transactional accounting of one host's capacity.
#[derive(Debug, Clone)]
pub struct ResourceLedger {
    spec: HostSpec,
    /// MIPS granted on each PE.
    pe_used: Vec<f64>,
    /// Number of VMs bound to each PE.
    pe_bound: Vec<u32>,
    ram_used: u64,
    bw_used: u64,
    storage_used: u64,
    allocations: BTreeMap<VmId, Allocation>,
    /// Reserved at migration start, committed when the VM arrives.
    reservations: BTreeMap<VmId, Allocation>,
}

impl ResourceLedger {
    pub fn new(spec: HostSpec) -> Self {
        let pes = spec.pes as usize;
        Self {
            spec,
            pe_used: vec![0.0; pes],
            pe_bound: vec![0; pes],
            ram_used: 0,
            bw_used: 0,
            storage_used: 0,
            allocations: BTreeMap::new(),
            reservations: BTreeMap::new(),
        }
    }

    pub fn spec(&self) -> &HostSpec {
        &self.spec
    }

    pub fn available_ram(&self) -> u64 {
        self.spec.ram.saturating_sub(self.ram_used)
    }

    pub fn available_bw(&self) -> u64 {
        self.spec.bw.saturating_sub(self.bw_used)
    }

    pub fn available_storage(&self) -> u64 {
        self.spec.storage.saturating_sub(self.storage_used)
    }

    pub fn ram_used(&self) -> u64 {
        self.ram_used
    }

    pub fn bw_used(&self) -> u64 {
        self.bw_used
    }

    pub fn storage_used(&self) -> u64 {
        self.storage_used
    }

    /// MIPS granted across all PEs, reservations included.
    pub fn used_mips(&self) -> f64 {
        self.pe_used.iter().sum()
    }

    /// MIPS granted to resident VMs only.
    pub fn committed_mips(&self) -> f64 {
        self.allocations.values().map(Allocation::total_mips).sum()
    }

    pub fn available_mips(&self) -> f64 {
        (self.spec.total_mips() - self.used_mips()).max(0.0)
    }

    fn pe_available(&self, pe: usize) -> f64 {
        (self.spec.mips_per_pe - self.pe_used[pe]).max(0.0)
    }

    /// PEs with no VM bound to them.
    pub fn free_pes(&self) -> u32 {
        self.pe_bound.iter().filter(|bound| **bound == 0).count() as u32
    }

    /// MIPS currently granted to `vm_id`, zero when it holds nothing here.
    pub fn allocated_mips(&self, vm_id: VmId) -> f64 {
        self.allocation(vm_id).map(Allocation::total_mips).unwrap_or(0.0)
    }

    pub fn allocation(&self, vm_id: VmId) -> Option<&Allocation> {
        self.allocations
            .get(&vm_id)
            .or_else(|| self.reservations.get(&vm_id))
    }

    pub fn is_allocated(&self, vm_id: VmId) -> bool {
        self.allocations.contains_key(&vm_id)
    }

    pub fn is_reserved(&self, vm_id: VmId) -> bool {
        self.reservations.contains_key(&vm_id)
    }

    /// Pick `vm.pes` distinct PEs fast enough for the VM and with room for
    /// its per-PE demand, emptiest first.
    fn select_pes(&self, vm: &Vm) -> Result<Vec<usize>, usize> {
        let needed = vm.spec().pes as usize;
        if self.spec.mips_per_pe < vm.spec().mips_per_pe {
            return Err(0);
        }
        let per_pe = vm.requested_mips_per_pe();
        let mut candidates: Vec<usize> = (0..self.pe_used.len())
            .filter(|pe| self.pe_available(*pe) >= per_pe)
            .collect();
        if candidates.len() < needed {
            return Err(candidates.len());
        }
        candidates.sort_by(|a, b| {
            self.pe_available(*b)
                .partial_cmp(&self.pe_available(*a))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(b))
        });
        candidates.truncate(needed);
        Ok(candidates)
    }

    /// Whether compute, memory and bandwidth are available for `vm`.
    /// Storage is checked only when the allocation is attempted.
    pub fn is_suitable(&self, vm: &Vm) -> bool {
        self.available_ram() >= vm.spec().ram
            && self.available_bw() >= vm.spec().bw
            && self.select_pes(vm).is_ok()
    }

    /// Grant every resource `vm` needs, or nothing.
    ///
    /// Dimensions are checked in order storage, memory, bandwidth,
    /// compute; the first short one is reported. With `migrating` the
    /// grant is held as a reservation until [`reallocate_migrating_in`]
    /// commits it.
    ///
    /// [`reallocate_migrating_in`]: ResourceLedger::reallocate_migrating_in
    pub fn try_allocate(&mut self, vm: &Vm, migrating: bool) -> LedgerResult<()> {
        let vm_id = vm.id();
        if self.allocation(vm_id).is_some() {
            return Err(LedgerError::AlreadyAllocated(vm_id));
        }

        let spec = vm.spec();
        if self.available_storage() < spec.storage {
            return Err(LedgerError::ResourceUnavailable {
                dimension: Resource::Storage,
                required: spec.storage as f64,
                available: self.available_storage() as f64,
            });
        }
        if self.available_ram() < spec.ram {
            return Err(LedgerError::ResourceUnavailable {
                dimension: Resource::Memory,
                required: spec.ram as f64,
                available: self.available_ram() as f64,
            });
        }
        if self.available_bw() < spec.bw {
            return Err(LedgerError::ResourceUnavailable {
                dimension: Resource::Bandwidth,
                required: spec.bw as f64,
                available: self.available_bw() as f64,
            });
        }
        let pes = self
            .select_pes(vm)
            .map_err(|suitable| LedgerError::ResourceUnavailable {
                dimension: Resource::Compute,
                required: f64::from(spec.pes),
                available: suitable as f64,
            })?;

        let per_pe = vm.requested_mips_per_pe();
        let allocation = Allocation {
            shares: pes.into_iter().map(|pe| (pe, per_pe)).collect(),
            ram: spec.ram,
            bw: spec.bw,
            storage: spec.storage,
        };
        self.commit(&allocation);

        debug!(
            vm = vm_id,
            mips = allocation.total_mips(),
            ram = spec.ram,
            bw = spec.bw,
            storage = spec.storage,
            migrating,
            "granted resources"
        );

        if migrating {
            self.reservations.insert(vm_id, allocation);
        } else {
            self.allocations.insert(vm_id, allocation);
        }
        Ok(())
    }

    fn commit(&mut self, allocation: &Allocation) {
        for (pe, mips) in &allocation.shares {
            self.pe_used[*pe] += mips;
            self.pe_bound[*pe] += 1;
        }
        self.ram_used += allocation.ram;
        self.bw_used += allocation.bw;
        self.storage_used += allocation.storage;
    }

    fn uncommit(&mut self, allocation: &Allocation) {
        for (pe, mips) in &allocation.shares {
            self.pe_used[*pe] = (self.pe_used[*pe] - mips).max(0.0);
            self.pe_bound[*pe] = self.pe_bound[*pe].saturating_sub(1);
        }
        self.ram_used = self.ram_used.saturating_sub(allocation.ram);
        self.bw_used = self.bw_used.saturating_sub(allocation.bw);
        self.storage_used = self.storage_used.saturating_sub(allocation.storage);
    }

    /// Return everything `vm_id` holds. Releasing a VM that holds nothing
    /// is a no-op; returns whether anything was released.
    pub fn release(&mut self, vm_id: VmId) -> bool {
        let allocation = self
            .allocations
            .remove(&vm_id)
            .or_else(|| self.reservations.remove(&vm_id));
        match allocation {
            Some(allocation) => {
                self.uncommit(&allocation);
                debug!(vm = vm_id, "released resources");
                true
            }
            None => false,
        }
    }

    /// Commit the reservation made when `vm_id` started migrating in.
    /// The quantities were validated at reservation time and are not
    /// checked again.
    pub fn reallocate_migrating_in(&mut self, vm_id: VmId) -> LedgerResult<()> {
        let allocation = self
            .reservations
            .remove(&vm_id)
            .ok_or(LedgerError::NotMigratingIn(vm_id))?;
        self.allocations.insert(vm_id, allocation);
        Ok(())
    }

    /// Re-grant compute after the VM's demand changed to
    /// `requested_mips`. Each bound PE grows only into its own free MIPS,
    /// so under contention the grant falls short of the demand. Returns
    /// the new grant, or `None` when `vm_id` holds nothing here.
    pub fn adjust_compute(&mut self, vm_id: VmId, requested_mips: f64) -> Option<f64> {
        let allocation = self.allocations.get_mut(&vm_id)?;
        if allocation.shares.is_empty() {
            return Some(0.0);
        }
        let target = (requested_mips / allocation.shares.len() as f64).max(0.0);

        for (pe, share) in allocation.shares.iter_mut() {
            let room = (self.spec.mips_per_pe - self.pe_used[*pe] + *share).max(0.0);
            let granted = target.min(room);
            self.pe_used[*pe] = (self.pe_used[*pe] - *share + granted).max(0.0);
            *share = granted;
        }

        Some(allocation.total_mips())
    }

    /// VMs holding committed grants.
    pub fn allocated_vms(&self) -> impl Iterator<Item = VmId> + '_ {
        self.allocations.keys().copied()
    }

    /// Every dimension is within capacity.
    pub fn within_capacity(&self) -> bool {
        const EPSILON: f64 = 1e-6;
        self.ram_used <= self.spec.ram
            && self.bw_used <= self.spec.bw
            && self.storage_used <= self.spec.storage
            && self
                .pe_used
                .iter()
                .all(|used| *used <= self.spec.mips_per_pe + EPSILON)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capgrid_core::VmSpec;

    fn host_spec() -> HostSpec {
        HostSpec {
            pes: 4,
            mips_per_pe: 1000.0,
            ram: 2048,
            bw: 10_000,
            storage: 1_000_000,
        }
    }

    fn test_vm(id: VmId, pes: u32, ram: u64) -> Vm {
        Vm::new(VmSpec {
            id,
            pes,
            mips_per_pe: 1000.0,
            ram,
            bw: 1000,
            storage: 10_000,
        })
    }

    #[test]
    fn allocates_all_dimensions() {
        let mut ledger = ResourceLedger::new(host_spec());
        ledger.try_allocate(&test_vm(1, 2, 512), false).unwrap();

        assert_eq!(ledger.available_ram(), 1536);
        assert_eq!(ledger.available_bw(), 9000);
        assert_eq!(ledger.available_storage(), 990_000);
        assert_eq!(ledger.allocated_mips(1), 2000.0);
        assert_eq!(ledger.free_pes(), 2);
        assert!(ledger.within_capacity());

        let mut pes: Vec<usize> = ledger.allocation(1).unwrap().pes().collect();
        pes.sort_unstable();
        pes.dedup();
        assert_eq!(pes.len(), 2);
    }

    #[test]
    fn memory_refusal_commits_nothing() {
        let mut ledger = ResourceLedger::new(host_spec());
        ledger.try_allocate(&test_vm(1, 2, 512), false).unwrap();

        let err = ledger.try_allocate(&test_vm(2, 1, 4096), false).unwrap_err();
        assert_eq!(
            err,
            LedgerError::ResourceUnavailable {
                dimension: Resource::Memory,
                required: 4096.0,
                available: 1536.0,
            }
        );
        assert_eq!(ledger.available_ram(), 1536);
        assert_eq!(ledger.available_bw(), 9000);
        assert_eq!(ledger.free_pes(), 2);
        assert!(!ledger.is_allocated(2));
    }

    #[test]
    fn storage_is_checked_first() {
        let mut ledger = ResourceLedger::new(host_spec());
        let mut spec = test_vm(1, 8, 8192).spec().clone();
        spec.storage = 2_000_000;
        let err = ledger.try_allocate(&Vm::new(spec), false).unwrap_err();
        assert_eq!(err.dimension(), Some(Resource::Storage));
    }

    #[test]
    fn compute_refusal_reports_suitable_pes() {
        let mut ledger = ResourceLedger::new(host_spec());
        ledger.try_allocate(&test_vm(1, 3, 128), false).unwrap();

        let err = ledger.try_allocate(&test_vm(2, 2, 128), false).unwrap_err();
        assert_eq!(
            err,
            LedgerError::ResourceUnavailable {
                dimension: Resource::Compute,
                required: 2.0,
                available: 1.0,
            }
        );
        assert_eq!(ledger.available_ram(), 2048 - 128);
    }

    #[test]
    fn slower_host_pes_are_unsuitable() {
        let mut spec = host_spec();
        spec.mips_per_pe = 500.0;
        let ledger = ResourceLedger::new(spec);
        assert!(!ledger.is_suitable(&test_vm(1, 1, 128)));
    }

    #[test]
    fn release_is_idempotent() {
        let mut ledger = ResourceLedger::new(host_spec());
        ledger.try_allocate(&test_vm(1, 2, 512), false).unwrap();

        assert!(ledger.release(1));
        assert!(!ledger.release(1));
        assert!(!ledger.release(99));
        assert_eq!(ledger.available_ram(), 2048);
        assert_eq!(ledger.free_pes(), 4);
        assert_eq!(ledger.used_mips(), 0.0);
    }

    #[test]
    fn double_allocation_is_refused() {
        let mut ledger = ResourceLedger::new(host_spec());
        let vm = test_vm(1, 1, 128);
        ledger.try_allocate(&vm, false).unwrap();
        assert_eq!(
            ledger.try_allocate(&vm, false),
            Err(LedgerError::AlreadyAllocated(1))
        );
        assert_eq!(ledger.ram_used(), 128);
    }

    #[test]
    fn migration_reservation_counts_then_commits() {
        let mut ledger = ResourceLedger::new(host_spec());
        ledger.try_allocate(&test_vm(1, 2, 512), true).unwrap();

        assert!(ledger.is_reserved(1));
        assert!(!ledger.is_allocated(1));
        assert_eq!(ledger.available_ram(), 1536);
        assert_eq!(ledger.used_mips(), 2000.0);
        assert_eq!(ledger.committed_mips(), 0.0);
        assert_eq!(ledger.allocated_vms().count(), 0);

        ledger.reallocate_migrating_in(1).unwrap();
        assert!(ledger.is_allocated(1));
        assert_eq!(ledger.available_ram(), 1536);
        assert_eq!(ledger.committed_mips(), 2000.0);
        assert_eq!(ledger.allocated_vms().collect::<Vec<_>>(), vec![1]);
        assert_eq!(
            ledger.reallocate_migrating_in(1),
            Err(LedgerError::NotMigratingIn(1))
        );
    }

    #[test]
    fn adjust_compute_is_limited_by_contention() {
        let mut ledger = ResourceLedger::new(host_spec());
        let mut small = test_vm(1, 4, 128);
        small.set_utilization(0.5);
        ledger.try_allocate(&small, false).unwrap();
        let mut other = test_vm(2, 4, 128);
        other.set_utilization(0.25);
        ledger.try_allocate(&other, false).unwrap();

        // 4 PEs x 1000 with 500 + 250 used each: VM 1 can reach 750 per PE.
        assert_eq!(ledger.adjust_compute(1, 4000.0), Some(3000.0));
        assert!(ledger.within_capacity());
        assert_eq!(ledger.adjust_compute(1, 400.0), Some(400.0));
        assert_eq!(ledger.adjust_compute(99, 400.0), None);
    }

    #[test]
    fn capacity_invariant_holds_under_churn() {
        let mut ledger = ResourceLedger::new(host_spec());
        for id in 0..20 {
            let _ = ledger.try_allocate(&test_vm(id, 1 + id % 3, 256), false);
            assert!(ledger.within_capacity());
            if id % 4 == 0 {
                ledger.release(id / 2);
            }
            assert!(ledger.within_capacity());
        }
    }
}
