//! The VM, the unit of placement.

use capgrid_core::{HostId, VmId, VmSpec};

/// A VM and its current workload demand.
///
/// The VM's requested resources are fixed by its spec; only the compute
/// demand moves with the workload. Allocated amounts live in the hosting
/// host's ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct Vm {
    spec: VmSpec,
    /// Current total MIPS demand, at most `spec.total_mips()`.
    requested_mips: f64,
    /// Hosting host, for lookup only. The host owns the VM.
    host: Option<HostId>,
    in_migration: bool,
}

impl Vm {
    /// A VM demanding its full compute capacity.
    pub fn new(spec: VmSpec) -> Self {
        let requested_mips = spec.total_mips();
        Self {
            spec,
            requested_mips,
            host: None,
            in_migration: false,
        }
    }

    pub fn id(&self) -> VmId {
        self.spec.id
    }

    pub fn spec(&self) -> &VmSpec {
        &self.spec
    }

    pub fn requested_mips(&self) -> f64 {
        self.requested_mips
    }

    /// Demand per virtual processing element.
    pub fn requested_mips_per_pe(&self) -> f64 {
        if self.spec.pes == 0 {
            0.0
        } else {
            self.requested_mips / f64::from(self.spec.pes)
        }
    }

    /// Set demand as a fraction of full capacity; clamped to `[0, 1]`.
    pub fn set_utilization(&mut self, utilization: f64) {
        let utilization = if utilization.is_nan() {
            0.0
        } else {
            utilization.clamp(0.0, 1.0)
        };
        self.requested_mips = self.spec.total_mips() * utilization;
    }

    pub fn host(&self) -> Option<HostId> {
        self.host
    }

    pub(crate) fn set_host(&mut self, host: Option<HostId>) {
        self.host = host;
    }

    pub fn is_in_migration(&self) -> bool {
        self.in_migration
    }

    pub(crate) fn set_in_migration(&mut self, in_migration: bool) {
        self.in_migration = in_migration;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vm() -> Vm {
        Vm::new(VmSpec {
            id: 7,
            pes: 2,
            mips_per_pe: 1000.0,
            ram: 512,
            bw: 1000,
            storage: 10_000,
        })
    }

    #[test]
    fn new_vm_requests_full_capacity() {
        let vm = test_vm();
        assert_eq!(vm.requested_mips(), 2000.0);
        assert_eq!(vm.requested_mips_per_pe(), 1000.0);
        assert_eq!(vm.host(), None);
        assert!(!vm.is_in_migration());
    }

    #[test]
    fn utilization_is_clamped() {
        let mut vm = test_vm();
        vm.set_utilization(0.25);
        assert_eq!(vm.requested_mips(), 500.0);
        vm.set_utilization(3.0);
        assert_eq!(vm.requested_mips(), 2000.0);
        vm.set_utilization(f64::NAN);
        assert_eq!(vm.requested_mips(), 0.0);
    }
}
