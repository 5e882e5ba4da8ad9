//! Placement error types.

use thiserror::Error;

use capgrid_core::{HostId, VmId};
use capgrid_host::{HostError, Vm};

pub type PlacementResult<T> = Result<T, PlacementError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlacementError {
    #[error("no suitable host for vm {0}")]
    NoSuitableHost(VmId),

    #[error("host {0} not found")]
    HostNotFound(HostId),

    #[error("vm {vm} not found on host {host}")]
    VmNotFound { host: HostId, vm: VmId },

    #[error("vm {0} is already migrating")]
    AlreadyMigrating(VmId),

    #[error(transparent)]
    Host(#[from] HostError),
}

/// A VM that could not be placed this cycle. The caller keeps it pending.
#[derive(Debug, Error)]
#[error("vm {} unplaced: {}", .vm.id(), .error)]
pub struct Unplaced {
    pub vm: Vm,
    #[source]
    pub error: PlacementError,
}
