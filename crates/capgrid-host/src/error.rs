//! Ledger and host error types.

use thiserror::Error;

use capgrid_core::{HostId, Resource, VmId};
use capgrid_metrics::PowerError;

use crate::vm::Vm;

pub type LedgerResult<T> = Result<T, LedgerError>;

pub type HostResult<T> = Result<T, HostError>;

/// Refusals from a host's resource ledger. A refused call commits nothing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    #[error("insufficient {dimension}: required {required}, available {available}")]
    ResourceUnavailable {
        dimension: Resource,
        required: f64,
        available: f64,
    },

    #[error("vm {0} already holds resources on this host")]
    AlreadyAllocated(VmId),

    #[error("vm {0} is not migrating into this host")]
    NotMigratingIn(VmId),
}

impl LedgerError {
    /// The resource dimension that was short, if any.
    pub fn dimension(&self) -> Option<Resource> {
        match self {
            LedgerError::ResourceUnavailable { dimension, .. } => Some(*dimension),
            _ => None,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HostError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("vm {vm} not found on host {host}")]
    VmNotFound { host: HostId, vm: VmId },

    #[error("host {0} has failed")]
    HostFailed(HostId),

    #[error("host {0} is inactive")]
    HostInactive(HostId),

    #[error(transparent)]
    Power(#[from] PowerError),
}

/// A VM a host refused to take, handed back to the caller untouched.
#[derive(Debug, Error)]
#[error("vm {} rejected: {}", .vm.id(), .error)]
pub struct RejectedVm {
    pub vm: Vm,
    #[source]
    pub error: HostError,
}
