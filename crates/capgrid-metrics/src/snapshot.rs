//! Read-only per-host view exposed to external reporting.

use serde::{Deserialize, Serialize};

use capgrid_core::HostId;

/// Point-in-time summary of a host, produced by the host itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSnapshot {
    pub host_id: HostId,
    pub active: bool,
    pub failed: bool,
    /// CPU utilization in `[0, 1]`.
    pub utilization: f64,
    pub vm_count: usize,
    /// Energy consumed since the host was created, in joules.
    pub energy_joules: f64,
    pub sla_violation_ratio: f64,
}
