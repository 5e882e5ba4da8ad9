//! Domain types shared by the ledger, the metrics, and the controller.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a simulated physical host. Hosts are ordered by id.
pub type HostId = u32;

/// Identifier of a VM (placement unit).
pub type VmId = u32;

/// A resource dimension accounted by the host ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Storage,
    Memory,
    Bandwidth,
    Compute,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resource::Storage => "storage",
            Resource::Memory => "memory",
            Resource::Bandwidth => "bandwidth",
            Resource::Compute => "compute",
        };
        f.write_str(name)
    }
}

/// Capacity tuple offered by a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSpec {
    /// Number of processing elements (compute units).
    pub pes: u32,
    /// Speed of each processing element in MIPS.
    pub mips_per_pe: f64,
    /// Memory in MB.
    pub ram: u64,
    /// Bandwidth in Mbps.
    pub bw: u64,
    /// Storage in MB.
    pub storage: u64,
}

impl HostSpec {
    /// Total compute capacity across all processing elements.
    pub fn total_mips(&self) -> f64 {
        f64::from(self.pes) * self.mips_per_pe
    }
}

/// Resources requested by a VM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmSpec {
    pub id: VmId,
    /// Number of virtual processing elements.
    pub pes: u32,
    /// Required speed of each virtual processing element in MIPS.
    pub mips_per_pe: f64,
    pub ram: u64,
    pub bw: u64,
    pub storage: u64,
}

impl VmSpec {
    /// Compute capacity of the VM when fully utilized.
    pub fn total_mips(&self) -> f64 {
        f64::from(self.pes) * self.mips_per_pe
    }
}
