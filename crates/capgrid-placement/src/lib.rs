//! Where VMs go.
//!
//! This crate decides which host receives a VM and executes migrations
//! between hosts. It does NOT decide how many hosts are powered on (that's
//! `capgrid-autoscale`). Decisions are applied directly to the host arena
//! through each host's resource ledger.
//!
//! # Components
//!
//! - **`scorer`**: Host ranking (most free PEs first, lowest id on ties)
//! - **`placer`**: Placement of pending VMs, migration begin/complete
//! - **`policy`**: The `AllocationPolicy` capability shared by all policies
//! - **`simple`**: Non-predictive policies (simple, static threshold)

pub mod error;
pub mod placer;
pub mod policy;
pub mod scorer;
pub mod simple;

pub use error::{PlacementError, PlacementResult, Unplaced};
pub use placer::{
    PlacementPlan, begin_migration, complete_migration, find_host_for_vm, host_mut,
    place_pending, place_vm,
};
pub use policy::{AllocationPolicy, Migration, Optimization, PolicyCycle};
pub use scorer::{HostScore, rank_hosts, score_host};
pub use simple::{SimplePolicy, StaticThresholdPolicy};
