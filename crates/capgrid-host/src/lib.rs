//! Simulated physical hosts and their resource ledgers.
//!
//! A [`Host`] owns everything scoped to one machine: the
//! [`ResourceLedger`] that grants compute, memory, bandwidth and storage
//! all-or-nothing, the VMs resident on it, its state history, and the
//! power accountant bound to it.
//!
//! # Architecture
//!
//! ```text
//! Host
//!   ├── ResourceLedger (per-PE MIPS, RAM, BW, storage; per-VM grants)
//!   ├── resident VMs    (owning collection; VMs point back by host id)
//!   ├── migrating-in VMs (resources reserved, committed on arrival)
//!   ├── StateHistory    (one sample per observation)
//!   └── PowerAccountant (cumulative energy)
//! ```
//!
//! Hosts are independent of each other: every mutation goes through
//! `&mut Host`, so ledger operations on one host are mutually exclusive
//! and hosts can be driven from different threads without cross-host
//! locking.

pub mod error;
pub mod host;
pub mod ledger;
pub mod vm;

pub use error::{HostError, HostResult, LedgerError, LedgerResult, RejectedVm};
pub use host::{DEFAULT_HISTORY_LIMIT, DEFAULT_MIGRATION_OVERHEAD, Host, build_hosts};
pub use ledger::{Allocation, ResourceLedger};
pub use vm::Vm;
