//! The feedback signal of the capacity controller.
//!
//! Records what each host did over time and what it cost:
//!
//! ```text
//! StateHistory
//!   ├── record()               ← one sample per host per tick
//!   ├── sla_violation_ratio()  → violation time / active time
//!   └── utilization_series()   → (time, utilization) pairs
//!
//! PowerAccountant
//!   ├── power(u)               → watts from the host's power model
//!   ├── energy(from, to, dt)   → trapezoid between two samples, 0 when inactive
//!   └── accumulate()           → running energy total per host
//!
//! Prometheus exposition
//!   └── render_prometheus()    → text/plain of per-host snapshots
//! ```

pub mod error;
pub mod history;
pub mod power;
pub mod prometheus;
pub mod snapshot;

pub use error::{PowerError, PowerResult};
pub use history::{SlaTotals, StateHistory, StateHistoryEntry};
pub use power::{LinearPowerModel, PowerAccountant, PowerModel, SpecPowerModel, power_model_from_config};
pub use prometheus::render_prometheus;
pub use snapshot::HostSnapshot;
