//! Host state history, the timeline the SLA metric is computed from.
//!
//! Each host appends one [`StateHistoryEntry`] per observation. Entries
//! are non-decreasing in time; a second sample at the same simulated time
//! replaces the first. The timeline is bounded and drops its oldest
//! entries once full.

use std::collections::VecDeque;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Allocations within this many MIPS of the request are not a violation.
const MIPS_TOLERANCE: f64 = 1e-6;

/// Immutable snapshot of a host at one point in simulated time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateHistoryEntry {
    pub time: f64,
    /// MIPS actually granted to resident VMs.
    pub allocated_mips: f64,
    /// MIPS resident VMs asked for.
    pub requested_mips: f64,
    pub active: bool,
}

impl StateHistoryEntry {
    pub fn is_under_provisioned(&self) -> bool {
        self.allocated_mips + MIPS_TOLERANCE < self.requested_mips
    }
}

/// Active and violation time accumulated over one or more timelines.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SlaTotals {
    pub active_time: f64,
    pub violation_time: f64,
}

impl SlaTotals {
    /// `violation_time / active_time`, or 0 when the host was never active.
    pub fn ratio(&self) -> f64 {
        if self.active_time > 0.0 {
            self.violation_time / self.active_time
        } else {
            0.0
        }
    }
}

impl Add for SlaTotals {
    type Output = SlaTotals;

    fn add(self, rhs: SlaTotals) -> SlaTotals {
        SlaTotals {
            active_time: self.active_time + rhs.active_time,
            violation_time: self.violation_time + rhs.violation_time,
        }
    }
}

impl AddAssign for SlaTotals {
    fn add_assign(&mut self, rhs: SlaTotals) {
        *self = *self + rhs;
    }
}

/// Append-only, bounded timeline of host state samples.
#[derive(Debug, Clone)]
pub struct StateHistory {
    entries: VecDeque<StateHistoryEntry>,
    limit: usize,
    enabled: bool,
}

impl StateHistory {
    /// Create an enabled history holding at most `limit` entries.
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit: limit.max(1),
            enabled: true,
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Append a sample. Returns false when the sample was dropped because
    /// history is disabled or the sample is older than the last one.
    pub fn record(&mut self, entry: StateHistoryEntry) -> bool {
        if !self.enabled {
            return false;
        }

        if let Some(last) = self.entries.back_mut() {
            if entry.time < last.time {
                warn!(
                    time = entry.time,
                    last = last.time,
                    "dropping out-of-order state history sample"
                );
                return false;
            }
            if entry.time == last.time {
                *last = entry;
                return true;
            }
        }

        if self.entries.len() == self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&StateHistoryEntry> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StateHistoryEntry> {
        self.entries.iter()
    }

    /// Walk consecutive samples, charging each interval to the state the
    /// host was in at its start.
    pub fn sla_totals(&self) -> SlaTotals {
        let mut totals = SlaTotals::default();
        let mut previous: Option<&StateHistoryEntry> = None;

        for entry in &self.entries {
            if let Some(prev) = previous
                && prev.active
            {
                let elapsed = entry.time - prev.time;
                totals.active_time += elapsed;
                if prev.is_under_provisioned() {
                    totals.violation_time += elapsed;
                }
            }
            previous = Some(entry);
        }

        totals
    }

    /// Fraction of active time spent under-provisioned, in `[0, 1]`.
    pub fn sla_violation_ratio(&self) -> f64 {
        self.sla_totals().ratio()
    }

    /// `(time, allocated / capacity)` for every sample.
    pub fn utilization_series(&self, total_mips: f64) -> Vec<(f64, f64)> {
        self.entries
            .iter()
            .map(|e| {
                let utilization = if total_mips > 0.0 {
                    (e.allocated_mips / total_mips).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                (e.time, utilization)
            })
            .collect()
    }

    /// Serialize the timeline for an external reporting collaborator.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.entries)
    }
}
