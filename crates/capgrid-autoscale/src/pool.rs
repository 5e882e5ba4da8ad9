//! Host pool partition.
//!
//! Every host is in exactly one of three sets:
//!
//! ```text
//! dead     inactive
//! idle     active, nothing allocated, nothing resident
//! running  active, everything else
//! ```
//!
//! The partition is a derived index over the host arena. It is rebuilt
//! from scratch by [`HostPool::classify`] and only updated in place by
//! the activation primitives, which move ids between sets after the
//! scan that picked them.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::debug;

use capgrid_core::HostId;
use capgrid_host::Host;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostPool {
    running: BTreeSet<HostId>,
    idle: BTreeSet<HostId>,
    dead: BTreeSet<HostId>,
}

/// Result of a deactivation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Deactivation {
    pub deactivated: Vec<HostId>,
    /// Hosts requested but not available from the idle set.
    pub unmet: usize,
}

impl HostPool {
    pub fn classify(hosts: &[Host]) -> Self {
        let mut pool = HostPool::default();
        for host in hosts {
            let set = if !host.is_active() {
                &mut pool.dead
            } else if host.is_idle() {
                &mut pool.idle
            } else {
                &mut pool.running
            };
            set.insert(host.id());
        }
        pool
    }

    pub fn running(&self) -> &BTreeSet<HostId> {
        &self.running
    }

    pub fn idle(&self) -> &BTreeSet<HostId> {
        &self.idle
    }

    pub fn dead(&self) -> &BTreeSet<HostId> {
        &self.dead
    }

    pub fn active_count(&self) -> usize {
        self.running.len() + self.idle.len()
    }

    pub fn len(&self) -> usize {
        self.active_count() + self.dead.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Power on up to `n` dead hosts in ascending id order, skipping failed
    /// hosts. Returns the hosts actually activated.
    pub fn activate(&mut self, hosts: &mut [Host], n: usize) -> Vec<HostId> {
        let candidates: Vec<HostId> = self.dead.iter().copied().collect();
        let mut activated = Vec::new();

        for id in candidates {
            if activated.len() == n {
                break;
            }
            if let Some(host) = hosts.iter_mut().find(|h| h.id() == id)
                && !host.is_failed()
            {
                host.set_active(true);
                self.dead.remove(&id);
                if host.is_idle() {
                    self.idle.insert(id);
                } else {
                    self.running.insert(id);
                }
                activated.push(id);
            }
        }

        debug!(requested = n, activated = activated.len(), "activated hosts");
        activated
    }

    /// Power off up to `n` idle hosts in ascending id order. Running hosts
    /// are never touched; the shortfall is reported as `unmet`.
    pub fn deactivate(&mut self, hosts: &mut [Host], n: usize) -> Deactivation {
        let picked: Vec<HostId> = self.idle.iter().copied().take(n).collect();
        let mut deactivated = Vec::with_capacity(picked.len());

        for id in picked {
            if let Some(host) = hosts.iter_mut().find(|h| h.id() == id) {
                host.set_active(false);
                self.idle.remove(&id);
                self.dead.insert(id);
                deactivated.push(id);
            }
        }

        let unmet = n - deactivated.len();
        debug!(requested = n, deactivated = deactivated.len(), unmet, "deactivated hosts");
        Deactivation { deactivated, unmet }
    }
}
