//! Control loop: owns the host arena and drives the policy.
//!
//! The simulation engine talks to the loop over an mpsc channel. Commands
//! are handled one at a time, so two cycles never overlap and no cycle
//! observes another's partial state. With an interval configured the loop
//! also ticks on its own, advancing its clock by one interval per tick.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use capgrid_core::{CapgridConfig, HostId, VmId};
use capgrid_host::{Host, Vm, build_hosts};
use capgrid_metrics::{HostSnapshot, render_prometheus};
use capgrid_placement::{
    AllocationPolicy, Migration, Optimization, PolicyCycle, begin_migration, complete_migration,
    host_mut,
};

use crate::policy::build_policy;

/// Requests accepted by a running [`ControlLoop`].
#[derive(Debug)]
pub enum ControlCommand {
    /// Queue a VM for placement at the next tick.
    Submit { vm: Vm },
    /// Run one cycle at simulated time `now`.
    Tick {
        now: f64,
        reply: oneshot::Sender<TickReport>,
    },
    /// Change a VM's workload demand to `utilization` of its capacity.
    SetDemand { vm: VmId, utilization: f64 },
    /// Tear a VM down and release its resources.
    Destroy { vm: VmId },
    /// Flag or clear a hardware fault.
    SetFailed { host: HostId, failed: bool },
    Snapshot {
        reply: oneshot::Sender<Vec<HostSnapshot>>,
    },
    /// Per-host state in Prometheus text format.
    Metrics { reply: oneshot::Sender<String> },
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    pub now: f64,
    /// VMs placed during this tick.
    pub placements: BTreeMap<VmId, HostId>,
    /// VMs still waiting; they stay queued for the next tick.
    pub unplaced: Vec<VmId>,
    pub optimization: Optimization,
    pub migrations_started: Vec<Migration>,
    pub migrations_finished: Vec<Migration>,
}

pub struct ControlLoop {
    hosts: Vec<Host>,
    policy: Box<dyn AllocationPolicy>,
    pending: Vec<Vm>,
    in_flight: Vec<Migration>,
    /// Simulated time of the last tick.
    clock: f64,
    interval: Option<Duration>,
}

impl ControlLoop {
    pub fn new(hosts: Vec<Host>, policy: Box<dyn AllocationPolicy>) -> Self {
        Self {
            hosts,
            policy,
            pending: Vec::new(),
            in_flight: Vec::new(),
            clock: 0.0,
            interval: None,
        }
    }

    /// Hosts and policy from `config`; ticks on its own every
    /// `controller.schedule_interval`.
    pub fn from_config(config: &CapgridConfig) -> Self {
        Self::new(build_hosts(config), build_policy(config)).with_interval(Duration::from_secs(
            config.controller.schedule_interval_secs(),
        ))
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let config = CapgridConfig::from_file(path)?;
        Ok(Self::from_config(&config))
    }

    /// Tick every `interval`. A zero interval disables scheduled ticks.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        if interval.is_zero() {
            warn!("zero schedule interval, scheduled ticks disabled");
            self.interval = None;
        } else {
            self.interval = Some(interval);
        }
        self
    }

    /// Tick only on explicit [`ControlCommand::Tick`].
    pub fn without_interval(mut self) -> Self {
        self.interval = None;
        self
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    pub fn pending(&self) -> &[Vm] {
        &self.pending
    }

    pub fn submit(&mut self, vm: Vm) {
        debug!(vm = vm.id(), "vm submitted");
        self.pending.push(vm);
    }

    /// One cycle at `now`:
    /// 1. every host observes (energy, history sample)
    /// 2. migrations begun last tick complete
    /// 3. the policy optimizes; proposed migrations begin
    /// 4. queued VMs are placed
    pub fn tick(&mut self, now: f64) -> TickReport {
        let mut report = TickReport {
            now,
            ..TickReport::default()
        };

        for host in &mut self.hosts {
            if let Err(e) = host.observe(now) {
                error!(host = host.id(), error = %e, "host observation failed");
            }
        }

        for migration in std::mem::take(&mut self.in_flight) {
            match complete_migration(&mut self.hosts, &migration) {
                Ok(()) => report.migrations_finished.push(migration),
                Err(e) => warn!(vm = migration.vm, error = %e, "migration could not complete"),
            }
        }

        let pending = std::mem::take(&mut self.pending);
        let cycle = PolicyCycle {
            now,
            pending_requests: pending.len(),
        };
        report.optimization = self.policy.optimize(&mut self.hosts, &cycle);

        for migration in &report.optimization.migrations {
            match begin_migration(&mut self.hosts, migration) {
                Ok(()) => {
                    self.in_flight.push(*migration);
                    report.migrations_started.push(*migration);
                }
                Err(e) => warn!(vm = migration.vm, error = %e, "migration could not start"),
            }
        }

        for vm in pending {
            let vm_id = vm.id();
            match self.policy.allocate_host_for_vm(&mut self.hosts, vm) {
                Ok(host_id) => {
                    report.placements.insert(vm_id, host_id);
                }
                Err(unplaced) => {
                    warn!(vm = vm_id, error = %unplaced.error, "placement failed, vm stays pending");
                    report.unplaced.push(vm_id);
                    self.pending.push(unplaced.vm);
                }
            }
        }

        self.clock = now;
        report
    }

    pub fn set_demand(&mut self, vm_id: VmId, utilization: f64) -> bool {
        let mut found = false;
        for host in &mut self.hosts {
            if host.vm(vm_id).is_some() || host.migrating_in().any(|vm| vm.id() == vm_id) {
                found |= host.update_vm_demand(vm_id, utilization).is_ok();
            }
        }
        if let Some(vm) = self.pending.iter_mut().find(|vm| vm.id() == vm_id) {
            vm.set_utilization(utilization);
            found = true;
        }
        if !found {
            warn!(vm = vm_id, "demand update for unknown vm");
        }
        found
    }

    /// Remove `vm_id` everywhere: resident copy, in-flight reservation and
    /// queue.
    pub fn destroy(&mut self, vm_id: VmId) -> bool {
        self.in_flight.retain(|m| m.vm != vm_id);
        self.pending.retain(|vm| vm.id() != vm_id);
        let mut found = false;
        while self.policy.deallocate_host_for_vm(&mut self.hosts, vm_id).is_some() {
            found = true;
        }
        if found {
            debug!(vm = vm_id, "vm destroyed");
        }
        found
    }

    pub fn set_failed(&mut self, host_id: HostId, failed: bool) -> bool {
        match host_mut(&mut self.hosts, host_id) {
            Ok(host) => {
                host.set_failed(failed);
                info!(host = host_id, failed, "host fault flag changed");
                true
            }
            Err(e) => {
                warn!(error = %e, "fault flag for unknown host");
                false
            }
        }
    }

    pub fn snapshots(&self) -> Vec<HostSnapshot> {
        self.hosts.iter().map(Host::snapshot).collect()
    }

    fn handle(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::Submit { vm } => self.submit(vm),
            ControlCommand::Tick { now, reply } => {
                let report = self.tick(now);
                if reply.send(report).is_err() {
                    debug!(time = now, "tick reply dropped");
                }
            }
            ControlCommand::SetDemand { vm, utilization } => {
                self.set_demand(vm, utilization);
            }
            ControlCommand::Destroy { vm } => {
                self.destroy(vm);
            }
            ControlCommand::SetFailed { host, failed } => {
                self.set_failed(host, failed);
            }
            ControlCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshots());
            }
            ControlCommand::Metrics { reply } => {
                let _ = reply.send(render_prometheus(&self.snapshots()));
            }
        }
    }

    /// Run until shutdown fires or every command sender is gone.
    pub async fn run(
        &mut self,
        mut commands: mpsc::Receiver<ControlCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            policy = self.policy.name(),
            hosts = self.hosts.len(),
            interval_secs = self.interval.map(|d| d.as_secs()),
            "control loop started"
        );

        // One deadline sequence for the whole run; commands handled between
        // ticks must not move the next deadline.
        let mut ticker = self.interval.map(|period| {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => {
                        info!("command channel closed");
                        break;
                    }
                },
                _ = next_tick(&mut ticker) => {
                    let step = self.interval.map(|d| d.as_secs_f64()).unwrap_or(0.0);
                    let report = self.tick(self.clock + step);
                    debug!(
                        time = report.now,
                        placed = report.placements.len(),
                        unplaced = report.unplaced.len(),
                        "scheduled tick"
                    );
                }
                _ = shutdown.changed() => {
                    info!("control loop shutting down");
                    break;
                }
            }
        }
    }

    /// Move the loop onto a task. The handle yields the loop back on exit.
    pub fn spawn(
        mut self,
        buffer: usize,
        shutdown: watch::Receiver<bool>,
    ) -> (mpsc::Sender<ControlCommand>, JoinHandle<ControlLoop>) {
        let (tx, rx) = mpsc::channel(buffer);
        let handle = tokio::spawn(async move {
            self.run(rx, shutdown).await;
            self
        });
        (tx, handle)
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
