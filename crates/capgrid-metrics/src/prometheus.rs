//! Prometheus text exposition format.
//!
//! Renders per-host snapshots into the Prometheus text exposition format
//! for an external reporting collaborator to scrape or print.

use crate::snapshot::HostSnapshot;

/// Render a list of host snapshots into Prometheus text format.
///
/// Produces GAUGE and COUNTER metrics with `host` labels.
pub fn render_prometheus(snapshots: &[HostSnapshot]) -> String {
    let mut out = String::new();

    out.push_str("# HELP capgrid_host_active Whether the host is powered on (1) or off (0).\n");
    out.push_str("# TYPE capgrid_host_active gauge\n");
    for s in snapshots {
        out.push_str(&format!(
            "capgrid_host_active{{host=\"{}\"}} {}\n",
            s.host_id,
            u8::from(s.active)
        ));
    }

    out.push_str("# HELP capgrid_host_failed Whether the host has a hardware fault.\n");
    out.push_str("# TYPE capgrid_host_failed gauge\n");
    for s in snapshots {
        out.push_str(&format!(
            "capgrid_host_failed{{host=\"{}\"}} {}\n",
            s.host_id,
            u8::from(s.failed)
        ));
    }

    out.push_str("# HELP capgrid_host_cpu_utilization CPU utilization (0.0-1.0).\n");
    out.push_str("# TYPE capgrid_host_cpu_utilization gauge\n");
    for s in snapshots {
        out.push_str(&format!(
            "capgrid_host_cpu_utilization{{host=\"{}\"}} {:.4}\n",
            s.host_id, s.utilization
        ));
    }

    out.push_str("# HELP capgrid_host_vms Number of resident VMs.\n");
    out.push_str("# TYPE capgrid_host_vms gauge\n");
    for s in snapshots {
        out.push_str(&format!(
            "capgrid_host_vms{{host=\"{}\"}} {}\n",
            s.host_id, s.vm_count
        ));
    }

    out.push_str("# HELP capgrid_host_energy_joules_total Energy consumed since start.\n");
    out.push_str("# TYPE capgrid_host_energy_joules_total counter\n");
    for s in snapshots {
        out.push_str(&format!(
            "capgrid_host_energy_joules_total{{host=\"{}\"}} {:.2}\n",
            s.host_id, s.energy_joules
        ));
    }

    out.push_str("# HELP capgrid_host_sla_violation_ratio Fraction of active time under-provisioned.\n");
    out.push_str("# TYPE capgrid_host_sla_violation_ratio gauge\n");
    for s in snapshots {
        out.push_str(&format!(
            "capgrid_host_sla_violation_ratio{{host=\"{}\"}} {:.4}\n",
            s.host_id, s.sla_violation_ratio
        ));
    }

    out
}
