//! Prometheus text exposition format.
//!
//! Renders per-deployment, per-label install counters for scraping by a
//! Prometheus server or compatible agent.

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::manager::LabelMetrics;

/// Counters of one deployment, keyed by label.
#[derive(Debug, Clone)]
pub struct DeploymentMetricsSnapshot {
    pub deployment: String,
    pub labels: BTreeMap<String, LabelMetrics>,
}

/// Render snapshots into Prometheus text format, one GAUGE family per
/// counter kind with `deployment` and `label` labels.
pub fn render_prometheus(snapshots: &[DeploymentMetricsSnapshot]) -> String {
    let families: [(&str, &str, fn(&LabelMetrics) -> i64); 4] = [
        (
            "pushgrid_release_active",
            "Clients currently running the release.",
            |m| m.active,
        ),
        (
            "pushgrid_release_installed",
            "Successful installs of the release.",
            |m| m.installed,
        ),
        (
            "pushgrid_release_failed",
            "Failed installs of the release.",
            |m| m.failed,
        ),
        (
            "pushgrid_release_downloaded",
            "Downloads of the release.",
            |m| m.downloaded,
        ),
    ];

    let mut out = String::new();
    for (name, help, value) in families {
        let _ = writeln!(out, "# HELP {name} {help}");
        let _ = writeln!(out, "# TYPE {name} gauge");
        for s in snapshots {
            for (label, metrics) in &s.labels {
                let _ = writeln!(
                    out,
                    "{name}{{deployment=\"{}\",label=\"{}\"}} {}",
                    escape(&s.deployment),
                    escape(label),
                    value(metrics)
                );
            }
        }
    }
    out
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
