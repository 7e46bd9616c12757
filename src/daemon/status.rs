//! `stop status` report: process state, supervisor state and recent log lines.

use std::fs;
use std::path::Path;

use crate::config::types::ServiceIdentity;
use crate::daemon::control::StatusReport;

/// Render the `stop status` view: process state, supervisor state and the
/// tail of the service log.
pub fn render_status(report: &StatusReport, identity: &ServiceIdentity, log_file: &Path) -> String {
    let mut out = String::new();
    out.push_str(&format!("minerctl v{} ({})\n", env!("CARGO_PKG_VERSION"), std::env::consts::ARCH));
    out.push_str("================================\n");

    if report.running {
        let pids: Vec<String> = report.process_ids.iter().map(|p| p.to_string()).collect();
        out.push_str(&format!("Status: Running (PID: {})\n", pids.join(", ")));
    } else {
        out.push_str("Status: Not running\n");
    }
    out.push_str(&format!("Service {}: {}\n", identity.unit_name(), report.supervisor_state));

    let tail = last_lines(log_file, 5);
    if !tail.is_empty() {
        out.push_str("\nLast 5 log entries:\n");
        for line in tail {
            out.push_str(&format!("   {}\n", line));
        }
    }

    out
}

pub fn show_status(report: &StatusReport, identity: &ServiceIdentity, log_file: &Path) {
    print!("{}", render_status(report, identity, log_file));
}

fn last_lines(path: &Path, count: usize) -> Vec<String> {
    let Ok(content) = fs::read_to_string(path) else {
        return Vec::new();
    };
    let mut lines: Vec<String> = content.lines().rev().take(count).map(str::to_string).collect();
    lines.reverse();
    lines
}
