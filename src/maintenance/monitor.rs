//! Health sweep run every few minutes from cron.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::daemon::systemd::{Supervisor, SupervisorState};
use crate::success;

/// Lines inspected at the end of each log file.
pub const ERROR_WINDOW: usize = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceSample {
    pub cpu_percent: f32,
    pub memory_percent: f64,
    pub disk_percent: f64,
}

impl ResourceSample {
    /// CPU usage needs two refreshes a minimum interval apart.
    pub fn collect() -> Self {
        let mut sys = sysinfo::System::new_all();
        sys.refresh_cpu();
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        sys.refresh_cpu();
        sys.refresh_memory();

        let memory_percent = if sys.total_memory() > 0 {
            (sys.used_memory() as f64 / sys.total_memory() as f64) * 100.0
        } else {
            0.0
        };

        let disks = sysinfo::Disks::new_with_refreshed_list();
        let disk_percent = disks
            .list()
            .iter()
            .find(|d| d.mount_point() == Path::new("/"))
            .filter(|d| d.total_space() > 0)
            .map(|d| (d.total_space() - d.available_space()) as f64 / d.total_space() as f64 * 100.0)
            .unwrap_or(0.0);

        Self {
            cpu_percent: sys.global_cpu_info().cpu_usage(),
            memory_percent,
            disk_percent,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorReport {
    pub host: String,
    pub service: SupervisorState,
    pub restarted: bool,
    pub sample: ResourceSample,
    pub error_lines: usize,
}

impl MonitorReport {
    pub fn summary(&self) -> String {
        format!(
            "{}: service={}{} cpu={:.1}% mem={:.1}% disk={:.1}% errors={}",
            self.host,
            self.service,
            if self.restarted { " (restarted)" } else { "" },
            self.sample.cpu_percent,
            self.sample.memory_percent,
            self.sample.disk_percent,
            self.error_lines
        )
    }
}

/// Count lines containing `ERROR` among the last `window` lines.
pub fn count_errors(path: &Path, window: usize) -> Result<usize> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let content = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(window);
    Ok(lines[start..].iter().filter(|l| l.contains("ERROR")).count())
}

/// Every `*.log` directly in `log_dir` with its recent error count.
pub fn scan_logs(log_dir: &Path) -> Vec<(PathBuf, usize)> {
    let pattern = log_dir.join("*.log");
    let Ok(paths) = glob::glob(&pattern.to_string_lossy()) else {
        return Vec::new();
    };
    paths
        .filter_map(Result::ok)
        .filter_map(|path| match count_errors(&path, ERROR_WINDOW) {
            Ok(n) => Some((path, n)),
            Err(e) => {
                warn!("{:#}", e);
                None
            }
        })
        .collect()
}

/// One sweep: restart the service when it is installed but not active,
/// then report resources and recent log errors.
pub fn sweep(supervisor: &dyn Supervisor, log_dir: &Path, sample: ResourceSample, host: &str) -> MonitorReport {
    let service = supervisor.state();
    let mut restarted = false;

    match service {
        SupervisorState::Active => {}
        SupervisorState::Inactive => {
            warn!("Service is not active, restarting");
            match supervisor.restart() {
                Ok(()) => {
                    restarted = true;
                    success!("Service restarted");
                }
                Err(e) => error!("Service restart failed: {:#}", e),
            }
        }
        SupervisorState::NotInstalled => info!("Service is not installed, skipping restart check"),
    }

    let logs = scan_logs(log_dir);
    for (path, n) in logs.iter().filter(|(_, n)| *n > 0) {
        warn!("{} error line(s) in {}", n, path.display());
    }
    let error_lines = logs.iter().map(|(_, n)| n).sum();

    let report = MonitorReport {
        host: host.to_string(),
        service,
        restarted,
        sample,
        error_lines,
    };
    info!("{}", report.summary());
    report
}

pub fn local_hostname() -> String {
    hostname::get()
        .unwrap_or_else(|_| std::ffi::OsString::from("unknown"))
        .to_string_lossy()
        .to_string()
}
