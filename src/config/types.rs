//! Tool configuration structs and defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_OPS_CONFIG_PATH: &str = "/etc/crypto-miner/minerctl.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpsConfig {
    #[serde(default)]
    pub identity: ServiceIdentity,
    #[serde(default)]
    pub deploy: DeploySettings,
    #[serde(default)]
    pub stop: StopSettings,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

pub fn default_log_level() -> String { "INFO".to_string() }

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            identity: ServiceIdentity::default(),
            deploy: DeploySettings::default(),
            stop: StopSettings::default(),
            log_level: default_log_level(),
        }
    }
}

/// Names and directories shared by the provisioner, the systemd unit and the
/// lifecycle controller. Re-provisioning must reproduce it exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ServiceIdentity {
    pub service_name: String,
    pub account: String,
    pub working_dir: PathBuf,
    pub config_dir: PathBuf,
    pub log_dir: PathBuf,
    pub state_dir: PathBuf,
    pub backup_dir: PathBuf,
}

impl Default for ServiceIdentity {
    fn default() -> Self {
        Self {
            service_name: "crypto-miner".to_string(),
            account: "miner".to_string(),
            working_dir: PathBuf::from("/opt/crypto-miner"),
            config_dir: PathBuf::from("/etc/crypto-miner"),
            log_dir: PathBuf::from("/var/log/crypto-miner"),
            state_dir: PathBuf::from("/var/lib/crypto-miner"),
            backup_dir: PathBuf::from("/var/backups/crypto-miner"),
        }
    }
}

impl ServiceIdentity {
    pub fn venv_dir(&self) -> PathBuf {
        self.working_dir.join("venv")
    }

    pub fn interpreter(&self) -> PathBuf {
        self.venv_dir().join("bin").join("python")
    }

    pub fn entry_point(&self) -> PathBuf {
        self.working_dir.join("main.py")
    }

    pub fn dashboard_entry_point(&self) -> PathBuf {
        self.working_dir.join("src").join("dashboard").join("app.py")
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("miner.conf")
    }

    pub fn ops_config_file(&self) -> PathBuf {
        self.config_dir.join("minerctl.json")
    }

    pub fn service_log(&self) -> PathBuf {
        self.log_dir.join("miner.log")
    }

    pub fn unit_path(&self) -> PathBuf {
        PathBuf::from(format!("/etc/systemd/system/{}.service", self.service_name))
    }

    pub fn unit_name(&self) -> String {
        format!("{}.service", self.service_name)
    }

    /// Directories the sandboxed service may write to.
    pub fn writable_dirs(&self) -> [&Path; 4] {
        [&self.log_dir, &self.config_dir, &self.state_dir, &self.backup_dir]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeploySettings {
    pub min_python: (u32, u32),
    pub recommended_memory_mb: u64,
    pub recommended_cpu_cores: usize,
    pub apt_packages: Vec<String>,
    pub dnf_packages: Vec<String>,
    pub gpu_packages_apt: Vec<String>,
    pub gpu_packages_dnf: Vec<String>,
    pub requirements_file: String,
    pub smoke_modules: Vec<String>,
    pub required_sections: Vec<String>,
    pub dashboard_port: Option<u16>,
    pub monitor_schedule: String,
    pub backup_schedule: String,
    pub backup_retention_days: u64,
    pub restart_delay_secs: u64,
    pub limit_nofile: u64,
    pub limit_nproc: u64,
    pub ctl_binary: PathBuf,
}

impl Default for DeploySettings {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            min_python: (3, 8),
            recommended_memory_mb: 4096,
            recommended_cpu_cores: 2,
            apt_packages: strings(&[
                "python3", "python3-venv", "python3-pip", "python3-dev",
                "build-essential", "tar", "logrotate", "cron",
            ]),
            dnf_packages: strings(&[
                "python3", "python3-pip", "python3-devel",
                "gcc", "gcc-c++", "make", "tar", "logrotate", "cronie",
            ]),
            gpu_packages_apt: strings(&["nvidia-driver-535", "nvidia-cuda-toolkit"]),
            gpu_packages_dnf: strings(&["akmod-nvidia", "xorg-x11-drv-nvidia-cuda"]),
            requirements_file: "requirements.txt".to_string(),
            smoke_modules: strings(&["psutil", "numpy", "cryptography", "requests"]),
            required_sections: strings(&["mining", "blockchain"]),
            dashboard_port: Some(5000),
            monitor_schedule: "*/5 * * * *".to_string(),
            backup_schedule: "0 2 * * *".to_string(),
            backup_retention_days: 7,
            restart_delay_secs: 10,
            limit_nofile: 65536,
            limit_nproc: 4096,
            ctl_binary: PathBuf::from("/usr/local/bin/minerctl"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StopSettings {
    pub poll_interval_ms: u64,
    pub poll_attempts: u32,
    pub settle_ms: u64,
}

impl Default for StopSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            poll_attempts: 30,
            settle_ms: 1000,
        }
    }
}

impl StopSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}
