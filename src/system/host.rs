//! Host facts gathered once at provisioning time.

use std::path::Path;

use tracing::debug;

use crate::system::executor::CommandRunner;
use crate::system::files::rooted;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    Debian,
    RedHat,
}

/// Immutable snapshot of the host; only used to gate or warn.
#[derive(Debug, Clone, PartialEq)]
pub struct HostEnvironment {
    pub kernel: String,
    pub os_id: String,
    pub os_like: Vec<String>,
    pub os_version: String,
    pub pretty_name: String,
    pub memory_bytes: u64,
    pub cpu_cores: usize,
    pub euid: u32,
    pub python_version: Option<(u32, u32)>,
}

impl HostEnvironment {
    pub fn gather(runner: &dyn CommandRunner) -> Self {
        let os_release = std::fs::read_to_string("/etc/os-release").unwrap_or_default();
        let os = parse_os_release(&os_release);

        let mut sys = sysinfo::System::new_all();
        sys.refresh_memory();
        sys.refresh_cpu();

        let python_version = runner
            .run("python3", &["--version"])
            .ok()
            .filter(|o| o.success())
            .and_then(|o| parse_python_version(&format!("{}{}", o.stdout, o.stderr)));

        let host = Self {
            kernel: std::env::consts::OS.to_string(),
            os_id: os.id,
            os_like: os.like,
            os_version: os.version,
            pretty_name: os.pretty_name,
            memory_bytes: sys.total_memory(),
            cpu_cores: sys.cpus().len(),
            euid: unsafe { libc::geteuid() },
            python_version,
        };
        debug!("Host environment: {:?}", host);
        host
    }

    pub fn family(&self) -> Option<OsFamily> {
        let mut names = std::iter::once(self.os_id.as_str()).chain(self.os_like.iter().map(|s| s.as_str()));
        names.find_map(|name| match name {
            "debian" | "ubuntu" => Some(OsFamily::Debian),
            "rhel" | "centos" | "fedora" | "rocky" | "almalinux" => Some(OsFamily::RedHat),
            _ => None,
        })
    }

    pub fn memory_mb(&self) -> u64 {
        self.memory_bytes / (1024 * 1024)
    }

    pub fn is_root(&self) -> bool {
        self.euid == 0
    }
}

#[derive(Debug, Default)]
struct OsRelease {
    id: String,
    like: Vec<String>,
    version: String,
    pretty_name: String,
}

fn parse_os_release(content: &str) -> OsRelease {
    let mut os = OsRelease::default();
    for line in content.lines() {
        let Some((key, value)) = line.split_once('=') else { continue };
        let value = value.trim().trim_matches('"').to_string();
        match key.trim() {
            "ID" => os.id = value.to_lowercase(),
            "ID_LIKE" => os.like = value.split_whitespace().map(|s| s.to_lowercase()).collect(),
            "VERSION_ID" => os.version = value,
            "PRETTY_NAME" => os.pretty_name = value,
            _ => {}
        }
    }
    if os.pretty_name.is_empty() {
        os.pretty_name = std::env::consts::OS.to_string();
    }
    os
}

/// "Python 3.10.12" -> (3, 10)
pub fn parse_python_version(text: &str) -> Option<(u32, u32)> {
    let version = text.split_whitespace().find(|w| w.chars().next().is_some_and(|c| c.is_ascii_digit()))?;
    parse_major_minor(version)
}

/// "22.04" -> (22, 4), "9" -> (9, 0)
pub fn parse_major_minor(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts
        .next()
        .map(|m| m.chars().take_while(|c| c.is_ascii_digit()).collect::<String>())
        .and_then(|m| m.parse().ok())
        .unwrap_or(0);
    Some((major, minor))
}

/// Whether the host under `root` is booted with systemd.
pub fn has_systemd(root: &Path) -> bool {
    rooted(root, Path::new(crate::daemon::SYSTEMD_RUN_DIR)).exists()
}
