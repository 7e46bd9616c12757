//! Step 1: privilege, platform and resource checks.

use std::path::Path;

use tracing::{info, warn};

use crate::config::types::DeploySettings;
use crate::error::ProvisionError;
use crate::provision::ProvisionWarning;
use crate::success;
use crate::system::host::{has_systemd, parse_major_minor, HostEnvironment};

/// Minimum release per distribution id. Derivatives without an entry (Mint,
/// Pop!_OS, ...) are accepted on their family match alone.
const RELEASE_FLOORS: &[(&str, (u32, u32))] = &[
    ("ubuntu", (20, 4)),
    ("debian", (11, 0)),
    ("rhel", (8, 0)),
    ("centos", (8, 0)),
    ("rocky", (8, 0)),
    ("almalinux", (8, 0)),
    ("fedora", (36, 0)),
];

pub fn check(host: &HostEnvironment, deploy: &DeploySettings, root: &Path) -> Result<Vec<ProvisionWarning>, ProvisionError> {
    if !host.is_root() {
        return Err(ProvisionError::InsufficientPrivilege { uid: host.euid });
    }

    if host.kernel != "linux" {
        return Err(ProvisionError::UnsupportedPlatform(format!("{} is not supported", host.kernel)));
    }

    let Some(family) = host.family() else {
        return Err(ProvisionError::UnsupportedPlatform(format!(
            "{} is neither Debian- nor RedHat-based",
            host.pretty_name
        )));
    };
    info!("Detected {} ({:?} family)", host.pretty_name, family);

    check_release(host)?;

    match host.python_version {
        Some(found) if found < deploy.min_python => {
            return Err(ProvisionError::UnsupportedPlatform(format!(
                "Python {}.{} found, {}.{}+ required",
                found.0, found.1, deploy.min_python.0, deploy.min_python.1
            )));
        }
        Some(found) => info!("Python {}.{} detected", found.0, found.1),
        None => info!("python3 not found, it will be installed with the system packages"),
    }

    if !has_systemd(root) {
        return Err(ProvisionError::UnsupportedPlatform("systemd is not running on this host".to_string()));
    }

    let warnings = resource_warnings(host, deploy);
    for w in &warnings {
        warn!("Low resources: {} (continuing)", w);
    }
    if warnings.is_empty() {
        success!("System requirements satisfied");
    }
    Ok(warnings)
}

fn check_release(host: &HostEnvironment) -> Result<(), ProvisionError> {
    let Some((_, floor)) = RELEASE_FLOORS.iter().find(|(id, _)| *id == host.os_id) else {
        return Ok(());
    };
    match parse_major_minor(&host.os_version) {
        Some(found) if found < *floor => Err(ProvisionError::UnsupportedPlatform(format!(
            "{} {} is older than the supported {}.{:02}",
            host.os_id, host.os_version, floor.0, floor.1
        ))),
        Some(_) => Ok(()),
        None => {
            warn!("Could not parse release version '{}', continuing", host.os_version);
            Ok(())
        }
    }
}

pub fn resource_warnings(host: &HostEnvironment, deploy: &DeploySettings) -> Vec<ProvisionWarning> {
    let mut warnings = Vec::new();
    if host.memory_mb() < deploy.recommended_memory_mb {
        warnings.push(ProvisionWarning::LowResource {
            resource: "memory",
            available: host.memory_mb(),
            recommended: deploy.recommended_memory_mb,
        });
    }
    if host.cpu_cores < deploy.recommended_cpu_cores {
        warnings.push(ProvisionWarning::LowResource {
            resource: "cpu cores",
            available: host.cpu_cores as u64,
            recommended: deploy.recommended_cpu_cores as u64,
        });
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(id: &str, version: &str) -> HostEnvironment {
        HostEnvironment {
            kernel: "linux".into(),
            os_id: id.into(),
            os_like: Vec::new(),
            os_version: version.into(),
            pretty_name: format!("{} {}", id, version),
            memory_bytes: 16 * 1024 * 1024 * 1024,
            cpu_cores: 8,
            euid: 0,
            python_version: Some((3, 11)),
        }
    }

    fn systemd_root() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("run/systemd/system")).unwrap();
        dir
    }

    #[test]
    fn release_floors() {
        let root = systemd_root();
        let deploy = DeploySettings::default();
        assert!(check(&host("ubuntu", "22.04"), &deploy, root.path()).is_ok());
        assert!(check(&host("debian", "12"), &deploy, root.path()).is_ok());
        assert!(check(&host("rocky", "9.3"), &deploy, root.path()).is_ok());

        for (id, version) in [("ubuntu", "18.04"), ("debian", "10"), ("centos", "7"), ("fedora", "35")] {
            let err = check(&host(id, version), &deploy, root.path()).unwrap_err();
            assert!(matches!(err, ProvisionError::UnsupportedPlatform(_)), "{id} {version}");
        }
    }

    #[test]
    fn unknown_family_and_old_python_are_unsupported() {
        let root = systemd_root();
        let deploy = DeploySettings::default();
        let err = check(&host("arch", "rolling"), &deploy, root.path()).unwrap_err();
        assert_eq!(err.exit_code(), 3);

        let mut old = host("ubuntu", "22.04");
        old.python_version = Some((3, 6));
        assert!(matches!(
            check(&old, &deploy, root.path()),
            Err(ProvisionError::UnsupportedPlatform(_))
        ));
    }

    #[test]
    fn missing_systemd_is_unsupported() {
        let root = tempfile::tempdir().unwrap();
        let err = check(&host("ubuntu", "22.04"), &DeploySettings::default(), root.path()).unwrap_err();
        assert!(err.to_string().contains("systemd"));
    }

    #[test]
    fn low_resources_only_warn() {
        let root = systemd_root();
        let mut small = host("debian", "12");
        small.memory_bytes = 1024 * 1024 * 1024;
        small.cpu_cores = 1;

        let warnings = check(&small, &DeploySettings::default(), root.path()).unwrap();
        assert_eq!(
            warnings,
            vec![
                ProvisionWarning::LowResource { resource: "memory", available: 1024, recommended: 4096 },
                ProvisionWarning::LowResource { resource: "cpu cores", available: 1, recommended: 2 },
            ]
        );
    }
}
