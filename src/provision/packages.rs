//! Step 4: native package manager detection and installation.

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::app::confirm::ConfirmationPort;
use crate::config::types::DeploySettings;
use crate::provision::ProvisionWarning;
use crate::success;
use crate::system::executor::{run_checked, CommandRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Dnf,
    Yum,
}

impl PackageManager {
    pub fn program(self) -> &'static str {
        match self {
            PackageManager::Apt => "apt-get",
            PackageManager::Dnf => "dnf",
            PackageManager::Yum => "yum",
        }
    }

    fn packages(self, deploy: &DeploySettings) -> &[String] {
        match self {
            PackageManager::Apt => &deploy.apt_packages,
            PackageManager::Dnf | PackageManager::Yum => &deploy.dnf_packages,
        }
    }

    fn gpu_packages(self, deploy: &DeploySettings) -> &[String] {
        match self {
            PackageManager::Apt => &deploy.gpu_packages_apt,
            PackageManager::Dnf | PackageManager::Yum => &deploy.gpu_packages_dnf,
        }
    }
}

/// First supported manager found on the search path.
pub fn detect(runner: &dyn CommandRunner) -> Option<PackageManager> {
    let found = [PackageManager::Apt, PackageManager::Dnf, PackageManager::Yum]
        .into_iter()
        .find(|m| runner.has_program(m.program()));
    match found {
        Some(m) => info!("Using package manager: {}", m.program()),
        None => tracing::error!("No supported package manager found (apt-get, dnf, yum)"),
    }
    found
}

fn install_packages(runner: &dyn CommandRunner, manager: PackageManager, packages: &[String]) -> Result<()> {
    if packages.is_empty() {
        return Ok(());
    }
    let mut args = vec!["install", "-y"];
    if manager == PackageManager::Apt {
        args.push("-q");
    }
    args.extend(packages.iter().map(String::as_str));
    run_checked(runner, manager.program(), &args)
        .with_context(|| format!("Failed to install {}", packages.join(" ")))?;
    Ok(())
}

pub fn install(runner: &dyn CommandRunner, manager: PackageManager, deploy: &DeploySettings) -> Result<()> {
    if manager == PackageManager::Apt {
        run_checked(runner, "apt-get", &["update", "-q"]).context("apt-get update")?;
    }
    install_packages(runner, manager, manager.packages(deploy))?;
    success!("System packages installed");
    Ok(())
}

fn nvidia_present(runner: &dyn CommandRunner) -> bool {
    if !runner.has_program("lspci") {
        return false;
    }
    runner
        .run("lspci", &[])
        .map(|o| o.success() && o.stdout.to_lowercase().contains("nvidia"))
        .unwrap_or(false)
}

/// Ask before installing GPU drivers when an NVIDIA device is present. A
/// failed driver install does not stop provisioning.
pub fn offer_gpu_drivers(
    runner: &dyn CommandRunner,
    confirm: &dyn ConfirmationPort,
    manager: PackageManager,
    deploy: &DeploySettings,
) -> Option<ProvisionWarning> {
    if !nvidia_present(runner) {
        return None;
    }
    info!("NVIDIA GPU detected");
    if !confirm.confirm("Install NVIDIA GPU drivers?", false) {
        info!("Skipping GPU driver installation");
        return None;
    }

    match install_packages(runner, manager, manager.gpu_packages(deploy)) {
        Ok(()) => {
            success!("GPU drivers installed (a reboot may be required)");
            None
        }
        Err(e) => {
            warn!("GPU driver installation failed, continuing without GPU support: {:#}", e);
            Some(ProvisionWarning::Degraded { step: "gpu drivers", detail: format!("{:#}", e) })
        }
    }
}
