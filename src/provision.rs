//! Provisioner: ordered, individually re-runnable host preparation steps.
//!
//! Steps 1-4 abort the run on failure. Later steps are fatal only when they
//! block the service from running; optional infrastructure (GPU drivers,
//! firewall, unit enablement) degrades to a warning.

pub mod account;
pub mod artifacts;
pub mod packages;
pub mod preflight;
pub mod runtime;
pub mod schedule;
pub mod verify;

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::app::confirm::ConfirmationPort;
use crate::config::types::{DeploySettings, OpsConfig, ServiceIdentity};
use crate::error::ProvisionError;
use crate::success;
use crate::system::executor::CommandRunner;
use crate::system::host::HostEnvironment;

/// Non-fatal findings collected during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionWarning {
    LowResource {
        resource: &'static str,
        available: u64,
        recommended: u64,
    },
    Degraded {
        step: &'static str,
        detail: String,
    },
}

impl std::fmt::Display for ProvisionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProvisionWarning::LowResource { resource, available, recommended } => {
                write!(f, "low {}: {} available, {} recommended", resource, available, recommended)
            }
            ProvisionWarning::Degraded { step, detail } => write!(f, "{}: {}", step, detail),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionReport {
    pub identity: ServiceIdentity,
    pub warnings: Vec<ProvisionWarning>,
}

pub struct Provisioner<'a> {
    config: OpsConfig,
    runner: &'a dyn CommandRunner,
    confirm: &'a dyn ConfirmationPort,
    root: PathBuf,
    source_dir: PathBuf,
    ctl_source: Option<PathBuf>,
}

impl<'a> Provisioner<'a> {
    pub fn new(
        config: OpsConfig,
        runner: &'a dyn CommandRunner,
        confirm: &'a dyn ConfirmationPort,
        source_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            config,
            runner,
            confirm,
            root: PathBuf::from("/"),
            source_dir: source_dir.into(),
            ctl_source: None,
        }
    }

    /// Install this binary at the configured path before the scheduled jobs
    /// that invoke it.
    pub fn with_ctl_source(mut self, binary: impl Into<PathBuf>) -> Self {
        self.ctl_source = Some(binary.into());
        self
    }

    /// Prefix for every host path (a scratch directory in tests).
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.config.identity
    }

    pub fn settings(&self) -> &DeploySettings {
        &self.config.deploy
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run(&self, host: &HostEnvironment) -> Result<ProvisionReport, ProvisionError> {
        let identity = self.identity();
        let deploy = self.settings();
        let mut warnings = Vec::new();

        info!("Provisioning {} on {}", identity.service_name, host.pretty_name);

        info!("[1/11] Checking privileges and system requirements...");
        warnings.extend(preflight::check(host, deploy, &self.root)?);

        info!("[2/11] Ensuring service account '{}'...", identity.account);
        account::ensure_account(self.runner, identity)
            .map_err(|e| ProvisionError::step("account creation", e))?;

        info!("[3/11] Creating directories...");
        account::ensure_directories(self.runner, identity, &self.root)
            .map_err(|e| ProvisionError::step("directory creation", e))?;

        info!("[4/11] Installing system packages...");
        let manager = packages::detect(self.runner).ok_or(ProvisionError::UnsupportedPackageManager)?;
        packages::install(self.runner, manager, deploy)
            .map_err(|e| ProvisionError::step("package installation", e))?;
        if let Some(w) = packages::offer_gpu_drivers(self.runner, self.confirm, manager, deploy) {
            warnings.push(w);
        }

        info!("[5/11] Setting up runtime environment...");
        runtime::sync_application(self.runner, identity, &self.source_dir, &self.root)
            .map_err(|e| ProvisionError::step("application sync", e))?;
        runtime::ensure_environment(self.runner, identity, deploy, &self.root)
            .map_err(|e| ProvisionError::step("runtime environment", e))?;

        info!("[6/11] Deploying configuration...");
        let (_, fallback) = artifacts::deploy_config(self.runner, &self.config, &self.root)
            .map_err(|e| ProvisionError::step("configuration deployment", e))?;
        warnings.extend(fallback);

        info!("[7/11] Registering systemd service...");
        artifacts::install_unit(self.runner, identity, deploy, &self.root)
            .map_err(|e| ProvisionError::step("service registration", e))?;

        info!("[8/11] Configuring log rotation...");
        artifacts::install_logrotate(identity, &self.root)
            .map_err(|e| ProvisionError::step("log rotation", e))?;
        if let Some(port) = deploy.dashboard_port {
            if let Err(e) = artifacts::open_firewall_port(self.runner, port) {
                warn!("Firewall configuration failed: {:#}", e);
                warnings.push(ProvisionWarning::Degraded { step: "firewall", detail: format!("{:#}", e) });
            }
        }

        if let Some(w) = self.install_ctl_binary() {
            warnings.push(w);
        }

        info!("[9/11] Installing monitoring job...");
        info!("[10/11] Installing backup job...");
        let jobs = schedule::jobs_for(identity, deploy);
        schedule::ensure_jobs(self.runner, &jobs)
            .map_err(|e| ProvisionError::step("scheduled jobs", e))?;

        info!("[11/11] Verifying deployment...");
        verify::smoke_test(self.runner, identity, deploy, &self.root)?;

        for w in &warnings {
            warn!("{}", w);
        }
        success!("Deployment of {} completed", identity.service_name);
        info!("Start with: systemctl start {}", identity.unit_name());

        Ok(ProvisionReport { identity: identity.clone(), warnings })
    }
}

impl Provisioner<'_> {
    fn install_ctl_binary(&self) -> Option<ProvisionWarning> {
        let source = self.ctl_source.as_ref()?;
        let target = crate::system::files::rooted(&self.root, &self.settings().ctl_binary);
        if *source == target {
            return None;
        }
        match artifacts::install_binary(source, &target) {
            Ok(_) => None,
            Err(e) => {
                warn!("Scheduled jobs will not find {}: {:#}", target.display(), e);
                Some(ProvisionWarning::Degraded { step: "scheduled jobs", detail: format!("{:#}", e) })
            }
        }
    }
}

/// Run every provisioning step against `host`.
pub fn provision(host: &HostEnvironment, provisioner: &Provisioner<'_>) -> Result<ProvisionReport, ProvisionError> {
    provisioner.run(host)
}


#[cfg(test)]
mod tests {
    use super::fake::FakeHost;
    use super::*;
    use crate::app::confirm::FixedAnswer;
    use std::fs;

    fn host(memory_mb: u64, cores: usize) -> HostEnvironment {
        HostEnvironment {
            kernel: "linux".into(),
            os_id: "ubuntu".into(),
            os_like: vec!["debian".into()],
            os_version: "22.04".into(),
            pretty_name: "Ubuntu 22.04 LTS".into(),
            memory_bytes: memory_mb * 1024 * 1024,
            cpu_cores: cores,
            euid: 0,
            python_version: Some((3, 10)),
        }
    }

    fn scratch() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("run/systemd/system")).unwrap();
        let source = dir.path().join("checkout");
        fs::create_dir_all(source.join("config")).unwrap();
        fs::write(source.join("main.py"), "print('mining')\n").unwrap();
        fs::write(source.join("requirements.txt"), "psutil\n").unwrap();
        fs::write(source.join("config/default.conf"), "[mining]\nthreads = 2\n\n[blockchain]\nnetwork = testnet\n").unwrap();
        (dir, source)
    }

    #[test]
    fn small_host_warns_but_completes() {
        let (dir, source) = scratch();
        let fake = FakeHost::debian(dir.path());
        let confirm = FixedAnswer(false);
        let provisioner = Provisioner::new(OpsConfig::default(), &fake, &confirm, &source).with_root(dir.path());

        let report = provision(&host(1024, 1), &provisioner).unwrap();

        let low: Vec<_> = report
            .warnings
            .iter()
            .filter_map(|w| match w {
                ProvisionWarning::LowResource { resource, .. } => Some(*resource),
                _ => None,
            })
            .collect();
        assert_eq!(low, vec!["memory", "cpu cores"]);
        assert_eq!(fake.count_exact("crontab -"), 1);
        assert!(dir.path().join("etc/systemd/system/crypto-miner.service").exists());
    }

    #[test]
    fn unsupported_package_manager_stops_before_runtime() {
        let (dir, source) = scratch();
        let mut fake = FakeHost::debian(dir.path());
        fake.programs.remove("apt-get");
        let confirm = FixedAnswer(false);
        let provisioner = Provisioner::new(OpsConfig::default(), &fake, &confirm, &source).with_root(dir.path());

        let err = provision(&host(8192, 4), &provisioner).unwrap_err();
        assert!(matches!(err, ProvisionError::UnsupportedPackageManager));
        assert_eq!(err.exit_code(), 4);

        // steps 2-3 ran, nothing after step 4 did
        assert_eq!(fake.count("useradd"), 1);
        assert!(dir.path().join("var/log/crypto-miner").is_dir());
        assert_eq!(fake.count("python3 -m venv"), 0);
        assert!(!dir.path().join("etc/systemd/system/crypto-miner.service").exists());
        assert_eq!(fake.count("crontab"), 0);
    }

    #[test]
    fn non_root_is_rejected_before_any_change() {
        let (dir, source) = scratch();
        let fake = FakeHost::debian(dir.path());
        let confirm = FixedAnswer(true);
        let provisioner = Provisioner::new(OpsConfig::default(), &fake, &confirm, &source).with_root(dir.path());

        let mut user = host(8192, 4);
        user.euid = 1000;
        let err = provision(&user, &provisioner).unwrap_err();
        assert!(matches!(err, ProvisionError::InsufficientPrivilege { uid: 1000 }));
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn ctl_binary_is_installed_before_jobs() {
        let (dir, source) = scratch();
        let binary = dir.path().join("build/minerctl");
        fs::create_dir_all(binary.parent().unwrap()).unwrap();
        fs::write(&binary, b"\x7fELF").unwrap();
        let fake = FakeHost::debian(dir.path());
        let confirm = FixedAnswer(false);
        let provisioner = Provisioner::new(OpsConfig::default(), &fake, &confirm, &source)
            .with_root(dir.path())
            .with_ctl_source(&binary);

        let report = provision(&host(8192, 4), &provisioner).unwrap();

        let installed = dir.path().join("usr/local/bin/minerctl");
        assert_eq!(fs::read(&installed).unwrap(), b"\x7fELF");
        assert!(!report.warnings.iter().any(|w| matches!(w, ProvisionWarning::Degraded { .. })));
    }

    #[test]
    fn failed_ctl_install_degrades_scheduled_jobs() {
        let (dir, source) = scratch();
        let fake = FakeHost::debian(dir.path());
        let confirm = FixedAnswer(false);
        let provisioner = Provisioner::new(OpsConfig::default(), &fake, &confirm, &source)
            .with_root(dir.path())
            .with_ctl_source(dir.path().join("no-such-binary"));

        let report = provision(&host(8192, 4), &provisioner).unwrap();

        assert!(report
            .warnings
            .iter()
            .any(|w| matches!(w, ProvisionWarning::Degraded { step: "scheduled jobs", .. })));
        assert_eq!(fake.count_exact("crontab -"), 1);
    }

    #[test]
    fn ctl_binary_untouched_when_preflight_fails() {
        let (dir, source) = scratch();
        let binary = dir.path().join("build/minerctl");
        fs::create_dir_all(binary.parent().unwrap()).unwrap();
        fs::write(&binary, b"bin").unwrap();
        let fake = FakeHost::debian(dir.path());
        let confirm = FixedAnswer(false);
        let provisioner = Provisioner::new(OpsConfig::default(), &fake, &confirm, &source)
            .with_root(dir.path())
            .with_ctl_source(&binary);

        let mut old = host(8192, 4);
        old.os_version = "18.04".into();
        let err = provision(&old, &provisioner).unwrap_err();
        assert!(matches!(err, ProvisionError::UnsupportedPlatform(_)));
        assert!(!dir.path().join("usr/local/bin/minerctl").exists());
    }

    #[test]
    fn missing_config_section_fails_verification() {
        let (dir, source) = scratch();
        fs::write(source.join("config/default.conf"), "[mining]\nthreads = 2\n").unwrap();
        let fake = FakeHost::debian(dir.path());
        let confirm = FixedAnswer(false);
        let provisioner = Provisioner::new(OpsConfig::default(), &fake, &confirm, &source).with_root(dir.path());

        let err = provision(&host(8192, 4), &provisioner).unwrap_err();
        match err {
            ProvisionError::DeploymentVerificationFailed(detail) => assert!(detail.contains("blockchain")),
            other => panic!("unexpected error: {other}"),
        }
        // earlier artifacts are left in place
        assert!(dir.path().join("etc/systemd/system/crypto-miner.service").exists());
    }
}
