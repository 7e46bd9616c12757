//! systemd unit generation/installation and supervisor queries.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::config::types::{DeploySettings, ServiceIdentity};
use crate::daemon::SYSTEMD_SERVICE_TEMPLATE;
use crate::success;
use crate::system::executor::{run_checked, CommandRunner};
use crate::system::files::{rooted, write_if_changed, FileChange};
use crate::system::host::has_systemd;

/// What the host supervisor needs to launch, restart and sandbox the miner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    pub description: String,
    pub user: String,
    pub group: String,
    pub working_dir: PathBuf,
    pub exec_start: Vec<String>,
    pub restart_sec: u64,
    pub limit_nofile: u64,
    pub limit_nproc: u64,
    pub read_write_paths: Vec<PathBuf>,
    pub environment: Vec<(String, String)>,
    pub log_file: PathBuf,
}

impl ServiceDefinition {
    pub fn for_identity(identity: &ServiceIdentity, deploy: &DeploySettings) -> Self {
        let exec_start = vec![
            identity.interpreter().display().to_string(),
            identity.entry_point().display().to_string(),
            "--config".to_string(),
            identity.config_file().display().to_string(),
            "--production".to_string(),
        ];

        Self {
            description: format!("Crypto Miner Service ({})", identity.service_name),
            user: identity.account.clone(),
            group: identity.account.clone(),
            working_dir: identity.working_dir.clone(),
            exec_start,
            restart_sec: deploy.restart_delay_secs,
            limit_nofile: deploy.limit_nofile,
            limit_nproc: deploy.limit_nproc,
            read_write_paths: identity.writable_dirs().iter().map(|p| p.to_path_buf()).collect(),
            environment: vec![
                ("PYTHONUNBUFFERED".to_string(), "1".to_string()),
                ("PYTHONPATH".to_string(), identity.working_dir.join("src").display().to_string()),
                ("MINER_STATE_DIR".to_string(), identity.state_dir.display().to_string()),
            ],
            log_file: identity.service_log(),
        }
    }

    pub fn render(&self) -> String {
        let environment: String = self
            .environment
            .iter()
            .map(|(k, v)| format!("Environment={}={}\n", k, v))
            .collect();
        let rw_paths = self
            .read_write_paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(" ");

        SYSTEMD_SERVICE_TEMPLATE
            .replace("{{DESCRIPTION}}", &self.description)
            .replace("{{USER}}", &self.user)
            .replace("{{GROUP}}", &self.group)
            .replace("{{WORK_DIR}}", &self.working_dir.display().to_string())
            .replace("{{ENVIRONMENT}}", &environment)
            .replace("{{EXEC_START}}", &self.exec_start.join(" "))
            .replace("{{RESTART_SEC}}", &self.restart_sec.to_string())
            .replace("{{LIMIT_NOFILE}}", &self.limit_nofile.to_string())
            .replace("{{LIMIT_NPROC}}", &self.limit_nproc.to_string())
            .replace("{{RW_PATHS}}", &rw_paths)
            .replace("{{LOG_FILE}}", &self.log_file.display().to_string())
    }
}

/// Install or repair the unit file (idempotent): overwrite when different,
/// then daemon-reload and enable.
pub fn install_service_definition(
    root: &Path,
    runner: &dyn CommandRunner,
    identity: &ServiceIdentity,
    definition: &ServiceDefinition,
) -> Result<FileChange> {
    let unit_path = rooted(root, &identity.unit_path());
    let change = write_if_changed(&unit_path, &definition.render())?;

    match change {
        FileChange::Unchanged => {
            info!("Service definition already installed and up-to-date");
        }
        FileChange::Created | FileChange::Updated => {
            success!("Service file written: {}", identity.unit_path().display());
            run_checked(runner, "systemctl", &["daemon-reload"]).context("systemctl daemon-reload")?;
            debug!("Systemd daemon reloaded");
        }
    }

    let unit = identity.unit_name();
    match run_checked(runner, "systemctl", &["enable", &unit]) {
        Ok(_) => success!("Service enabled (will start on boot)"),
        Err(e) => warn!("Failed to enable service (run: systemctl enable {}): {}", unit, e),
    }

    Ok(change)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Active,
    Inactive,
    NotInstalled,
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorState::Active => write!(f, "active"),
            SupervisorState::Inactive => write!(f, "inactive"),
            SupervisorState::NotInstalled => write!(f, "not installed"),
        }
    }
}

pub trait Supervisor {
    /// Never fails: missing information is `NotInstalled`.
    fn state(&self) -> SupervisorState;
    fn stop(&self) -> Result<()>;
    fn restart(&self) -> Result<()>;
}

/// `systemctl` front-end for one unit.
pub struct Systemd<'a> {
    runner: &'a dyn CommandRunner,
    root: PathBuf,
    identity: ServiceIdentity,
}

impl<'a> Systemd<'a> {
    pub fn new(runner: &'a dyn CommandRunner, identity: &ServiceIdentity) -> Self {
        Self { runner, root: PathBuf::from("/"), identity: identity.clone() }
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    fn is_installed(&self) -> bool {
        has_systemd(&self.root) && rooted(&self.root, &self.identity.unit_path()).exists()
    }
}

impl Supervisor for Systemd<'_> {
    fn state(&self) -> SupervisorState {
        if !self.is_installed() {
            return SupervisorState::NotInstalled;
        }
        let active = self
            .runner
            .run("systemctl", &["is-active", "--quiet", &self.identity.unit_name()])
            .map(|o| o.success())
            .unwrap_or(false);
        if active {
            SupervisorState::Active
        } else {
            SupervisorState::Inactive
        }
    }

    fn stop(&self) -> Result<()> {
        run_checked(self.runner, "systemctl", &["stop", &self.identity.unit_name()])?;
        Ok(())
    }

    fn restart(&self) -> Result<()> {
        run_checked(self.runner, "systemctl", &["restart", &self.identity.unit_name()])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::executor::CommandOutput;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        active: bool,
    }

    impl CommandRunner for Recorder {
        fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
            self.calls.lock().unwrap().push(format!("{} {}", program, args.join(" ")));
            let code = if args.first() == Some(&"is-active") && !self.active { 3 } else { 0 };
            Ok(CommandOutput { code: Some(code), ..Default::default() })
        }
        fn run_with_input(&self, program: &str, args: &[&str], _input: &str) -> Result<CommandOutput> {
            self.run(program, args)
        }
        fn has_program(&self, _program: &str) -> bool {
            true
        }
    }

    #[test]
    fn unit_pins_workdir_limits_and_sandbox() {
        let identity = ServiceIdentity::default();
        let unit = ServiceDefinition::for_identity(&identity, &DeploySettings::default()).render();

        assert!(unit.contains("WorkingDirectory=/opt/crypto-miner\n"));
        assert!(unit.contains(
            "ExecStart=/opt/crypto-miner/venv/bin/python /opt/crypto-miner/main.py --config /etc/crypto-miner/miner.conf --production\n"
        ));
        assert!(unit.contains("Restart=on-failure\nRestartSec=10\n"));
        assert!(unit.contains("LimitNOFILE=65536\n"));
        assert!(unit.contains("LimitNPROC=4096\n"));
        assert!(unit.contains("ProtectSystem=strict\n"));
        assert!(unit.contains(
            "ReadWritePaths=/var/log/crypto-miner /etc/crypto-miner /var/lib/crypto-miner /var/backups/crypto-miner\n"
        ));
        assert!(unit.contains("User=miner\n"));
        assert!(!unit.contains("{{"));
    }

    #[test]
    fn reinstall_overwrites_instead_of_appending() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Recorder::default();
        let identity = ServiceIdentity::default();
        let definition = ServiceDefinition::for_identity(&identity, &DeploySettings::default());

        let first = install_service_definition(dir.path(), &runner, &identity, &definition).unwrap();
        let second = install_service_definition(dir.path(), &runner, &identity, &definition).unwrap();
        assert_eq!(first, FileChange::Created);
        assert_eq!(second, FileChange::Unchanged);

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.iter().filter(|c| c.as_str() == "systemctl daemon-reload").count(), 1);

        let mut changed = definition.clone();
        changed.restart_sec = 30;
        drop(calls);
        let third = install_service_definition(dir.path(), &runner, &identity, &changed).unwrap();
        assert_eq!(third, FileChange::Updated);
        let text = std::fs::read_to_string(rooted(dir.path(), &identity.unit_path())).unwrap();
        assert_eq!(text.matches("[Service]").count(), 1);
        assert!(text.contains("RestartSec=30"));
    }

    #[test]
    fn supervisor_state_reflects_install_and_activity() {
        let dir = tempfile::tempdir().unwrap();
        let identity = ServiceIdentity::default();
        let idle = Recorder::default();
        let systemd = Systemd::new(&idle, &identity).with_root(dir.path());
        assert_eq!(systemd.state(), SupervisorState::NotInstalled);

        std::fs::create_dir_all(dir.path().join("run/systemd/system")).unwrap();
        write_if_changed(&rooted(dir.path(), &identity.unit_path()), "[Unit]\n").unwrap();
        assert_eq!(systemd.state(), SupervisorState::Inactive);

        let busy = Recorder { active: true, ..Default::default() };
        let systemd = Systemd::new(&busy, &identity).with_root(dir.path());
        assert_eq!(systemd.state(), SupervisorState::Active);
    }
}
