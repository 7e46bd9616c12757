//! Lifecycle Controller: start, graceful/forceful stop, status.
//!
//! Stop ordering within one call: signal delivery to every matching process,
//! then polling, then escalation, then (only then) failure. An empty process
//! set is success for every stop variant.

use std::path::{Path, PathBuf};
use std::thread;

use tracing::{info, warn};

use crate::app::confirm::ConfirmationPort;
use crate::config::types::{ServiceIdentity, StopSettings};
use crate::daemon::launch::{LaunchSpec, Launcher};
use crate::daemon::systemd::{Supervisor, SupervisorState};
use crate::error::{StartError, StopError};
use crate::success;
use crate::system::files::rooted;
use crate::system::process::{ProcessSignature, ProcessTable, Signal};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartRequest {
    /// Explicit `--config` override; must exist.
    pub config: Option<PathBuf>,
    /// Restart a running instance without asking.
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForegroundTool {
    Terminal,
    Benchmark,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started { pid: u32 },
    /// A matching instance is running and the operator declined a restart.
    Declined { running: Vec<u32> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prepared {
    Launch(LaunchSpec),
    Declined { running: Vec<u32> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopKind {
    Graceful,
    Force,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    AlreadyStopped,
    Terminated { pids: Vec<u32> },
    Killed { pids: Vec<u32> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub running: bool,
    pub process_ids: Vec<u32>,
    pub supervisor_state: SupervisorState,
}

pub struct LifecycleController<'a> {
    identity: &'a ServiceIdentity,
    policy: StopSettings,
    processes: &'a dyn ProcessTable,
    supervisor: &'a dyn Supervisor,
    launcher: &'a dyn Launcher,
    confirm: &'a dyn ConfirmationPort,
    root: PathBuf,
}

impl<'a> LifecycleController<'a> {
    pub fn new(
        identity: &'a ServiceIdentity,
        policy: StopSettings,
        processes: &'a dyn ProcessTable,
        supervisor: &'a dyn Supervisor,
        launcher: &'a dyn Launcher,
        confirm: &'a dyn ConfirmationPort,
    ) -> Self {
        Self {
            identity,
            policy,
            processes,
            supervisor,
            launcher,
            confirm,
            root: PathBuf::from("/"),
        }
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    fn host(&self, path: &Path) -> PathBuf {
        rooted(&self.root, path)
    }

    fn signature(&self) -> ProcessSignature {
        ProcessSignature::for_service(self.identity)
    }

    fn query(&self) -> Result<Vec<u32>, StopError> {
        Ok(self.processes.query(&self.signature())?)
    }

    fn ensure_environment(&self) -> Result<PathBuf, StartError> {
        let interpreter = self.host(&self.identity.interpreter());
        if !interpreter.exists() {
            return Err(StartError::EnvironmentMissing(interpreter));
        }
        Ok(interpreter)
    }

    /// Config argument: an explicit override must exist; otherwise the
    /// deployed config is used when present. Overrides are resolved against
    /// the caller's directory since the child runs in the working dir.
    fn config_args(&self, config: Option<&Path>) -> Result<Vec<String>, StartError> {
        match config {
            Some(path) => {
                let resolved = std::fs::canonicalize(path)
                    .map_err(|_| StartError::ConfigNotFound(path.to_path_buf()))?;
                Ok(vec!["--config".to_string(), resolved.display().to_string()])
            }
            None => {
                let deployed = self.host(&self.identity.config_file());
                if deployed.exists() {
                    Ok(vec!["--config".to_string(), deployed.display().to_string()])
                } else {
                    Ok(Vec::new())
                }
            }
        }
    }

    fn spec(&self, name: &str, interpreter: PathBuf, entry: &Path, args: Vec<String>) -> LaunchSpec {
        let mut all = vec![self.host(entry).display().to_string()];
        all.extend(args);
        LaunchSpec {
            name: name.to_string(),
            program: interpreter,
            args: all,
            working_dir: self.host(&self.identity.working_dir),
            log_file: self.host(&self.identity.service_log()),
        }
    }

    /// Validate a start request and resolve what to launch. A running
    /// instance is restarted only with `force` or operator confirmation.
    pub fn prepare(&self, request: &StartRequest) -> Result<Prepared, StartError> {
        let interpreter = self.ensure_environment()?;
        let config_args = self.config_args(request.config.as_deref())?;

        let running = self.query()?;
        if !running.is_empty() {
            warn!("Miner is already running (PID: {:?})", running);
            let restart = request.force || self.confirm.confirm("Restart the running miner?", false);
            if !restart {
                warn!("Restart declined, leaving the running instance untouched");
                return Ok(Prepared::Declined { running });
            }
            info!("Stopping the running instance before restart...");
            self.stop_supervised_service()?;
            self.stop(StopKind::Graceful)?;
        }

        Ok(Prepared::Launch(self.spec("miner", interpreter, &self.identity.entry_point(), config_args)))
    }

    pub fn start(&self, request: &StartRequest) -> Result<StartOutcome, StartError> {
        let spec = match self.prepare(request)? {
            Prepared::Launch(spec) => spec,
            Prepared::Declined { running } => return Ok(StartOutcome::Declined { running }),
        };

        info!("Starting miner: {}", spec.command_line());
        let pid = self
            .launcher
            .spawn_detached(&spec)
            .map_err(|source| StartError::Launch { what: spec.name.clone(), source })?;

        success!("Miner started (PID: {})", pid);
        info!("Logs: tail -f {}", self.identity.service_log().display());
        Ok(StartOutcome::Started { pid })
    }

    /// Launch spec for the auxiliary web dashboard used by `start all`.
    pub fn dashboard_spec(&self) -> Result<LaunchSpec, StartError> {
        let interpreter = self.ensure_environment()?;
        Ok(self.spec("dashboard", interpreter, &self.identity.dashboard_entry_point(), Vec::new()))
    }

    /// Terminal GUI or benchmarks, attached to the current terminal.
    pub fn run_tool(&self, tool: ForegroundTool) -> Result<i32, StartError> {
        let interpreter = self.ensure_environment()?;
        let mut args = self.config_args(None)?;
        args.push(match tool {
            ForegroundTool::Terminal => "--terminal".to_string(),
            ForegroundTool::Benchmark => "--benchmark".to_string(),
        });
        let name = match tool {
            ForegroundTool::Terminal => "terminal",
            ForegroundTool::Benchmark => "benchmark",
        };
        let spec = self.spec(name, interpreter, &self.identity.entry_point(), args);

        info!("Running {}: {}", name, spec.command_line());
        self.launcher
            .run_foreground(&spec)
            .map_err(|source| StartError::Launch { what: name.to_string(), source })
    }

    pub fn stop(&self, kind: StopKind) -> Result<StopOutcome, StopError> {
        match kind {
            StopKind::Graceful => self.stop_graceful(),
            StopKind::Force => self.stop_force(),
        }
    }

    fn stop_graceful(&self) -> Result<StopOutcome, StopError> {
        let pids = self.query()?;
        if pids.is_empty() {
            warn!("No miner processes found");
            return Ok(StopOutcome::AlreadyStopped);
        }

        info!("Stopping miner (PID: {:?})...", pids);
        self.signal_all(&pids, Signal::Terminate)?;

        for attempt in 1..=self.policy.poll_attempts {
            thread::sleep(self.policy.poll_interval());
            let remaining = self.query()?;
            if remaining.is_empty() {
                success!("Miner stopped gracefully");
                return Ok(StopOutcome::Terminated { pids });
            }
            if attempt % 5 == 0 {
                info!("Waiting for {} process(es) to exit... ({}/{})", remaining.len(), attempt, self.policy.poll_attempts);
            }
        }

        let remaining = self.query()?;
        if remaining.is_empty() {
            success!("Miner stopped gracefully");
            return Ok(StopOutcome::Terminated { pids });
        }

        warn!("Graceful stop timed out, force killing {:?}...", remaining);
        self.signal_all(&remaining, Signal::Kill)?;
        thread::sleep(self.policy.settle());

        let survivors = self.query()?;
        if survivors.is_empty() {
            success!("Miner stopped (forced)");
            Ok(StopOutcome::Killed { pids: remaining })
        } else {
            Err(StopError::StopTimedOut { remaining: survivors })
        }
    }

    fn stop_force(&self) -> Result<StopOutcome, StopError> {
        let pids = self.query()?;
        if pids.is_empty() {
            warn!("No miner processes found");
            return Ok(StopOutcome::AlreadyStopped);
        }

        warn!("Force killing miner (PID: {:?})...", pids);
        self.signal_all(&pids, Signal::Kill)?;
        thread::sleep(self.policy.settle());

        let survivors = self.query()?;
        if survivors.is_empty() {
            success!("Miner force stopped");
            Ok(StopOutcome::Killed { pids })
        } else {
            Err(StopError::ForceStopFailed { remaining: survivors })
        }
    }

    fn signal_all(&self, pids: &[u32], signal: Signal) -> Result<(), StopError> {
        for pid in pids {
            info!("Sending {} to PID {}", signal, pid);
            self.processes.send(*pid, signal)?;
        }
        Ok(())
    }

    pub fn status(&self) -> StatusReport {
        let process_ids = match self.processes.query(&self.signature()) {
            Ok(pids) => pids,
            Err(e) => {
                warn!("Could not read the process table: {}", e);
                Vec::new()
            }
        };
        StatusReport {
            running: !process_ids.is_empty(),
            process_ids,
            supervisor_state: self.supervisor.state(),
        }
    }

    /// Stop through the supervisor when the unit is installed and active, so
    /// `Restart=on-failure` does not bring the miner back. Returns whether a
    /// stop was issued.
    pub fn stop_supervised_service(&self) -> Result<bool, StopError> {
        match self.supervisor.state() {
            SupervisorState::Active => {
                info!("Miner is managed by systemd. Using systemctl stop...");
                self.supervisor.stop()?;
                success!("Service {} stopped", self.identity.service_name);
                Ok(true)
            }
            SupervisorState::Inactive => {
                info!("Service {} is not active", self.identity.service_name);
                Ok(false)
            }
            SupervisorState::NotInstalled => {
                info!("Service {} is not installed", self.identity.service_name);
                Ok(false)
            }
        }
    }
}
