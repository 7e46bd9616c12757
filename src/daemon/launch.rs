//! Spawning the managed program: detached service runs, foreground tools,
//! and the two-process `start all` mode.

use std::fs;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::system::process::{send_signal, Signal};

/// One invocation of the external program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub log_file: PathBuf,
}

impl LaunchSpec {
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub trait Launcher {
    /// Start in the background with output appended to the log file.
    fn spawn_detached(&self, spec: &LaunchSpec) -> Result<u32>;

    /// Run attached to the terminal and wait; returns the exit code.
    fn run_foreground(&self, spec: &LaunchSpec) -> Result<i32>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ChildLauncher;

impl Launcher for ChildLauncher {
    fn spawn_detached(&self, spec: &LaunchSpec) -> Result<u32> {
        if let Some(parent) = spec.log_file.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }
        let log_file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&spec.log_file)
            .with_context(|| format!("Failed to open {}", spec.log_file.display()))?;

        // New process group: Ctrl+C in the invoking shell must not reach the miner
        let child = process::Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.working_dir)
            .env("PYTHONUNBUFFERED", "1")
            .stdin(process::Stdio::null())
            .stdout(log_file.try_clone()?)
            .stderr(log_file)
            .process_group(0)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", spec.command_line()))?;

        Ok(child.id())
    }

    fn run_foreground(&self, spec: &LaunchSpec) -> Result<i32> {
        let status = process::Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.working_dir)
            .status()
            .with_context(|| format!("Failed to run {}", spec.command_line()))?;
        Ok(status.code().unwrap_or(1))
    }
}

/// Run two independent processes until both exit or Ctrl+C arrives; on
/// interrupt both receive SIGTERM and are awaited before returning.
pub async fn run_pair(primary: &LaunchSpec, secondary: &LaunchSpec) -> Result<()> {
    let mut first = spawn_attached(primary)?;
    let mut second = match spawn_attached(secondary) {
        Ok(child) => child,
        Err(e) => {
            if let Some(pid) = first.id() {
                let _ = send_signal(pid, Signal::Terminate);
            }
            let _ = first.wait().await;
            return Err(e);
        }
    };

    let first_pid = first.id().unwrap_or_default();
    let second_pid = second.id().unwrap_or_default();
    info!("{} started (PID: {})", primary.name, first_pid);
    info!("{} started (PID: {})", secondary.name, second_pid);
    info!("Press Ctrl+C to stop both");

    let mut first_done = false;
    let mut second_done = false;

    while !(first_done && second_done) {
        tokio::select! {
            status = first.wait(), if !first_done => {
                first_done = true;
                warn!("{} exited: {}", primary.name, describe(status));
            }
            status = second.wait(), if !second_done => {
                second_done = true;
                warn!("{} exited: {}", secondary.name, describe(status));
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, stopping {} and {}", primary.name, secondary.name);
                if !first_done {
                    send_signal(first_pid, Signal::Terminate)?;
                }
                if !second_done {
                    send_signal(second_pid, Signal::Terminate)?;
                }
                if !first_done {
                    let _ = first.wait().await;
                }
                if !second_done {
                    let _ = second.wait().await;
                }
                break;
            }
        }
    }

    info!("All processes stopped");
    Ok(())
}

fn spawn_attached(spec: &LaunchSpec) -> Result<tokio::process::Child> {
    tokio::process::Command::new(&spec.program)
        .args(&spec.args)
        .current_dir(&spec.working_dir)
        .env("PYTHONUNBUFFERED", "1")
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn {}", spec.command_line()))
}

fn describe(status: std::io::Result<process::ExitStatus>) -> String {
    match status {
        Ok(s) => s.to_string(),
        Err(e) => format!("wait failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(name: &str, script: &str, dir: &std::path::Path) -> LaunchSpec {
        LaunchSpec {
            name: name.to_string(),
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), script.to_string()],
            working_dir: dir.to_path_buf(),
            log_file: dir.join("logs").join("out.log"),
        }
    }

    #[test]
    fn detached_output_goes_to_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let spec = shell("echo", "echo started", dir.path());
        let pid = ChildLauncher.spawn_detached(&spec).unwrap();
        assert!(pid > 0);

        let log = dir.path().join("logs").join("out.log");
        let mut content = String::new();
        for _ in 0..50 {
            content = fs::read_to_string(&log).unwrap_or_default();
            if content.contains("started") {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
        assert!(content.contains("started"));
    }

    #[test]
    fn foreground_returns_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(ChildLauncher.run_foreground(&shell("t", "exit 4", dir.path())).unwrap(), 4);
    }

    #[tokio::test]
    async fn pair_returns_when_both_exit() {
        let dir = tempfile::tempdir().unwrap();
        let a = shell("miner", "exit 0", dir.path());
        let b = shell("dashboard", "sleep 0.1", dir.path());
        run_pair(&a, &b).await.unwrap();
    }

    fn read_pid(path: &std::path::Path) -> Option<i32> {
        fs::read_to_string(path).ok()?.trim().parse().ok()
    }

    #[tokio::test]
    async fn interrupt_terminates_both_children() {
        use std::time::{Duration, Instant};
        use tokio::signal::unix::{signal, SignalKind};

        let dir = tempfile::tempdir().unwrap();
        // SIGINT must reach a tokio listener, not the default handler
        let _listener = signal(SignalKind::interrupt()).unwrap();
        let a = shell("miner", "echo $$ > miner.pid; exec sleep 30", dir.path());
        let b = shell("dashboard", "echo $$ > dashboard.pid; exec sleep 30", dir.path());

        let pair = run_pair(&a, &b);
        tokio::pin!(pair);
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut pids = Vec::new();
        loop {
            tokio::select! {
                result = &mut pair => {
                    result.unwrap();
                    break;
                }
                _ = tokio::time::sleep(Duration::from_millis(100)) => {
                    assert!(Instant::now() < deadline, "run_pair did not return after SIGINT");
                    if pids.is_empty() {
                        if let (Some(m), Some(d)) = (read_pid(&dir.path().join("miner.pid")), read_pid(&dir.path().join("dashboard.pid"))) {
                            pids = vec![m, d];
                        }
                    }
                    if !pids.is_empty() {
                        unsafe {
                            libc::raise(libc::SIGINT);
                        }
                    }
                }
            }
        }

        assert_eq!(pids.len(), 2);
        for pid in pids {
            assert_eq!(unsafe { libc::kill(pid, 0) }, -1, "child {} survived", pid);
        }
    }

    #[test]
    fn command_line_joins_program_and_args() {
        let spec = LaunchSpec {
            name: "miner".into(),
            program: PathBuf::from("/opt/crypto-miner/venv/bin/python"),
            args: vec!["/opt/crypto-miner/main.py".into(), "--terminal".into()],
            working_dir: PathBuf::from("/opt/crypto-miner"),
            log_file: PathBuf::from("/var/log/crypto-miner/miner.log"),
        };
        assert_eq!(spec.command_line(), "/opt/crypto-miner/venv/bin/python /opt/crypto-miner/main.py --terminal");
    }
}
