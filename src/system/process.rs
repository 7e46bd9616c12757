//! Process discovery by command-line signature, and signal delivery.
//!
//! A [`ProcessTable::query`] result is a snapshot. Callers re-query before
//! every decision instead of reusing an earlier answer.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, Result};
use tracing::trace;

use crate::config::types::ServiceIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Terminate,
    Kill,
}

impl Signal {
    fn raw(self) -> libc::c_int {
        match self {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Terminate => write!(f, "SIGTERM"),
            Signal::Kill => write!(f, "SIGKILL"),
        }
    }
}

/// Interpreter + entry point, e.g. `.../venv/bin/python /opt/crypto-miner/main.py`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSignature {
    pub interpreter: String,
    pub entry_point: PathBuf,
}

impl ProcessSignature {
    pub fn new(interpreter: impl Into<String>, entry_point: impl Into<PathBuf>) -> Self {
        Self { interpreter: interpreter.into(), entry_point: entry_point.into() }
    }

    pub fn for_service(identity: &ServiceIdentity) -> Self {
        Self::new("python", identity.entry_point())
    }

    /// argv[0] must be the interpreter (any `python*` binary) and one of the
    /// following non-flag arguments must resolve to the entry point.
    pub fn matches(&self, argv: &[String], cwd: Option<&Path>) -> bool {
        let Some(program) = argv.first() else { return false };
        let program_name = Path::new(program)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if !program_name.starts_with(&self.interpreter) {
            return false;
        }

        let wanted = normalize(&self.entry_point);
        argv[1..]
            .iter()
            .filter(|arg| !arg.starts_with('-'))
            .any(|arg| {
                let candidate = Path::new(arg);
                if candidate.is_absolute() {
                    normalize(candidate) == wanted
                } else {
                    cwd.map(|dir| normalize(&dir.join(candidate)) == wanted).unwrap_or(false)
                }
            })
    }
}

fn normalize(path: &Path) -> PathBuf {
    path.components().filter(|c| !matches!(c, Component::CurDir)).collect()
}

pub trait ProcessTable {
    /// PIDs currently matching `signature`, ascending.
    fn query(&self, signature: &ProcessSignature) -> Result<Vec<u32>>;

    /// Deliver `signal`. A process that already exited is not an error.
    fn send(&self, pid: u32, signal: Signal) -> Result<()>;
}

/// Reads `/proc` directly; `/proc` readdir lists thread-group leaders only,
/// so threads of the same interpreter are never counted twice.
#[derive(Debug, Clone)]
pub struct ProcTable {
    proc_root: PathBuf,
}

impl Default for ProcTable {
    fn default() -> Self {
        Self { proc_root: PathBuf::from("/proc") }
    }
}

impl ProcTable {
    fn read_cmdline(&self, pid: u32) -> Option<Vec<String>> {
        let raw = fs::read(self.proc_root.join(pid.to_string()).join("cmdline")).ok()?;
        if raw.is_empty() {
            // kernel threads and zombies
            return None;
        }
        Some(
            raw.split(|b| *b == 0)
                .filter(|s| !s.is_empty())
                .map(|s| String::from_utf8_lossy(s).to_string())
                .collect(),
        )
    }
}

impl ProcessTable for ProcTable {
    fn query(&self, signature: &ProcessSignature) -> Result<Vec<u32>> {
        let me = std::process::id();
        let entries = fs::read_dir(&self.proc_root)
            .map_err(|e| anyhow!("Failed to read {:?}: {}", self.proc_root, e))?;

        let mut pids = Vec::new();
        for entry in entries.flatten() {
            let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
                continue;
            };
            if pid == me {
                continue;
            }
            let Some(argv) = self.read_cmdline(pid) else { continue };
            let cwd = fs::read_link(entry.path().join("cwd")).ok();
            if signature.matches(&argv, cwd.as_deref()) {
                trace!("PID {} matches {:?}: {:?}", pid, signature.entry_point, argv);
                pids.push(pid);
            }
        }
        pids.sort_unstable();
        Ok(pids)
    }

    fn send(&self, pid: u32, signal: Signal) -> Result<()> {
        send_signal(pid, signal)
    }
}

pub fn send_signal(pid: u32, signal: Signal) -> Result<()> {
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal.raw()) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(anyhow!("Failed to send {} to PID {}: {}", signal, pid, err))
}
