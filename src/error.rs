//! Error taxonomy for provisioning and lifecycle operations, with exit codes.

use std::path::PathBuf;

use thiserror::Error;

/// Fatal provisioning failures. Non-fatal conditions (low resources) are
/// reported as [`crate::provision::ProvisionWarning`] instead.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("root privileges required (running as uid {uid}); re-run with sudo")]
    InsufficientPrivilege { uid: u32 },

    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("no supported package manager found (need apt-get, dnf or yum)")]
    UnsupportedPackageManager,

    #[error("deployment verification failed: {0}")]
    DeploymentVerificationFailed(String),

    #[error("{step} failed: {source:#}")]
    Step {
        step: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl ProvisionError {
    pub fn step(step: &'static str, source: anyhow::Error) -> Self {
        ProvisionError::Step { step, source }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            ProvisionError::InsufficientPrivilege { .. } => 2,
            ProvisionError::UnsupportedPlatform(_) => 3,
            ProvisionError::UnsupportedPackageManager => 4,
            ProvisionError::DeploymentVerificationFailed(_) => 5,
            ProvisionError::Step { .. } => 6,
        }
    }
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error("configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("runtime environment missing at {} (run `minerctl deploy` first)", .0.display())]
    EnvironmentMissing(PathBuf),

    #[error("failed to launch {what}: {source:#}")]
    Launch {
        what: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Stop(#[from] StopError),
}

impl StartError {
    pub fn exit_code(&self) -> i32 {
        match self {
            StartError::ConfigNotFound(_) => 10,
            StartError::EnvironmentMissing(_) => 11,
            StartError::Launch { .. } => 12,
            StartError::Stop(e) => e.exit_code(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StopError {
    #[error("processes still running after SIGKILL escalation: {remaining:?}")]
    StopTimedOut { remaining: Vec<u32> },

    #[error("processes survived SIGKILL: {remaining:?}")]
    ForceStopFailed { remaining: Vec<u32> },

    #[error("process table unavailable: {0:#}")]
    Probe(#[from] anyhow::Error),
}

impl StopError {
    pub fn exit_code(&self) -> i32 {
        match self {
            StopError::StopTimedOut { .. } => 20,
            StopError::ForceStopFailed { .. } => 21,
            StopError::Probe(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_per_kind() {
        let codes = [
            ProvisionError::InsufficientPrivilege { uid: 1000 }.exit_code(),
            ProvisionError::UnsupportedPlatform("x".into()).exit_code(),
            ProvisionError::UnsupportedPackageManager.exit_code(),
            ProvisionError::DeploymentVerificationFailed("x".into()).exit_code(),
            StartError::ConfigNotFound(PathBuf::from("/x")).exit_code(),
            StartError::EnvironmentMissing(PathBuf::from("/x")).exit_code(),
            StopError::StopTimedOut { remaining: vec![1] }.exit_code(),
            StopError::ForceStopFailed { remaining: vec![1] }.exit_code(),
        ];
        let mut sorted = codes.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), codes.len());
        assert!(codes.iter().all(|c| *c != 0));
    }

    #[test]
    fn start_error_propagates_stop_exit_code() {
        let err = StartError::from(StopError::StopTimedOut { remaining: vec![7] });
        assert_eq!(err.exit_code(), 20);
    }
}
