//! minerctl: host provisioning and lifecycle control for the crypto-miner service.
//!
//! The Provisioner (`provision`) prepares a host once (account, directories,
//! packages, runtime environment, configuration, systemd unit, log rotation,
//! cron jobs). The Lifecycle Controller (`daemon::control`) starts, stops and
//! reports on the managed process afterwards. The mining program itself is an
//! external collaborator reached through its launch command and config path.

pub mod app;
pub mod config;
pub mod daemon;
pub mod error;
pub mod maintenance;
pub mod provision;
pub mod system;

pub use config::types::{OpsConfig, ServiceIdentity};
pub use daemon::control::LifecycleController;
pub use error::{ProvisionError, StartError, StopError};
pub use provision::{provision, ProvisionReport, Provisioner};
