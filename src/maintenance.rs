//! Bodies of the scheduled jobs: the monitoring sweep and the backup run.

pub mod backup;
pub mod monitor;
