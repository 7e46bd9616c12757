//! Command-line argument definitions (clap) and help text.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub const START_HELP: &str = "
Usage: minerctl start [MODE] [--force]

Modes:
  default            Start the miner with its default configuration (same as no mode)
  <config-path>      Start the miner with --config <config-path>
  terminal           Run the terminal dashboard in the foreground
  benchmark          Run algorithm benchmarks in the foreground
  all                Run the miner and the web dashboard together (Ctrl+C stops both)
  help               Show this help

Options:
  -f, --force        Restart a running instance without asking
";

pub const STOP_HELP: &str = "
Usage: minerctl stop [MODE]

Modes:
  stop               Graceful stop: SIGTERM, wait up to 30s, then SIGKILL (default)
  force              Send SIGKILL immediately
  service            Stop the systemd service if it is active
  status             Show running processes and service state
  help               Show this help
";

#[derive(Parser, Debug)]
#[command(name = "minerctl")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Provision a host for the crypto-miner service and control its lifecycle", long_about = None)]
pub struct Args {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR, CRITICAL)
    #[arg(long = "log-level", global = true)]
    pub log_level: Option<String>,

    /// Tool configuration file (default: $MINERCTL_CONFIG or /etc/crypto-miner/minerctl.json)
    #[arg(long = "ops-config", global = true)]
    pub ops_config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the miner (or a foreground tool)
    Start {
        /// default | <config-path> | terminal | benchmark | all | help
        mode: Option<String>,

        /// Restart a running instance without asking
        #[arg(short, long)]
        force: bool,
    },

    /// Stop the miner or report its status
    Stop {
        /// stop | force | service | status | help
        mode: Option<String>,
    },

    /// Provision this host (account, directories, packages, service, jobs)
    Deploy {
        /// Application source tree to install (default: current directory)
        #[arg(long)]
        source: Option<PathBuf>,

        /// Answer yes to every prompt
        #[arg(short = 'y', long, conflicts_with = "no")]
        yes: bool,

        /// Answer no to every prompt
        #[arg(long)]
        no: bool,
    },

    /// Run one monitoring sweep (installed as a cron job)
    Monitor,

    /// Create a backup archive and prune old ones (installed as a cron job)
    Backup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartMode {
    Default,
    Config(PathBuf),
    Terminal,
    Benchmark,
    All,
    Help,
}

impl StartMode {
    pub fn parse(mode: Option<&str>) -> Self {
        match mode.map(str::trim) {
            None | Some("") | Some("default") => StartMode::Default,
            Some("terminal") => StartMode::Terminal,
            Some("benchmark") => StartMode::Benchmark,
            Some("all") => StartMode::All,
            Some("help") | Some("-h") | Some("--help") => StartMode::Help,
            Some(path) => StartMode::Config(PathBuf::from(path)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    Graceful,
    Force,
    Service,
    Status,
    Help,
}

impl StopMode {
    pub fn parse(mode: Option<&str>) -> Result<Self, String> {
        match mode.map(str::trim) {
            None | Some("") | Some("stop") => Ok(StopMode::Graceful),
            Some("force") => Ok(StopMode::Force),
            Some("service") => Ok(StopMode::Service),
            Some("status") => Ok(StopMode::Status),
            Some("help") | Some("-h") | Some("--help") => Ok(StopMode::Help),
            Some(other) => Err(format!("unknown stop mode '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_modes() {
        assert_eq!(StartMode::parse(None), StartMode::Default);
        assert_eq!(StartMode::parse(Some("default")), StartMode::Default);
        assert_eq!(StartMode::parse(Some("all")), StartMode::All);
        assert_eq!(
            StartMode::parse(Some("config/production.conf")),
            StartMode::Config(PathBuf::from("config/production.conf"))
        );
    }

    #[test]
    fn stop_modes() {
        assert_eq!(StopMode::parse(None), Ok(StopMode::Graceful));
        assert_eq!(StopMode::parse(Some("force")), Ok(StopMode::Force));
        assert_eq!(StopMode::parse(Some("status")), Ok(StopMode::Status));
        assert!(StopMode::parse(Some("kill-all")).is_err());
    }

    #[test]
    fn clap_parses_subcommands() {
        let args = Args::try_parse_from(["minerctl", "start", "terminal"]).unwrap();
        assert!(matches!(args.command, Some(Command::Start { ref mode, force: false }) if mode.as_deref() == Some("terminal")));

        let args = Args::try_parse_from(["minerctl", "--log-level", "debug", "stop", "force"]).unwrap();
        assert_eq!(args.log_level.as_deref(), Some("debug"));

        assert!(Args::try_parse_from(["minerctl", "deploy", "--yes", "--no"]).is_err());
    }
}
