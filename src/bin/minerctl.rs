//! minerctl entry point: CLI parsing, logging setup, command dispatch.

use std::path::{Path, PathBuf};
use std::process;

use clap::{CommandFactory, Parser};
use tracing::{error, info, warn};

use minerctl::app::cli::{Args, Command, StartMode, StopMode, START_HELP, STOP_HELP};
use minerctl::app::confirm::{ConfirmationPort, FixedAnswer, StdinConfirm};
use minerctl::app::logging::{init_tracing, level_filter};
use minerctl::config::persistence::{load_config, resolve_config_path};
use minerctl::config::types::OpsConfig;
use minerctl::daemon::control::{ForegroundTool, LifecycleController, Prepared, StartOutcome, StartRequest, StopKind};
use minerctl::daemon::launch::{run_pair, ChildLauncher};
use minerctl::daemon::status::show_status;
use minerctl::daemon::systemd::Systemd;
use minerctl::error::StartError;
use minerctl::maintenance::{backup, monitor};
use minerctl::provision::{provision, Provisioner};
use minerctl::system::executor::SystemRunner;
use minerctl::system::host::HostEnvironment;
use minerctl::system::process::ProcTable;

#[tokio::main]
async fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            if err.kind() == clap::error::ErrorKind::DisplayVersion {
                println!("\x1b[32mminerctl {} ({})\x1b[0m", env!("CARGO_PKG_VERSION"), std::env::consts::ARCH);
                process::exit(0);
            }
            err.exit();
        }
    };

    let config_path = resolve_config_path(args.ops_config.as_deref());
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {:#}", config_path.display(), e);
            process::exit(1);
        }
    };

    // Priority: 1. --log-level flag, 2. LOG_LEVEL env, 3. config file, 4. default (info)
    let log_level = args
        .log_level
        .clone()
        .or_else(|| std::env::var("LOG_LEVEL").ok().filter(|l| !l.trim().is_empty()))
        .unwrap_or_else(|| config.log_level.clone());
    let filter = level_filter(&log_level).unwrap_or_else(|| {
        eprintln!(
            "Invalid log level '{}'. Using INFO. Valid levels: TRACE, DEBUG, INFO, WARN, ERROR, CRITICAL",
            log_level
        );
        "info"
    });
    init_tracing(filter);

    let Some(command) = args.command else {
        eprintln!("ERROR: No command specified.");
        eprintln!();
        let _ = Args::command().print_help();
        process::exit(1);
    };

    let code = match command {
        Command::Start { mode, force } => run_start(&config, mode.as_deref(), force).await,
        Command::Stop { mode } => run_stop(&config, mode.as_deref()),
        Command::Deploy { source, yes, no } => run_deploy(config, source, yes, no),
        Command::Monitor => run_monitor(&config),
        Command::Backup => run_backup(&config),
    };
    process::exit(code);
}

fn build_controller<'a>(
    config: &'a OpsConfig,
    table: &'a ProcTable,
    supervisor: &'a Systemd<'a>,
    launcher: &'a ChildLauncher,
    confirm: &'a dyn ConfirmationPort,
) -> LifecycleController<'a> {
    LifecycleController::new(&config.identity, config.stop.clone(), table, supervisor, launcher, confirm)
}

async fn run_start(config: &OpsConfig, mode: Option<&str>, force: bool) -> i32 {
    let mode = StartMode::parse(mode);
    if mode == StartMode::Help {
        print!("{}", START_HELP);
        return 0;
    }

    let runner = SystemRunner;
    let table = ProcTable::default();
    let supervisor = Systemd::new(&runner, &config.identity);
    let launcher = ChildLauncher;
    let confirm = StdinConfirm;
    let controller = build_controller(config, &table, &supervisor, &launcher, &confirm);

    let result = match mode {
        StartMode::Default => start_detached(&controller, None, force),
        StartMode::Config(path) => start_detached(&controller, Some(path), force),
        StartMode::Terminal => controller.run_tool(ForegroundTool::Terminal),
        StartMode::Benchmark => controller.run_tool(ForegroundTool::Benchmark),
        StartMode::All => start_all(&controller, force).await,
        StartMode::Help => Ok(0),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            e.exit_code()
        }
    }
}

fn start_detached(controller: &LifecycleController<'_>, config: Option<PathBuf>, force: bool) -> Result<i32, StartError> {
    match controller.start(&StartRequest { config, force })? {
        StartOutcome::Started { .. } => Ok(0),
        StartOutcome::Declined { running } => {
            info!("Miner left running (PID: {:?})", running);
            Ok(0)
        }
    }
}

async fn start_all(controller: &LifecycleController<'_>, force: bool) -> Result<i32, StartError> {
    let miner = match controller.prepare(&StartRequest { config: None, force })? {
        Prepared::Launch(spec) => spec,
        Prepared::Declined { .. } => return Ok(0),
    };
    let dashboard = controller.dashboard_spec()?;

    info!("Starting miner and dashboard...");
    run_pair(&miner, &dashboard)
        .await
        .map_err(|source| StartError::Launch { what: "miner and dashboard".to_string(), source })?;
    Ok(0)
}

fn run_stop(config: &OpsConfig, mode: Option<&str>) -> i32 {
    let mode = match StopMode::parse(mode) {
        Ok(mode) => mode,
        Err(msg) => {
            error!("{}", msg);
            print!("{}", STOP_HELP);
            return 1;
        }
    };
    if mode == StopMode::Help {
        print!("{}", STOP_HELP);
        return 0;
    }

    let runner = SystemRunner;
    let table = ProcTable::default();
    let supervisor = Systemd::new(&runner, &config.identity);
    let launcher = ChildLauncher;
    let confirm = StdinConfirm;
    let controller = build_controller(config, &table, &supervisor, &launcher, &confirm);

    let result = match mode {
        StopMode::Graceful => controller.stop(StopKind::Graceful).map(|_| ()),
        StopMode::Force => controller.stop(StopKind::Force).map(|_| ()),
        StopMode::Service => controller.stop_supervised_service().map(|_| ()),
        StopMode::Status => {
            show_status(&controller.status(), &config.identity, &config.identity.service_log());
            Ok(())
        }
        StopMode::Help => Ok(()),
    };

    match result {
        Ok(()) => 0,
        Err(e) => {
            error!("{}", e);
            error!("Manual intervention required: check `ps aux | grep main.py`");
            e.exit_code()
        }
    }
}

fn run_deploy(config: OpsConfig, source: Option<PathBuf>, yes: bool, no: bool) -> i32 {
    let runner = SystemRunner;
    let confirm: Box<dyn ConfirmationPort> = match (yes, no) {
        (true, _) => Box::new(FixedAnswer(true)),
        (_, true) => Box::new(FixedAnswer(false)),
        _ => Box::new(StdinConfirm),
    };
    let source = match source.map(Ok).unwrap_or_else(std::env::current_dir) {
        Ok(dir) => dir,
        Err(e) => {
            error!("Cannot determine the application source directory: {}", e);
            return 1;
        }
    };

    let host = HostEnvironment::gather(&runner);
    let mut provisioner = Provisioner::new(config, &runner, confirm.as_ref(), source);
    match std::env::current_exe() {
        Ok(current) => provisioner = provisioner.with_ctl_source(current),
        Err(e) => warn!("Cannot locate the running binary, scheduled jobs need it installed: {}", e),
    }
    match provision(&host, &provisioner) {
        Ok(report) => {
            if !report.warnings.is_empty() {
                warn!("Completed with {} warning(s)", report.warnings.len());
            }
            0
        }
        Err(e) => {
            error!("{}", e);
            e.exit_code()
        }
    }
}

fn run_monitor(config: &OpsConfig) -> i32 {
    let runner = SystemRunner;
    let supervisor = Systemd::new(&runner, &config.identity);
    let sample = monitor::ResourceSample::collect();
    monitor::sweep(&supervisor, &config.identity.log_dir, sample, &monitor::local_hostname());
    0
}

fn run_backup(config: &OpsConfig) -> i32 {
    let runner = SystemRunner;
    match backup::run_backup(&runner, &config.identity, config.deploy.backup_retention_days, Path::new("/")) {
        Ok(_) => 0,
        Err(e) => {
            error!("Backup failed: {:#}", e);
            1
        }
    }
}
