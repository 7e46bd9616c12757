//! Steps 6-8: deployed configuration, systemd unit, log rotation, firewall.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::config::persistence::save_config;
use crate::config::types::{DeploySettings, OpsConfig, ServiceIdentity};
use crate::daemon::systemd::{install_service_definition, ServiceDefinition};
use crate::provision::ProvisionWarning;
use crate::success;
use crate::system::executor::{run_checked, CommandRunner};
use crate::system::files::{rooted, set_mode, write_if_changed, FileChange};

pub const LOGROTATE_DIR: &str = "/etc/logrotate.d";

/// Pick `production.conf`, falling back to `default.conf` with a warning.
fn config_template(template_dir: &Path) -> Result<(PathBuf, Option<ProvisionWarning>)> {
    let production = template_dir.join("production.conf");
    if production.exists() {
        return Ok((production, None));
    }
    let default = template_dir.join("default.conf");
    if default.exists() {
        warn!("production.conf not found, deploying default.conf instead");
        let warning = ProvisionWarning::Degraded {
            step: "configuration",
            detail: "production.conf not found, default.conf deployed".to_string(),
        };
        return Ok((default, Some(warning)));
    }
    bail!("no configuration template in {}", template_dir.display())
}

/// Install the miner configuration (root-owned, group-readable by the
/// service account) and persist the tool configuration next to it. A
/// differing existing file is kept as `<name>.previous`.
pub fn deploy_config(
    runner: &dyn CommandRunner,
    config: &OpsConfig,
    root: &Path,
) -> Result<(FileChange, Option<ProvisionWarning>)> {
    let identity = &config.identity;
    let template_dir = rooted(root, &identity.working_dir).join("config");
    let (template, warning) = config_template(&template_dir)?;
    let content = fs::read_to_string(&template).with_context(|| format!("Failed to read {}", template.display()))?;

    let target = rooted(root, &identity.config_file());
    if let Ok(existing) = fs::read_to_string(&target) {
        if existing != content {
            let previous = previous_path(&target);
            fs::write(&previous, existing).with_context(|| format!("Failed to write {}", previous.display()))?;
            info!("Existing configuration kept as {}", previous.display());
        }
    }

    let change = write_if_changed(&target, &content)?;
    let target_arg = target.display().to_string();
    run_checked(runner, "chown", &[&format!("root:{}", identity.account), &target_arg])?;
    set_mode(&target, 0o640)?;
    match change {
        FileChange::Unchanged => info!("Configuration already up-to-date"),
        _ => success!(
            "Configuration deployed from {} to {}",
            template.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default(),
            identity.config_file().display()
        ),
    }

    save_config(config, &rooted(root, &identity.ops_config_file()))?;
    Ok((change, warning))
}

fn previous_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".previous");
    target.with_file_name(name)
}

pub fn install_unit(
    runner: &dyn CommandRunner,
    identity: &ServiceIdentity,
    deploy: &DeploySettings,
    root: &Path,
) -> Result<FileChange> {
    let definition = ServiceDefinition::for_identity(identity, deploy);
    install_service_definition(root, runner, identity, &definition)
}

fn reload_hook(identity: &ServiceIdentity) -> String {
    format!(
        "    sharedscripts\n    postrotate\n        systemctl reload {} > /dev/null 2>&1 || true\n    endscript\n",
        identity.unit_name()
    )
}

pub fn render_log_rotation(identity: &ServiceIdentity) -> String {
    format!(
        "{}/*.log {{\n    daily\n    rotate 30\n    compress\n    delaycompress\n    missingok\n    notifempty\n    create 0640 {} {}\n{}}}\n",
        identity.log_dir.display(),
        identity.account,
        identity.account,
        reload_hook(identity)
    )
}

pub fn render_backup_rotation(identity: &ServiceIdentity) -> String {
    format!(
        "{}/*.tar.gz {{\n    weekly\n    rotate 12\n    compress\n    missingok\n    notifempty\n{}}}\n",
        identity.backup_dir.display(),
        reload_hook(identity)
    )
}

pub fn install_logrotate(identity: &ServiceIdentity, root: &Path) -> Result<()> {
    let dir = rooted(root, Path::new(LOGROTATE_DIR));
    let rules = [
        (identity.service_name.clone(), render_log_rotation(identity)),
        (format!("{}-backups", identity.service_name), render_backup_rotation(identity)),
    ];
    for (name, content) in rules {
        let path = dir.join(&name);
        if write_if_changed(&path, &content)?.changed() {
            set_mode(&path, 0o644)?;
            success!("Log rotation rule written: {}/{}", LOGROTATE_DIR, name);
        } else {
            info!("Log rotation rule {} up-to-date", name);
        }
    }
    Ok(())
}

/// Copy the running binary to `target` so scheduled jobs resolve it.
pub fn install_binary(current: &Path, target: &Path) -> Result<FileChange> {
    let bytes = fs::read(current).with_context(|| format!("Failed to read {}", current.display()))?;
    let change = match fs::read(target) {
        Ok(existing) if existing == bytes => return Ok(FileChange::Unchanged),
        Ok(_) => FileChange::Updated,
        Err(_) => FileChange::Created,
    };
    info!("Installing {} to {}...", current.display(), target.display());
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    // Replace through a temp file: the target may be the executable running now
    let staging = target.with_extension("new");
    fs::write(&staging, &bytes).with_context(|| format!("Failed to write {}", staging.display()))?;
    set_mode(&staging, 0o755)?;
    fs::rename(&staging, target).with_context(|| format!("Failed to install {}", target.display()))?;
    success!("Installed {}", target.display());
    Ok(change)
}

/// Ensure `port/tcp` is allowed by ufw or firewalld, whichever is active.
pub fn open_firewall_port(runner: &dyn CommandRunner, port: u16) -> Result<()> {
    let rule = format!("{}/tcp", port);

    if runner.has_program("ufw") {
        let status = run_checked(runner, "ufw", &["status"])?;
        if !status.contains("Status: active") {
            info!("ufw is inactive, not opening port {}", rule);
            return Ok(());
        }
        if status.lines().any(|l| l.split_whitespace().next() == Some(rule.as_str())) {
            info!("Firewall already allows {}", rule);
            return Ok(());
        }
        run_checked(runner, "ufw", &["allow", &rule])?;
        success!("Firewall: allowed {} (ufw)", rule);
    } else if runner.has_program("firewall-cmd") {
        if !runner.run("firewall-cmd", &["--state"])?.success() {
            info!("firewalld is not running, not opening port {}", rule);
            return Ok(());
        }
        if runner.run("firewall-cmd", &[&format!("--query-port={}", rule)])?.success() {
            info!("Firewall already allows {}", rule);
            return Ok(());
        }
        run_checked(runner, "firewall-cmd", &["--permanent", &format!("--add-port={}", rule)])?;
        run_checked(runner, "firewall-cmd", &["--reload"])?;
        success!("Firewall: allowed {} (firewalld)", rule);
    } else {
        info!("No firewall manager found (ufw, firewalld); port {} not configured", rule);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::fake::FakeHost;
    use crate::system::executor::CommandOutput;
    use crate::system::files::mode_of;

    fn with_template(name: &str, body: &str) -> (tempfile::TempDir, OpsConfig) {
        let dir = tempfile::tempdir().unwrap();
        let config = OpsConfig::default();
        let templates = rooted(dir.path(), &config.identity.working_dir).join("config");
        fs::create_dir_all(&templates).unwrap();
        fs::write(templates.join(name), body).unwrap();
        (dir, config)
    }

    #[test]
    fn production_template_wins() {
        let (dir, config) = with_template("production.conf", "[blockchain]\nnetwork = mainnet\n");
        let templates = rooted(dir.path(), &config.identity.working_dir).join("config");
        fs::write(templates.join("default.conf"), "[blockchain]\nnetwork = testnet\n").unwrap();
        let fake = FakeHost::debian(dir.path());

        let (change, warning) = deploy_config(&fake, &config, dir.path()).unwrap();
        assert_eq!(change, FileChange::Created);
        assert!(warning.is_none());

        let deployed = rooted(dir.path(), &config.identity.config_file());
        assert!(fs::read_to_string(&deployed).unwrap().contains("mainnet"));
        assert_eq!(mode_of(&deployed).unwrap(), 0o640);
        assert!(rooted(dir.path(), &config.identity.ops_config_file()).exists());
    }

    #[test]
    fn default_template_fallback_warns() {
        let (dir, config) = with_template("default.conf", "[blockchain]\n");
        let fake = FakeHost::debian(dir.path());
        let (_, warning) = deploy_config(&fake, &config, dir.path()).unwrap();
        assert!(matches!(warning, Some(ProvisionWarning::Degraded { step: "configuration", .. })));
    }

    #[test]
    fn changed_config_keeps_previous_copy() {
        let (dir, config) = with_template("production.conf", "[blockchain]\nv = 2\n");
        let deployed = rooted(dir.path(), &config.identity.config_file());
        fs::create_dir_all(deployed.parent().unwrap()).unwrap();
        fs::write(&deployed, "[blockchain]\nv = 1\n").unwrap();
        let fake = FakeHost::debian(dir.path());

        let (change, _) = deploy_config(&fake, &config, dir.path()).unwrap();
        assert_eq!(change, FileChange::Updated);
        let previous = deployed.with_file_name("miner.conf.previous");
        assert_eq!(fs::read_to_string(previous).unwrap(), "[blockchain]\nv = 1\n");

        let (again, _) = deploy_config(&fake, &config, dir.path()).unwrap();
        assert_eq!(again, FileChange::Unchanged);
    }

    #[test]
    fn rotation_rules() {
        let identity = ServiceIdentity::default();
        let logs = render_log_rotation(&identity);
        assert!(logs.starts_with("/var/log/crypto-miner/*.log {\n    daily\n    rotate 30\n    compress\n"));
        assert!(logs.contains("systemctl reload crypto-miner.service"));
        assert!(!logs.contains("restart"));

        let backups = render_backup_rotation(&identity);
        assert!(backups.contains("weekly\n    rotate 12\n    compress\n"));

        let dir = tempfile::tempdir().unwrap();
        install_logrotate(&identity, dir.path()).unwrap();
        install_logrotate(&identity, dir.path()).unwrap();
        assert!(dir.path().join("etc/logrotate.d/crypto-miner").exists());
        assert!(dir.path().join("etc/logrotate.d/crypto-miner-backups").exists());
    }

    #[test]
    fn binary_install_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let current = dir.path().join("minerctl");
        fs::write(&current, b"\x7fELF").unwrap();
        let target = dir.path().join("usr/local/bin/minerctl");

        assert_eq!(install_binary(&current, &target).unwrap(), FileChange::Created);
        assert_eq!(install_binary(&current, &target).unwrap(), FileChange::Unchanged);
        assert_eq!(mode_of(&target).unwrap(), 0o755);
    }

    struct Ufw {
        status: &'static str,
        calls: std::sync::Mutex<Vec<String>>,
    }

    impl CommandRunner for Ufw {
        fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
            self.calls.lock().unwrap().push(format!("{} {}", program, args.join(" ")));
            Ok(CommandOutput { code: Some(0), stdout: self.status.to_string(), stderr: String::new() })
        }
        fn run_with_input(&self, program: &str, args: &[&str], _input: &str) -> Result<CommandOutput> {
            self.run(program, args)
        }
        fn has_program(&self, program: &str) -> bool {
            program == "ufw"
        }
    }

    #[test]
    fn firewall_rule_is_ensure_present() {
        let open = Ufw {
            status: "Status: active\n\nTo                         Action      From\n--                         ------      ----\n5000/tcp                   ALLOW       Anywhere\n",
            calls: Default::default(),
        };
        open_firewall_port(&open, 5000).unwrap();
        assert_eq!(*open.calls.lock().unwrap(), vec!["ufw status".to_string()]);

        let closed = Ufw { status: "Status: active\n", calls: Default::default() };
        open_firewall_port(&closed, 5000).unwrap();
        assert_eq!(closed.calls.lock().unwrap().last().unwrap(), "ufw allow 5000/tcp");

        let inactive = Ufw { status: "Status: inactive\n", calls: Default::default() };
        open_firewall_port(&inactive, 5000).unwrap();
        assert_eq!(inactive.calls.lock().unwrap().len(), 1);
    }
}
