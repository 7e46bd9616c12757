//! Steps 2-3: service account and directory layout.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info};

use crate::config::types::ServiceIdentity;
use crate::success;
use crate::system::executor::{run_checked, CommandRunner};
use crate::system::files::{rooted, set_mode};

const NOLOGIN_SHELL: &str = "/usr/sbin/nologin";
/// useradd: "username already in use"
const USERADD_EXISTS: i32 = 9;

pub fn account_exists(runner: &dyn CommandRunner, account: &str) -> Result<bool> {
    Ok(runner.run("id", &["-u", account])?.success())
}

/// Create the system account with no login shell and the working directory
/// as home. An existing account is left as is.
pub fn ensure_account(runner: &dyn CommandRunner, identity: &ServiceIdentity) -> Result<()> {
    let account = identity.account.as_str();
    if account_exists(runner, account)? {
        info!("User '{}' already exists", account);
        return Ok(());
    }

    let home = identity.working_dir.display().to_string();
    let output = runner.run(
        "useradd",
        &["--system", "--shell", NOLOGIN_SHELL, "--home-dir", &home, "--no-create-home", account],
    )?;
    match output.code {
        Some(0) => {
            success!("Created system user '{}'", account);
            Ok(())
        }
        Some(USERADD_EXISTS) => {
            info!("User '{}' already exists", account);
            Ok(())
        }
        _ => Err(anyhow!("useradd {} failed: {}", account, output.stderr.trim())),
    }
}

/// Create working, log, config, state and backup directories. Existing
/// directories keep their contents; ownership and modes are reapplied.
pub fn ensure_directories(runner: &dyn CommandRunner, identity: &ServiceIdentity, root: &Path) -> Result<()> {
    let owner = format!("{0}:{0}", identity.account);
    let config_owner = format!("root:{}", identity.account);

    let owned = [
        &identity.working_dir,
        &identity.log_dir,
        &identity.state_dir,
        &identity.backup_dir,
    ];
    for dir in owned {
        let path = create(root, dir)?;
        run_checked(runner, "chown", &["-R", &owner, &path.display().to_string()])
            .with_context(|| format!("Failed to set owner of {}", dir.display()))?;
        set_mode(&path, 0o755)?;
    }

    // Config: the service reads, only root writes
    let config = create(root, &identity.config_dir)?;
    run_checked(runner, "chown", &[&config_owner, &config.display().to_string()])
        .with_context(|| format!("Failed to set owner of {}", identity.config_dir.display()))?;
    set_mode(&config, 0o750)?;

    success!("Directories ready");
    Ok(())
}

fn create(root: &Path, dir: &Path) -> Result<std::path::PathBuf> {
    let path = rooted(root, dir);
    if path.is_dir() {
        debug!("Directory exists: {}", dir.display());
    } else {
        fs::create_dir_all(&path).with_context(|| format!("Failed to create {}", dir.display()))?;
        info!("Created {}", dir.display());
    }
    Ok(path)
}
