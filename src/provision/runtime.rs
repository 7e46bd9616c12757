//! Step 5: application sync and the isolated Python environment.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::config::types::{DeploySettings, ServiceIdentity};
use crate::success;
use crate::system::executor::{run_checked, CommandRunner};
use crate::system::files::{copy_tree, rooted};

/// Never copied into the working directory.
pub const SYNC_SKIP: &[&str] = &["venv", ".venv", ".git", "__pycache__", ".pytest_cache", ".mypy_cache", "target"];

/// Copy the application tree into the working directory and hand it to the
/// service account. No-op when deploying from the working directory itself.
pub fn sync_application(
    runner: &dyn CommandRunner,
    identity: &ServiceIdentity,
    source: &Path,
    root: &Path,
) -> Result<usize> {
    let target = rooted(root, &identity.working_dir);
    if !source.is_dir() {
        bail!("application source {} is not a directory", source.display());
    }

    let same = match (source.canonicalize(), target.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    };
    let copied = if same {
        info!("Deploying in place from {}", source.display());
        0
    } else {
        let copied = copy_tree(source, &target, SYNC_SKIP)
            .with_context(|| format!("Failed to copy {} to {}", source.display(), target.display()))?;
        info!("Synchronized {} file(s) into {}", copied, identity.working_dir.display());
        copied
    };

    let owner = format!("{0}:{0}", identity.account);
    run_checked(runner, "chown", &["-R", &owner, &target.display().to_string()])?;
    Ok(copied)
}

/// Create the virtual environment if missing, then (always) reinstall the
/// pinned requirements so version bumps are picked up.
pub fn ensure_environment(
    runner: &dyn CommandRunner,
    identity: &ServiceIdentity,
    deploy: &DeploySettings,
    root: &Path,
) -> Result<()> {
    let venv = rooted(root, &identity.venv_dir());
    let python = rooted(root, &identity.interpreter());
    let venv_arg = venv.display().to_string();

    if python.exists() {
        info!("Virtual environment already exists at {}", identity.venv_dir().display());
    } else {
        info!("Creating virtual environment at {}...", identity.venv_dir().display());
        run_checked(runner, "python3", &["-m", "venv", &venv_arg]).context("Failed to create virtual environment")?;
        success!("Virtual environment created");
    }

    let pip = venv.join("bin").join("pip").display().to_string();
    if let Err(e) = run_checked(runner, &pip, &["install", "--upgrade", "pip"]) {
        warn!("Failed to upgrade pip: {:#}", e);
    }

    let requirements = rooted(root, &identity.working_dir).join(&deploy.requirements_file);
    if requirements.exists() {
        info!("Installing Python dependencies from {}...", deploy.requirements_file);
        run_checked(runner, &pip, &["install", "-r", &requirements.display().to_string()])
            .context("Failed to install Python dependencies")?;
        success!("Python dependencies installed");
    } else {
        warn!("{} not found, skipping dependency installation", requirements.display());
    }

    let owner = format!("{0}:{0}", identity.account);
    run_checked(runner, "chown", &["-R", &owner, &venv_arg])?;
    Ok(())
}
