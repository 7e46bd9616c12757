//! Daily backup: a timestamped archive of config, application and logs,
//! followed by age-based pruning.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use crate::config::types::ServiceIdentity;
use crate::success;
use crate::system::executor::CommandRunner;
use crate::system::files::rooted;

pub const ARCHIVE_PREFIX: &str = "backup_";
pub const ARCHIVE_SUFFIX: &str = ".tar.gz";

pub fn archive_name(now: DateTime<Local>) -> String {
    format!("{}{}{}", ARCHIVE_PREFIX, now.format("%Y%m%d_%H%M%S"), ARCHIVE_SUFFIX)
}

pub fn retention(days: u64) -> Duration {
    Duration::from_secs(days * 24 * 60 * 60)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupOutcome {
    pub archive: PathBuf,
    pub pruned: Vec<PathBuf>,
}

/// Archive the config dir, the working dir (without the virtualenv) and
/// the log dir into the backup dir with the host `tar`.
pub fn create_archive(
    runner: &dyn CommandRunner,
    identity: &ServiceIdentity,
    root: &Path,
    now: DateTime<Local>,
) -> Result<PathBuf> {
    let backup_dir = rooted(root, &identity.backup_dir);
    fs::create_dir_all(&backup_dir).with_context(|| format!("Failed to create {}", backup_dir.display()))?;
    let archive = backup_dir.join(archive_name(now));

    // Members are stored relative to the host root
    let relative = |p: &Path| p.strip_prefix("/").unwrap_or(p).display().to_string();
    let members: Vec<String> = [&identity.config_dir, &identity.working_dir, &identity.log_dir]
        .into_iter()
        .filter(|dir| rooted(root, dir).exists())
        .map(|dir| relative(dir.as_path()))
        .collect();
    if members.is_empty() {
        bail!("nothing to back up: none of the service directories exist");
    }

    let archive_arg = archive.display().to_string();
    let exclude = format!("--exclude={}", relative(identity.venv_dir().as_path()));
    let root_arg = root.display().to_string();
    let mut args = vec!["-czf", archive_arg.as_str(), exclude.as_str(), "-C", root_arg.as_str()];
    args.extend(members.iter().map(String::as_str));

    info!("Creating backup {}...", archive.display());
    let output = runner.run("tar", &args)?;
    match output.code {
        Some(0) => {}
        // GNU tar: "file changed as we read it", the archive is still usable
        Some(1) if archive.exists() => warn!("tar reported files changing during backup: {}", output.stderr.trim()),
        _ => bail!("tar failed: {}", output.stderr.trim()),
    }

    success!("Backup created: {}", archive.display());
    Ok(archive)
}

/// Delete `backup_*.tar.gz` in `dir` whose modification time is more than
/// `max_age` before `now`, including generations renamed by the weekly
/// logrotate rule (`.tar.gz.1`, `.tar.gz.2.gz`). Other files are never touched.
pub fn prune(dir: &Path, max_age: Duration, now: SystemTime) -> Result<Vec<PathBuf>> {
    let pattern = dir.join(format!("{}*{}*", ARCHIVE_PREFIX, ARCHIVE_SUFFIX));
    let mut removed = Vec::new();

    for path in glob::glob(&pattern.to_string_lossy())?.filter_map(Result::ok) {
        let modified = fs::metadata(&path)
            .and_then(|m| m.modified())
            .with_context(|| format!("Failed to stat {}", path.display()))?;
        let age = now.duration_since(modified).unwrap_or_default();
        if age > max_age {
            fs::remove_file(&path).with_context(|| format!("Failed to remove {}", path.display()))?;
            info!("Removed old backup {}", path.display());
            removed.push(path);
        } else {
            debug!("Keeping {} ({}h old)", path.display(), age.as_secs() / 3600);
        }
    }
    Ok(removed)
}

pub fn run_backup(
    runner: &dyn CommandRunner,
    identity: &ServiceIdentity,
    retention_days: u64,
    root: &Path,
) -> Result<BackupOutcome> {
    let archive = create_archive(runner, identity, root, Local::now())?;
    let pruned = prune(&rooted(root, &identity.backup_dir), retention(retention_days), SystemTime::now())?;
    info!("Backup complete ({} old archive(s) pruned)", pruned.len());
    Ok(BackupOutcome { archive, pruned })
}
