//! Convergent file helpers: every write compares before touching disk.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChange {
    Created,
    Updated,
    Unchanged,
}

impl FileChange {
    pub fn changed(self) -> bool {
        self != FileChange::Unchanged
    }
}

/// Map an absolute host path under `root` ("/" in production, a scratch
/// directory in tests).
pub fn rooted(root: &Path, path: &Path) -> PathBuf {
    match path.strip_prefix("/") {
        Ok(relative) => root.join(relative),
        Err(_) => root.join(path),
    }
}

/// Overwrite `path` with `content` unless it already holds exactly that.
pub fn write_if_changed(path: &Path, content: &str) -> Result<FileChange> {
    let change = match fs::read_to_string(path) {
        Ok(existing) if existing == content => return Ok(FileChange::Unchanged),
        Ok(_) => FileChange::Updated,
        Err(_) => FileChange::Created,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(change)
}

pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("Failed to chmod {:o} {}", mode, path.display()))
}

pub fn mode_of(path: &Path) -> Result<u32> {
    Ok(fs::metadata(path)?.permissions().mode() & 0o7777)
}

/// Recursively copy `src` into `dst`, skipping entries named in `skip`.
/// Files whose bytes already match are left untouched. Returns the number of
/// files written.
pub fn copy_tree(src: &Path, dst: &Path, skip: &[&str]) -> Result<usize> {
    fs::create_dir_all(dst).with_context(|| format!("Failed to create {}", dst.display()))?;
    let mut written = 0;

    for entry in fs::read_dir(src).with_context(|| format!("Failed to read {}", src.display()))? {
        let entry = entry?;
        let name = entry.file_name();
        if skip.iter().any(|s| name.to_string_lossy() == *s) {
            continue;
        }
        let from = entry.path();
        let to = dst.join(&name);
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            written += copy_tree(&from, &to, skip)?;
        } else if file_type.is_file() {
            let bytes = fs::read(&from)?;
            if fs::read(&to).map(|existing| existing != bytes).unwrap_or(true) {
                fs::write(&to, &bytes).with_context(|| format!("Failed to write {}", to.display()))?;
                fs::set_permissions(&to, entry.metadata()?.permissions())?;
                written += 1;
            }
        }
    }

    Ok(written)
}
