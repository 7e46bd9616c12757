//! Tool config file resolution, load, save, and migration logic.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::config::types::{OpsConfig, DEFAULT_OPS_CONFIG_PATH};

pub const CONFIG_ENV: &str = "MINERCTL_CONFIG";

/// Priority: explicit flag, `MINERCTL_CONFIG`, then the system default.
pub fn resolve_config_path(flag: Option<&Path>) -> PathBuf {
    if let Some(p) = flag {
        return p.to_path_buf();
    }
    match std::env::var(CONFIG_ENV) {
        Ok(p) if !p.trim().is_empty() => PathBuf::from(p),
        _ => PathBuf::from(DEFAULT_OPS_CONFIG_PATH),
    }
}

/// Bring an existing config file up to the current schema: keys missing from
/// the file (hand-written partial configs, sections added in later releases)
/// are written back with their defaults. Values already present are kept.
pub(crate) fn migrate_config(config_path: &Path) -> Result<bool> {
    if !config_path.exists() {
        return Ok(false);
    }

    let content = std::fs::read_to_string(config_path)?;
    let mut json: serde_json::Value = serde_json::from_str(&content)?;
    let defaults = serde_json::to_value(OpsConfig::default())?;

    let added = fill_missing(&mut json, &defaults, "");
    for key in &added {
        info!("Migrated: added '{}' with its default value", key);
    }

    if !added.is_empty() {
        std::fs::write(config_path, serde_json::to_string_pretty(&json)?)?;
        info!("Config migrated to latest version: {:?}", config_path);
    }

    Ok(!added.is_empty())
}

fn fill_missing(target: &mut serde_json::Value, defaults: &serde_json::Value, prefix: &str) -> Vec<String> {
    let (Some(target), Some(defaults)) = (target.as_object_mut(), defaults.as_object()) else {
        return Vec::new();
    };
    let mut added = Vec::new();
    for (key, default) in defaults {
        let path = if prefix.is_empty() { key.clone() } else { format!("{}.{}", prefix, key) };
        match target.get_mut(key) {
            Some(existing) => added.extend(fill_missing(existing, default, &path)),
            None => {
                target.insert(key.clone(), default.clone());
                added.push(path);
            }
        }
    }
    added
}

pub fn load_config(path: &Path) -> Result<OpsConfig> {
    if let Err(e) = migrate_config(path) {
        warn!("Config migration check failed: {}", e);
    }

    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: OpsConfig = serde_json::from_str(&content)
            .with_context(|| format!("Invalid tool configuration in {}", path.display()))?;
        debug!("Loaded configuration from: {:?}", path);
        Ok(config)
    } else {
        debug!("Config file {:?} not found, using built-in defaults", path);
        Ok(OpsConfig::default())
    }
}

pub fn save_config(config: &OpsConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Configuration saved to: {}", path.display());
    Ok(())
}
