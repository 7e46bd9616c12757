//! Minimal reader for the managed program's `[section] key = value` config.
//! Only structure is checked here; the key set belongs to the miner itself.

use std::collections::BTreeMap;

use anyhow::{bail, Result};

pub type Sections = BTreeMap<String, BTreeMap<String, String>>;

pub fn parse_sections(content: &str) -> Result<Sections> {
    let mut sections = Sections::new();
    let mut current: Option<String> = None;

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(rest) = line.strip_prefix('[') {
            let Some(name) = rest.strip_suffix(']') else {
                bail!("line {}: unterminated section header '{}'", idx + 1, line);
            };
            let name = name.trim();
            if name.is_empty() {
                bail!("line {}: empty section name", idx + 1);
            }
            sections.entry(name.to_string()).or_default();
            current = Some(name.to_string());
            continue;
        }

        let Some((key, value)) = line.split_once('=').or_else(|| line.split_once(':')) else {
            bail!("line {}: expected 'key = value', got '{}'", idx + 1, line);
        };
        let Some(section) = current.as_ref() else {
            bail!("line {}: key '{}' outside of any section", idx + 1, key.trim());
        };
        sections
            .entry(section.clone())
            .or_default()
            .insert(key.trim().to_lowercase(), value.trim().to_string());
    }

    Ok(sections)
}

/// Names from `required` that are absent in `sections`.
pub fn missing_sections<'a>(sections: &Sections, required: &'a [String]) -> Vec<&'a str> {
    required
        .iter()
        .filter(|name| !sections.contains_key(name.as_str()))
        .map(|s| s.as_str())
        .collect()
}
