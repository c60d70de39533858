use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::info;

use crate::canon;
use crate::models::Lead;

/// Write `leads` as a pretty-printed JSON array, replacing any existing file.
pub fn write_leads(path: &Path, leads: &[Lead]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
    }
    let json = serde_json::to_string_pretty(leads).context("Failed to serialize leads")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote {} leads to {}", leads.len(), path.display());
    Ok(())
}

/// The viewer accepts any object carrying a string `url`.
pub fn is_viewer_record(value: &Value) -> bool {
    value.get("url").is_some_and(Value::is_string)
}

/// Counts from cleaning one results file.
#[derive(Debug)]
pub struct CleanStats {
    pub original: usize,
    pub removed: usize,
    pub output: PathBuf,
}

impl CleanStats {
    pub fn remaining(&self) -> usize {
        self.original - self.removed
    }
}

/// Drop entries without a usable `url` or pointing at excluded pages, and
/// write the rest to `<stem>_cleaned.json` beside the input.
pub fn clean_file(input: &Path) -> Result<CleanStats> {
    let raw = fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let data: Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", input.display()))?;
    let Value::Array(entries) = data else {
        anyhow::bail!("{} does not contain a JSON array", input.display());
    };

    let original = entries.len();
    let kept: Vec<Value> = entries.into_iter().filter(should_keep).collect();
    let removed = original - kept.len();

    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "results".to_string());
    let output = input.with_file_name(format!("{}_cleaned.json", stem));
    let json = serde_json::to_string_pretty(&kept)?;
    fs::write(&output, json).with_context(|| format!("Failed to write {}", output.display()))?;

    Ok(CleanStats {
        original,
        removed,
        output,
    })
}

fn should_keep(entry: &Value) -> bool {
    if !is_viewer_record(entry) {
        return false;
    }
    let url = entry["url"].as_str().unwrap_or("");
    !url.is_empty() && !canon::is_excluded(url)
}
