use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::issues::Thresholds;
use crate::retry::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "lead_finder.toml";
const ENV_PREFIX: &str = "LEAD_FINDER";

const DEFAULT_CATEGORIES: &[&str] = &[
    "manufacturing company",
    "real estate agency",
    "dental practice",
    "law firm",
    "beauty salon",
    "fitness center",
];

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub search_api_key: Option<String>,
    pub search_engine_id: Option<String>,
    pub pagespeed_api_key: Option<String>,
    pub categories: Vec<String>,
    pub query_templates: Vec<String>,
    pub workers: usize,
    pub request_timeout_secs: u64,
    pub task_timeout_secs: u64,
    pub max_results_per_query: usize,
    pub max_leads: Option<usize>,
    pub query_delay_ms: u64,
    pub output: PathBuf,
    pub retry: RetryPolicy,
    pub thresholds: Thresholds,
}

impl Settings {
    /// Defaults, then `path` (if it exists), then `LEAD_FINDER_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let retry = RetryPolicy::default();
        let thresholds = Thresholds::default();

        let settings = Config::builder()
            .set_default("categories", DEFAULT_CATEGORIES.to_vec())?
            .set_default("query_templates", vec![crate::search::DEFAULT_TEMPLATE])?
            .set_default("workers", 5)?
            .set_default("request_timeout_secs", 30)?
            .set_default("task_timeout_secs", 90)?
            .set_default("max_results_per_query", 10)?
            .set_default("query_delay_ms", 1000)?
            .set_default("output", "leads.json")?
            .set_default("retry.max_attempts", retry.max_attempts as i64)?
            .set_default("retry.base_delay_ms", retry.base_delay_ms as i64)?
            .set_default("retry.max_delay_ms", retry.max_delay_ms as i64)?
            .set_default("thresholds.high_below", thresholds.high_below)?
            .set_default("thresholds.medium_below", thresholds.medium_below)?
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("categories")
                    .with_list_parse_key("query_templates")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

        let settings: Settings = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.workers > 0, "workers must be at least 1");
        anyhow::ensure!(self.retry.max_attempts > 0, "retry.max_attempts must be at least 1");
        anyhow::ensure!(
            self.thresholds.high_below <= self.thresholds.medium_below,
            "thresholds.high_below ({}) must not exceed thresholds.medium_below ({})",
            self.thresholds.high_below,
            self.thresholds.medium_below
        );
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    /// Search credentials, required before any network activity.
    pub fn search_credentials(&self) -> Result<(String, String)> {
        let key = self
            .search_api_key
            .clone()
            .filter(|k| !k.is_empty())
            .with_context(|| format!("{}_SEARCH_API_KEY is not set", ENV_PREFIX))?;
        let cx = self
            .search_engine_id
            .clone()
            .filter(|k| !k.is_empty())
            .with_context(|| format!("{}_SEARCH_ENGINE_ID is not set", ENV_PREFIX))?;
        Ok((key, cx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_without_file() {
        let s = Settings::load(Some(Path::new("/nonexistent/lead_finder.toml"))).unwrap();
        assert_eq!(s.workers, 5);
        assert_eq!(s.categories.len(), 6);
        assert_eq!(s.query_templates, vec!["{category} in {city}".to_string()]);
        assert_eq!(s.retry.max_attempts, 3);
        assert_eq!(s.thresholds.high_below, 50.0);
        assert_eq!(s.output, PathBuf::from("leads.json"));
    }

    #[test]
    fn file_overrides_defaults() {
        let mut f = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            f,
            "workers = 12\ncategories = [\"dentist\"]\n[thresholds]\nhigh_below = 40\nmedium_below = 70"
        )
        .unwrap();
        let s = Settings::load(Some(f.path())).unwrap();
        assert_eq!(s.workers, 12);
        assert_eq!(s.categories, vec!["dentist".to_string()]);
        assert_eq!(s.thresholds.high_below, 40.0);
        assert_eq!(s.thresholds.medium_below, 70.0);
        // untouched keys keep their defaults
        assert_eq!(s.retry.base_delay_ms, 1000);
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let mut f = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(f, "[thresholds]\nhigh_below = 90\nmedium_below = 70").unwrap();
        assert!(Settings::load(Some(f.path())).is_err());
    }

    #[test]
    fn missing_search_key_is_reported() {
        let mut f = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(f, "search_engine_id = \"cx\"").unwrap();
        let mut s = Settings::load(Some(f.path())).unwrap();
        s.search_api_key = None;
        let err = s.search_credentials().unwrap_err();
        assert!(err.to_string().contains("SEARCH_API_KEY"));
    }
}
