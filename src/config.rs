//! Configuration for the orchestration core.
//!
//! Defaults are overridden first by an optional TOML file, then by
//! environment variables (loaded from `.env` at startup when present).

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const DEFAULT_DATABASE_FILENAME: &str = "harmony.db";

/// Runtime settings, including every scheduler knob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename under `data_dir`.
    pub database_filename: String,
    /// Database URL (overrides data_dir/database_filename if set).
    pub database_url: Option<String>,
    /// Root directory of the file-backed artifact store.
    pub artifact_root: PathBuf,
    /// Bucket name used in batch catalog URLs.
    pub artifact_bucket: String,
    /// Bind address for the worker-facing server.
    pub host: String,
    pub port: u16,

    /// Upper bound on granules per query-step page.
    pub cmr_max_page_size: i32,
    /// Maximum items per aggregation catalog page.
    pub aggregate_stac_catalog_max_page_size: usize,
    /// Default batch item-count cap for batched aggregation steps.
    pub max_batch_inputs: i32,
    /// Default batch byte cap for batched aggregation steps.
    pub max_batch_size_in_bytes: i64,
    /// Per-item retries before a failure is accepted.
    pub work_item_retry_limit: i32,
    /// Error cap beyond which a job fails even with `ignore_errors`.
    pub max_errors_for_job: i32,
    /// Granule count above which an asynchronous job pauses for preview.
    pub preview_threshold: i32,
    /// Row-insertion chunk size for child work items.
    pub batch_size: usize,
    /// Capacity of the bounded work-item update queue.
    pub update_queue_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = PathBuf::from("data");
        Self {
            artifact_root: data_dir.join("artifacts"),
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            database_url: None,
            artifact_bucket: "harmony-artifacts".to_string(),
            host: "127.0.0.1".to_string(),
            port: 3070,
            cmr_max_page_size: 2000,
            aggregate_stac_catalog_max_page_size: 1000,
            max_batch_inputs: 10_000,
            max_batch_size_in_bytes: 1_000_000_000,
            work_item_retry_limit: 3,
            max_errors_for_job: 100,
            preview_threshold: 500,
            batch_size: 2000,
            update_queue_size: 1024,
        }
    }
}

impl Settings {
    /// Load settings: defaults, then the TOML file (if given), then the
    /// environment.
    pub fn load(config_file: Option<&Path>) -> anyhow::Result<Self> {
        let mut settings = match config_file {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                toml::from_str(&raw)?
            }
            None => Self::default(),
        };
        settings.apply_env();
        Ok(settings)
    }

    /// Apply environment variable overrides in place.
    pub fn apply_env(&mut self) {
        env_override("DATA_DIR", &mut self.data_dir);
        env_override("ARTIFACT_ROOT", &mut self.artifact_root);
        env_override("ARTIFACT_BUCKET", &mut self.artifact_bucket);
        env_override("HOST", &mut self.host);
        env_override("PORT", &mut self.port);
        env_override("CMR_MAX_PAGE_SIZE", &mut self.cmr_max_page_size);
        env_override(
            "AGGREGATE_STAC_CATALOG_MAX_PAGE_SIZE",
            &mut self.aggregate_stac_catalog_max_page_size,
        );
        env_override("MAX_BATCH_INPUTS", &mut self.max_batch_inputs);
        env_override("MAX_BATCH_SIZE_IN_BYTES", &mut self.max_batch_size_in_bytes);
        env_override("WORK_ITEM_RETRY_LIMIT", &mut self.work_item_retry_limit);
        env_override("MAX_ERRORS_FOR_JOB", &mut self.max_errors_for_job);
        env_override("PREVIEW_THRESHOLD", &mut self.preview_threshold);
        env_override("INSERT_BATCH_SIZE", &mut self.batch_size);
        env_override("UPDATE_QUEUE_SIZE", &mut self.update_queue_size);
        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.is_empty() {
                self.database_url = Some(url);
            }
        }
    }

    /// Get the database URL, constructing from path if not explicitly set.
    pub fn database_url(&self) -> String {
        if let Some(ref url) = self.database_url {
            url.clone()
        } else {
            let path = self.data_dir.join(&self.database_filename);
            format!("sqlite:{}", path.display())
        }
    }

    /// Get the full path to the database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Ensure the data and artifact directories exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.artifact_root)?;
        Ok(())
    }
}

fn env_override<T>(name: &str, target: &mut T)
where
    T: FromStr,
{
    if let Ok(raw) = std::env::var(name) {
        if raw.is_empty() {
            return;
        }
        match raw.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!("Ignoring unparseable value for {}: {:?}", name, raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.cmr_max_page_size, 2000);
        assert_eq!(settings.work_item_retry_limit, 3);
        assert_eq!(settings.database_url(), "sqlite:data/harmony.db");
    }

    #[test]
    fn test_explicit_database_url_wins() {
        let settings = Settings {
            database_url: Some("sqlite:/elsewhere/core.db".to_string()),
            ..Default::default()
        };
        assert_eq!(settings.database_url(), "sqlite:/elsewhere/core.db");
    }

    #[test]
    fn test_toml_partial_override() {
        let raw = r#"
            cmr_max_page_size = 100
            artifact_bucket = "staging-artifacts"
        "#;
        let settings: Settings = toml::from_str(raw).unwrap();
        assert_eq!(settings.cmr_max_page_size, 100);
        assert_eq!(settings.artifact_bucket, "staging-artifacts");
        // untouched fields keep their defaults
        assert_eq!(settings.max_errors_for_job, 100);
    }
}
