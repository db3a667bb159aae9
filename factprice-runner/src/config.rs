//! Pipeline configuration (TOML).
//!
//! Every field has a default, so a missing file or an empty table is a
//! runnable configuration.
//!
//! ```toml
//! [paths]
//! data_root = "data"
//! work_dir = "work"
//! output_dir = "enriched"
//! credentials = "credentials.txt"
//!
//! [merge]
//! batch_size = 100000
//!
//! [partition]
//! max_open_handles = 256
//!
//! [provider]
//! requests_per_minute = 120
//! refresh_interval_minutes = 29
//! max_probe_attempts = 6
//! probe_offset_days = 1
//!
//! [tickers]
//! url = "https://www.sec.gov/include/ticker.txt"
//! user_agent = "factprice admin@example.com"
//! ```

use factprice_core::data::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_OPEN_HANDLES};
use factprice_core::provider::{ProbePolicy, SessionSettings, DEFAULT_PRICE_HISTORY_URL};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub merge: MergeConfig,
    pub partition: PartitionConfig,
    pub provider: ProviderConfig,
    pub tickers: TickersConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of the extracted quarterly datasets (`*/num.txt`, `*/sub.txt`).
    pub data_root: PathBuf,
    /// Intermediate artifacts: combined, merged and partition files.
    pub work_dir: PathBuf,
    /// One Parquet file per symbol.
    pub output_dir: PathBuf,
    pub credentials: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            work_dir: PathBuf::from("work"),
            output_dir: PathBuf::from("enriched"),
            credentials: PathBuf::from("credentials.txt"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub batch_size: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    pub max_open_handles: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            max_open_handles: DEFAULT_MAX_OPEN_HANDLES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub requests_per_minute: u32,
    pub refresh_interval_minutes: i64,
    pub max_probe_attempts: u32,
    pub probe_offset_days: i64,
    pub authorize_url: String,
    pub token_url: String,
    pub price_history_url: String,
    pub http_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        let session = SessionSettings::default();
        let probe = ProbePolicy::default();
        Self {
            requests_per_minute: 120,
            refresh_interval_minutes: session.refresh_interval.num_minutes(),
            max_probe_attempts: probe.max_attempts,
            probe_offset_days: probe.offset_days,
            authorize_url: session.authorize_url,
            token_url: "https://api.schwabapi.com/v1/oauth/token".into(),
            price_history_url: DEFAULT_PRICE_HISTORY_URL.into(),
            http_timeout_secs: 30,
        }
    }
}

impl ProviderConfig {
    pub fn probe_policy(&self) -> ProbePolicy {
        ProbePolicy {
            offset_days: self.probe_offset_days,
            max_attempts: self.max_probe_attempts,
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            authorize_url: self.authorize_url.clone(),
            refresh_interval: chrono::Duration::minutes(self.refresh_interval_minutes),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickersConfig {
    pub url: String,
    /// SEC rejects anonymous clients; identify yourself here.
    pub user_agent: String,
}

impl Default for TickersConfig {
    fn default() -> Self {
        Self {
            url: "https://www.sec.gov/include/ticker.txt".into(),
            user_agent: "factprice admin@example.com".into(),
        }
    }
}

impl PipelineConfig {
    /// Load and validate a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.merge.batch_size == 0, "merge.batch_size must be > 0"),
            (
                self.partition.max_open_handles == 0,
                "partition.max_open_handles must be > 0",
            ),
            (
                self.provider.requests_per_minute == 0,
                "provider.requests_per_minute must be > 0",
            ),
            (
                self.provider.max_probe_attempts == 0,
                "provider.max_probe_attempts must be > 0",
            ),
            (
                self.provider.refresh_interval_minutes <= 0,
                "provider.refresh_interval_minutes must be > 0",
            ),
            (self.provider.http_timeout_secs == 0, "provider.http_timeout_secs must be > 0"),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, msg)) => Err(ConfigError::Invalid((*msg).to_string())),
            None => Ok(()),
        }
    }

    // ── Artifact layout ──────────────────────────────────────────────

    pub fn facts_path(&self) -> PathBuf {
        self.paths.work_dir.join("facts.tsv")
    }

    pub fn submissions_path(&self) -> PathBuf {
        self.paths.work_dir.join("submissions.tsv")
    }

    pub fn merged_path(&self) -> PathBuf {
        self.paths.work_dir.join("merged.tsv")
    }

    pub fn partition_dir(&self) -> PathBuf {
        self.paths.work_dir.join("partitions")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = PipelineConfig::from_toml("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.merge.batch_size, 100_000);
        assert_eq!(config.partition.max_open_handles, 256);
        assert_eq!(config.provider.requests_per_minute, 120);
        assert_eq!(config.provider.refresh_interval_minutes, 29);
        assert_eq!(config.provider.probe_policy(), ProbePolicy::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = PipelineConfig::from_toml(
            r#"
            [paths]
            work_dir = "/tmp/fp"

            [provider]
            requests_per_minute = 60
            "#,
        )
        .unwrap();
        assert_eq!(config.paths.work_dir, PathBuf::from("/tmp/fp"));
        assert_eq!(config.paths.output_dir, PathBuf::from("enriched"));
        assert_eq!(config.provider.requests_per_minute, 60);
        assert_eq!(config.provider.max_probe_attempts, 6);
        assert_eq!(config.merged_path(), PathBuf::from("/tmp/fp/merged.tsv"));
    }

    #[test]
    fn zero_limits_are_rejected() {
        for toml in [
            "[merge]\nbatch_size = 0",
            "[partition]\nmax_open_handles = 0",
            "[provider]\nrequests_per_minute = 0",
            "[provider]\nmax_probe_attempts = 0",
        ] {
            assert!(
                matches!(PipelineConfig::from_toml(toml), Err(ConfigError::Invalid(_))),
                "{toml}"
            );
        }
    }

    #[test]
    fn default_config_roundtrips_through_toml() {
        let text = PipelineConfig::default().to_toml().unwrap();
        assert!(text.contains("[provider]"));
        assert_eq!(PipelineConfig::from_toml(&text).unwrap(), PipelineConfig::default());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            PipelineConfig::from_toml("[merge\nbatch_size = "),
            Err(ConfigError::Parse(_))
        ));
    }
}
