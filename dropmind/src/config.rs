//! Store configuration, persisted as TOML in the app data directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "config.toml";
pub const DATA_DIR_ENV: &str = "DROPMIND_DATA_DIR";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where the database and search index live. Falls back to `$DROPMIND_DATA_DIR`,
    /// then the platform data directory.
    pub data_dir: Option<PathBuf>,
    pub limits: CaptureLimits,
    pub search: SearchSettings,
    pub enrichment: EnrichmentSettings,
}

/// Payload size ceilings enforced at classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureLimits {
    pub max_text_bytes: u64,
    pub max_file_bytes: u64,
}

impl Default for CaptureLimits {
    fn default() -> Self {
        Self {
            max_text_bytes: 1024 * 1024,
            max_file_bytes: 100 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Tokens shorter than this (in characters) are not indexed or queried
    pub min_token_len: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self { min_token_len: 2 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentSettings {
    pub fetch_timeout_ms: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub max_concurrent: usize,
    pub max_html_bytes: usize,
    pub user_agent: String,
    /// Nominatim-compatible reverse geocoding endpoint. Geocoding is off when unset.
    pub geocoder_url: Option<String>,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 10_000,
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            max_concurrent: 4,
            max_html_bytes: 512 * 1024,
            user_agent: concat!("DropMind/", env!("CARGO_PKG_VERSION"), " (+link preview)").to_string(),
            geocoder_url: None,
        }
    }
}

impl EnrichmentSettings {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Delay before retry number `attempt` (1-based): base * 2^(attempt-1), capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let delay = self.backoff_base_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

impl Config {
    /// Load config from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(s) => toml::from_str(&s).map_err(|e| ConfigError::Parse(path.to_path_buf(), e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::Read(e)),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Write)?;
        }
        let s = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, s).map_err(ConfigError::Write)
    }

    /// Resolve the data directory and make sure it exists
    pub fn resolve_data_dir(&self) -> Result<PathBuf, ConfigError> {
        let dir = match &self.data_dir {
            Some(dir) => dir.clone(),
            None => match std::env::var_os(DATA_DIR_ENV) {
                Some(dir) if !dir.is_empty() => PathBuf::from(dir),
                _ => default_data_dir().ok_or(ConfigError::NoDataDir)?,
            },
        };
        std::fs::create_dir_all(&dir).map_err(ConfigError::Write)?;
        Ok(dir)
    }
}

/// Platform data directory, e.g. `~/.local/share/dropmind` on Linux
pub fn default_data_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("app", "dropmind", "DropMind").map(|dirs| dirs.data_local_dir().to_path_buf())
}

/// Default location of the config file
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("app", "dropmind", "DropMind").map(|dirs| dirs.config_dir().join(CONFIG_FILENAME))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine app data directory")]
    NoDataDir,
    #[error("failed to read config: {0}")]
    Read(std::io::Error),
    #[error("failed to parse {0}: {1}")]
    Parse(PathBuf, toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("failed to write: {0}")]
    Write(std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(
            &path,
            "[search]\nmin_token_len = 3\n\n[enrichment]\nmax_attempts = 5\ngeocoder_url = \"http://localhost:8080\"\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.search.min_token_len, 3);
        assert_eq!(config.enrichment.max_attempts, 5);
        assert_eq!(config.enrichment.geocoder_url.as_deref(), Some("http://localhost:8080"));
        assert_eq!(config.enrichment.fetch_timeout_ms, 10_000);
        assert_eq!(config.limits, CaptureLimits::default());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(&path, "search = [").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(..))));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILENAME);
        let mut config = Config::default();
        config.data_dir = Some(dir.path().join("data"));
        config.limits.max_text_bytes = 42;
        config.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_explicit_data_dir_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config { data_dir: Some(dir.path().join("store")), ..Default::default() };
        let resolved = config.resolve_data_dir().unwrap();
        assert!(resolved.is_dir());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let settings = EnrichmentSettings { backoff_base_ms: 100, backoff_max_ms: 350, ..Default::default() };
        assert_eq!(settings.backoff(1), Duration::from_millis(100));
        assert_eq!(settings.backoff(2), Duration::from_millis(200));
        assert_eq!(settings.backoff(3), Duration::from_millis(350));
        assert_eq!(settings.backoff(40), Duration::from_millis(350));
    }
}
