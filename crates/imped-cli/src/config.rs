//! Application configuration
//!
//! Loaded from an optional TOML file; every field has a default. A few
//! environment variables override the file:
//!
//! | Variable | Field |
//! |---|---|
//! | `IMPED_WEBDRIVER_URL` | `webdriver.endpoint` |
//! | `IMPED_OUTPUT_DIR` | `paths.output_root` |
//! | `IMPED_TEMP_DIR` | `paths.temp_root` |

use imped_core::{DownloadWatch, PortalProfile, SizingConfig, Timeouts};
use imped_driver::WebDriverConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File is not valid TOML for this schema
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Filesystem locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root for per-person temp download directories
    pub temp_root: PathBuf,
    /// Final certificate storage
    pub output_root: PathBuf,
    /// Report file name, relative to the output root
    pub report_file: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            temp_root: PathBuf::from("temp"),
            output_root: PathBuf::from("certificados"),
            report_file: "impedimentos.csv".to_string(),
        }
    }
}

impl PathsConfig {
    /// Full report path
    #[must_use]
    pub fn report_path(&self) -> PathBuf {
        self.output_root.join(&self.report_file)
    }
}

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub portal: PortalProfile,
    pub timeouts: Timeouts,
    pub download: DownloadWatch,
    pub sizing: SizingConfig,
    pub paths: PathsConfig,
    pub webdriver: WebDriverConfig,
}

impl AppConfig {
    /// Load from `path` (or defaults) and apply environment overrides
    ///
    /// # Errors
    /// - `ConfigError::Read` / `ConfigError::Parse` for a bad file
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML file
    ///
    /// # Errors
    /// - `ConfigError::Read` / `ConfigError::Parse`
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Apply `IMPED_*` overrides from `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("IMPED_WEBDRIVER_URL") {
            self.webdriver.endpoint = url;
        }
        if let Some(dir) = non_empty("IMPED_OUTPUT_DIR") {
            self.paths.output_root = PathBuf::from(dir);
        }
        if let Some(dir) = non_empty("IMPED_TEMP_DIR") {
            self.paths.temp_root = PathBuf::from(dir);
        }
    }
}
