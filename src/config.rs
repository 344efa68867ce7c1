//! Configuration management.
//!
//! Values are layered, lowest priority first:
//!
//! 1. Built-in defaults
//! 2. A YAML file (`--config`, default `gallery.yaml`; a missing file is fine)
//! 3. `GALLERY_`-prefixed environment variables, with `__` separating nested keys
//!
//! ```yaml
//! storage:
//!   strategy: inline_blob
//! ingest:
//!   max_file_bytes: 5242880
//!   max_edge: 1920
//!   jpeg_quality: 80
//!   operation_timeout: 30s
//! ```
//!
//! ```bash
//! GALLERY_INGEST__DOWNSCALE=false
//! GALLERY_STORAGE__PUBLIC_BASE_URL=https://cdn.example.com/photos
//! ```

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::storage::StorageStrategy;

/// One mebibyte in bytes
pub const MIB: u64 = 1024 * 1024;

/// One gigabyte as the admin storage report counts it (1024^3 bytes)
pub const GIB: u64 = 1024 * MIB;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Figment(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Figment(Box::new(err))
    }
}

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Base directory for the catalog and the object store
    pub data_dir: PathBuf,
    /// SQLite catalog location (default: `<data_dir>/gallery.db`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
    pub storage: StorageConfig,
    pub ingest: IngestPolicy,
    /// Log filter used when `RUST_LOG` is not set
    pub log_filter: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Photo representation written by this deployment
    pub strategy: StorageStrategy,
    /// Object store root (default: `<data_dir>/objects`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objects_dir: Option<PathBuf>,
    /// Base of the URLs handed out for stored objects (default: `file://` of `objects_dir`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_base_url: Option<Url>,
    /// Total capacity shown in the admin storage report
    pub capacity_bytes: u64,
}

/// Validation and normalization policy applied to every ingested file
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestPolicy {
    /// Largest accepted file, inclusive
    pub max_file_bytes: u64,
    /// Downscale and re-encode as JPEG; when false the original bytes are stored verbatim
    pub downscale: bool,
    /// Longest allowed edge in pixels after normalization
    pub max_edge: u32,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
    /// Upper bound for each storage or database call
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,
}

impl Default for IngestPolicy {
    fn default() -> Self {
        Self {
            max_file_bytes: 10 * MIB,
            downscale: true,
            max_edge: 1920,
            jpeg_quality: 80,
            operation_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            strategy: StorageStrategy::default(),
            objects_dir: None,
            public_base_url: None,
            capacity_bytes: 1000 * GIB,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_path: None,
            storage: StorageConfig::default(),
            ingest: IngestPolicy::default(),
            log_filter: "info".to_string(),
        }
    }
}

/// - Linux: ~/.local/share/photo-gallery
/// - macOS: ~/Library/Application Support/photo-gallery
/// - Windows: %APPDATA%\photo-gallery
fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("photo-gallery")
}

impl Config {
    pub fn figment(config_path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Yaml::file(config_path))
            // GALLERY_CONFIG and GALLERY_USER belong to the CLI, not to this struct
            .merge(Env::prefixed("GALLERY_").ignore(&["config", "user"]).split("__"))
    }

    pub fn load(config_path: &Path) -> Result<Self, ConfigError> {
        let config: Self = Self::figment(config_path).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ingest.max_file_bytes == 0 {
            return Err(ConfigError::Invalid("ingest.max_file_bytes must be positive".into()));
        }
        if self.ingest.max_edge == 0 {
            return Err(ConfigError::Invalid("ingest.max_edge must be positive".into()));
        }
        if !(1..=100).contains(&self.ingest.jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "ingest.jpeg_quality must be within 1-100, got {}",
                self.ingest.jpeg_quality
            )));
        }
        if self.ingest.operation_timeout.is_zero() {
            return Err(ConfigError::Invalid("ingest.operation_timeout must be positive".into()));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("gallery.db"))
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.storage
            .objects_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("objects"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_match_gallery_policy() {
        let config = Config::default();
        assert_eq!(config.ingest.max_file_bytes, 10 * MIB);
        assert_eq!(config.ingest.max_edge, 1920);
        assert_eq!(config.ingest.jpeg_quality, 80);
        assert!(config.ingest.downscale);
        assert_eq!(config.storage.strategy, StorageStrategy::ExternalObject);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_and_env_layers() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "gallery.yaml",
                r#"
data_dir: /srv/gallery
storage:
  strategy: inline_blob
ingest:
  max_file_bytes: 5242880
  operation_timeout: 5s
"#,
            )?;
            jail.set_env("GALLERY_INGEST__MAX_EDGE", "1024");
            jail.set_env("GALLERY_USER", "ignored-by-config");

            let config = Config::load(Path::new("gallery.yaml")).map_err(|e| e.to_string())?;

            assert_eq!(config.storage.strategy, StorageStrategy::InlineBlob);
            assert_eq!(config.ingest.max_file_bytes, 5 * MIB);
            assert_eq!(config.ingest.max_edge, 1024);
            assert_eq!(config.ingest.jpeg_quality, 80);
            assert_eq!(config.ingest.operation_timeout, Duration::from_secs(5));
            assert_eq!(config.database_path(), PathBuf::from("/srv/gallery/gallery.db"));
            assert_eq!(config.objects_dir(), PathBuf::from("/srv/gallery/objects"));
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        Jail::expect_with(|_jail| {
            let config = Config::load(Path::new("absent.yaml")).map_err(|e| e.to_string())?;
            assert_eq!(config.ingest, IngestPolicy::default());
            Ok(())
        });
    }

    #[test]
    fn test_out_of_range_quality_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("gallery.yaml", "ingest:\n  jpeg_quality: 0\n")?;
            assert!(matches!(
                Config::load(Path::new("gallery.yaml")),
                Err(ConfigError::Invalid(_))
            ));
            Ok(())
        });
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("gallery.yaml", "ingest:\n  max_width: 10\n")?;
            assert!(matches!(
                Config::load(Path::new("gallery.yaml")),
                Err(ConfigError::Figment(_))
            ));
            Ok(())
        });
    }
}
