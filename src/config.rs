//! Top-level application configuration.
//!
//! Configuration is read from a YAML file and includes:
//! - The box URIs, in priority order
//! - Defaults for directory boxes that do not set them in their URI

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::boxes::BoxDefaults;
use crate::boxes::dirbox::worker::DEFAULT_WORKERS;
use crate::error::{BoxError, Result};
use crate::watch::NotifierKind;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Box URIs; box 1 comes first
    #[serde(default)]
    pub boxes: Vec<String>,

    /// Notifier used by directory boxes without a `type` option
    #[serde(default)]
    pub default_dir_type: NotifierKind,

    /// Polling interval of the simple notifier in milliseconds (default: 1000)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Delay before a missing directory is looked for again (default: 5000)
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// File workers per directory box without a `worker` option (default: 7)
    #[serde(default = "default_worker")]
    pub default_worker: u32,

    /// Open every box read-only
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_retry_interval_ms() -> u64 {
    5000
}

fn default_worker() -> u32 {
    DEFAULT_WORKERS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            boxes: Vec::new(),
            default_dir_type: NotifierKind::default(),
            poll_interval_ms: default_poll_interval_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            default_worker: default_worker(),
            read_only: false,
        }
    }
}

impl Config {
    /// Default location: `zettelbox.yaml` in the current directory.
    pub fn default_path() -> PathBuf {
        PathBuf::from("zettelbox.yaml")
    }

    /// Load configuration from `path`, or return the default if it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("no configuration at {}, using defaults", path.display());
            return Ok(Config::default());
        }
        let content = fs::read_to_string(path).map_err(|e| BoxError::Storage {
            operation: "read config",
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Config = serde_yaml_ng::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(BoxError::Config("poll_interval_ms must be positive".into()));
        }
        if self.retry_interval_ms == 0 {
            return Err(BoxError::Config("retry_interval_ms must be positive".into()));
        }
        Ok(())
    }

    /// Settings handed to every box factory.
    pub fn box_defaults(&self) -> BoxDefaults {
        BoxDefaults {
            dir_type: self.default_dir_type,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            worker: self.default_worker,
            read_only: self.read_only,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.boxes.is_empty());
        assert_eq!(config.default_dir_type, NotifierKind::Notify);
        assert_eq!(config.default_worker, 7);
        assert!(!config.read_only);
    }

    #[test]
    fn test_config_partial_yaml_uses_defaults() {
        let yaml = "boxes:\n  - dir:///srv/zettel\n  - mem:\ndefault_dir_type: simple\n";
        let config: Config = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.boxes, vec!["dir:///srv/zettel", "mem:"]);
        assert_eq!(config.default_dir_type, NotifierKind::Simple);
        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.retry_interval_ms, 5000);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config {
            boxes: vec!["mem:".to_string()],
            default_worker: 13,
            ..Default::default()
        };
        let yaml = serde_yaml_ng::to_string(&config).unwrap();
        assert!(!yaml.contains("read_only"));
        let parsed: Config = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_box_defaults() {
        let config = Config {
            poll_interval_ms: 250,
            read_only: true,
            ..Default::default()
        };
        let defaults = config.box_defaults();
        assert_eq!(defaults.poll_interval, Duration::from_millis(250));
        assert_eq!(defaults.retry_interval, Duration::from_secs(5));
        assert!(defaults.read_only);
    }

    #[test]
    fn test_load_missing_file_gives_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "poll_interval_ms: 0\n").unwrap();
        assert!(matches!(Config::load(&path), Err(BoxError::Config(_))));
        fs::write(&path, "boxes: [unclosed\n").unwrap();
        assert!(matches!(Config::load(&path), Err(BoxError::Yaml(_))));
    }
}
