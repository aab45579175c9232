//! Engine Configuration
//!
//! Settings read from `blueprint.toml`. Every section is optional.
//!
//! ```toml
//! [engine]
//! step_poll_ms = 10
//! device_index = -1
//!
//! [plugins]
//! directory = "plugins"
//!
//! [log]
//! filter = "info,blueprint_runtime=debug"
//! json = false
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::ContextOptions;
use crate::executor::DevicePolicy;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Engine configuration (blueprint.toml)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub plugins: PluginSection,
    #[serde(default)]
    pub log: LogSection,
}

/// Execution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSection {
    /// Poll interval of the paused stepping thread
    #[serde(default = "default_step_poll_ms")]
    pub step_poll_ms: u64,
    /// Compute device handed to nodes; negative selects the CPU
    #[serde(default = "default_device_index")]
    pub device_index: i32,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            step_poll_ms: default_step_poll_ms(),
            device_index: default_device_index(),
        }
    }
}

fn default_step_poll_ms() -> u64 {
    10
}

fn default_device_index() -> i32 {
    -1
}

/// Plugin discovery
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginSection {
    pub directory: Option<PathBuf>,
}

/// Log output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSection {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Emit one JSON object per event instead of human-readable lines
    #[serde(default)]
    pub json: bool,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn device(&self) -> DevicePolicy {
        DevicePolicy {
            device_index: self.engine.device_index,
        }
    }

    /// Context options derived from the `[engine]` section
    pub fn context_options(&self) -> ContextOptions {
        ContextOptions {
            step_poll: Duration::from_millis(self.engine.step_poll_ms.max(1)),
            device: self.device(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.engine.step_poll_ms, 10);
        assert!(config.device().is_cpu());
        assert_eq!(config.log.filter, "info");
        assert!(!config.log.json);
        assert!(config.plugins.directory.is_none());
    }

    #[test]
    fn test_parse_all_sections() {
        let config = EngineConfig::from_toml_str(
            r#"
            [engine]
            step_poll_ms = 25
            device_index = 1

            [plugins]
            directory = "nodes"

            [log]
            filter = "debug"
            json = true
            "#,
        )
        .unwrap();

        let options = config.context_options();
        assert_eq!(options.step_poll, Duration::from_millis(25));
        assert_eq!(options.device.gpu_index(), Some(1));
        assert_eq!(config.plugins.directory, Some(PathBuf::from("nodes")));
        assert_eq!(config.log.filter, "debug");
        assert!(config.log.json);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            EngineConfig::from_toml_str("[engine]\nstep_poll_ms = \"fast\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blueprint.toml");
        std::fs::write(&path, "[engine]\ndevice_index = 0\n").unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap().device(), DevicePolicy::gpu(0));

        assert!(matches!(
            EngineConfig::load(dir.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
