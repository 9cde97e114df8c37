//! Configuration file structures for louis-worker.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`WorkerConfigFile`]: Worker queue and caller-side debounce settings

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, RuntimeConfig};

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [runtime.engine]
/// module_path = "./liblouis/liblouis.wasm"
/// max_memory_mb = 256
///
/// [runtime.execution]
/// max_fuel = 20_000_000_000
/// expansion_factor = 4
///
/// [runtime.tables]
/// default_tables = ["en-ueb-g2.ctb", "en-us-g1.ctb"]
///
/// [runtime.tables.source]
/// kind = "http"
/// base_url = "https://example.com/liblouis-build/"
///
/// [worker]
/// queue_depth = 64
/// debounce_ms = 500
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Runtime configuration (engine, execution, tables).
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Worker configuration.
    #[serde(default)]
    pub worker: WorkerConfigFile,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        config.runtime.validate()?;
        Ok(config)
    }
}

/// Worker settings from the config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfigFile {
    /// Capacity of the worker's request inbox.
    #[serde(default = "defaults::queue_depth")]
    pub queue_depth: usize,

    /// Quiescence window applied by callers before issuing a translation.
    #[serde(default = "defaults::debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for WorkerConfigFile {
    fn default() -> Self {
        Self {
            queue_depth: defaults::queue_depth(),
            debounce_ms: defaults::debounce_ms(),
        }
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn queue_depth() -> usize {
        64
    }

    pub const fn debounce_ms() -> u64 {
        500
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableSourceConfig;

    #[test]
    fn test_default_config_file() {
        let config = ConfigFile::default();

        assert_eq!(config.worker.queue_depth, 64);
        assert_eq!(config.worker.debounce_ms, 500);
        assert!(config.runtime.engine.module_path.is_none());
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            [runtime.engine]
            module_path = "./liblouis.wasm"
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert_eq!(
            config.runtime.engine.module_path.as_deref(),
            Some("./liblouis.wasm")
        );
        // Defaults applied
        assert_eq!(config.worker.debounce_ms, 500);
        assert_eq!(config.runtime.tables.default_tables.len(), 2);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [runtime.engine]
            module_path = "./liblouis.wasm"
            max_memory_mb = 128
            cache_compiled_modules = true
            cache_dir = "/tmp/louis-cache"

            [runtime.execution]
            max_fuel = 5_000_000
            expansion_factor = 5
            expansion_margin = 128

            [runtime.tables]
            default_tables = ["en-ueb-g1.ctb"]
            resolve_includes = false

            [runtime.tables.source]
            kind = "http"
            base_url = "https://example.com/tables/"
            timeout_secs = 5

            [runtime.tables.math_tables]
            nemeth = "nemeth.ctb"

            [worker]
            queue_depth = 8
            debounce_ms = 250
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert_eq!(config.runtime.engine.max_memory_mb, 128);
        assert!(config.runtime.engine.cache_compiled_modules);
        assert_eq!(config.runtime.execution.max_fuel, 5_000_000);
        assert_eq!(config.runtime.execution.expansion_factor, 5);
        assert_eq!(config.runtime.tables.default_tables, vec!["en-ueb-g1.ctb"]);
        assert!(!config.runtime.tables.resolve_includes);
        assert_eq!(
            config.runtime.tables.source,
            TableSourceConfig::Http {
                base_url: "https://example.com/tables/".into(),
                timeout_secs: 5,
            }
        );
        assert_eq!(
            config.runtime.tables.math_tables.get("nemeth").map(String::as_str),
            Some("nemeth.ctb")
        );
        assert_eq!(config.worker.queue_depth, 8);
        assert_eq!(config.worker.debounce_ms, 250);
    }

    #[test]
    fn test_parse_invalid_toml() {
        let invalid = "this is not valid toml [";
        let result = ConfigFile::from_toml(invalid);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_parse_rejects_invalid_values() {
        let toml = r#"
            [runtime.execution]
            expansion_factor = 1
        "#;
        let result = ConfigFile::from_toml(toml);
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }
}
