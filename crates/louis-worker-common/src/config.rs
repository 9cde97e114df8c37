//! Configuration structures for louis-worker.
//!
//! This module defines configuration options for various components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Wasmtime engine and engine-module settings
//! - [`ExecutionConfig`]: Per-call limits and output buffer sizing
//! - [`TableConfig`]: Table source and default table set

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Smallest expansion factor accepted for output buffer sizing.
pub const MIN_EXPANSION_FACTOR: u32 = 4;

/// Smallest expansion margin (in units) accepted for output buffer sizing.
pub const MIN_EXPANSION_MARGIN: u32 = 64;

/// Top-level runtime configuration.
///
/// This structure contains all configuration options for a translation
/// worker. It can be loaded from TOML or JSON.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-call execution configuration.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Translation table configuration.
    #[serde(default)]
    pub tables: TableConfig,
}

impl RuntimeConfig {
    /// Check every section for out-of-range values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;
        self.execution.validate()?;
        self.tables.validate()
    }
}

/// Wasmtime engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Path to the liblouis WebAssembly module.
    #[serde(default)]
    pub module_path: Option<String>,

    /// Maximum linear memory of the engine instance in megabytes.
    #[serde(default = "defaults::max_memory_mb")]
    pub max_memory_mb: u32,

    /// Enable caching of compiled modules.
    ///
    /// When enabled, compiled artifacts are written to `cache_dir` keyed by
    /// the content hash of the module, speeding up subsequent startups.
    #[serde(default = "defaults::cache_compiled_modules")]
    pub cache_compiled_modules: bool,

    /// Directory for compiled module cache.
    ///
    /// Only effective when `cache_compiled_modules` is enabled.
    #[serde(default)]
    pub cache_dir: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            module_path: None,
            max_memory_mb: defaults::max_memory_mb(),
            cache_compiled_modules: defaults::cache_compiled_modules(),
            cache_dir: Some("./cache".into()),
        }
    }
}

impl EngineConfig {
    /// Maximum linear memory in bytes.
    pub fn max_memory_bytes(&self) -> usize {
        (self.max_memory_mb as usize) * 1024 * 1024
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_memory_mb == 0 {
            return Err(ConfigError::invalid("engine.max_memory_mb must be non-zero"));
        }
        Ok(())
    }
}

/// Per-call execution configuration.
///
/// These settings control fuel limits for foreign calls and how the
/// output buffer of a translation is sized.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Enable fuel metering.
    ///
    /// When enabled, every foreign call is refuelled to `max_fuel`
    /// before it starts.
    #[serde(default = "defaults::fuel_metering")]
    pub fuel_metering: bool,

    /// Maximum fuel (guest instructions) per foreign call.
    ///
    /// The first translation against a table compiles that table inside
    /// the engine, which is far more expensive than later calls.
    #[serde(default = "defaults::max_fuel")]
    pub max_fuel: u64,

    /// Output units allocated per input unit.
    #[serde(default = "defaults::expansion_factor")]
    pub expansion_factor: u32,

    /// Extra output units added on top of the expansion.
    #[serde(default = "defaults::expansion_margin")]
    pub expansion_margin: u32,

    /// Lower bound of the output buffer in units.
    #[serde(default = "defaults::min_output_capacity")]
    pub min_output_capacity: u32,

    /// Longest accepted input in wide-character units.
    #[serde(default = "defaults::max_input_units")]
    pub max_input_units: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            fuel_metering: defaults::fuel_metering(),
            max_fuel: defaults::max_fuel(),
            expansion_factor: defaults::expansion_factor(),
            expansion_margin: defaults::expansion_margin(),
            min_output_capacity: defaults::min_output_capacity(),
            max_input_units: defaults::max_input_units(),
        }
    }
}

impl ExecutionConfig {
    /// Output buffer capacity, in units, for an input of `input_units`.
    ///
    /// Returns `None` if the capacity does not fit in a guest `int`.
    pub fn output_capacity(&self, input_units: usize) -> Option<usize> {
        let expanded = input_units
            .checked_mul(self.expansion_factor as usize)?
            .checked_add(self.expansion_margin as usize)?;
        let capacity = expanded.max(self.min_output_capacity as usize);
        i32::try_from(capacity).ok().map(|_| capacity)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.expansion_factor < MIN_EXPANSION_FACTOR {
            return Err(ConfigError::invalid(format!(
                "execution.expansion_factor must be at least {MIN_EXPANSION_FACTOR}, got {}",
                self.expansion_factor
            )));
        }
        if self.expansion_margin < MIN_EXPANSION_MARGIN {
            return Err(ConfigError::invalid(format!(
                "execution.expansion_margin must be at least {MIN_EXPANSION_MARGIN}, got {}",
                self.expansion_margin
            )));
        }
        if self.max_input_units == 0 {
            return Err(ConfigError::invalid(
                "execution.max_input_units must be non-zero",
            ));
        }
        if self.fuel_metering && self.max_fuel == 0 {
            return Err(ConfigError::invalid(
                "execution.max_fuel must be non-zero when fuel metering is enabled",
            ));
        }
        Ok(())
    }
}

/// Where translation tables are fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TableSourceConfig {
    /// A local directory containing table files.
    Directory {
        /// Directory path.
        path: String,
    },

    /// An HTTP(S) location; table names are joined onto `base_url`.
    Http {
        /// Base URL, e.g. `https://example.com/liblouis-build/`.
        base_url: String,

        /// Request timeout in seconds.
        #[serde(default = "defaults::http_timeout_secs")]
        timeout_secs: u64,
    },
}

impl Default for TableSourceConfig {
    fn default() -> Self {
        Self::Directory {
            path: "./tables".into(),
        }
    }
}

impl TableSourceConfig {
    /// An HTTP source with the default request timeout.
    pub fn http(base_url: impl Into<String>) -> Self {
        Self::Http {
            base_url: base_url.into(),
            timeout_secs: defaults::http_timeout_secs(),
        }
    }
}

/// Translation table configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TableConfig {
    /// Table source.
    #[serde(default)]
    pub source: TableSourceConfig,

    /// Tables installed during initialization.
    #[serde(default = "defaults::default_tables")]
    pub default_tables: Vec<String>,

    /// Install files referenced by `include` directives.
    #[serde(default = "defaults::resolve_includes")]
    pub resolve_includes: bool,

    /// Extra table appended to the table list per math code.
    ///
    /// Keys are math code names (`nemeth`, `ueb`).
    #[serde(default)]
    pub math_tables: BTreeMap<String, String>,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            source: TableSourceConfig::default(),
            default_tables: defaults::default_tables(),
            resolve_includes: defaults::resolve_includes(),
            math_tables: BTreeMap::new(),
        }
    }
}

impl TableConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(empty) = self
            .default_tables
            .iter()
            .chain(self.math_tables.values())
            .find(|name| name.trim().is_empty())
        {
            return Err(ConfigError::invalid(format!(
                "table names must be non-empty, got '{empty}'"
            )));
        }
        Ok(())
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn max_memory_mb() -> u32 {
        256
    }

    pub const fn cache_compiled_modules() -> bool {
        false
    }

    pub const fn fuel_metering() -> bool {
        true
    }

    pub const fn max_fuel() -> u64 {
        20_000_000_000
    }

    pub const fn expansion_factor() -> u32 {
        4
    }

    pub const fn expansion_margin() -> u32 {
        100
    }

    pub const fn min_output_capacity() -> u32 {
        256
    }

    pub const fn max_input_units() -> u32 {
        1 << 20
    }

    pub const fn http_timeout_secs() -> u64 {
        30
    }

    pub fn default_tables() -> Vec<String> {
        vec!["en-ueb-g2.ctb".to_string(), "en-us-g1.ctb".to_string()]
    }

    pub const fn resolve_includes() -> bool {
        true
    }
}
