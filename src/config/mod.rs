//! Unified configuration for the spartan runtime.
//!
//! Configuration is loaded with precedence: overrides > Env vars > Config file > Defaults
//!
//! # Example config file (spartan.toml)
//! ```toml
//! [runtime]
//! workers = 8
//! default_shards = 16
//!
//! [array]
//! tile_dim = 1024
//!
//! [local]
//! max_deps = 2
//! use_accelerator = false
//! ```

mod defaults;

pub use defaults::*;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpartanConfig {
    /// Table runtime and worker pool
    pub runtime: RuntimeConfig,
    /// Distributed array layout
    pub array: ArrayConfig,
    /// Local (per-tile) expression evaluation
    pub local: LocalConfig,
}

impl SpartanConfig {
    /// Load configuration with precedence: overrides > Env > File > Defaults
    ///
    /// # Arguments
    /// * `config_path` - Optional path to TOML config file
    /// * `overrides` - Programmatic overrides applied last
    pub fn load(
        config_path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(SpartanConfig::default()));

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Nested keys use a double underscore: SPARTAN_ARRAY__TILE_DIM
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        figment = figment.merge(Serialized::defaults(overrides));

        figment.extract().map_err(ConfigError::from)
    }

    /// Load from environment and optional config file only.
    pub fn from_env(config_path: Option<&str>) -> Result<Self, ConfigError> {
        Self::load(config_path, ConfigOverrides::default())
    }

    /// Small, deterministic configuration for tests: few workers, tiny tiles.
    pub fn for_tests(workers: usize, tile_dim: usize) -> Self {
        Self {
            runtime: RuntimeConfig {
                workers,
                default_shards: workers * DEFAULT_SHARDS_PER_WORKER,
                update_queue_capacity: 256,
            },
            array: ArrayConfig { tile_dim },
            local: LocalConfig::default(),
        }
    }
}

/// Worker pool and table defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of worker lanes
    pub workers: usize,
    /// Shard count for tables created without an explicit count
    pub default_shards: usize,
    /// Pending-update queue capacity per worker
    pub update_queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let workers = default_worker_count();
        Self {
            workers,
            default_shards: workers * DEFAULT_SHARDS_PER_WORKER,
            update_queue_capacity: DEFAULT_UPDATE_QUEUE_CAPACITY,
        }
    }
}

/// Layout of new distributed arrays.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArrayConfig {
    /// Maximum tile edge length
    pub tile_dim: usize,
}

impl Default for ArrayConfig {
    fn default() -> Self {
        Self {
            tile_dim: DEFAULT_TILE_DIM,
        }
    }
}

/// Local expression evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Maximum dependencies per node (`None` = unbounded)
    pub max_deps: Option<usize>,
    /// Evaluate shared nodes once per pass
    pub memoize_shared: bool,
    /// Ask the compiled-function provider for the accelerator backend
    pub use_accelerator: bool,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            max_deps: None,
            memoize_shared: DEFAULT_MEMOIZE_SHARED,
            use_accelerator: DEFAULT_USE_ACCELERATOR,
        }
    }
}

/// Overrides that take precedence over file and env config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub array: Option<ArrayOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalOverrides>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_shards: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_queue_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArrayOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tile_dim: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_deps: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memoize_shared: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_accelerator: Option<bool>,
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}
