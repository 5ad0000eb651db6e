//! Application configuration.
//!
//! Aggregates storage, store, codec, and declared-metadata settings into a
//! single Config struct that can be loaded from YAML files or environment
//! variables.

mod storage;

pub use storage::{
    MongodbConfig, SqliteConfig, StorageConfig, StorageType, DEFAULT_BATCHES_COLLECTION,
};

use serde::Deserialize;

use crate::codec::{PayloadCodec, RESERVED_MARKER};
use crate::metadata::MetadataDeclarations;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "EVENTVAULT_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "EVENTVAULT";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "EVENTVAULT_LOG";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid codec substitute {0:?}: must be a single character other than '$'")]
    InvalidSubstitute(String),
}

/// Main configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage backend selection.
    pub storage: StorageConfig,
    /// Event store settings.
    pub store: StoreConfig,
    /// Payload codec settings.
    pub codec: CodecConfig,
    /// Declared default metadata, keyed by event type tag.
    pub metadata: MetadataDeclarations,
}

/// Event store settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// First per-aggregate sequence number.
    pub sequence_base: u64,
}

/// Payload codec settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Replacement for a leading `$` in stored field names.
    /// Unset means U+FF04 (fullwidth dollar sign).
    pub substitute: Option<String>,
}

impl CodecConfig {
    /// The configured substitute character, if any.
    pub fn substitute_char(&self) -> Result<Option<char>, ConfigError> {
        let Some(raw) = &self.substitute else {
            return Ok(None);
        };

        let mut chars = raw.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c != RESERVED_MARKER => Ok(Some(c)),
            _ => Err(ConfigError::InvalidSubstitute(raw.clone())),
        }
    }

    /// Build the codec. An invalid substitute falls back to the default;
    /// [`Config::load`] rejects such values before they get here.
    pub fn codec(&self) -> PayloadCodec {
        self.substitute_char()
            .ok()
            .flatten()
            .and_then(PayloadCodec::with_substitute)
            .unwrap_or_default()
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix, `__` separated
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config: Config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.codec.substitute_char()?;
        Ok(config)
    }

    /// In-memory configuration for tests.
    pub fn for_test() -> Self {
        Self {
            storage: StorageConfig::memory(),
            ..Self::default()
        }
    }
}
