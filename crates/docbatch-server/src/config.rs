//! Configuration management for the docbatch service layer.
//!
//! Configuration is layered:
//! 1. Default values (hardcoded)
//! 2. Configuration file (YAML)
//! 3. Environment variables (override)
//!
//! Environment variables use the `DOCBATCH_` prefix and `__` between nested
//! keys, e.g. `DOCBATCH_STORAGE__DATABASE_URL` or `DOCBATCH_LOADER__PRINCIPAL`.
//!
//! # Example
//!
//! ```ignore
//! use docbatch_server::config::ServerConfig;
//!
//! let config = ServerConfig::load("docbatch.yaml")?;
//! if let Some(pg) = config.postgres_config() {
//!     let store = PostgresDocumentStore::from_config(&pg).await?;
//! }
//! ```

use config::{Config, ConfigError, Environment, File, FileFormat};
use docbatch_domain::LoaderConfig;
use docbatch_storage::{AccessPolicy, PostgresConfig, EVERYONE_PRINCIPAL};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ServerConfig {
    /// Storage settings
    #[serde(default)]
    pub storage: StorageSettings,

    /// Loader settings
    #[serde(default)]
    pub loader: LoaderSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Storage backend settings.
#[derive(Clone, Deserialize, Serialize, PartialEq)]
pub struct StorageSettings {
    /// Storage backend type: "memory" or "postgres"
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Database connection URL (required if backend is "postgres")
    pub database_url: Option<String>,

    /// Connection pool size
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Batch query timeout in seconds
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

// Custom Debug implementation to hide credentials in database_url
impl std::fmt::Debug for StorageSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageSettings")
            .field("backend", &self.backend)
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("pool_size", &self.pool_size)
            .field("connection_timeout_secs", &self.connection_timeout_secs)
            .field("query_timeout_secs", &self.query_timeout_secs)
            .finish()
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            database_url: None,
            pool_size: default_pool_size(),
            connection_timeout_secs: default_connection_timeout(),
            query_timeout_secs: default_query_timeout(),
        }
    }
}

fn default_storage_backend() -> String {
    "memory".to_string()
}

fn default_pool_size() -> u32 {
    10
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_query_timeout() -> u64 {
    30
}

/// Loader settings.
///
/// ```yaml
/// loader:
///   coalesce_yields: 1
///   principal: system.Everyone
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoaderSettings {
    /// Scheduling rounds a batch waits for sibling lookups.
    ///
    /// Environment variable: `DOCBATCH_LOADER__COALESCE_YIELDS`
    #[serde(default = "default_coalesce_yields")]
    pub coalesce_yields: usize,

    /// Principal whose view permission documents must grant.
    ///
    /// Environment variable: `DOCBATCH_LOADER__PRINCIPAL`
    #[serde(default = "default_principal")]
    pub principal: String,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            coalesce_yields: default_coalesce_yields(),
            principal: default_principal(),
        }
    }
}

fn default_coalesce_yields() -> usize {
    1
}

fn default_principal() -> String {
    EVERYONE_PRINCIPAL.to_string()
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format (true for production, false for development)
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

const ENV_PREFIX: &str = "DOCBATCH";

impl ServerConfig {
    /// Load configuration from a YAML file with environment variable overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        Self::build(Some(path))
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        Self::build(None)
    }

    fn build(path: Option<&Path>) -> Result<Self, ConfigLoadError> {
        let mut builder = Config::builder().add_source(Config::try_from(&ServerConfig::default())?);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
        }
        // DOCBATCH_STORAGE__BACKEND -> storage.backend
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        let valid_backends = ["memory", "postgres"];
        if !valid_backends.contains(&self.storage.backend.as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "storage.backend must be one of: {:?}, got: {}",
                    valid_backends, self.storage.backend
                ),
            });
        }

        if self.storage.backend == "postgres"
            && self
                .storage
                .database_url
                .as_deref()
                .map_or(true, |s| s.trim().is_empty())
        {
            return Err(ConfigLoadError::Invalid {
                message: "storage.database_url is required when backend is 'postgres'"
                    .to_string(),
            });
        }

        if self.loader.coalesce_yields == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "loader.coalesce_yields must be greater than 0".to_string(),
            });
        }

        if self.loader.principal.trim().is_empty() {
            return Err(ConfigLoadError::Invalid {
                message: "loader.principal must not be empty".to_string(),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "logging.level must be one of: {:?}, got: {}",
                    valid_levels, self.logging.level
                ),
            });
        }

        Ok(())
    }

    /// PostgreSQL settings, when the postgres backend is selected.
    pub fn postgres_config(&self) -> Option<PostgresConfig> {
        if self.storage.backend != "postgres" {
            return None;
        }
        Some(PostgresConfig {
            database_url: self.storage.database_url.clone()?,
            max_connections: self.storage.pool_size,
            connect_timeout_secs: self.storage.connection_timeout_secs,
            query_timeout_secs: self.storage.query_timeout_secs,
            ..Default::default()
        })
    }

    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig::default().with_coalesce_yields(self.loader.coalesce_yields)
    }

    pub fn access_policy(&self) -> AccessPolicy {
        AccessPolicy::new(self.loader.principal.clone())
    }
}
