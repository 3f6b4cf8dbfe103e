//! Configuration Module
//!
//! Process settings come from environment variables (after `.env` is
//! loaded); the upstream API registry comes from a YAML file with
//! `${VAR}` / `${VAR:-default}` interpolation so secrets stay in the
//! environment.
//!
//! # Usage
//!
//! ```rust,ignore
//! use quote_proxy::infrastructure::config::{ApiRegistry, ProxyConfig};
//!
//! let config = ProxyConfig::from_env()?;
//! let registry = ApiRegistry::from_file(&config.upstream.apis_file)?;
//! ```

mod registry;
mod settings;

use thiserror::Error;

pub use registry::{ApiConfig, ApiRegistry, EndpointConfig, interpolate_env_vars, interpolate_with};
pub use settings::{
    CacheSettings, CollectionSettings, HistorySettings, ProxyConfig, SchedulerSettings,
    ServerSettings, TrackingSettings, UpstreamSettings,
};

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Setting has an unusable value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue {
        /// Setting name.
        key: String,
        /// What is wrong with it.
        message: String,
    },

    /// Failed to read a configuration file.
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("config validation failed: {0}")]
    ValidationError(String),
}
