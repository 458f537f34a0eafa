//! Discovery configuration, loaded from TOML.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_REGISTRY_ENDPOINT: &str = "http://sadiframework.org/registry/sparql";
pub const DEFAULT_SADI_RESOLVER: &str = "http://sadiframework.org/resolver";
pub const REGISTRY_ENDPOINT_ENV: &str = "SADI_REGISTRY_ENDPOINT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_REGISTRY_ENDPOINT.to_string(),
            timeout_secs: 30,
        }
    }
}

impl RegistryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Fetch the node's own URI as linked data.
    pub dereference: bool,
    /// SADI resolver endpoint. An empty string disables that source.
    pub sadi_resolver: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            dereference: true,
            sadi_resolver: Some(DEFAULT_SADI_RESOLVER.to_string()),
            timeout_secs: 20,
        }
    }
}

impl ResolverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn sadi_resolver_endpoint(&self) -> Option<&str> {
        self.sadi_resolver
            .as_deref()
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub batch_size: usize,
    pub event_buffer: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            batch_size: crate::discovery::DEFAULT_BATCH_SIZE,
            event_buffer: crate::discovery::session::DEFAULT_EVENT_BUFFER,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub registry: RegistryConfig,
    pub resolver: ResolverConfig,
    pub discovery: SweepConfig,
}

impl DiscoveryConfig {
    /// Load and validate a TOML file, then apply environment overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply overrides from a variable lookup.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup(REGISTRY_ENDPOINT_ENV).filter(|v| !v.trim().is_empty()) {
            log::debug!("[config] registry endpoint overridden by {}", REGISTRY_ENDPOINT_ENV);
            self.registry.endpoint = endpoint.trim().to_string();
        }
        self
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(self) -> Self {
        self.with_env_overrides(|name| std::env::var(name).ok())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discovery.batch_size == 0 {
            return Err(ConfigError::Invalid("discovery.batch_size must be at least 1".to_string()));
        }
        if self.discovery.event_buffer == 0 {
            return Err(ConfigError::Invalid("discovery.event_buffer must be at least 1".to_string()));
        }
        check_absolute("registry.endpoint", &self.registry.endpoint)?;
        if let Some(resolver) = self.resolver.sadi_resolver_endpoint() {
            check_absolute("resolver.sadi_resolver", resolver)?;
        }
        Ok(())
    }
}

fn check_absolute(field: &str, value: &str) -> Result<(), ConfigError> {
    match Url::parse(value) {
        Ok(url) if !url.cannot_be_a_base() => Ok(()),
        Ok(_) => Err(ConfigError::Invalid(format!("{} '{}' is not a hierarchical URL", field, value))),
        Err(e) => Err(ConfigError::Invalid(format!("{} '{}': {}", field, value, e))),
    }
}
