//! Configuration management for the NAS DDNS API.
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! `NASAPI__SECTION__FIELD` environment variables.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{NasApiError, Result};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "NASAPI";

/// Main configuration for the service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NasApiConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5000))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Shared store URL; when unset the in-process limiter is used
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Deadline for each shared store call in milliseconds
    #[serde(default = "default_store_timeout")]
    pub store_timeout_ms: u64,

    /// Path to a rate limit rules file replacing the reference policy
    #[serde(default)]
    pub rules_path: Option<String>,

    /// How often idle in-process windows are swept, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            store_timeout_ms: default_store_timeout(),
            rules_path: None,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl RateLimitingConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

fn default_store_timeout() -> u64 {
    250
}

fn default_sweep_interval() -> u64 {
    60
}

impl NasApiConfig {
    /// Load layered configuration: defaults, the optional file, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            if !path.exists() {
                return Err(NasApiError::Config(format!(
                    "configuration file not found: {}",
                    path.display()
                )));
            }
            builder = builder
                .add_source(::config::File::from(path).format(::config::FileFormat::Yaml));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: NasApiConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }
}
