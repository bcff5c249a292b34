//! Server configuration
//!
//! Values are read from `COVENANT_`-prefixed environment variables at startup. Every
//! field has a default, so an empty environment yields a working server.

use std::time::Duration;

use anyhow::{Context, Result};
use covenant_fernet::KeyStrategy;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    /// Strategy used by `derive_key` when the request names none.
    #[serde(default)]
    pub default_strategy: KeyStrategy,

    /// Upper bound on the time spent answering one request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Tracing filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_request_timeout() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            default_strategy: KeyStrategy::default(),
            request_timeout_secs: default_request_timeout(),
            log_level: default_log_level(),
        }
    }
}

impl RpcConfig {
    /// Load and validate configuration from the environment.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::with_prefix("COVENANT").try_parsing(true))
            .build()
            .context("failed to build configuration from environment")?;

        let c: RpcConfig = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.request_timeout_secs == 0 {
            anyhow::bail!("COVENANT_REQUEST_TIMEOUT_SECS must be > 0");
        }
        if self.log_level.trim().is_empty() {
            anyhow::bail!("COVENANT_LOG_LEVEL must not be empty");
        }
        Ok(())
    }
}
