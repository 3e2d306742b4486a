// Configuration module
// Author: kelexine (https://github.com/kelexine)

mod models;

pub use models::*;

use crate::error::{ProxyError, Result};
use config::{Config, Environment, File};
use std::path::PathBuf;

impl AppConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest)
    /// 2. Config file (`path`, or `~/.chatbridge/config.toml`)
    /// 3. Defaults (lowest)
    ///
    /// CLI overrides are applied by the caller afterwards.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let (file, required) = match path {
            Some(p) => (p.to_string(), true),
            None => (Self::default_config_path(), false),
        };

        let config = Config::builder()
            // Start with defaults
            .add_source(Config::try_from(&Self::default())?)
            .add_source(File::with_name(&file).required(required))
            // Override with environment variables, e.g. CHATBRIDGE__SERVER__PORT
            .add_source(
                Environment::with_prefix("CHATBRIDGE")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .map_err(|e| ProxyError::Config(e.to_string()))?;

        let loaded: Self = config
            .try_deserialize()
            .map_err(|e| ProxyError::Config(e.to_string()))?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject configurations the gateway cannot serve.
    pub fn validate(&self) -> Result<()> {
        if self.stream.channel_capacity == 0 {
            return Err(ProxyError::Config(
                "stream.channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.stream.keepalive_poll_ms == 0 {
            return Err(ProxyError::Config(
                "stream.keepalive_poll_ms must be at least 1".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for model in &self.models {
            if !seen.insert(model.name.as_str()) {
                return Err(ProxyError::Config(format!(
                    "duplicate model name: {}",
                    model.name
                )));
            }
        }
        Ok(())
    }

    fn default_config_path() -> String {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".chatbridge")
            .join("config.toml")
            .to_string_lossy()
            .to_string()
    }
}
