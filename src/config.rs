//! Pool configuration
//!
//! Loaded from an optional TOML file, then overridden by `ZTREE_*`
//! environment variables (e.g. `ZTREE_PAGE_LIMIT=4096`).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum backing pages in use at once (None = unbounded)
    pub page_limit: Option<usize>,
    /// Zero-fill new blocks by default
    pub zero_new_blocks: bool,
    /// Objects to evict per shrink request
    pub shrink_batch: usize,
    /// Record Prometheus metrics
    pub metrics: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            page_limit: None,
            zero_new_blocks: false,
            shrink_batch: 128,
            metrics: false,
        }
    }
}

impl PoolConfig {
    /// Load configuration from `path` (if given) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            info!(path = ?path, "Loading pool configuration");
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        builder =
            builder.add_source(::config::Environment::with_prefix("ZTREE").try_parsing(true));

        let config: PoolConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        debug!(?config, "Effective pool configuration");
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: PoolConfig =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_limit == Some(0) {
            return Err(Error::Config("page_limit must be at least 1".to_string()));
        }
        if self.shrink_batch == 0 {
            return Err(Error::Config("shrink_batch must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.page_limit, None);
        assert_eq!(config.shrink_batch, 128);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial() -> Result<()> {
        let config = PoolConfig::from_toml("page_limit = 64\nzero_new_blocks = true\n")?;
        assert_eq!(config.page_limit, Some(64));
        assert!(config.zero_new_blocks);
        assert_eq!(config.shrink_batch, 128);
        Ok(())
    }

    #[test]
    fn test_toml_round_trip() -> Result<()> {
        let config = PoolConfig {
            page_limit: Some(32),
            metrics: true,
            ..PoolConfig::default()
        };
        assert_eq!(PoolConfig::from_toml(&config.to_toml()?)?, config);
        Ok(())
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            PoolConfig::from_toml("page_limit = 0"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            PoolConfig::from_toml("shrink_batch = 0"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            PoolConfig::from_toml("page_limit = \"many\""),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_load_from_file() -> Result<()> {
        let path =
            std::env::temp_dir().join(format!("ztree_config_{}.toml", std::process::id()));
        std::fs::write(&path, "page_limit = 128\nshrink_batch = 16\n")
            .map_err(|e| Error::Config(e.to_string()))?;

        let config = PoolConfig::load(Some(&path))?;
        assert_eq!(config.page_limit, Some(128));
        assert_eq!(config.shrink_batch, 16);

        std::fs::remove_file(path).ok();
        Ok(())
    }
}
