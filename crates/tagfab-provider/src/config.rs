//! Provider configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ProviderError, Result};
use crate::options::MIN_MULTI_RECV_DEFAULT;

/// Default number of request descriptors per endpoint.
pub const REQUEST_POOL_SIZE_DEFAULT: usize = 64;

/// Settings applied to every endpoint opened on a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Request descriptors allocated per endpoint. Must be non-zero.
    pub request_pool_size: usize,
    /// Sends block until the transport has taken the data.
    pub blocking_send: bool,
    /// Callers must supply a context for every non-blocking operation.
    pub use_context: bool,
    /// Default for the min-multi-recv endpoint option.
    pub min_multi_recv: usize,
    /// Default for the buffered-min endpoint option.
    pub buffered_min: usize,
    /// Default for the buffered-limit endpoint option.
    pub buffered_limit: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            request_pool_size: REQUEST_POOL_SIZE_DEFAULT,
            blocking_send: false,
            use_context: true,
            min_multi_recv: MIN_MULTI_RECV_DEFAULT,
            buffered_min: 0,
            buffered_limit: 8192,
        }
    }
}

impl ProviderConfig {
    /// Load a configuration from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: ProviderConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check values that would make endpoint open fail.
    pub fn validate(&self) -> Result<()> {
        if self.request_pool_size == 0 {
            return Err(ProviderError::Config(
                "request_pool_size must be greater than zero".to_string(),
            ));
        }
        if self.buffered_min > self.buffered_limit {
            return Err(ProviderError::Config(format!(
                "buffered_min {} exceeds buffered_limit {}",
                self.buffered_min, self.buffered_limit
            )));
        }
        Ok(())
    }
}
