//! Provider selection.
//!
//! The manager is built once at start-up from the `[storage]` configuration
//! and then handed to whatever needs storage access. There is no global
//! instance.

use crate::BackendHandle;
use crate::backend::LocalProvider;
use crate::error::{ErrorKind, Result};
use prism_config::StorageConfig;
use std::ops::Deref;
use std::sync::Arc;

/// Owns the single configured [`StorageProvider`](crate::StorageProvider) and
/// delegates to it.
#[derive(Clone)]
pub struct StorageManager {
    provider: BackendHandle,
}

impl StorageManager {
    /// Wrap an already constructed provider.
    pub fn new(provider: BackendHandle) -> Self {
        Self { provider }
    }

    /// Construct the provider named by the configuration's `provider` field.
    ///
    /// Providers compiled out via cargo features are reported as
    /// [`Configuration`](ErrorKind::Configuration) errors.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let name = config.provider();
        let provider: BackendHandle = match config {
            #[cfg(feature = "s3")]
            StorageConfig::S3(s3) => Arc::new(crate::backend::S3Provider::new(name, s3)?),
            #[cfg(feature = "github")]
            StorageConfig::Github(github) => Arc::new(crate::backend::GitHubProvider::new(name, github)?),
            StorageConfig::Local(local) => Arc::new(LocalProvider::new(name, local)?),
            #[allow(unreachable_patterns)]
            _ => exn::bail!(ErrorKind::Configuration(format!("storage provider `{name}` is not enabled in this build"))),
        };
        tracing::info!(provider = name, "Storage provider ready");
        Ok(Self { provider })
    }

    /// Shared handle to the provider, for passing into concurrent tasks.
    pub fn handle(&self) -> BackendHandle {
        Arc::clone(&self.provider)
    }
}

impl Deref for StorageManager {
    type Target = dyn crate::StorageProvider;

    fn deref(&self) -> &Self::Target {
        self.provider.as_ref()
    }
}
