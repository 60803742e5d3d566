//! Session configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use providers::ProviderRegistry;

use crate::store::{DownloadStore, NullStore};

/// Default minimum interval between progress-driven `DownloadUpdated`
/// events per download.
pub const DEFAULT_PROGRESS_UPDATE_INTERVAL: Duration = Duration::from_millis(500);

/// Configuration for a [`Session`](crate::Session).
#[derive(Clone)]
pub struct SessionConfig {
    /// Directory used when `add_download` doesn't specify a save path.
    pub default_save_path: PathBuf,
    /// Persistent store for download records. [`NullStore`] disables
    /// persistence.
    pub store: Arc<dyn DownloadStore>,
    /// Provider registry used to match and resolve URLs.
    pub registry: Arc<ProviderRegistry>,
    /// Minimum interval between progress-driven `DownloadUpdated` events
    /// per download.
    pub progress_update_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_save_path: PathBuf::from("."),
            store: Arc::new(NullStore),
            registry: Arc::new(ProviderRegistry::new()),
            progress_update_interval: DEFAULT_PROGRESS_UPDATE_INTERVAL,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default save path.
    pub fn with_default_save_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.default_save_path = path.into();
        self
    }

    /// Set the persistent store.
    pub fn with_store(mut self, store: Arc<dyn DownloadStore>) -> Self {
        self.store = store;
        self
    }

    /// Set the provider registry.
    pub fn with_registry(mut self, registry: Arc<ProviderRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Set the progress update interval.
    pub fn with_progress_update_interval(mut self, interval: Duration) -> Self {
        self.progress_update_interval = interval;
        self
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("default_save_path", &self.default_save_path)
            .field("progress_update_interval", &self.progress_update_interval)
            .finish()
    }
}
