use std::path::{Path, PathBuf};
use std::time::Duration;

use redlilium_core::ConfigError;
use redlilium_core::config::duration_from_secs;
use serde::Deserialize;

use crate::priority::ResourcePriority;

/// Resource manager settings, usually the `[resources]` table of the engine
/// config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResourceManagerConfig {
    /// Loading queue entries rescored per frame.
    pub priority_update_window: usize,
    /// A reloaded resource is loaded again right away if it was acquired
    /// within this many seconds; otherwise it stays unloaded until needed.
    pub recent_acquire_window_secs: f64,
    /// Time budget for freeing unused resources in `per_frame_update`.
    /// Zero disables it.
    pub auto_free_unused_timeout_ms: f64,
    /// Unused resources acquired within this many seconds are kept by the
    /// per-frame free.
    pub auto_free_unused_threshold_secs: f64,
    /// Root directory of a [`FileResourceLoader`](crate::FileResourceLoader)
    /// installed as default loader.
    pub asset_root: Option<PathBuf>,
    /// Priority of resource types that did not set their own.
    pub default_priority: ResourcePriority,
}

impl Default for ResourceManagerConfig {
    fn default() -> Self {
        Self {
            priority_update_window: 50,
            recent_acquire_window_secs: 30.0,
            auto_free_unused_timeout_ms: 0.0,
            auto_free_unused_threshold_secs: 10.0,
            asset_root: None,
            default_priority: ResourcePriority::Medium,
        }
    }
}

impl ResourceManagerConfig {
    /// Parses a config from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        redlilium_core::config::from_toml_str(text)
    }

    /// Loads a config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        redlilium_core::config::load_toml(path)
    }

    pub fn recent_acquire_window(&self) -> Duration {
        duration_from_secs(self.recent_acquire_window_secs)
    }

    /// Budget and age threshold of the per-frame free, if enabled.
    pub fn auto_free_unused(&self) -> Option<(Duration, Duration)> {
        (self.auto_free_unused_timeout_ms > 0.0).then(|| {
            (
                duration_from_secs(self.auto_free_unused_timeout_ms / 1000.0),
                duration_from_secs(self.auto_free_unused_threshold_secs),
            )
        })
    }
}
