use std::path::Path;
use std::time::Duration;

use redlilium_core::ConfigError;
use redlilium_core::config::duration_from_secs;
use serde::Deserialize;

/// Scheduler settings, usually the `[scheduler]` table of the engine config.
///
/// Every field has a default, so an empty table yields [`SchedulerConfig::default`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Initial short-task workers. `None` derives the count from the number
    /// of cores (two are left for the main thread and the OS, minimum two).
    pub short_task_workers: Option<usize>,
    /// Initial long-task workers.
    pub long_task_workers: usize,
    /// Initial file-access workers.
    pub file_access_workers: usize,
    /// Upper bound for each pool when workers are spawned on demand.
    pub max_workers_per_type: usize,
    /// Frame time `finish_frame_tasks` budgets main-thread work against.
    pub target_frame_time_ms: f64,
    /// Growth of the adaptive some-frame threshold per skipped frame.
    pub frame_threshold_step_ms: f64,
    /// Pending-count thresholds; each one exceeded forces one extra
    /// some-frame task per frame.
    pub forced_execution_thresholds: Vec<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            short_task_workers: None,
            long_task_workers: 2,
            file_access_workers: 1,
            max_workers_per_type: 64,
            target_frame_time_ms: 1000.0 / 40.0,
            frame_threshold_step_ms: 0.2,
            forced_execution_thresholds: vec![100, 75, 50],
        }
    }
}

impl SchedulerConfig {
    /// Parses a config from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        redlilium_core::config::from_toml_str(text)
    }

    /// Loads a config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        redlilium_core::config::load_toml(path)
    }

    /// Short-task worker count after resolving the core-count default.
    pub fn resolved_short_task_workers(&self) -> usize {
        self.short_task_workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
                .saturating_sub(2)
                .max(2)
        })
    }

    pub fn target_frame_time(&self) -> Duration {
        duration_from_secs(self.target_frame_time_ms / 1000.0)
    }

    pub fn frame_threshold_step(&self) -> Duration {
        duration_from_secs(self.frame_threshold_step_ms / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.long_task_workers, 2);
        assert_eq!(config.file_access_workers, 1);
        assert_eq!(config.forced_execution_thresholds, vec![100, 75, 50]);
        assert!(config.resolved_short_task_workers() >= 2);
        assert_eq!(config.target_frame_time(), Duration::from_millis(25));
    }

    #[test]
    fn partial_toml_overrides() {
        let config = SchedulerConfig::from_toml_str(
            "short_task_workers = 3\nframe_threshold_step_ms = 0.5\n",
        )
        .unwrap();
        assert_eq!(config.resolved_short_task_workers(), 3);
        assert_eq!(config.frame_threshold_step(), Duration::from_micros(500));
        assert_eq!(config.long_task_workers, 2);
    }

    #[test]
    fn non_finite_frame_times_saturate() {
        let config = SchedulerConfig::from_toml_str(
            "target_frame_time_ms = inf\nframe_threshold_step_ms = -inf\n",
        )
        .unwrap();
        assert_eq!(config.target_frame_time(), Duration::MAX);
        assert_eq!(config.frame_threshold_step(), Duration::ZERO);
    }
}
