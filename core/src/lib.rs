//! # RedLilium Engine Core
//!
//! Core crate shared by the task scheduler and the resource streaming
//! pipeline: generation-checked slot storage, cooperative cancellation, TOML
//! config loading and Tracy profiling hooks.

pub mod arena;
pub mod cancellation;
pub mod config;
pub mod profiling;

pub use arena::{Arena, ArenaHandle};
pub use cancellation::{CancellationToken, Cancelled};
pub use config::ConfigError;

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Logs the core version. Call once at startup after the logger is installed.
pub fn init() {
    log::info!("RedLilium Core v{} initialized", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
