/// Configuration module for the continuity engine
///
/// Implements layered configuration with the 12-factor app pattern:
/// 1. Defaults (from code)
/// 2. Config file (continuity.toml)
/// 3. Environment variables (CONTINUITY_* prefix)
///
/// # Example
///
/// ```no_run
/// use continuity_core::config::ConfigLoader;
///
/// // Load from default locations
/// let config = ConfigLoader::load_default().expect("Failed to load config");
///
/// // Or load from specific file
/// let config = ConfigLoader::new()
///     .with_file("./continuity.toml")
///     .load()
///     .expect("Failed to load config");
/// ```
pub mod error;
pub mod loader;

// Re-export main types
pub use error::{ConfigError, Result};
pub use loader::{
    ConfigLoader, ContinuityConfig, GateConfig, MonitorConfig, ProbeConfig, ProbeTimeouts,
    RecoveryConfig, SourcePriors, StorageConfig, ThresholdConfig,
};
