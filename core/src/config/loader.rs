use crate::config::error::{ConfigError, Result};
use crate::evidence::SourceKind;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContinuityConfig {
    /// Where redundant layers live and how they are written
    #[serde(default)]
    pub storage: StorageConfig,

    /// Scoring thresholds shared by writer, reconciler and validator
    #[serde(default)]
    pub thresholds: ThresholdConfig,

    /// Source analysis and recovery cache
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Environment probe commands
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Gate scoring, phase completion and bypass policy
    #[serde(default)]
    pub gates: GateConfig,

    /// Alert thresholds
    #[serde(default)]
    pub monitor: MonitorConfig,
}

/// Redundant storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding every file-backed layer
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// SQLite layer file, relative to `base_dir` unless absolute
    #[serde(default = "default_database_file")]
    pub database_file: PathBuf,

    /// Concurrent layer writes
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Per-layer write deadline in milliseconds
    #[serde(default = "default_layer_timeout_ms")]
    pub layer_timeout_ms: u64,
}

/// Scoring thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Fraction of layers that must succeed for a store to count as durable
    #[serde(default = "default_redundancy_ratio")]
    pub redundancy_ratio: f64,

    /// Reconstructions below this confidence need manual verification
    #[serde(default = "default_manual_verification_confidence")]
    pub manual_verification_confidence: f64,

    /// Confidence bonus awarded when every source was available
    #[serde(default = "default_availability_bonus")]
    pub availability_bonus: f64,

    /// Consistency points deducted per issue
    #[serde(default = "default_consistency_penalty")]
    pub consistency_penalty: f64,

    /// Minimum score for a reconstruction to be considered valid
    #[serde(default = "default_reconstruction_pass_score")]
    pub reconstruction_pass_score: f64,
}

/// Source analysis and recovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Cached reconstructions expire after this many seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Maximum cached sessions
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Latency objective for a full recovery in milliseconds
    #[serde(default = "default_recovery_slo_ms")]
    pub slo_ms: u64,

    /// Concurrent source probes
    #[serde(default = "default_workers")]
    pub source_workers: usize,

    /// Per-kind probe deadlines
    #[serde(default)]
    pub probe_timeouts: ProbeTimeouts,

    /// Static reliability priors per source kind
    #[serde(default)]
    pub priors: SourcePriors,
}

/// Probe deadlines in milliseconds, per source kind family
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeTimeouts {
    /// Single file reads
    #[serde(default = "default_document_timeout_ms")]
    pub document_ms: u64,

    #[serde(default = "default_database_timeout_ms")]
    pub database_ms: u64,

    /// Spawns `git log`
    #[serde(default = "default_commit_history_timeout_ms")]
    pub commit_history_ms: u64,

    /// Walks the project tree
    #[serde(default = "default_filesystem_timeout_ms")]
    pub filesystem_ms: u64,
}

/// Reliability priors (0-100) per source kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcePriors {
    #[serde(default = "default_prior_primary_status")]
    pub primary_status: f64,

    #[serde(default = "default_prior_session_brief")]
    pub session_brief: f64,

    #[serde(default = "default_prior_conversation_log")]
    pub conversation_log: f64,

    #[serde(default = "default_prior_scratch_pad")]
    pub scratch_pad: f64,

    #[serde(default = "default_prior_archival")]
    pub archival: f64,

    #[serde(default = "default_prior_readme")]
    pub readme: f64,

    #[serde(default = "default_prior_database")]
    pub database: f64,

    #[serde(default = "default_prior_commit_history")]
    pub commit_history: f64,

    #[serde(default = "default_prior_filesystem")]
    pub filesystem: f64,
}

/// Environment probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Project root the probe and source analysis inspect
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,

    /// Build command, program first
    #[serde(default = "default_build_command")]
    pub build_command: Vec<String>,

    /// Dependency resolution command, program first
    #[serde(default = "default_dependency_command")]
    pub dependency_command: Vec<String>,

    /// Deadline for each probe command in seconds
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

/// Gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Minimum validation score for a phase to count as complete
    #[serde(default = "default_phase_completion_score")]
    pub phase_completion_score: f64,

    /// Compile score deducted per build warning, floored at 50
    #[serde(default = "default_warning_penalty")]
    pub warning_penalty: f64,

    /// Hours a bypass stays valid before the gate must be re-evaluated
    #[serde(default = "default_bypass_window_hours")]
    pub bypass_window_hours: i64,

    /// Bypass ledger file, relative to `storage.base_dir` unless absolute
    #[serde(default = "default_ledger_file")]
    pub ledger_file: PathBuf,
}

/// Alerting thresholds for the continuity monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Success rate (0-1) below which an operation raises a warning
    #[serde(default = "default_minimum_success_rate")]
    pub minimum_success_rate: f64,

    /// Failures inside the window that raise a critical alert
    #[serde(default = "default_failure_pattern_threshold")]
    pub failure_pattern_threshold: usize,

    /// Failure pattern window in seconds
    #[serde(default = "default_failure_window_secs")]
    pub failure_window_secs: u64,
}

// Default value functions
fn default_base_dir() -> PathBuf {
    PathBuf::from(".continuity")
}
fn default_database_file() -> PathBuf {
    PathBuf::from("continuity.db")
}
fn default_workers() -> usize {
    4
}
fn default_layer_timeout_ms() -> u64 {
    8_000
}
fn default_redundancy_ratio() -> f64 {
    0.8
}
fn default_manual_verification_confidence() -> f64 {
    80.0
}
fn default_availability_bonus() -> f64 {
    10.0
}
fn default_consistency_penalty() -> f64 {
    5.0
}
fn default_reconstruction_pass_score() -> f64 {
    60.0
}
fn default_cache_ttl_secs() -> u64 {
    30 * 60
}
fn default_cache_capacity() -> usize {
    64
}
fn default_recovery_slo_ms() -> u64 {
    30_000
}
fn default_document_timeout_ms() -> u64 {
    3_000
}
fn default_database_timeout_ms() -> u64 {
    5_000
}
fn default_commit_history_timeout_ms() -> u64 {
    6_000
}
fn default_filesystem_timeout_ms() -> u64 {
    8_000
}
fn default_prior_primary_status() -> f64 {
    90.0
}
fn default_prior_session_brief() -> f64 {
    85.0
}
fn default_prior_conversation_log() -> f64 {
    80.0
}
fn default_prior_scratch_pad() -> f64 {
    75.0
}
fn default_prior_archival() -> f64 {
    65.0
}
fn default_prior_readme() -> f64 {
    60.0
}
fn default_prior_database() -> f64 {
    88.0
}
fn default_prior_commit_history() -> f64 {
    85.0
}
fn default_prior_filesystem() -> f64 {
    70.0
}
fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_build_command() -> Vec<String> {
    ["cargo", "check", "--message-format", "short"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_dependency_command() -> Vec<String> {
    ["cargo", "metadata", "--format-version", "1", "--no-deps"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_command_timeout_secs() -> u64 {
    300
}
fn default_phase_completion_score() -> f64 {
    80.0
}
fn default_warning_penalty() -> f64 {
    2.0
}
fn default_bypass_window_hours() -> i64 {
    24
}
fn default_ledger_file() -> PathBuf {
    PathBuf::from("bypass-ledger.jsonl")
}
fn default_minimum_success_rate() -> f64 {
    0.8
}
fn default_failure_pattern_threshold() -> usize {
    5
}
fn default_failure_window_secs() -> u64 {
    10 * 60
}

// Default implementations
impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            database_file: default_database_file(),
            workers: default_workers(),
            layer_timeout_ms: default_layer_timeout_ms(),
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            redundancy_ratio: default_redundancy_ratio(),
            manual_verification_confidence: default_manual_verification_confidence(),
            availability_bonus: default_availability_bonus(),
            consistency_penalty: default_consistency_penalty(),
            reconstruction_pass_score: default_reconstruction_pass_score(),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_capacity: default_cache_capacity(),
            slo_ms: default_recovery_slo_ms(),
            source_workers: default_workers(),
            probe_timeouts: ProbeTimeouts::default(),
            priors: SourcePriors::default(),
        }
    }
}

impl Default for ProbeTimeouts {
    fn default() -> Self {
        Self {
            document_ms: default_document_timeout_ms(),
            database_ms: default_database_timeout_ms(),
            commit_history_ms: default_commit_history_timeout_ms(),
            filesystem_ms: default_filesystem_timeout_ms(),
        }
    }
}

impl Default for SourcePriors {
    fn default() -> Self {
        Self {
            primary_status: default_prior_primary_status(),
            session_brief: default_prior_session_brief(),
            conversation_log: default_prior_conversation_log(),
            scratch_pad: default_prior_scratch_pad(),
            archival: default_prior_archival(),
            readme: default_prior_readme(),
            database: default_prior_database(),
            commit_history: default_prior_commit_history(),
            filesystem: default_prior_filesystem(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            project_root: default_project_root(),
            build_command: default_build_command(),
            dependency_command: default_dependency_command(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            phase_completion_score: default_phase_completion_score(),
            warning_penalty: default_warning_penalty(),
            bypass_window_hours: default_bypass_window_hours(),
            ledger_file: default_ledger_file(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            minimum_success_rate: default_minimum_success_rate(),
            failure_pattern_threshold: default_failure_pattern_threshold(),
            failure_window_secs: default_failure_window_secs(),
        }
    }
}

impl StorageConfig {
    pub fn layer_timeout(&self) -> Duration {
        Duration::from_millis(self.layer_timeout_ms)
    }
}

impl RecoveryConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn slo(&self) -> Duration {
        Duration::from_millis(self.slo_ms)
    }
}

impl ProbeTimeouts {
    /// Deadline for a probe of the given kind.
    pub fn for_kind(&self, kind: SourceKind) -> Duration {
        let ms = match kind {
            SourceKind::Database => self.database_ms,
            SourceKind::CommitHistory => self.commit_history_ms,
            SourceKind::FilesystemTopology => self.filesystem_ms,
            _ => self.document_ms,
        };
        Duration::from_millis(ms)
    }
}

impl SourcePriors {
    /// Reliability prior for the given kind.
    pub fn for_kind(&self, kind: SourceKind) -> f64 {
        match kind {
            SourceKind::PrimaryStatus => self.primary_status,
            SourceKind::SessionBrief => self.session_brief,
            SourceKind::ConversationLog => self.conversation_log,
            SourceKind::ScratchPad => self.scratch_pad,
            SourceKind::ArchivalDoc => self.archival,
            SourceKind::Readme => self.readme,
            SourceKind::Database => self.database,
            SourceKind::CommitHistory => self.commit_history,
            SourceKind::FilesystemTopology => self.filesystem,
        }
    }

    fn all(&self) -> [(&'static str, f64); 9] {
        [
            ("primary_status", self.primary_status),
            ("session_brief", self.session_brief),
            ("conversation_log", self.conversation_log),
            ("scratch_pad", self.scratch_pad),
            ("archival", self.archival),
            ("readme", self.readme),
            ("database", self.database),
            ("commit_history", self.commit_history),
            ("filesystem", self.filesystem),
        ]
    }
}

impl ProbeConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl MonitorConfig {
    pub fn failure_window(&self) -> Duration {
        Duration::from_secs(self.failure_window_secs)
    }
}

impl ContinuityConfig {
    /// Layer directory, resolved against the project root.
    pub fn storage_dir(&self) -> PathBuf {
        self.probe.project_root.join(&self.storage.base_dir)
    }

    /// SQLite layer file, resolved against the project root.
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir().join(&self.storage.database_file)
    }

    /// Bypass ledger file, resolved against the project root.
    pub fn ledger_path(&self) -> PathBuf {
        self.storage_dir().join(&self.gates.ledger_file)
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        let t = &self.thresholds;
        if !(t.redundancy_ratio > 0.0 && t.redundancy_ratio <= 1.0) {
            return Err(ConfigError::ValidationError(format!(
                "thresholds.redundancy_ratio must be in (0, 1], got {}",
                t.redundancy_ratio
            )));
        }
        for (name, value) in [
            (
                "thresholds.manual_verification_confidence",
                t.manual_verification_confidence,
            ),
            (
                "thresholds.reconstruction_pass_score",
                t.reconstruction_pass_score,
            ),
            ("gates.phase_completion_score", self.gates.phase_completion_score),
        ] {
            check_score(name, value)?;
        }
        for (name, value) in self.recovery.priors.all() {
            check_score(&format!("recovery.priors.{name}"), value)?;
        }
        if t.availability_bonus < 0.0
            || t.consistency_penalty < 0.0
            || self.gates.warning_penalty < 0.0
        {
            return Err(ConfigError::ValidationError(
                "bonuses and penalties must be non-negative".to_string(),
            ));
        }
        if self.storage.workers == 0 || self.recovery.source_workers == 0 {
            return Err(ConfigError::ValidationError(
                "worker counts must be at least 1".to_string(),
            ));
        }
        if self.storage.layer_timeout_ms == 0 || self.probe.command_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        if self.recovery.cache_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "recovery.cache_capacity must be at least 1".to_string(),
            ));
        }
        if self.probe.build_command.is_empty() || self.probe.dependency_command.is_empty() {
            return Err(ConfigError::ValidationError(
                "probe commands must name a program".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.monitor.minimum_success_rate) {
            return Err(ConfigError::ValidationError(format!(
                "monitor.minimum_success_rate must be within 0-1, got {}",
                self.monitor.minimum_success_rate
            )));
        }
        if self.monitor.failure_pattern_threshold == 0 || self.monitor.failure_window_secs == 0 {
            return Err(ConfigError::ValidationError(
                "monitor failure pattern threshold and window must be at least 1".to_string(),
            ));
        }
        if self.gates.bypass_window_hours <= 0 {
            return Err(ConfigError::ValidationError(format!(
                "gates.bypass_window_hours must be positive, got {}",
                self.gates.bypass_window_hours
            )));
        }
        Ok(())
    }
}

fn check_score(name: &str, value: f64) -> Result<()> {
    if (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "{name} must be within 0-100, got {value}"
        )))
    }
}

/// Configuration loader with layered merging support
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new ConfigLoader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Load configuration with layered merging:
    /// 1. Start with defaults (from Default implementations)
    /// 2. Merge config file if provided
    /// 3. Override with environment variables (CONTINUITY_ prefix)
    pub fn load(&self) -> Result<ContinuityConfig> {
        let mut builder = Config::builder();

        // Layer 1: Defaults (serialize defaults to JSON and load as base)
        let defaults_json = serde_json::to_string(&ContinuityConfig::default())?;
        builder = builder.add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        // Layer 2: Config file (if provided)
        if let Some(ref path) = self.config_path {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_ref()));
            } else {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
        }

        // Layer 3: Environment variables, double underscore for nesting
        // Example: CONTINUITY_STORAGE__WORKERS=8
        // Only the command keys are split on commas.
        builder = builder.add_source(
            Environment::with_prefix("CONTINUITY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("probe.build_command")
                .with_list_parse_key("probe.dependency_command"),
        );

        let config: ContinuityConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Locate the default config file in standard locations:
    /// 1. Current directory: ./continuity.toml
    /// 2. XDG config: ~/.config/continuity/config.toml
    /// 3. Home directory: ~/.continuity.toml
    pub fn find_config_file() -> Option<PathBuf> {
        let cwd_config = PathBuf::from("./continuity.toml");
        if cwd_config.exists() {
            return Some(cwd_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let xdg_config = config_dir.join("continuity").join("config.toml");
            if xdg_config.exists() {
                return Some(xdg_config);
            }
        }

        if let Some(home_dir) = dirs::home_dir() {
            let home_config = home_dir.join(".continuity.toml");
            if home_config.exists() {
                return Some(home_config);
            }
        }

        None
    }

    /// Load configuration from default locations
    pub fn load_default() -> Result<ContinuityConfig> {
        let loader = if let Some(config_path) = Self::find_config_file() {
            ConfigLoader::new().with_file(config_path)
        } else {
            ConfigLoader::new()
        };

        loader.load()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use std::env;

    #[test]
    fn test_default_config() {
        let config = ContinuityConfig::default();
        assert_eq!(config.storage.workers, 4);
        assert_eq!(config.storage.layer_timeout(), Duration::from_secs(8));
        assert_eq!(config.thresholds.redundancy_ratio, 0.8);
        assert_eq!(config.thresholds.manual_verification_confidence, 80.0);
        assert_eq!(config.recovery.cache_ttl(), Duration::from_secs(1800));
        assert_eq!(config.recovery.slo(), Duration::from_secs(30));
        assert_eq!(config.gates.bypass_window_hours, 24);
        assert_eq!(config.monitor.failure_window(), Duration::from_secs(600));
        assert_eq!(
            config.database_path(),
            PathBuf::from("./.continuity/continuity.db")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_probe_timeouts_scale_with_source_cost() {
        let timeouts = ProbeTimeouts::default();
        assert_eq!(timeouts.for_kind(SourceKind::Readme), Duration::from_secs(3));
        assert_eq!(timeouts.for_kind(SourceKind::Database), Duration::from_secs(5));
        assert_eq!(timeouts.for_kind(SourceKind::CommitHistory), Duration::from_secs(6));
        assert_eq!(
            timeouts.for_kind(SourceKind::FilesystemTopology),
            Duration::from_secs(8)
        );
    }

    #[test]
    fn test_success_rate_outside_unit_range_is_rejected() {
        let mut config = ContinuityConfig::default();
        config.monitor.minimum_success_rate = 80.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_priors_follow_source_kind() {
        let priors = SourcePriors::default();
        assert_eq!(priors.for_kind(SourceKind::PrimaryStatus), 90.0);
        assert_eq!(priors.for_kind(SourceKind::Readme), 60.0);
        assert!(
            priors.for_kind(SourceKind::SessionBrief) > priors.for_kind(SourceKind::ArchivalDoc)
        );
    }

    #[test]
    #[serial]
    fn test_load_with_defaults_only() {
        let config = ConfigLoader::new()
            .load()
            .expect("Failed to load default config");
        assert_eq!(config.storage.base_dir, PathBuf::from(".continuity"));
        assert_eq!(config.probe.build_command[0], "cargo");
    }

    #[test]
    #[serial]
    fn test_load_with_env_override() {
        unsafe {
            env::set_var("CONTINUITY_STORAGE__WORKERS", "8");
            env::set_var("CONTINUITY_THRESHOLDS__REDUNDANCY_RATIO", "0.6");
            env::set_var("CONTINUITY_PROBE__BUILD_COMMAND", "make,check");
        }

        let config = ConfigLoader::new().load().expect("Failed to load config");

        unsafe {
            env::remove_var("CONTINUITY_STORAGE__WORKERS");
            env::remove_var("CONTINUITY_THRESHOLDS__REDUNDANCY_RATIO");
            env::remove_var("CONTINUITY_PROBE__BUILD_COMMAND");
        }

        assert_eq!(config.storage.workers, 8);
        assert_eq!(config.thresholds.redundancy_ratio, 0.6);
        assert_eq!(
            config.probe.build_command,
            vec!["make".to_string(), "check".to_string()]
        );
    }

    #[test]
    #[serial]
    fn test_load_with_toml_file() {
        let toml_content = r#"
[storage]
base_dir = "/var/lib/continuity"
workers = 2

[recovery.priors]
readme = 55.0

[gates]
phase_completion_score = 85.0
"#;

        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("continuity.toml");
        std::fs::write(&config_path, toml_content).expect("Failed to write temp file");

        let config = ConfigLoader::new()
            .with_file(&config_path)
            .load()
            .expect("Failed to load config");

        assert_eq!(config.storage.base_dir, PathBuf::from("/var/lib/continuity"));
        assert_eq!(config.storage.workers, 2);
        assert_eq!(config.recovery.priors.readme, 55.0);
        assert_eq!(config.recovery.priors.primary_status, 90.0);
        assert_eq!(config.gates.phase_completion_score, 85.0);
        assert_eq!(config.gates.warning_penalty, 2.0);
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("continuity.toml");
        std::fs::write(&config_path, "[storage]\nworkers = 2\n").expect("write config");

        unsafe {
            env::set_var("CONTINUITY_STORAGE__WORKERS", "6");
        }
        let config = ConfigLoader::new().with_file(&config_path).load();
        unsafe {
            env::remove_var("CONTINUITY_STORAGE__WORKERS");
        }

        assert_eq!(config.expect("load").storage.workers, 6);
    }

    #[test]
    #[serial]
    fn test_missing_file_is_an_error() {
        let result = ConfigLoader::new()
            .with_file("/nonexistent/continuity.toml")
            .load();
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    #[serial]
    fn test_invalid_ratio_rejected_on_load() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("continuity.toml");
        std::fs::write(&config_path, "[thresholds]\nredundancy_ratio = 1.5\n")
            .expect("write config");

        let result = ConfigLoader::new().with_file(&config_path).load();
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = ContinuityConfig::default();
        config.storage.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_prior() {
        let mut config = ContinuityConfig::default();
        config.recovery.priors.database = 120.0;
        let err = config.validate().expect_err("prior above 100");
        assert!(err.to_string().contains("recovery.priors.database"));
    }

    #[test]
    fn test_validate_rejects_empty_build_command() {
        let mut config = ContinuityConfig::default();
        config.probe.build_command.clear();
        assert!(config.validate().is_err());
    }
}
