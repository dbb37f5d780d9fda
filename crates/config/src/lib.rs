//! Configuration loading, validation, and management for reclaimd.
//!
//! Loads configuration from `/etc/reclaimd/config.toml` (or the file named by
//! `RECLAIMD_CONFIG`) with environment variable overrides. Validates all
//! settings at startup.

use reclaimd_core::priority::{AccountId, SYSTEM};
use reclaimd_core::{ConfigProvider, KillTier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `config.toml`. Plain values come first and arrays of
/// tables last so the file renders as valid TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Bundles pinned at system priority (never killed)
    #[serde(default = "default_pinned_bundles")]
    pub pinned_bundles: Vec<String>,

    /// Multi-account priority shift
    #[serde(default)]
    pub account: AccountConfig,

    /// Low-memory killer tuning
    #[serde(default)]
    pub killer: KillerConfig,

    /// Delayed reversion of temporary boosts
    #[serde(default)]
    pub grace: GraceConfig,

    /// procfs locations
    #[serde(default)]
    pub kernel: KernelConfig,

    /// Queue and housekeeping settings
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Buffer → minimum killable priority, ascending by `buffer_kb`
    #[serde(default = "default_kill_tiers")]
    pub kill_tiers: Vec<KillTier>,
}

fn default_pinned_bundles() -> Vec<String> {
    vec![
        "com.ohos.systemui".into(),
        "com.ohos.launcher".into(),
        "com.ohos.sceneboard".into(),
    ]
}

const MB: u64 = 1024;

fn default_kill_tiers() -> Vec<KillTier> {
    vec![
        KillTier::new(100 * MB, 0),
        KillTier::new(200 * MB, 100),
        KillTier::new(300 * MB, 200),
        KillTier::new(400 * MB, 300),
        KillTier::new(500 * MB, 400),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Subtracted from every bundle of the foreground account
    #[serde(default = "default_priority_shift")]
    pub priority_shift: i32,

    /// Keep shifted priorities from crossing below FOREGROUND
    #[serde(default)]
    pub clamp_shifted_priority: bool,

    /// Account made current at daemon start
    #[serde(default = "default_foreground_account")]
    pub foreground_account: AccountId,
}

fn default_priority_shift() -> i32 {
    50
}
fn default_foreground_account() -> AccountId {
    100
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            priority_shift: default_priority_shift(),
            clamp_shifted_priority: false,
            foreground_account: default_foreground_account(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bundles killed at most per `OnPressure` invocation
    #[serde(default = "default_max_kills_per_pass")]
    pub max_kills_per_pass: usize,

    /// How often the pressure monitor samples the buffer
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// PSI `some avg10` value that triggers a pass regardless of the buffer
    #[serde(default = "default_psi_threshold")]
    pub psi_some_avg10_threshold: f64,
}

fn default_true() -> bool {
    true
}
fn default_max_kills_per_pass() -> usize {
    3
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_psi_threshold() -> f64 {
    10.0
}

impl Default for KillerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_kills_per_pass: default_max_kills_per_pass(),
            poll_interval_ms: default_poll_interval_ms(),
            psi_some_avg10_threshold: default_psi_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraceConfig {
    /// Delay before an unsuperseded boost reverts. 0 disables.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
}

fn default_grace_period_ms() -> u64 {
    20_000
}

impl Default for GraceConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    #[serde(default = "default_proc_root")]
    pub proc_root: PathBuf,
}

fn default_proc_root() -> PathBuf {
    PathBuf::from("/proc")
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            proc_root: default_proc_root(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Capacity of each component's task queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How often tracked pids are reconciled against the live process list
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
}

fn default_queue_capacity() -> usize {
    256
}
fn default_reconcile_interval_secs() -> u64 {
    30
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path.
    ///
    /// Environment overrides (highest priority):
    /// - `RECLAIMD_CONFIG`: alternate config file
    /// - `RECLAIMD_PROC_ROOT`: procfs mount point
    /// - `RECLAIMD_PRIORITY_SHIFT`: account priority shift
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_unvalidated(&Self::config_path())?;

        if let Ok(root) = std::env::var("RECLAIMD_PROC_ROOT") {
            config.kernel.proc_root = PathBuf::from(root);
        }

        if let Ok(shift) = std::env::var("RECLAIMD_PRIORITY_SHIFT") {
            config.account.priority_shift = shift.parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "RECLAIMD_PRIORITY_SHIFT must be an integer, got {shift:?}"
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::load_unvalidated(path)?;
        config.validate()?;
        Ok(config)
    }

    fn load_unvalidated(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Path of the config file `load()` reads.
    pub fn config_path() -> PathBuf {
        std::env::var("RECLAIMD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/etc/reclaimd/config.toml"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kill_tiers.is_empty() {
            return Err(ConfigError::ValidationError(
                "kill_tiers must contain at least one tier".into(),
            ));
        }

        for pair in self.kill_tiers.windows(2) {
            if pair[0].buffer_kb >= pair[1].buffer_kb {
                return Err(ConfigError::ValidationError(format!(
                    "kill_tiers buffer_kb must be strictly ascending ({} >= {})",
                    pair[0].buffer_kb, pair[1].buffer_kb
                )));
            }
            if pair[0].min_priority >= pair[1].min_priority {
                return Err(ConfigError::ValidationError(format!(
                    "kill_tiers min_priority must be strictly ascending ({} >= {})",
                    pair[0].min_priority, pair[1].min_priority
                )));
            }
        }

        if self.kill_tiers.iter().any(|t| t.min_priority <= SYSTEM) {
            return Err(ConfigError::ValidationError(
                "kill_tiers min_priority must be above system priority".into(),
            ));
        }

        if self.account.priority_shift < 0 {
            return Err(ConfigError::ValidationError(
                "account.priority_shift must be >= 0".into(),
            ));
        }

        if self.killer.max_kills_per_pass == 0 {
            return Err(ConfigError::ValidationError(
                "killer.max_kills_per_pass must be >= 1".into(),
            ));
        }

        if self.killer.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "killer.poll_interval_ms must be > 0".into(),
            ));
        }

        if self.runtime.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "runtime.queue_capacity must be >= 1".into(),
            ));
        }

        Ok(())
    }

    /// Free-memory level above which no kill is ever needed.
    pub fn top_tier_kb(&self) -> u64 {
        self.kill_tiers.last().map(|t| t.buffer_kb).unwrap_or(0)
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pinned_bundles: default_pinned_bundles(),
            account: AccountConfig::default(),
            killer: KillerConfig::default(),
            grace: GraceConfig::default(),
            kernel: KernelConfig::default(),
            runtime: RuntimeConfig::default(),
            kill_tiers: default_kill_tiers(),
        }
    }
}

impl ConfigProvider for AppConfig {
    fn system_pinned_bundle_names(&self) -> BTreeSet<String> {
        self.pinned_bundles.iter().cloned().collect()
    }

    fn kill_tier_table(&self) -> Vec<KillTier> {
        self.kill_tiers.clone()
    }

    fn account_priority_shift(&self) -> i32 {
        self.account.priority_shift
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for reclaimd_core::Error {
    fn from(err: ConfigError) -> Self {
        reclaimd_core::Error::Config {
            message: err.to_string(),
        }
    }
}
