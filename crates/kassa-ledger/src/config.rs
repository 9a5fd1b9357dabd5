//! # Ledger Configuration
//!
//! Configuration management for the ledger services.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     KASSA_DB_PATH=/var/lib/kassa/kassa.db                              │
//! │     KASSA_LOCK_TIMEOUT_MS=3000                                         │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/kassa/kassa.toml (Linux)                                 │
//! │     ~/Library/Application Support/com.kassa.kassa/kassa.toml (macOS)   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # kassa.toml
//! [database]
//! path = "/var/lib/kassa/kassa.db"
//! max_connections = 8
//! busy_timeout_ms = 5000
//!
//! [concurrency]
//! lock_timeout_ms = 5000
//!
//! [policy]
//! cashier_can_open_shift = true
//! cashier_can_close_shift = false
//! max_line_quantity = 9999
//!
//! [audit]
//! enabled = true
//! log_dir = "shift_logs"
//!
//! [export]
//! enabled = false
//! path = "exports/transactions.jsonl"
//! queue_capacity = 256
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use kassa_core::{ShiftPolicy, DEFAULT_MAX_LINE_QUANTITY};
use kassa_db::DbConfig;

const CONFIG_FILE_NAME: &str = "kassa.toml";
const DB_FILE_NAME: &str = "kassa.db";

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to load config: {0}")]
    LoadFailed(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::LoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::LoadFailed(err.to_string())
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Defaults to the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long SQLite itself waits for the write lock.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    8
}

fn default_busy_timeout() -> u64 {
    5_000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: None,
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

// =============================================================================
// Concurrency Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencySettings {
    /// Upper bound on a whole mutating operation, lock wait included.
    /// Expiry is reported as a retryable `ConcurrencyTimeout`.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,
}

fn default_lock_timeout() -> u64 {
    5_000
}

impl Default for ConcurrencySettings {
    fn default() -> Self {
        ConcurrencySettings {
            lock_timeout_ms: default_lock_timeout(),
        }
    }
}

// =============================================================================
// Policy Settings
// =============================================================================

/// Deployment policy. It can only narrow what the role table allows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySettings {
    #[serde(default = "default_true")]
    pub cashier_can_open_shift: bool,

    #[serde(default)]
    pub cashier_can_close_shift: bool,

    /// Largest quantity accepted on a single sale or refund line.
    #[serde(default = "default_max_line_quantity")]
    pub max_line_quantity: i64,
}

fn default_true() -> bool {
    true
}

fn default_max_line_quantity() -> i64 {
    DEFAULT_MAX_LINE_QUANTITY
}

impl Default for PolicySettings {
    fn default() -> Self {
        let shift = ShiftPolicy::default();
        PolicySettings {
            cashier_can_open_shift: shift.cashier_can_open_shift,
            cashier_can_close_shift: shift.cashier_can_close_shift,
            max_line_quantity: default_max_line_quantity(),
        }
    }
}

// =============================================================================
// Sink Settings
// =============================================================================

/// Per-shift human-readable audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("shift_logs")
}

impl Default for AuditSettings {
    fn default() -> Self {
        AuditSettings {
            enabled: true,
            log_dir: default_log_dir(),
        }
    }
}

/// Best-effort export of committed transactions as JSON lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_export_path")]
    pub path: PathBuf,

    /// Events beyond this many pending are dropped with a warning.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_export_path() -> PathBuf {
    PathBuf::from("exports/transactions.jsonl")
}

fn default_queue_capacity() -> usize {
    256
}

impl Default for ExportSettings {
    fn default() -> Self {
        ExportSettings {
            enabled: false,
            path: default_export_path(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

// =============================================================================
// Runtime Settings
// =============================================================================

/// The part of the configuration the services consult on every call.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSettings {
    pub policy: ShiftPolicy,
    pub max_line_quantity: i64,
    pub lock_timeout: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        LedgerConfig::default().service_settings()
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete ledger configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub concurrency: ConcurrencySettings,

    #[serde(default)]
    pub policy: PolicySettings,

    #[serde(default)]
    pub audit: AuditSettings,

    #[serde(default)]
    pub export: ExportSettings,
}

impl LedgerConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (kassa.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading ledger config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if self.concurrency.lock_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "concurrency.lock_timeout_ms must be greater than 0".into(),
            ));
        }

        if self.policy.max_line_quantity < 1 {
            return Err(ConfigError::Invalid(
                "policy.max_line_quantity must be at least 1".into(),
            ));
        }

        if self.export.enabled && self.export.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "export.queue_capacity must be greater than 0".into(),
            ));
        }

        if let Some(ref path) = self.database.path {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid("database.path is empty".into()));
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Applies `KASSA_*` overrides read through `lookup`.
    ///
    /// Values that fail to parse are ignored with a warning.
    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("KASSA_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = Some(PathBuf::from(path));
        }

        if let Some(raw) = lookup("KASSA_DB_MAX_CONNECTIONS") {
            match raw.parse() {
                Ok(n) => self.database.max_connections = n,
                Err(_) => warn!(value = %raw, "Ignoring invalid KASSA_DB_MAX_CONNECTIONS"),
            }
        }

        if let Some(raw) = lookup("KASSA_BUSY_TIMEOUT_MS") {
            match raw.parse() {
                Ok(ms) => self.database.busy_timeout_ms = ms,
                Err(_) => warn!(value = %raw, "Ignoring invalid KASSA_BUSY_TIMEOUT_MS"),
            }
        }

        if let Some(raw) = lookup("KASSA_LOCK_TIMEOUT_MS") {
            match raw.parse() {
                Ok(ms) => {
                    debug!(lock_timeout_ms = ms, "Overriding lock timeout from environment");
                    self.concurrency.lock_timeout_ms = ms;
                }
                Err(_) => warn!(value = %raw, "Ignoring invalid KASSA_LOCK_TIMEOUT_MS"),
            }
        }

        if let Some(raw) = lookup("KASSA_CASHIER_CAN_OPEN_SHIFT") {
            match parse_flag(&raw) {
                Some(flag) => self.policy.cashier_can_open_shift = flag,
                None => warn!(value = %raw, "Ignoring invalid KASSA_CASHIER_CAN_OPEN_SHIFT"),
            }
        }

        if let Some(raw) = lookup("KASSA_CASHIER_CAN_CLOSE_SHIFT") {
            match parse_flag(&raw) {
                Some(flag) => self.policy.cashier_can_close_shift = flag,
                None => warn!(value = %raw, "Ignoring invalid KASSA_CASHIER_CAN_CLOSE_SHIFT"),
            }
        }

        if let Some(raw) = lookup("KASSA_MAX_LINE_QUANTITY") {
            match raw.parse() {
                Ok(n) => self.policy.max_line_quantity = n,
                Err(_) => warn!(value = %raw, "Ignoring invalid KASSA_MAX_LINE_QUANTITY"),
            }
        }

        if let Some(dir) = lookup("KASSA_AUDIT_DIR") {
            self.audit.log_dir = PathBuf::from(dir);
        }

        if let Some(raw) = lookup("KASSA_AUDIT_ENABLED") {
            if let Some(flag) = parse_flag(&raw) {
                self.audit.enabled = flag;
            }
        }

        if let Some(path) = lookup("KASSA_EXPORT_PATH") {
            debug!(path = %path, "Enabling export from environment");
            self.export.path = PathBuf::from(path);
            self.export.enabled = true;
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "kassa", "kassa")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    fn default_database_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "kassa", "kassa")
            .map(|dirs| dirs.data_dir().join(DB_FILE_NAME))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// The database file: configured, else platform data dir, else `./kassa.db`.
    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .or_else(Self::default_database_path)
            .unwrap_or_else(|| PathBuf::from(DB_FILE_NAME))
    }

    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(self.database_path())
            .max_connections(self.database.max_connections)
            .busy_timeout(Duration::from_millis(self.database.busy_timeout_ms))
    }

    pub fn shift_policy(&self) -> ShiftPolicy {
        ShiftPolicy {
            cashier_can_open_shift: self.policy.cashier_can_open_shift,
            cashier_can_close_shift: self.policy.cashier_can_close_shift,
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.concurrency.lock_timeout_ms)
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            policy: self.shift_policy(),
            max_line_quantity: self.policy.max_line_quantity,
            lock_timeout: self.lock_timeout(),
        }
    }

    pub fn audit_dir(&self) -> Option<&Path> {
        self.audit.enabled.then_some(self.audit.log_dir.as_path())
    }

    pub fn export_path(&self) -> Option<&Path> {
        self.export.enabled.then_some(self.export.path.as_path())
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
