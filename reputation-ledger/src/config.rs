//! Configuration for the ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::time::Duration;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Credits granted to a newly registered user
    pub initial_credits: i64,

    /// Row lock configuration
    pub locking: LockingConfig,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/reputation-ledger"),
            service_name: "reputation-ledger".to_string(),
            initial_credits: 10,
            locking: LockingConfig::default(),
            rocksdb: RocksDBConfig::default(),
        }
    }
}

/// Row lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockingConfig {
    /// Maximum wait for all row locks of one operation (milliseconds)
    pub acquire_timeout_ms: u64,
}

impl LockingConfig {
    /// Acquisition timeout as a duration
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: 5_000,
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Sync the WAL on every commit
    pub sync_writes: bool,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 3,
            max_background_jobs: 2,
            sync_writes: true,
            enable_statistics: false,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("REPUTATION_LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(credits) = std::env::var("REPUTATION_LEDGER_INITIAL_CREDITS") {
            config.initial_credits = credits.parse().map_err(|e| {
                crate::Error::Config(format!("REPUTATION_LEDGER_INITIAL_CREDITS: {}", e))
            })?;
        }

        if let Ok(timeout) = std::env::var("REPUTATION_LEDGER_LOCK_TIMEOUT_MS") {
            config.locking.acquire_timeout_ms = timeout.parse().map_err(|e| {
                crate::Error::Config(format!("REPUTATION_LEDGER_LOCK_TIMEOUT_MS: {}", e))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the ledger cannot honor
    pub fn validate(&self) -> crate::Result<()> {
        if self.initial_credits < 0 {
            return Err(crate::Error::Config(
                "initial_credits must not be negative".to_string(),
            ));
        }

        if self.locking.acquire_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "locking.acquire_timeout_ms must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
