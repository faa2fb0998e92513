// Licensed under the MIT License
// Copyright (c) 2025 Sijo Saju <sijo.saju@outlook.com>

//! # Configuration
//!
//! Type-safe configuration for qstream, layered with figment:
//! built-in defaults, then an optional `qstream.toml`, then `QSTREAM_*`
//! environment variables.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants;
use crate::error::{DownloadError, Result};

/// Global configuration for qstream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QstreamConfig {
    /// General settings
    pub general: GeneralConfig,

    /// Network settings
    pub network: NetworkConfig,

    /// Stream and chunking settings
    pub streams: StreamConfig,

    /// Reinforcement-learning controller settings
    pub rl: RlConfig,
}

/// General configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// User agent string for HTTP requests
    pub user_agent: String,

    /// Default download directory
    pub download_dir: PathBuf,

    /// Enable debug mode
    pub debug: bool,
}

/// Network configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Connection timeout in seconds
    pub connect_timeout: u64,

    /// Read timeout in seconds
    pub read_timeout: u64,

    /// Maximum number of redirects to follow
    pub max_redirects: usize,

    /// Maximum number of retry attempts per chunk (static mode)
    pub max_retries: u32,

    /// Delay between chunk retries in seconds
    pub retry_delay: u64,
}

/// Stream and chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Default number of parallel streams
    pub default_streams: usize,

    /// Minimum number of parallel streams
    pub min_streams: usize,

    /// Maximum number of parallel streams
    pub max_streams: usize,

    /// Minimum bytes per chunk
    pub min_chunk_size: u64,
}

/// Reinforcement-learning controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RlConfig {
    /// Seconds between controller decisions
    pub monitoring_interval: u64,

    /// Q-learning step size
    pub learning_rate: f64,

    /// Q-learning discount factor
    pub discount_factor: f64,

    /// Initial exploration rate
    pub exploration_rate: f64,

    /// Exploration rate floor
    pub min_exploration: f64,

    /// Multiplicative exploration decay per decision
    pub exploration_decay: f64,

    /// Q-table file path; relative paths resolve under the download dir
    pub q_table_file: PathBuf,

    /// Q-table backup file path; relative paths resolve under the download dir
    pub q_table_backup: PathBuf,

    /// Persist the Q-table every this many learning updates
    pub save_interval: u64,
}

impl Default for QstreamConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            network: NetworkConfig::default(),
            streams: StreamConfig::default(),
            rl: RlConfig::default(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("qstream/{}", env!("CARGO_PKG_VERSION")),
            download_dir: default_download_dir(),
            debug: false,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: constants::CONNECT_TIMEOUT.as_secs(),
            read_timeout: constants::READ_TIMEOUT.as_secs(),
            max_redirects: 10,
            max_retries: constants::MAX_RETRIES,
            retry_delay: constants::RETRY_DELAY.as_secs(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            default_streams: constants::DEFAULT_NUM_STREAMS,
            min_streams: constants::MIN_STREAMS,
            max_streams: constants::MAX_STREAMS,
            min_chunk_size: constants::MIN_CHUNK_SIZE,
        }
    }
}

impl Default for RlConfig {
    fn default() -> Self {
        Self {
            monitoring_interval: constants::MONITORING_INTERVAL.as_secs(),
            learning_rate: constants::RL_LEARNING_RATE,
            discount_factor: constants::RL_DISCOUNT_FACTOR,
            exploration_rate: constants::RL_EXPLORATION_RATE,
            min_exploration: constants::RL_MIN_EXPLORATION,
            exploration_decay: constants::RL_EXPLORATION_DECAY,
            q_table_file: PathBuf::from(constants::Q_TABLE_FILE),
            q_table_backup: PathBuf::from(constants::Q_TABLE_BACKUP),
            save_interval: constants::Q_TABLE_SAVE_INTERVAL,
        }
    }
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .unwrap_or_else(|| PathBuf::from("./downloads"))
        .join("MultiStreamDownloader")
}

impl QstreamConfig {
    /// Load configuration: defaults, then `qstream.toml`, then `QSTREAM_*` env.
    ///
    /// Nested keys use a double underscore, e.g. `QSTREAM_NETWORK__READ_TIMEOUT=30`.
    pub fn load() -> Result<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file("qstream.toml"))
            .merge(Env::prefixed("QSTREAM_").split("__"))
            .extract()
            .map_err(|e| DownloadError::config(format!("Failed to load config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific TOML file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .extract()
            .map_err(|e| DownloadError::config(format!("Failed to parse config file: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.network.connect_timeout == 0 {
            return Err(DownloadError::config(
                "Connect timeout must be greater than 0",
            ));
        }

        if self.network.read_timeout == 0 {
            return Err(DownloadError::config("Read timeout must be greater than 0"));
        }

        if self.streams.min_streams == 0 {
            return Err(DownloadError::config("Min streams must be greater than 0"));
        }

        if self.streams.min_streams > self.streams.max_streams {
            return Err(DownloadError::config(
                "Min streams must not exceed max streams",
            ));
        }

        if self.streams.default_streams < self.streams.min_streams
            || self.streams.default_streams > self.streams.max_streams
        {
            return Err(DownloadError::config(
                "Default streams must lie within [min_streams, max_streams]",
            ));
        }

        if self.streams.min_chunk_size == 0 {
            return Err(DownloadError::config("Chunk size must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&self.rl.learning_rate) {
            return Err(DownloadError::config("Learning rate must be within [0, 1]"));
        }

        if !(0.0..=1.0).contains(&self.rl.discount_factor) {
            return Err(DownloadError::config(
                "Discount factor must be within [0, 1]",
            ));
        }

        if self.rl.min_exploration > self.rl.exploration_rate {
            return Err(DownloadError::config(
                "Min exploration must not exceed the initial exploration rate",
            ));
        }

        if self.rl.monitoring_interval == 0 {
            return Err(DownloadError::config(
                "Monitoring interval must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Get connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.network.connect_timeout)
    }

    /// Get read timeout as Duration
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.network.read_timeout)
    }

    /// Get retry delay as Duration
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.network.retry_delay)
    }

    /// Get monitoring interval as Duration
    pub fn monitoring_interval(&self) -> Duration {
        Duration::from_secs(self.rl.monitoring_interval)
    }

    /// Absolute path of the Q-table file
    pub fn q_table_path(&self) -> PathBuf {
        self.resolve_under_download_dir(&self.rl.q_table_file)
    }

    /// Absolute path of the Q-table backup file
    pub fn q_table_backup_path(&self) -> PathBuf {
        self.resolve_under_download_dir(&self.rl.q_table_backup)
    }

    fn resolve_under_download_dir(&self, path: &std::path::Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.general.download_dir.join(path)
        }
    }
}
