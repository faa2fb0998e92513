// Licensed under the MIT License
// Copyright (c) 2025 Sijo Saju <sijo.saju@outlook.com>

//! # Constants
//!
//! Centralized constants for the qstream library.
//! This module eliminates magic numbers and provides a single source of truth
//! for configurable values.

use std::time::Duration;

/// Default number of parallel streams for a new download
pub const DEFAULT_NUM_STREAMS: usize = 8;

/// Minimum number of parallel streams
pub const MIN_STREAMS: usize = 1;

/// Maximum number of parallel streams
pub const MAX_STREAMS: usize = 16;

/// Minimum bytes assigned to a single chunk (1 MiB)
pub const MIN_CHUNK_SIZE: u64 = 1024 * 1024;

/// Read/write buffer size for streaming chunk bodies (8 KiB)
pub const BUFFER_SIZE: usize = 8192;

/// Connection timeout for probe and chunk requests
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Read timeout for chunk requests
pub const READ_TIMEOUT: Duration = Duration::from_secs(15);

/// Retry attempts per chunk in static mode
pub const MAX_RETRIES: u32 = 3;

/// Fixed delay between chunk retry attempts
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Upper bound for a coordinator tick while reaping workers
pub const POOL_TICK: Duration = Duration::from_millis(500);

/// Bound on worker joins when an adaptive download ends or is cancelled
pub const ADAPTIVE_JOIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Bound on worker joins when a static download ends or is cancelled
pub const STATIC_JOIN_TIMEOUT: Duration = Duration::from_secs(300);

/// Hard timeout on the external ping subprocess
pub const PING_TIMEOUT: Duration = Duration::from_secs(3);

/// Wait passed to the ping utility itself (seconds)
pub const PING_WAIT_SECS: u32 = 2;

/// RTT reported when fewer than two chunk-start samples exist (ms)
pub const RTT_DEFAULT_MS: f64 = 100.0;

/// Clamp bounds for the chunk-spacing RTT fallback (ms)
pub const RTT_FALLBACK_RANGE_MS: (f64, f64) = (10.0, 1000.0);

/// Floor of the loss proxy (%)
pub const LOSS_MIN_PCT: f64 = 0.1;

/// Ceiling of the loss proxy (%)
pub const LOSS_MAX_PCT: f64 = 5.0;

// Q-learning hyper-parameters.

/// Wall-clock period between controller decisions
pub const MONITORING_INTERVAL: Duration = Duration::from_secs(5);

/// Learning rate for the tabular Q update
pub const RL_LEARNING_RATE: f64 = 0.1;

/// Discount factor for the tabular Q update
pub const RL_DISCOUNT_FACTOR: f64 = 0.8;

/// Initial exploration rate
pub const RL_EXPLORATION_RATE: f64 = 0.3;

/// Exploration rate floor
pub const RL_MIN_EXPLORATION: f64 = 0.05;

/// Multiplicative exploration decay applied per decision
pub const RL_EXPLORATION_DECAY: f64 = 0.995;

/// Exploration ceiling when boosting rarely-seen states
pub const RL_EXPLORATION_BOOST_CAP: f64 = 0.5;

/// States observed fewer than this many times get boosted exploration
pub const RL_RARE_STATE_VISITS: u32 = 3;

/// Q-values are clipped to this symmetric range
pub const Q_VALUE_RANGE: (f64, f64) = (-10.0, 10.0);

/// Persist the Q-table every this many learning updates
pub const Q_TABLE_SAVE_INTERVAL: u64 = 50;

/// Base utility-difference threshold below which reward is neutral
pub const UTILITY_EPSILON: f64 = 0.08;

/// Reward magnitude cap
pub const REWARD_CAP: f64 = 3.0;

/// Connection range that receives the full band bonus and is enforced
/// under good network conditions
pub const OPTIMAL_BAND: (usize, usize) = (6, 12);

/// Inner connection range with the strongest utility bonus
pub const BONUS_BAND: (usize, usize) = (6, 10);

/// Outer connection range with a reduced utility bonus
pub const EXTENDED_BAND: (usize, usize) = (4, 12);

/// Bounded history of metric samples and transitions kept by the controller
pub const RL_HISTORY_LIMIT: usize = 50;

/// Number of trailing actions inspected for oscillation
pub const OSCILLATION_WINDOW: usize = 4;

/// Default Q-table file name
pub const Q_TABLE_FILE: &str = "q_table.json";

/// Default Q-table backup file name
pub const Q_TABLE_BACKUP: &str = "q_table_backup.json";
