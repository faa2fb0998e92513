// Licensed under the MIT License
// Copyright (c) 2025 Sijo Saju <sijo.saju@outlook.com>

//! # qstream
//!
//! Adaptive multi-stream HTTP downloader with Q-learning connection control.
//!
//! ## Features
//!
//! - **Parallel Range Downloads**: splits range-capable resources into byte
//!   ranges fetched over concurrent connections
//! - **Adaptive Concurrency**: a tabular Q-learning controller samples
//!   throughput, RTT, and a loss proxy every monitoring interval and grows
//!   or shrinks the connection pool to maximize utility
//! - **Persistent Learning**: the Q-table survives across runs in a stable
//!   JSON format with atomic saves and a rotated backup
//! - **Graceful Fallback**: servers without range support get a
//!   single-stream browser-style download
//! - **Progress Tracking**: byte-accurate progress hooks and job snapshots
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use qstream::{DownloadManager, DownloadRequest, QstreamConfig};
//!
//! #[tokio::main]
//! async fn main() -> qstream::Result<()> {
//!     let manager = DownloadManager::new(QstreamConfig::load()?)?;
//!
//!     let mut request = DownloadRequest::new("https://example.com/big-file.zip");
//!     request.use_rl = true;
//!     let id = manager.start_download(request)?;
//!
//!     loop {
//!         tokio::time::sleep(std::time::Duration::from_millis(500)).await;
//!         let Some(status) = manager.status(&id) else { break };
//!         println!("{:.1}% at {:.2} MB/s", status.progress, status.speed);
//!         if status.status != qstream::JobStatus::Downloading {
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod assembler;
pub mod config;
pub mod constants;
pub mod controller;
pub mod downloader;
pub mod error;
pub mod job;
pub mod logging;
pub mod manager;
pub mod metrics;
pub mod planner;
pub mod probe;
pub mod progress;
pub mod qtable;
pub mod worker;

// Re-export commonly used types
pub use config::QstreamConfig;
pub use controller::{ControllerConfig, RlController, RlStats, Transition};
pub use downloader::{DownloadOutcome, Downloader};
pub use error::{DownloadError, Result};
pub use job::{DownloadJob, DownloadMode, JobMetrics, JobStatus, ProgressHook};
pub use manager::{DownloadManager, DownloadRequest, JobSnapshot, ManagerStats};
pub use metrics::{MetricSample, MetricsSampler, PingRttProbe, RttProbe, ScriptedRttProbe};
pub use planner::{plan_chunks, ChunkSpec};
pub use probe::{ProbeResult, TransportProbe};
pub use progress::{ConsoleProgressBar, ProgressInfo};
pub use qtable::{QTable, QTableMeta, QTableStore};
