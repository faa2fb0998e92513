// Licensed under the MIT License
// Copyright (c) 2025 Sijo Saju <sijo.saju@outlook.com>

//! Download manager
//!
//! Registry of running and finished jobs, keyed by millisecond-precision
//! ids that stay stable for the job's lifetime. Starting a download spawns
//! a background task and returns immediately; callers poll snapshots for
//! progress. This is the typed surface an HTTP front-end or UI layers over,
//! including the Q-table maintenance operations.

use dashmap::DashMap;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

use crate::config::QstreamConfig;
use crate::controller::{ControllerConfig, RlController, RlStats};
use crate::downloader::Downloader;
use crate::error::{DownloadError, Result};
use crate::job::{DownloadJob, DownloadMode, JobMetrics, JobStatus, ProgressHook};
use crate::qtable::QTableStore;

/// Parameters for starting a download
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub mode: DownloadMode,
    pub num_streams: usize,
    pub use_rl: bool,
    /// Optional explicit output path; defaults under the download dir
    pub output_path: Option<PathBuf>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mode: DownloadMode::Multi,
            num_streams: crate::constants::DEFAULT_NUM_STREAMS,
            use_rl: false,
            output_path: None,
        }
    }
}

/// Serializable view of one job
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: String,
    pub url: String,
    pub mode: DownloadMode,
    pub status: JobStatus,
    /// Percent complete, 0-100
    pub progress: f64,
    /// Current average speed in MB/s
    pub speed: f64,
    pub filename: Option<String>,
    pub error: Option<String>,
    pub total_size: u64,
    pub downloaded_size: u64,
    pub use_rl: bool,
    /// Unix timestamp of job creation
    pub start_time: i64,
    /// Detailed per-chunk report, present once the job completed
    pub metrics: Option<JobMetrics>,
}

/// Aggregate counters over the registry
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    pub total_jobs: usize,
    pub active_downloads: usize,
}

struct JobEntry {
    job: Arc<DownloadJob>,
    started_unix: i64,
    result_path: Mutex<Option<PathBuf>>,
}

/// Owner of jobs and the process-wide RL controller
pub struct DownloadManager {
    config: QstreamConfig,
    controller: Arc<Mutex<RlController>>,
    jobs: DashMap<String, Arc<JobEntry>>,
}

impl std::fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadManager")
            .field("jobs", &self.jobs.len())
            .finish()
    }
}

impl DownloadManager {
    /// Build a manager whose controller persists to the configured Q-table
    /// files
    pub fn new(config: QstreamConfig) -> Result<Self> {
        let store = QTableStore::new(config.q_table_path(), config.q_table_backup_path());
        let controller =
            RlController::with_store(ControllerConfig::from_config(&config), store)?;
        Ok(Self {
            config,
            controller: Arc::new(Mutex::new(controller)),
            jobs: DashMap::new(),
        })
    }

    /// Build a manager around an existing controller (tests, embedders)
    pub fn with_controller(config: QstreamConfig, controller: RlController) -> Self {
        Self {
            config,
            controller: Arc::new(Mutex::new(controller)),
            jobs: DashMap::new(),
        }
    }

    /// Start a download in the background and return its id
    pub fn start_download(&self, request: DownloadRequest) -> Result<String> {
        self.start_download_with_hook(request, None)
    }

    /// Start a download with a progress hook (must not block)
    pub fn start_download_with_hook(
        &self,
        request: DownloadRequest,
        hook: Option<ProgressHook>,
    ) -> Result<String> {
        let url = request.url.trim().to_string();
        if url.is_empty() {
            return Err(DownloadError::config("URL is required"));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(DownloadError::config(
                "URL must start with http:// or https://",
            ));
        }

        let job = Arc::new(DownloadJob::new(
            url.clone(),
            request.mode,
            request.use_rl,
            request.num_streams,
            hook,
        ));

        let controller = if request.use_rl && request.mode == DownloadMode::Multi {
            Some(Arc::clone(&self.controller))
        } else {
            None
        };

        let downloader = Downloader::for_job(self.config.clone(), Arc::clone(&job), controller)?;

        let id = self.allocate_id();
        let entry = Arc::new(JobEntry {
            job: Arc::clone(&job),
            started_unix: chrono::Utc::now().timestamp(),
            result_path: Mutex::new(None),
        });
        self.jobs.insert(id.clone(), Arc::clone(&entry));

        info!(
            "Starting download {} ({:?}, streams={}, rl={}): {}",
            id, request.mode, request.num_streams, request.use_rl, url
        );

        let output_path = request.output_path;
        tokio::spawn(async move {
            match downloader.run(output_path).await {
                Ok(outcome) => {
                    *entry.result_path.lock().unwrap() = Some(outcome.path);
                }
                Err(DownloadError::Cancelled) => {
                    info!("Download cancelled");
                }
                Err(e) => {
                    error!("Download failed: {}", e);
                }
            }
        });

        Ok(id)
    }

    /// Millisecond-precision id, bumped on collision so ids stay unique
    fn allocate_id(&self) -> String {
        let mut millis = chrono::Utc::now().timestamp_millis();
        loop {
            let id = millis.to_string();
            if !self.jobs.contains_key(&id) {
                return id;
            }
            millis += 1;
        }
    }

    /// Snapshot of one job, if it exists
    pub fn status(&self, id: &str) -> Option<JobSnapshot> {
        let entry = self.jobs.get(id)?;
        Some(self.snapshot(id, &entry))
    }

    /// Snapshots of every known job, newest first
    pub fn list(&self) -> Vec<JobSnapshot> {
        let mut snapshots: Vec<JobSnapshot> = self
            .jobs
            .iter()
            .map(|kv| self.snapshot(kv.key(), kv.value()))
            .collect();
        snapshots.sort_by(|a, b| b.start_time.cmp(&a.start_time).then(b.id.cmp(&a.id)));
        snapshots
    }

    /// Detailed metrics for one job, present once it completed
    pub fn metrics(&self, id: &str) -> Option<JobMetrics> {
        let entry = self.jobs.get(id)?;
        if entry.job.status() == JobStatus::Completed {
            Some(entry.job.detailed_metrics())
        } else {
            None
        }
    }

    /// Ask a job to stop; true when the id exists
    pub fn cancel(&self, id: &str) -> bool {
        match self.jobs.get(id) {
            Some(entry) => {
                entry.job.request_cancel();
                true
            }
            None => false,
        }
    }

    /// Aggregate counters
    pub fn stats(&self) -> ManagerStats {
        let active = self
            .jobs
            .iter()
            .filter(|kv| kv.value().job.status() == JobStatus::Downloading)
            .count();
        ManagerStats {
            total_jobs: self.jobs.len(),
            active_downloads: active,
        }
    }

    /// Controller statistics snapshot
    pub fn rl_stats(&self) -> RlStats {
        self.controller.lock().unwrap().stats()
    }

    /// Clear all learning and persist the empty table
    pub fn rl_reset(&self) -> Result<()> {
        self.controller.lock().unwrap().reset()
    }

    /// Persist the Q-table now
    pub fn rl_save(&self) -> Result<()> {
        self.controller.lock().unwrap().save()
    }

    /// The shared controller, for embedders that drive downloads directly
    pub fn controller(&self) -> Arc<Mutex<RlController>> {
        Arc::clone(&self.controller)
    }

    fn snapshot(&self, id: &str, entry: &JobEntry) -> JobSnapshot {
        let job = &entry.job;
        let status = job.status();
        let total = job.file_size();
        let downloaded = job.downloaded_bytes();
        let progress = if total > 0 {
            (downloaded as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        let filename = entry
            .result_path
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()));

        JobSnapshot {
            id: id.to_string(),
            url: job.url.clone(),
            mode: job.mode,
            status,
            progress,
            speed: job.speed_mbs(),
            filename,
            error: job.error(),
            total_size: total,
            downloaded_size: downloaded,
            use_rl: job.adaptive,
            start_time: entry.started_unix,
            metrics: if status == JobStatus::Completed {
                Some(job.detailed_metrics())
            } else {
                None
            },
        }
    }
}
