// Licensed under the MIT License
// Copyright (c) 2025 Sijo Saju <sijo.saju@outlook.com>

//! Download job state
//!
//! A `DownloadJob` is the shared record of one transfer: byte counter,
//! per-chunk bookkeeping, failed set, and the cooperative cancellation flag.
//! Counter and chunk maps sit behind one job-local mutex; workers hold it
//! only while updating counters, never across network reads or file writes.
//! The progress hook fires under that mutex, so callers must not block in it.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::planner::ChunkSpec;

/// Progress hook invoked as `(downloaded_bytes, total_bytes)` after every
/// buffer append. Must not perform blocking I/O.
pub type ProgressHook = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Terminal-state machine of a job: `Downloading` moves to exactly one of
/// the other states and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

/// Chunk lifecycle: `Pending -> Running -> {Done, Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkState {
    Pending,
    Running,
    Done,
    Failed,
}

/// Download strategy selected by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadMode {
    Single,
    Multi,
}

/// Per-chunk bookkeeping
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub spec: ChunkSpec,
    pub state: ChunkState,
    pub bytes: u64,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
    /// Observed speed in MB/s once the chunk is done
    pub speed_mbs: f64,
    pub retries: u32,
}

impl ChunkRecord {
    fn new(spec: ChunkSpec) -> Self {
        Self {
            spec,
            state: ChunkState::Pending,
            bytes: 0,
            started_at: None,
            finished_at: None,
            speed_mbs: 0.0,
            retries: 0,
        }
    }
}

#[derive(Debug)]
struct JobInner {
    status: JobStatus,
    downloaded_bytes: u64,
    chunks: Vec<ChunkRecord>,
    failed: HashSet<usize>,
    error: Option<String>,
}

/// Shared state of one transfer
pub struct DownloadJob {
    pub url: String,
    pub mode: DownloadMode,
    pub adaptive: bool,
    pub requested_streams: usize,
    started_at: Instant,
    file_size: AtomicU64,
    downloading: AtomicBool,
    inner: Mutex<JobInner>,
    progress_hook: Option<ProgressHook>,
}

impl std::fmt::Debug for DownloadJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadJob")
            .field("url", &self.url)
            .field("mode", &self.mode)
            .field("adaptive", &self.adaptive)
            .field("requested_streams", &self.requested_streams)
            .field("file_size", &self.file_size.load(Ordering::Relaxed))
            .field("downloading", &self.downloading.load(Ordering::Relaxed))
            .finish()
    }
}

impl DownloadJob {
    pub fn new(
        url: impl Into<String>,
        mode: DownloadMode,
        adaptive: bool,
        requested_streams: usize,
        progress_hook: Option<ProgressHook>,
    ) -> Self {
        Self {
            url: url.into(),
            mode,
            adaptive,
            requested_streams,
            started_at: Instant::now(),
            file_size: AtomicU64::new(0),
            downloading: AtomicBool::new(true),
            inner: Mutex::new(JobInner {
                status: JobStatus::Downloading,
                downloaded_bytes: 0,
                chunks: Vec::new(),
                failed: HashSet::new(),
                error: None,
            }),
            progress_hook,
        }
    }

    /// Record the declared file size once the probe has run
    pub fn set_file_size(&self, size: u64) {
        self.file_size.store(size, Ordering::Relaxed);
    }

    pub fn file_size(&self) -> u64 {
        self.file_size.load(Ordering::Relaxed)
    }

    /// Install the chunk plan before workers start
    pub fn init_chunks(&self, plan: &[ChunkSpec]) {
        let mut inner = self.inner.lock().unwrap();
        inner.chunks = plan.iter().copied().map(ChunkRecord::new).collect();
    }

    /// True while the transfer should keep running; workers poll this at
    /// every buffer boundary
    pub fn is_downloading(&self) -> bool {
        self.downloading.load(Ordering::Relaxed)
    }

    /// Ask every worker to stop at its next buffer boundary
    pub fn request_cancel(&self) {
        self.downloading.store(false, Ordering::Relaxed);
    }

    /// Append bytes to the job counter and fire the progress hook.
    /// Called once per buffer written; the mutex serializes hook order.
    pub fn add_bytes(&self, n: u64) {
        let total = self.file_size();
        let mut inner = self.inner.lock().unwrap();
        inner.downloaded_bytes += n;
        if let Some(hook) = &self.progress_hook {
            hook(inner.downloaded_bytes, total);
        }
    }

    pub fn downloaded_bytes(&self) -> u64 {
        self.inner.lock().unwrap().downloaded_bytes
    }

    /// Roll the counter back after a failed attempt whose partial part file
    /// was deleted, so the counter keeps matching bytes on disk
    pub fn subtract_bytes(&self, n: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.downloaded_bytes = inner.downloaded_bytes.saturating_sub(n);
    }

    pub fn mark_chunk_running(&self, chunk_id: usize) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(chunk) = inner.chunks.get_mut(chunk_id) {
            chunk.state = ChunkState::Running;
            if chunk.started_at.is_none() {
                chunk.started_at = Some(Instant::now());
            }
        }
    }

    pub fn mark_chunk_retry(&self, chunk_id: usize) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(chunk) = inner.chunks.get_mut(chunk_id) {
            chunk.retries += 1;
        }
    }

    pub fn mark_chunk_done(&self, chunk_id: usize, bytes: u64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(chunk) = inner.chunks.get_mut(chunk_id) {
            let finished = Instant::now();
            chunk.state = ChunkState::Done;
            chunk.bytes = bytes;
            chunk.finished_at = Some(finished);
            if let Some(started) = chunk.started_at {
                let elapsed = finished.duration_since(started).as_secs_f64();
                chunk.speed_mbs = if elapsed > 0.0 {
                    bytes as f64 / (1024.0 * 1024.0) / elapsed
                } else {
                    0.0
                };
            }
        }
    }

    pub fn mark_chunk_failed(&self, chunk_id: usize) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(chunk) = inner.chunks.get_mut(chunk_id) {
            chunk.state = ChunkState::Failed;
            chunk.finished_at = Some(Instant::now());
        }
        inner.failed.insert(chunk_id);
    }

    pub fn failed_chunks(&self) -> HashSet<usize> {
        self.inner.lock().unwrap().failed.clone()
    }

    pub fn chunk_retries(&self, chunk_id: usize) -> u32 {
        let inner = self.inner.lock().unwrap();
        inner.chunks.get(chunk_id).map(|c| c.retries).unwrap_or(0)
    }

    /// Snapshot of every chunk record, for the metrics sampler and reports
    pub fn chunk_records(&self) -> Vec<ChunkRecord> {
        self.inner.lock().unwrap().chunks.clone()
    }

    pub fn status(&self) -> JobStatus {
        self.inner.lock().unwrap().status
    }

    pub fn error(&self) -> Option<String> {
        self.inner.lock().unwrap().error.clone()
    }

    /// Move to a terminal state. Transitions out of a terminal state are
    /// ignored, keeping the FSM one-way.
    pub fn finish(&self, status: JobStatus, error: Option<String>) {
        let mut inner = self.inner.lock().unwrap();
        if inner.status == JobStatus::Downloading {
            inner.status = status;
            inner.error = error;
        }
        drop(inner);
        self.downloading.store(false, Ordering::Relaxed);
    }

    /// Current average speed in MB/s over the whole transfer
    pub fn speed_mbs(&self) -> f64 {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        let downloaded = self.downloaded_bytes();
        if elapsed > 0.0 && downloaded > 0 {
            downloaded as f64 / (1024.0 * 1024.0) / elapsed
        } else {
            0.0
        }
    }

    /// Seconds since the job started
    pub fn elapsed_secs(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    /// Detailed post-hoc report over all chunk records
    pub fn detailed_metrics(&self) -> JobMetrics {
        let inner = self.inner.lock().unwrap();
        let total_time = self.started_at.elapsed().as_secs_f64();
        let size = self.file_size() as f64;

        let throughput_mbps = if total_time > 0.0 {
            size * 8.0 / (total_time * 1024.0 * 1024.0)
        } else {
            0.0
        };
        let throughput_mbs = if total_time > 0.0 {
            size / (total_time * 1024.0 * 1024.0)
        } else {
            0.0
        };

        let chunk_metrics: Vec<ChunkMetric> = inner
            .chunks
            .iter()
            .filter(|c| c.started_at.is_some() && c.finished_at.is_some())
            .map(|c| ChunkMetric {
                chunk_id: c.spec.index,
                size_mb: c.bytes as f64 / (1024.0 * 1024.0),
                time_seconds: c
                    .finished_at
                    .zip(c.started_at)
                    .map(|(f, s)| f.duration_since(s).as_secs_f64())
                    .unwrap_or(0.0),
                speed_mbs: c.speed_mbs,
                retries: c.retries,
            })
            .collect();

        let fastest_chunk = chunk_metrics
            .iter()
            .max_by(|a, b| a.speed_mbs.total_cmp(&b.speed_mbs))
            .cloned();
        let slowest_chunk = chunk_metrics
            .iter()
            .min_by(|a, b| a.speed_mbs.total_cmp(&b.speed_mbs))
            .cloned();

        let streams_used = inner.chunks.len();
        JobMetrics {
            total_time_seconds: total_time,
            total_size_mb: size / (1024.0 * 1024.0),
            throughput_mbps,
            throughput_mbs,
            num_streams_used: streams_used,
            average_speed_per_stream: if streams_used > 0 {
                throughput_mbs / streams_used as f64
            } else {
                0.0
            },
            chunk_metrics,
            fastest_chunk,
            slowest_chunk,
        }
    }
}

/// One row of the per-chunk report
#[derive(Debug, Clone, Serialize)]
pub struct ChunkMetric {
    pub chunk_id: usize,
    pub size_mb: f64,
    pub time_seconds: f64,
    pub speed_mbs: f64,
    pub retries: u32,
}

/// Post-download performance report
#[derive(Debug, Clone, Serialize)]
pub struct JobMetrics {
    pub total_time_seconds: f64,
    pub total_size_mb: f64,
    /// Overall throughput in megabits per second
    pub throughput_mbps: f64,
    /// Overall throughput in megabytes per second
    pub throughput_mbs: f64,
    pub num_streams_used: usize,
    pub average_speed_per_stream: f64,
    pub chunk_metrics: Vec<ChunkMetric>,
    pub fastest_chunk: Option<ChunkMetric>,
    pub slowest_chunk: Option<ChunkMetric>,
}
