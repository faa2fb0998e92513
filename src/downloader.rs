// Licensed under the MIT License
// Copyright (c) 2025 Sijo Saju <sijo.saju@outlook.com>

//! Download coordinator
//!
//! Two strategies behind one contract: `SingleStream` issues a plain
//! browser-style GET, `MultiStream` splits the file into byte ranges and
//! drives a worker pool. The multi-stream tick loop reaps finished workers
//! and tops the pool up to the current desired concurrency - a fixed count
//! in static mode, the RL controller's latest choice in adaptive mode. The
//! desired count is re-read from the controller at every tick, so a resize
//! takes effect without re-planning.

use reqwest::Client;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::assembler::{assemble, cleanup_parts};
use crate::config::QstreamConfig;
use crate::constants::{ADAPTIVE_JOIN_TIMEOUT, POOL_TICK, STATIC_JOIN_TIMEOUT};
use crate::controller::RlController;
use crate::error::{DownloadError, Result};
use crate::job::{DownloadJob, DownloadMode, JobStatus};
use crate::metrics::{MetricsSampler, PingRttProbe, RttProbe};
use crate::planner::{plan_chunks, ChunkSpec};
use crate::probe::TransportProbe;
use crate::worker::{fetch_chunk, part_path, RetryPolicy};

/// Result of a finished download
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    /// Final file path
    pub path: PathBuf,
    /// Bytes in the final file
    pub size: u64,
    /// Wall-clock duration of the transfer
    pub duration: Duration,
    /// Average speed in bytes per second
    pub speed: f64,
    /// Source URL
    pub url: String,
}

/// Strategy selected from the job configuration
#[derive(Debug)]
pub enum Downloader {
    Single(SingleStreamDownloader),
    Multi(MultiStreamDownloader),
}

impl Downloader {
    /// Build the right variant for a job. Adaptive jobs need a controller;
    /// without one the pool size stays fixed.
    pub fn for_job(
        config: QstreamConfig,
        job: Arc<DownloadJob>,
        controller: Option<Arc<Mutex<RlController>>>,
    ) -> Result<Self> {
        let client = build_client(&config)?;
        Ok(match job.mode {
            DownloadMode::Single => Downloader::Single(SingleStreamDownloader {
                config,
                client,
                job,
            }),
            DownloadMode::Multi => Downloader::Multi(MultiStreamDownloader {
                config,
                client,
                job,
                controller,
                rtt_probe: Arc::new(PingRttProbe),
            }),
        })
    }

    /// Run the transfer to completion, returning the final path
    pub async fn run(&self, output_path: Option<PathBuf>) -> Result<DownloadOutcome> {
        match self {
            Downloader::Single(d) => d.run(output_path).await,
            Downloader::Multi(d) => d.run(output_path).await,
        }
    }

    /// The job this downloader drives
    pub fn job(&self) -> &Arc<DownloadJob> {
        match self {
            Downloader::Single(d) => &d.job,
            Downloader::Multi(d) => &d.job,
        }
    }

    /// Swap the multi-stream RTT source; no-op for single-stream. Tests use
    /// this to avoid spawning ping.
    pub fn with_rtt_probe(self, probe: Arc<dyn RttProbe>) -> Self {
        match self {
            Downloader::Multi(d) => Downloader::Multi(d.with_rtt_probe(probe)),
            other => other,
        }
    }
}

/// Shared HTTP client with the configured timeouts and redirect policy
fn build_client(config: &QstreamConfig) -> Result<Client> {
    Client::builder()
        .connect_timeout(config.connect_timeout())
        .user_agent(&config.general.user_agent)
        .tcp_nodelay(true)
        .redirect(reqwest::redirect::Policy::limited(
            config.network.max_redirects,
        ))
        .build()
        .map_err(|e| DownloadError::internal(format!("Failed to create HTTP client: {e}")))
}

/// Browser-style single connection downloader
#[derive(Debug)]
pub struct SingleStreamDownloader {
    config: QstreamConfig,
    client: Client,
    job: Arc<DownloadJob>,
}

impl SingleStreamDownloader {
    async fn run(&self, output_path: Option<PathBuf>) -> Result<DownloadOutcome> {
        let started = Instant::now();
        match self.transfer(output_path).await {
            Ok(outcome) => {
                self.job.finish(JobStatus::Completed, None);
                Ok(outcome)
            }
            Err(DownloadError::Cancelled) => {
                self.job.finish(JobStatus::Cancelled, None);
                Err(DownloadError::Cancelled)
            }
            Err(e) => {
                self.job.finish(JobStatus::Failed, Some(e.to_string()));
                warn!(
                    "Single-stream download failed after {:.1}s: {}",
                    started.elapsed().as_secs_f64(),
                    e
                );
                Err(e)
            }
        }
    }

    async fn transfer(&self, output_path: Option<PathBuf>) -> Result<DownloadOutcome> {
        use futures_util::StreamExt;
        use tokio::io::AsyncWriteExt;

        let started = Instant::now();
        let probe = TransportProbe::new(self.client.clone());
        let info = probe.probe(&self.job.url).await?;
        self.job.set_file_size(info.size);

        let output = resolve_output_path(&self.config, output_path, &info.filename).await?;
        info!(
            "Single-stream download of {} ({:.2} MB) to {}",
            self.job.url,
            info.size as f64 / (1024.0 * 1024.0),
            output.display()
        );

        // One whole-file chunk record keeps reports uniform across modes
        let plan = vec![ChunkSpec {
            index: 0,
            start: 0,
            end: info.size.saturating_sub(1),
        }];
        self.job.init_chunks(&plan);
        self.job.mark_chunk_running(0);

        let response = self.client.get(&self.job.url).send().await?;
        let status = response.status().as_u16();
        if status != 200 {
            return Err(DownloadError::from_status_code(status, self.job.url.as_str()));
        }

        let file = tokio::fs::File::create(&output).await?;
        let mut writer =
            tokio::io::BufWriter::with_capacity(crate::constants::BUFFER_SIZE, file);
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        let read_timeout = self.config.read_timeout();

        let outcome: Result<()> = loop {
            if !self.job.is_downloading() {
                break Err(DownloadError::Cancelled);
            }
            match tokio::time::timeout(read_timeout, stream.next()).await {
                Err(_) => break Err(DownloadError::timeout("read stalled")),
                Ok(None) => break Ok(()),
                Ok(Some(Err(e))) => break Err(e.into()),
                Ok(Some(Ok(buf))) => {
                    if buf.is_empty() {
                        continue;
                    }
                    writer.write_all(&buf).await?;
                    written += buf.len() as u64;
                    self.job.add_bytes(buf.len() as u64);
                }
            }
        };

        if let Err(e) = outcome {
            drop(writer);
            let _ = tokio::fs::remove_file(&output).await;
            return Err(e);
        }
        writer.flush().await?;
        self.job.mark_chunk_done(0, written);

        if info.size > 0 && written != info.size {
            // Declared and received sizes disagreeing is logged, not fatal
            warn!(
                "Single-stream size mismatch: got {} bytes, expected {}",
                written, info.size
            );
        }

        let duration = started.elapsed();
        Ok(DownloadOutcome {
            path: output,
            size: written,
            duration,
            speed: speed_bps(written, duration),
            url: self.job.url.clone(),
        })
    }
}

/// Parallel byte-range downloader with an optionally adaptive pool
pub struct MultiStreamDownloader {
    config: QstreamConfig,
    client: Client,
    job: Arc<DownloadJob>,
    controller: Option<Arc<Mutex<RlController>>>,
    rtt_probe: Arc<dyn RttProbe>,
}

impl std::fmt::Debug for MultiStreamDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiStreamDownloader")
            .field("job", &self.job)
            .field("adaptive", &self.controller.is_some())
            .finish()
    }
}

impl MultiStreamDownloader {
    /// Swap the RTT source, used by tests to avoid spawning ping
    pub fn with_rtt_probe(mut self, probe: Arc<dyn RttProbe>) -> Self {
        self.rtt_probe = probe;
        self
    }

    async fn run(&self, output_path: Option<PathBuf>) -> Result<DownloadOutcome> {
        match self.transfer(output_path).await {
            Ok(outcome) => {
                self.job.finish(JobStatus::Completed, None);
                Ok(outcome)
            }
            Err(DownloadError::Cancelled) => {
                self.job.finish(JobStatus::Cancelled, None);
                Err(DownloadError::Cancelled)
            }
            Err(e) => {
                self.job.finish(JobStatus::Failed, Some(e.to_string()));
                Err(e)
            }
        }
    }

    async fn transfer(&self, output_path: Option<PathBuf>) -> Result<DownloadOutcome> {
        let started = Instant::now();

        let probe = TransportProbe::new(self.client.clone());
        let info = probe.probe(&self.job.url).await?;
        if info.size == 0 {
            return Err(DownloadError::probe(
                "file size is 0 or Content-Length unavailable",
            ));
        }
        self.job.set_file_size(info.size);

        let output = resolve_output_path(&self.config, output_path, &info.filename).await?;

        // No range support: fall back to one stream and disable adaptation
        let adaptive = self.job.adaptive && self.controller.is_some() && info.supports_ranges;
        let requested = self.job.requested_streams.clamp(
            self.config.streams.min_streams,
            self.config.streams.max_streams,
        );

        let plan_target = if !info.supports_ranges {
            warn!("Server does not support range requests, using a single stream");
            1
        } else if adaptive {
            // Plan against the maximum pool so the controller can scale up
            // without re-planning
            self.config.streams.max_streams
        } else {
            requested
        };

        let plan = plan_chunks(info.size, plan_target);
        self.job.init_chunks(&plan);

        info!(
            "Downloading {} ({:.2} MB) with {} chunks (adaptive: {}) to {}",
            self.job.url,
            info.size as f64 / (1024.0 * 1024.0),
            plan.len(),
            adaptive,
            output.display()
        );

        let desired: Arc<AtomicUsize> = if adaptive {
            let controller = self.controller.as_ref().unwrap();
            let guard = controller.lock().unwrap();
            guard.set_connections(requested);
            guard.desired_handle()
        } else {
            Arc::new(AtomicUsize::new(if info.supports_ranges {
                requested.min(plan.len())
            } else {
                1
            }))
        };

        let policy = if adaptive {
            RetryPolicy::observe_only()
        } else {
            RetryPolicy::retrying(self.config.network.max_retries, self.config.retry_delay())
        };

        let outcome = self
            .drive_pool(&plan, &output, desired, policy, adaptive)
            .await;

        // The table persists every save-interval updates and at job end
        if adaptive {
            if let Some(controller) = &self.controller {
                if let Err(e) = controller.lock().unwrap().save() {
                    warn!("Q-table save at job end failed: {}", e);
                }
            }
        }

        match outcome {
            PoolOutcome::Cancelled => {
                cleanup_parts(&output, plan.len()).await;
                return Err(DownloadError::Cancelled);
            }
            PoolOutcome::Finished => {}
        }

        let failed = self.job.failed_chunks();
        let report = assemble(&output, plan.len(), info.size).await?;

        if !failed.is_empty() {
            let mut ids: Vec<usize> = failed.into_iter().collect();
            ids.sort_unstable();
            return Err(DownloadError::download(format!(
                "{} chunk(s) failed permanently: {:?}",
                ids.len(),
                ids
            )));
        }

        if !report.size_matches {
            // Logged by the assembler; not fatal by itself
            debug!(
                "Size mismatch after assembly: {} != {}",
                report.assembled_size, info.size
            );
        }

        let duration = started.elapsed();
        info!(
            "Download completed: {} bytes in {:.2}s ({:.2} MB/s)",
            report.assembled_size,
            duration.as_secs_f64(),
            speed_bps(report.assembled_size, duration) / (1024.0 * 1024.0)
        );

        Ok(DownloadOutcome {
            path: output,
            size: report.assembled_size,
            duration,
            speed: speed_bps(report.assembled_size, duration),
            url: self.job.url.clone(),
        })
    }

    /// Tick loop: reap finished workers, top the pool back up to the
    /// desired count, and let the controller act once per interval
    async fn drive_pool(
        &self,
        plan: &[ChunkSpec],
        output: &Path,
        desired: Arc<AtomicUsize>,
        policy: RetryPolicy,
        adaptive: bool,
    ) -> PoolOutcome {
        let mut remaining: VecDeque<ChunkSpec> = plan.iter().copied().collect();
        let mut pool: JoinSet<()> = JoinSet::new();
        let sampler = MetricsSampler::new(Arc::clone(&self.job), Arc::clone(&self.rtt_probe));

        loop {
            if !self.job.is_downloading() {
                self.drain_pool(pool).await;
                return PoolOutcome::Cancelled;
            }

            // Top up to the latest desired concurrency
            let target = desired.load(std::sync::atomic::Ordering::Relaxed).max(1);
            while pool.len() < target {
                let Some(spec) = remaining.pop_front() else {
                    break;
                };
                let client = self.client.clone();
                let job = Arc::clone(&self.job);
                let part = part_path(output, spec.index);
                let read_timeout = self.config.read_timeout();
                pool.spawn(async move {
                    let _ = fetch_chunk(client, job, spec, &part, read_timeout, policy).await;
                });
            }

            if pool.is_empty() && remaining.is_empty() {
                return PoolOutcome::Finished;
            }

            // Reap for at most one tick so resizes are picked up promptly
            match tokio::time::timeout(POOL_TICK, pool.join_next()).await {
                Ok(Some(Err(e))) => warn!("Worker task panicked: {e}"),
                Ok(_) => {}
                Err(_) => {} // tick elapsed with nothing finished
            }

            if adaptive {
                self.controller_tick(&sampler).await;
            }
        }
    }

    /// One adaptive step: sample metrics and let the controller decide.
    /// The controller ignores calls inside its monitoring interval.
    async fn controller_tick(&self, sampler: &MetricsSampler) {
        let Some(controller) = &self.controller else {
            return;
        };

        let due = controller.lock().unwrap().should_decide();
        if !due {
            return;
        }

        let sample = sampler.sample().await;
        let mut guard = controller.lock().unwrap();
        let connections = guard.make_decision(sample);
        debug!("Controller holds {} desired connections", connections);
    }

    /// Wait bounded for workers to observe cancellation and exit
    async fn drain_pool(&self, mut pool: JoinSet<()>) {
        let timeout = if self.job.adaptive {
            ADAPTIVE_JOIN_TIMEOUT
        } else {
            STATIC_JOIN_TIMEOUT
        };
        let drained = tokio::time::timeout(timeout, async {
            while pool.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Workers did not terminate within {:?}, aborting", timeout);
            pool.abort_all();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolOutcome {
    Finished,
    Cancelled,
}

/// Choose the output path and make sure its directory exists
async fn resolve_output_path(
    config: &QstreamConfig,
    output_path: Option<PathBuf>,
    filename: &str,
) -> Result<PathBuf> {
    let path = match output_path {
        Some(path) => path,
        None => config.general.download_dir.join(filename),
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(path)
}

fn speed_bps(bytes: u64, duration: Duration) -> f64 {
    let secs = duration.as_secs_f64();
    if secs > 0.0 {
        bytes as f64 / secs
    } else {
        0.0
    }
}
