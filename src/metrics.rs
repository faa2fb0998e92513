// Licensed under the MIT License
// Copyright (c) 2025 Sijo Saju <sijo.saju@outlook.com>

//! Metrics sampler
//!
//! Produces the (throughput, RTT, loss) triple the controller discretizes.
//! Throughput comes from the job byte counter. RTT is measured with one
//! external `ping` invocation and falls back to chunk-start spacing when
//! ping is unavailable or unparsable. TCP exposes no direct loss signal, so
//! loss is a bounded proxy built from speed variance, chunk failure rate,
//! and recent speed degradation.

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;
use tracing::debug;

use crate::constants::{
    LOSS_MAX_PCT, LOSS_MIN_PCT, PING_TIMEOUT, PING_WAIT_SECS, RTT_DEFAULT_MS,
    RTT_FALLBACK_RANGE_MS,
};
use crate::job::{ChunkRecord, ChunkState, DownloadJob};

/// One sampled view of the network
#[derive(Debug, Clone, Serialize)]
pub struct MetricSample {
    /// Megabits per second over the whole transfer so far
    pub throughput_mbps: f64,
    /// Round-trip time estimate in milliseconds
    pub rtt_ms: f64,
    /// Loss proxy in percent, within [0.1, 5.0]
    pub loss_pct: f64,
    /// Wall-clock time of the sample
    pub sampled_at: chrono::DateTime<chrono::Utc>,
}

/// Overall throughput in Mbps. Returns 0 for a warm-up window shorter than
/// 0.1 s or when nothing has been transferred yet.
pub fn throughput_mbps(bytes: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs < 0.1 || bytes == 0 {
        return 0.0;
    }
    bytes as f64 * 8.0 / elapsed_secs / (1024.0 * 1024.0)
}

/// RTT measurement source
#[async_trait]
pub trait RttProbe: Send + Sync {
    /// Measure RTT to `host` in milliseconds; `None` when unavailable
    async fn measure(&self, host: &str) -> Option<f64>;
}

/// Default probe: spawns the OS `ping` utility once per sample
#[derive(Debug, Default)]
pub struct PingRttProbe;

#[async_trait]
impl RttProbe for PingRttProbe {
    async fn measure(&self, host: &str) -> Option<f64> {
        let mut command = tokio::process::Command::new("ping");
        #[cfg(target_os = "windows")]
        command.args(["-n", "1", "-w", &(PING_WAIT_SECS * 1000).to_string()]);
        #[cfg(not(target_os = "windows"))]
        command.args(["-c", "1", "-W", &PING_WAIT_SECS.to_string()]);
        command.arg(host);
        command.stdout(std::process::Stdio::piped());
        command.stderr(std::process::Stdio::null());

        let output = tokio::time::timeout(PING_TIMEOUT, command.output())
            .await
            .ok()?
            .ok()?;

        if !output.status.success() {
            return None;
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_ping_time(&stdout)
    }
}

/// Scripted probe for tests and simulations: returns queued values in order,
/// then `None`
#[derive(Debug, Default)]
pub struct ScriptedRttProbe {
    values: Mutex<std::collections::VecDeque<Option<f64>>>,
}

impl ScriptedRttProbe {
    pub fn new(values: impl IntoIterator<Item = Option<f64>>) -> Self {
        Self {
            values: Mutex::new(values.into_iter().collect()),
        }
    }
}

#[async_trait]
impl RttProbe for ScriptedRttProbe {
    async fn measure(&self, _host: &str) -> Option<f64> {
        self.values.lock().unwrap().pop_front().flatten()
    }
}

/// First `time=<ms>` value in ping output
fn parse_ping_time(output: &str) -> Option<f64> {
    static TIME_RE: OnceLock<Regex> = OnceLock::new();
    let re = TIME_RE.get_or_init(|| Regex::new(r"time[=<]([0-9]+\.?[0-9]*)").unwrap());
    re.captures(output)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// Chunk-start spacing fallback: the minimum positive gap between
/// consecutive worker start timestamps, clamped to [10, 1000] ms.
/// With fewer than two samples the estimate defaults to 100 ms.
pub fn rtt_from_chunk_spacing(starts: &[Instant]) -> f64 {
    if starts.len() < 2 {
        return RTT_DEFAULT_MS;
    }

    let mut sorted: Vec<Instant> = starts.to_vec();
    sorted.sort();

    let mut min_gap_ms = f64::INFINITY;
    for pair in sorted.windows(2) {
        let gap = pair[1].duration_since(pair[0]).as_secs_f64() * 1000.0;
        if gap > 0.0 && gap < min_gap_ms {
            min_gap_ms = gap;
        }
    }

    if min_gap_ms.is_finite() {
        min_gap_ms.clamp(RTT_FALLBACK_RANGE_MS.0, RTT_FALLBACK_RANGE_MS.1)
    } else {
        RTT_DEFAULT_MS
    }
}

/// Loss proxy over completed chunks, in percent.
///
/// Three capped signals are combined with fixed weights:
/// speed coefficient of variation (0.5), chunk failure rate (0.3), and
/// degradation across the last five chunk speeds (0.2). The result is
/// clamped to [0.1, 5.0]; fewer than three speed samples yield the floor.
pub fn estimate_loss_pct(records: &[ChunkRecord]) -> f64 {
    let mut done: Vec<&ChunkRecord> = records
        .iter()
        .filter(|r| r.state == ChunkState::Done)
        .collect();
    done.sort_by_key(|r| r.finished_at);
    let speeds: Vec<f64> = done.iter().map(|r| r.speed_mbs).collect();

    if speeds.len() < 3 {
        return LOSS_MIN_PCT;
    }

    let failed = records
        .iter()
        .filter(|r| r.state == ChunkState::Failed)
        .count();
    let total = speeds.len() + failed;

    let mean = speeds.iter().sum::<f64>() / speeds.len() as f64;
    let cv = if mean > 0.0 {
        let variance =
            speeds.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / speeds.len() as f64;
        variance.sqrt() / mean
    } else {
        0.0
    };
    let cv_signal = (5.0 * cv).min(1.5);

    let failure_rate = failed as f64 / total as f64;
    let failure_signal = (10.0 * failure_rate).min(2.0);

    let recent: Vec<f64> = speeds.iter().rev().take(5).rev().copied().collect();
    let degradation = if recent.len() >= 3 {
        let first_two = (recent[0] + recent[1]) / 2.0;
        let last_two = (recent[recent.len() - 2] + recent[recent.len() - 1]) / 2.0;
        if first_two > 0.0 {
            ((first_two - last_two) / first_two).max(0.0)
        } else {
            0.0
        }
    } else {
        0.0
    };
    let degradation_signal = (2.0 * degradation).min(1.0);

    let loss = 0.5 * cv_signal + 0.3 * failure_signal + 0.2 * degradation_signal;
    loss.clamp(LOSS_MIN_PCT, LOSS_MAX_PCT)
}

/// Samples (throughput, RTT, loss) for one job
pub struct MetricsSampler {
    job: Arc<DownloadJob>,
    probe: Arc<dyn RttProbe>,
    host: Option<String>,
}

impl std::fmt::Debug for MetricsSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsSampler")
            .field("host", &self.host)
            .finish()
    }
}

impl MetricsSampler {
    pub fn new(job: Arc<DownloadJob>, probe: Arc<dyn RttProbe>) -> Self {
        let host = url::Url::parse(&job.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()));
        Self { job, probe, host }
    }

    /// Take one sample of the current network view
    pub async fn sample(&self) -> MetricSample {
        let throughput = throughput_mbps(self.job.downloaded_bytes(), self.job.elapsed_secs());

        let records = self.job.chunk_records();

        let rtt_ms = match &self.host {
            Some(host) => match self.probe.measure(host).await {
                Some(ms) => ms,
                None => {
                    let starts: Vec<Instant> =
                        records.iter().filter_map(|r| r.started_at).collect();
                    let fallback = rtt_from_chunk_spacing(&starts);
                    debug!("Ping unavailable, chunk-spacing RTT = {:.1} ms", fallback);
                    fallback
                }
            },
            None => RTT_DEFAULT_MS,
        };

        let loss_pct = estimate_loss_pct(&records);

        MetricSample {
            throughput_mbps: throughput,
            rtt_ms,
            loss_pct,
            sampled_at: chrono::Utc::now(),
        }
    }
}
