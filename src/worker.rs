// Licensed under the MIT License
// Copyright (c) 2025 Sijo Saju <sijo.saju@outlook.com>

//! Stream worker
//!
//! Fetches one byte-range chunk into its part file. The response body is
//! streamed through a small buffered writer; after every buffer the worker
//! bumps the shared byte counter (firing the progress hook) and observes the
//! job's cancellation flag. Static-mode transfers retry a failed chunk with
//! a fixed delay; adaptive-mode transfers report the failure and let the
//! controller react through the loss estimate instead.

use futures_util::StreamExt;
use reqwest::Client;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use crate::constants::BUFFER_SIZE;
use crate::error::{DownloadError, Result};
use crate::job::DownloadJob;
use crate::planner::ChunkSpec;

/// How a worker treats a failed attempt
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Fixed delay between attempts
    pub delay: Duration,
}

impl RetryPolicy {
    /// Static-mode policy: retry with a fixed delay
    pub fn retrying(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Adaptive-mode policy: a failed chunk is recorded, not retried in-line
    pub fn observe_only() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

/// Fetch one chunk into `part_path`, honoring the retry policy.
///
/// On success the part file holds exactly `spec.byte_len()` bytes and the
/// chunk is marked done. On failure the partial file is removed, the byte
/// counter rolled back, and the chunk marked failed.
pub async fn fetch_chunk(
    client: Client,
    job: Arc<DownloadJob>,
    spec: ChunkSpec,
    part_path: &Path,
    read_timeout: Duration,
    policy: RetryPolicy,
) -> Result<()> {
    job.mark_chunk_running(spec.index);

    let mut last_error = DownloadError::chunk(spec.index, "no attempt made");
    for attempt in 0..policy.max_attempts {
        if !job.is_downloading() {
            remove_part(part_path).await;
            return Err(DownloadError::Cancelled);
        }

        match fetch_chunk_once(&client, &job, spec, part_path, read_timeout).await {
            Ok(bytes) => {
                job.mark_chunk_done(spec.index, bytes);
                debug!(
                    "Chunk {}: downloaded {:.2} MB (attempt {})",
                    spec.index,
                    bytes as f64 / (1024.0 * 1024.0),
                    attempt + 1
                );
                return Ok(());
            }
            Err(DownloadError::Cancelled) => {
                remove_part(part_path).await;
                return Err(DownloadError::Cancelled);
            }
            Err(e) => {
                warn!(
                    "Chunk {}: attempt {}/{} failed: {}",
                    spec.index,
                    attempt + 1,
                    policy.max_attempts,
                    e
                );
                last_error = e;
                if attempt + 1 < policy.max_attempts {
                    job.mark_chunk_retry(spec.index);
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }
    }

    remove_part(part_path).await;
    job.mark_chunk_failed(spec.index);
    Err(last_error)
}

/// One attempt: range GET, stream to the part file, count bytes.
/// Any partial write is rolled back before the error propagates.
async fn fetch_chunk_once(
    client: &Client,
    job: &DownloadJob,
    spec: ChunkSpec,
    part_path: &Path,
    read_timeout: Duration,
) -> Result<u64> {
    let range_header = format!("bytes={}-{}", spec.start, spec.end);
    let response = client
        .get(&job.url)
        .header("Range", range_header)
        .send()
        .await
        .map_err(DownloadError::from)?;

    let status = response.status().as_u16();
    if status != 200 && status != 206 {
        return Err(DownloadError::from_status_code(status, job.url.as_str()));
    }

    let file = File::create(part_path).await?;
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, file);
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    let outcome = loop {
        if !job.is_downloading() {
            break Err(DownloadError::Cancelled);
        }

        let next = tokio::time::timeout(read_timeout, stream.next()).await;
        match next {
            Err(_) => {
                break Err(DownloadError::timeout(format!(
                    "chunk {} read stalled past {:?}",
                    spec.index, read_timeout
                )));
            }
            Ok(None) => break Ok(()),
            Ok(Some(Err(e))) => break Err(DownloadError::from(e)),
            Ok(Some(Ok(buf))) => {
                if buf.is_empty() {
                    continue;
                }
                writer.write_all(&buf).await?;
                written += buf.len() as u64;
                job.add_bytes(buf.len() as u64);
            }
        }
    };

    if let Err(e) = outcome {
        drop(writer);
        rollback(job, part_path, written).await;
        return Err(e);
    }

    writer.flush().await?;
    drop(writer);

    let expected = spec.byte_len();
    if written != expected {
        rollback(job, part_path, written).await;
        return Err(DownloadError::chunk(
            spec.index,
            format!("body was {written} bytes, range asked for {expected}"),
        ));
    }

    Ok(written)
}

/// Undo a partial attempt: delete the part file and roll the counter back
async fn rollback(job: &DownloadJob, part_path: &Path, written: u64) {
    if written > 0 {
        job.subtract_bytes(written);
    }
    remove_part(part_path).await;
}

async fn remove_part(part_path: &Path) {
    if let Err(e) = tokio::fs::remove_file(part_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!("Could not remove part file {}: {}", part_path.display(), e);
        }
    }
}

/// Part-file path for a chunk: `{output}.part{i}`
pub fn part_path(output_path: &Path, chunk_id: usize) -> std::path::PathBuf {
    let mut name = output_path.as_os_str().to_os_string();
    name.push(format!(".part{chunk_id}"));
    std::path::PathBuf::from(name)
}
