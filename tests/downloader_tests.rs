// Licensed under the MIT License
// Copyright (c) 2025 Sijo Saju <sijo.saju@outlook.com>

//! End-to-end downloader tests against a local range-capable fixture server

mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use qstream::controller::ControllerConfig;
use qstream::job::{ChunkState, DownloadJob, DownloadMode, JobStatus};
use qstream::worker::part_path;
use qstream::{Downloader, DownloadError, QstreamConfig, RlController, ScriptedRttProbe};
use support::{fixture_body, FlakyRangeResponder, RangeIgnoringResponder, RangeResponder};

const MIB: usize = 1024 * 1024;

fn test_config(dir: &TempDir) -> QstreamConfig {
    let mut config = QstreamConfig::default();
    config.general.download_dir = dir.path().join("downloads");
    config.network.retry_delay = 0;
    config.network.read_timeout = 10;
    config
}

/// Mount a HEAD mock describing the fixture and return the server
async fn mount_head(server: &MockServer, file: &str, size: usize, ranges: bool) {
    let mut template = ResponseTemplate::new(200)
        .insert_header("Content-Length", size.to_string().as_str());
    if ranges {
        template = template.insert_header("Accept-Ranges", "bytes");
    }
    Mock::given(method("HEAD"))
        .and(path(file))
        .respond_with(template)
        .mount(server)
        .await;
}

fn scripted_probe() -> Arc<ScriptedRttProbe> {
    // Flat, always-available RTT so no test shells out to ping
    Arc::new(ScriptedRttProbe::new(std::iter::repeat(Some(40.0)).take(64)))
}

#[tokio::test]
async fn test_static_four_stream_happy_path() {
    let server = MockServer::start().await;
    let body = fixture_body(16 * MIB);
    mount_head(&server, "/file.bin", body.len(), true).await;
    Mock::given(method("GET"))
        .and(path("/file.bin"))
        .respond_with(RangeResponder::new(body.clone()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let output = dir.path().join("file.bin");

    let job = Arc::new(DownloadJob::new(
        format!("{}/file.bin", server.uri()),
        DownloadMode::Multi,
        false,
        4,
        None,
    ));
    let downloader = Downloader::for_job(config, Arc::clone(&job), None)
        .unwrap()
        .with_rtt_probe(scripted_probe());

    let outcome = downloader.run(Some(output.clone())).await.unwrap();

    assert_eq!(outcome.size, body.len() as u64);
    assert_eq!(job.status(), JobStatus::Completed);
    assert!(job.failed_chunks().is_empty());
    assert_eq!(std::fs::read(&output).unwrap(), body);

    // Exactly four chunks of 4 MiB, all done, all parts consumed
    let records = job.chunk_records();
    assert_eq!(records.len(), 4);
    for record in &records {
        assert_eq!(record.state, ChunkState::Done);
        assert_eq!(record.bytes, 4 * MIB as u64);
    }
    for chunk_id in 0..4 {
        assert!(!part_path(&output, chunk_id).exists());
    }
}

#[tokio::test]
async fn test_no_range_support_falls_back_to_single_stream() {
    let server = MockServer::start().await;
    let body = fixture_body(3 * MIB);
    // HEAD advertises a size but no Accept-Ranges
    mount_head(&server, "/legacy.bin", body.len(), false).await;
    Mock::given(method("GET"))
        .and(path("/legacy.bin"))
        .respond_with(RangeIgnoringResponder { body: body.clone() })
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let output = dir.path().join("legacy.bin");

    // Adaptive was requested, but no range support must force it off
    let controller = Arc::new(Mutex::new(RlController::new(ControllerConfig::default())));
    let job = Arc::new(DownloadJob::new(
        format!("{}/legacy.bin", server.uri()),
        DownloadMode::Multi,
        true,
        4,
        None,
    ));
    let downloader = Downloader::for_job(test_config(&dir), Arc::clone(&job), Some(controller))
        .unwrap()
        .with_rtt_probe(scripted_probe());

    let outcome = downloader.run(Some(output.clone())).await.unwrap();

    assert_eq!(outcome.size, body.len() as u64);
    assert_eq!(job.status(), JobStatus::Completed);
    assert_eq!(std::fs::read(&output).unwrap(), body);
    // Single chunk covering the whole file
    assert_eq!(job.chunk_records().len(), 1);
}

#[tokio::test]
async fn test_transient_chunk_failure_retries_in_static_mode() {
    let server = MockServer::start().await;
    let body = fixture_body(8 * MIB);
    // Chunk 2 of four 2 MiB chunks starts at 4 MiB; its first attempt fails
    let flaky_start = 4 * MIB;
    mount_head(&server, "/flaky.bin", body.len(), true).await;
    Mock::given(method("GET"))
        .and(path("/flaky.bin"))
        .respond_with(FlakyRangeResponder::new(body.clone(), flaky_start, 1))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let output = dir.path().join("flaky.bin");

    let job = Arc::new(DownloadJob::new(
        format!("{}/flaky.bin", server.uri()),
        DownloadMode::Multi,
        false,
        4,
        None,
    ));
    let downloader = Downloader::for_job(config, Arc::clone(&job), None)
        .unwrap()
        .with_rtt_probe(scripted_probe());

    let outcome = downloader.run(Some(output.clone())).await.unwrap();

    assert_eq!(outcome.size, body.len() as u64);
    assert_eq!(job.status(), JobStatus::Completed);
    assert_eq!(std::fs::read(&output).unwrap(), body);
    assert_eq!(job.chunk_retries(2), 1);
    assert!(job.failed_chunks().is_empty());
}

#[tokio::test]
async fn test_probe_failure_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/gone.bin"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gone.bin"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let job = Arc::new(DownloadJob::new(
        format!("{}/gone.bin", server.uri()),
        DownloadMode::Multi,
        false,
        4,
        None,
    ));
    let downloader = Downloader::for_job(test_config(&dir), Arc::clone(&job), None)
        .unwrap()
        .with_rtt_probe(scripted_probe());

    let err = downloader.run(None).await.unwrap_err();
    assert_eq!(err.category(), "probe");
    assert_eq!(job.status(), JobStatus::Failed);
    assert!(job.error().is_some());
}

#[tokio::test]
async fn test_cancellation_cleans_up_parts() {
    let server = MockServer::start().await;
    let body = fixture_body(4 * MIB);
    mount_head(&server, "/slow.bin", body.len(), true).await;
    Mock::given(method("GET"))
        .and(path("/slow.bin"))
        .respond_with(RangeResponder::new(body.clone()).with_delay(Duration::from_millis(700)))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let output = dir.path().join("slow.bin");

    let job = Arc::new(DownloadJob::new(
        format!("{}/slow.bin", server.uri()),
        DownloadMode::Multi,
        false,
        4,
        None,
    ));
    let downloader = Downloader::for_job(test_config(&dir), Arc::clone(&job), None)
        .unwrap()
        .with_rtt_probe(scripted_probe());

    let run_output = output.clone();
    let handle = tokio::spawn(async move { downloader.run(Some(run_output)).await });
    tokio::time::sleep(Duration::from_millis(150)).await;
    job.request_cancel();

    let result = handle.await.unwrap();
    assert!(matches!(result, Err(DownloadError::Cancelled)));
    assert_eq!(job.status(), JobStatus::Cancelled);

    // No temp files and no final file
    for chunk_id in 0..4 {
        assert!(!part_path(&output, chunk_id).exists());
    }
    assert!(!output.exists());
}

#[tokio::test]
async fn test_single_stream_mode_downloads_directly() {
    let server = MockServer::start().await;
    let body = fixture_body(2 * MIB);
    mount_head(&server, "/plain.bin", body.len(), false).await;
    Mock::given(method("GET"))
        .and(path("/plain.bin"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(body.clone())
                .insert_header("Content-Length", body.len().to_string().as_str()),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let output = dir.path().join("plain.bin");

    let job = Arc::new(DownloadJob::new(
        format!("{}/plain.bin", server.uri()),
        DownloadMode::Single,
        false,
        1,
        None,
    ));
    let downloader = Downloader::for_job(test_config(&dir), Arc::clone(&job), None).unwrap();

    let outcome = downloader.run(Some(output.clone())).await.unwrap();
    assert_eq!(outcome.size, body.len() as u64);
    assert_eq!(job.status(), JobStatus::Completed);
    assert_eq!(std::fs::read(&output).unwrap(), body);

    let metrics = job.detailed_metrics();
    assert_eq!(metrics.num_streams_used, 1);
    assert!(metrics.throughput_mbps > 0.0);
}

#[tokio::test]
async fn test_progress_hook_reaches_total() {
    let server = MockServer::start().await;
    let body = fixture_body(4 * MIB);
    mount_head(&server, "/hooked.bin", body.len(), true).await;
    Mock::given(method("GET"))
        .and(path("/hooked.bin"))
        .respond_with(RangeResponder::new(body.clone()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let seen: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
    let hook_seen = Arc::clone(&seen);

    let job = Arc::new(DownloadJob::new(
        format!("{}/hooked.bin", server.uri()),
        DownloadMode::Multi,
        false,
        4,
        Some(Arc::new(move |downloaded, _total| {
            hook_seen.lock().unwrap().push(downloaded);
        })),
    ));
    let downloader = Downloader::for_job(test_config(&dir), Arc::clone(&job), None)
        .unwrap()
        .with_rtt_probe(scripted_probe());

    downloader
        .run(Some(dir.path().join("hooked.bin")))
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    // Serialized under the job mutex, so the sequence is non-decreasing
    for pair in seen.windows(2) {
        assert!(pair[1] >= pair[0]);
    }
    assert_eq!(*seen.last().unwrap(), body.len() as u64);
}
