// Licensed under the MIT License
// Copyright (c) 2025 Sijo Saju <sijo.saju@outlook.com>

//! Transport probe
//!
//! Discovers whether a server honors byte-range requests, the resource size,
//! and a usable filename before any download starts. A HEAD request is tried
//! first; servers that reject HEAD get a one-byte range GET instead.

use reqwest::Client;
use tracing::{debug, warn};

use crate::constants::CONNECT_TIMEOUT;
use crate::error::Result;

/// Fallback name when neither the headers nor the URL yield one
const FALLBACK_FILENAME: &str = "downloaded_file";

/// What the probe learned about a URL
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    /// Server honors `Range` requests
    pub supports_ranges: bool,
    /// Declared resource size in bytes; 0 when unknown
    pub size: u64,
    /// Filename derived from Content-Disposition or the URL path
    pub filename: String,
}

/// Range-support and size prober
#[derive(Debug, Clone)]
pub struct TransportProbe {
    client: Client,
}

impl TransportProbe {
    /// Create a probe sharing the downloader's HTTP client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Probe a URL for range support, size, and filename.
    ///
    /// Neither request blocks longer than the connection timeout. If both the
    /// HEAD and the one-byte GET fail, returns `supports_ranges: false` and
    /// `size: 0`; the coordinator treats a zero size as fatal.
    pub async fn probe(&self, url: &str) -> Result<ProbeResult> {
        match self.probe_head(url).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                debug!("HEAD probe failed for {}: {}, trying range GET", url, e);
            }
        }

        match self.probe_range_get(url).await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!("Both probes failed for {}: {}", url, e);
                Ok(ProbeResult {
                    supports_ranges: false,
                    size: 0,
                    filename: filename_from_url(url),
                })
            }
        }
    }

    async fn probe_head(&self, url: &str) -> Result<ProbeResult> {
        let response = self
            .client
            .head(url)
            .timeout(CONNECT_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(crate::error::DownloadError::from_status_code(
                status.as_u16(),
                url,
            ));
        }

        let supports_ranges = response
            .headers()
            .get("accept-ranges")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("bytes"))
            .unwrap_or(false);

        let size = header_u64(&response, "content-length").unwrap_or(0);
        let filename = filename_from_response(&response, url);

        debug!(
            "HEAD probe: size={}, supports_ranges={}, filename={}",
            size, supports_ranges, filename
        );

        Ok(ProbeResult {
            supports_ranges,
            size,
            filename,
        })
    }

    /// One-byte GET fallback: range support holds exactly when the server
    /// answers 206. The body is dropped unread.
    async fn probe_range_get(&self, url: &str) -> Result<ProbeResult> {
        let response = self
            .client
            .get(url)
            .header("Range", "bytes=0-0")
            .timeout(CONNECT_TIMEOUT)
            .send()
            .await?;

        let supports_ranges = response.status().as_u16() == 206;

        let size = content_range_total(&response)
            .or_else(|| header_u64(&response, "content-length"))
            .unwrap_or(0);

        let filename = filename_from_response(&response, url);

        debug!(
            "Range GET probe: status={}, size={}, supports_ranges={}",
            response.status(),
            size,
            supports_ranges
        );

        Ok(ProbeResult {
            supports_ranges,
            size,
            filename,
        })
    }
}

fn header_u64(response: &reqwest::Response, name: &str) -> Option<u64> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
}

/// Total size from `Content-Range: bytes 0-0/12345`
fn content_range_total(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get("content-range")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.rsplit('/').next())
        .and_then(|total| total.parse::<u64>().ok())
}

fn filename_from_response(response: &reqwest::Response, url: &str) -> String {
    if let Some(disposition) = response
        .headers()
        .get("content-disposition")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(name) = filename_from_disposition(disposition) {
            return name;
        }
    }
    filename_from_url(url)
}

fn filename_from_disposition(disposition: &str) -> Option<String> {
    let (_, rest) = disposition.split_once("filename=")?;
    let name = rest
        .split(';')
        .next()
        .unwrap_or(rest)
        .trim()
        .trim_matches('"');
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Percent-decoded basename of the URL path, or a fixed fallback
pub fn filename_from_url(url: &str) -> String {
    let basename = url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|segments| segments.last().map(|s| s.to_string()))
        })
        .unwrap_or_default();

    let decoded = urlencoding::decode(&basename)
        .map(|s| s.into_owned())
        .unwrap_or(basename);

    if decoded.is_empty() || decoded == "/" {
        FALLBACK_FILENAME.to_string()
    } else {
        decoded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_from_url() {
        assert_eq!(
            filename_from_url("https://example.com/files/archive.zip"),
            "archive.zip"
        );
        assert_eq!(
            filename_from_url("https://example.com/files/my%20file.bin"),
            "my file.bin"
        );
        assert_eq!(filename_from_url("https://example.com/"), "downloaded_file");
        assert_eq!(filename_from_url("not a url"), "downloaded_file");
    }

    #[test]
    fn test_filename_from_disposition() {
        assert_eq!(
            filename_from_disposition("attachment; filename=\"report.pdf\""),
            Some("report.pdf".to_string())
        );
        assert_eq!(
            filename_from_disposition("attachment; filename=data.csv; size=42"),
            Some("data.csv".to_string())
        );
        assert_eq!(filename_from_disposition("inline"), None);
    }
}
