// Shared wiremock responders for range-request servers.
//
// wiremock has no native byte-range support, so these `Respond`
// implementations slice a fixture body according to the `Range` header the
// downloader sends, plus a few misbehaving variants for failure-path tests.
// Not every test binary uses every responder.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Deterministic fixture body of `len` bytes
pub fn fixture_body(len: usize) -> Vec<u8> {
    // Small LCG so corruption or reordering shows up as a byte mismatch
    let mut state: u32 = 0x2545_f491;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 24) as u8
        })
        .collect()
}

/// Parse `bytes=start-end` into an inclusive pair
fn parse_range(raw: &str) -> Option<(usize, usize)> {
    let spec = raw.trim().strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

/// Honors `Range` headers with 206 slices; plain GETs receive the full
/// body with a 200. An optional per-response delay models slow servers.
pub struct RangeResponder {
    pub body: Vec<u8>,
    pub delay: Option<std::time::Duration>,
}

impl RangeResponder {
    pub fn new(body: Vec<u8>) -> Self {
        Self { body, delay: None }
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl wiremock::Respond for RangeResponder {
    fn respond(&self, request: &wiremock::Request) -> wiremock::ResponseTemplate {
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_range);

        let template = match range {
            Some((start, end)) if end < self.body.len() => {
                let slice = self.body[start..=end].to_vec();
                wiremock::ResponseTemplate::new(206)
                    .set_body_bytes(slice)
                    .insert_header("Content-Length", (end - start + 1).to_string().as_str())
                    .insert_header(
                        "Content-Range",
                        format!("bytes {start}-{end}/{}", self.body.len()).as_str(),
                    )
            }
            _ => wiremock::ResponseTemplate::new(200)
                .set_body_bytes(self.body.clone())
                .insert_header("Content-Length", self.body.len().to_string().as_str()),
        };

        match self.delay {
            Some(delay) => template.set_delay(delay),
            None => template,
        }
    }
}

/// Range-aware responder that fails requests for one specific range with a
/// 500 the first `fail_count` times, then behaves like `RangeResponder`.
pub struct FlakyRangeResponder {
    pub body: Vec<u8>,
    pub flaky_start: usize,
    pub fail_count: u32,
    failures: Arc<AtomicU32>,
}

impl FlakyRangeResponder {
    pub fn new(body: Vec<u8>, flaky_start: usize, fail_count: u32) -> Self {
        Self {
            body,
            flaky_start,
            fail_count,
            failures: Arc::new(AtomicU32::new(0)),
        }
    }
}

impl wiremock::Respond for FlakyRangeResponder {
    fn respond(&self, request: &wiremock::Request) -> wiremock::ResponseTemplate {
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_range);

        if let Some((start, end)) = range {
            if start == self.flaky_start
                && self.failures.fetch_add(1, Ordering::SeqCst) < self.fail_count
            {
                return wiremock::ResponseTemplate::new(500);
            }
            if end < self.body.len() {
                let slice = self.body[start..=end].to_vec();
                return wiremock::ResponseTemplate::new(206)
                    .set_body_bytes(slice)
                    .insert_header("Content-Length", (end - start + 1).to_string().as_str())
                    .insert_header(
                        "Content-Range",
                        format!("bytes {start}-{end}/{}", self.body.len()).as_str(),
                    );
            }
        }

        wiremock::ResponseTemplate::new(200)
            .set_body_bytes(self.body.clone())
            .insert_header("Content-Length", self.body.len().to_string().as_str())
    }
}

/// Ignores `Range` entirely: always a 200 with the full body. Models the
/// servers that advertise nothing and serve everything.
pub struct RangeIgnoringResponder {
    pub body: Vec<u8>,
}

impl wiremock::Respond for RangeIgnoringResponder {
    fn respond(&self, _request: &wiremock::Request) -> wiremock::ResponseTemplate {
        wiremock::ResponseTemplate::new(200)
            .set_body_bytes(self.body.clone())
            .insert_header("Content-Length", self.body.len().to_string().as_str())
    }
}
