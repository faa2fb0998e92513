// Licensed under the MIT License
// Copyright (c) 2025 Sijo Saju <sijo.saju@outlook.com>

//! Progress reporting
//!
//! Lightweight progress info plus an indicatif-backed console bar that
//! plugs into the job's progress hook.

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::job::ProgressHook;

/// Progress information
#[derive(Debug, Clone, Serialize)]
pub struct ProgressInfo {
    /// Total file size in bytes
    pub total_size: u64,

    /// Downloaded size in bytes
    pub downloaded_size: u64,

    /// Download percentage (0.0 to 100.0)
    pub percentage: f64,

    /// Download speed in bytes per second
    pub speed: f64,

    /// Estimated time remaining
    pub eta: Option<Duration>,
}

impl ProgressInfo {
    pub fn new(total_size: u64, downloaded_size: u64, speed: f64) -> Self {
        let percentage = if total_size > 0 {
            downloaded_size as f64 / total_size as f64 * 100.0
        } else {
            0.0
        };
        let eta = if speed > 0.0 && downloaded_size < total_size {
            Some(Duration::from_secs_f64(
                (total_size - downloaded_size) as f64 / speed,
            ))
        } else {
            None
        };
        Self {
            total_size,
            downloaded_size,
            percentage,
            speed,
            eta,
        }
    }

    /// Get a human-readable speed string
    pub fn speed_human(&self) -> String {
        if self.speed >= 1024.0 * 1024.0 * 1024.0 {
            format!("{:.2} GB/s", self.speed / 1024.0 / 1024.0 / 1024.0)
        } else if self.speed >= 1024.0 * 1024.0 {
            format!("{:.2} MB/s", self.speed / 1024.0 / 1024.0)
        } else if self.speed >= 1024.0 {
            format!("{:.2} KB/s", self.speed / 1024.0)
        } else {
            format!("{:.0} B/s", self.speed)
        }
    }

    /// Get a human-readable ETA string
    pub fn eta_human(&self) -> String {
        match self.eta {
            Some(eta) => {
                let total_seconds = eta.as_secs();
                let hours = total_seconds / 3600;
                let minutes = (total_seconds % 3600) / 60;
                let seconds = total_seconds % 60;

                if hours > 0 {
                    format!("{}h {}m {}s", hours, minutes, seconds)
                } else if minutes > 0 {
                    format!("{}m {}s", minutes, seconds)
                } else {
                    format!("{}s", seconds)
                }
            }
            None => "Unknown".to_string(),
        }
    }
}

/// Console progress bar wired to the job's progress hook
#[derive(Debug)]
pub struct ConsoleProgressBar {
    bar: ProgressBar,
}

impl ConsoleProgressBar {
    pub fn new(total_size: u64) -> Self {
        let bar = ProgressBar::new(total_size);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
                .unwrap()
                .progress_chars("#>-"),
        );
        Self { bar }
    }

    /// Hook that keeps the bar in sync with the byte counter. The bar
    /// length is corrected on the first call once the real size is known.
    pub fn hook(&self) -> ProgressHook {
        let bar = self.bar.clone();
        Arc::new(move |downloaded, total| {
            if total > 0 && bar.length() != Some(total) {
                bar.set_length(total);
            }
            bar.set_position(downloaded);
        })
    }

    pub fn finish(&self, message: &'static str) {
        self.bar.finish_with_message(message);
    }

    pub fn abandon(&self, message: &'static str) {
        self.bar.abandon_with_message(message);
    }
}
