// Licensed under the MIT License
// Copyright (c) 2025 Sijo Saju <sijo.saju@outlook.com>

use thiserror::Error;

/// Main error type for qstream operations
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// IO-related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing errors
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// JSON parsing errors
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Probe failures (both HEAD and one-byte GET failed, or size unusable)
    #[error("Probe failed: {message}")]
    Probe { message: String },

    /// Download errors
    #[error("Download failed: {message}")]
    Download { message: String },

    /// Chunk-level transport failures
    #[error("Chunk {chunk_id} failed: {message}")]
    Chunk { chunk_id: usize, message: String },

    /// Timeout errors
    #[error("Operation timed out: {message}")]
    Timeout { message: String },

    /// HTTP status code errors (non-retryable client errors like 404)
    #[error("HTTP {status_code}: {message}")]
    HttpStatus {
        status_code: u16,
        message: String,
        url: String,
    },

    /// Server errors (5xx, potentially retryable)
    #[error("Server error {status_code}: {message}")]
    ServerError {
        status_code: u16,
        message: String,
        url: String,
    },

    /// Job was cancelled; not a failure in itself
    #[error("Download cancelled")]
    Cancelled,

    /// Generic errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DownloadError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new probe error
    pub fn probe<S: Into<String>>(message: S) -> Self {
        Self::Probe {
            message: message.into(),
        }
    }

    /// Create a new download error
    pub fn download<S: Into<String>>(message: S) -> Self {
        Self::Download {
            message: message.into(),
        }
    }

    /// Create a new chunk error
    pub fn chunk<S: Into<String>>(chunk_id: usize, message: S) -> Self {
        Self::Chunk {
            chunk_id,
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create an error from an HTTP status code
    pub fn from_status_code<S: Into<String>>(status_code: u16, url: S) -> Self {
        let url_str = url.into();
        let message = match status_code {
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            416 => "Range Not Satisfiable",
            429 => "Too Many Requests",
            500 => "Internal Server Error",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            _ => "Unknown Error",
        };

        if status_code >= 500 {
            Self::ServerError {
                status_code,
                message: message.to_string(),
                url: url_str,
            }
        } else {
            Self::HttpStatus {
                status_code,
                message: message.to_string(),
                url: url_str,
            }
        }
    }

    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            // Network errors are generally retryable
            DownloadError::Network(_) => true,
            // Timeouts are retryable
            DownloadError::Timeout { .. } => true,
            // IO errors might be transient
            DownloadError::Io(_) => true,
            // Server errors (5xx) are retryable
            DownloadError::ServerError { .. } => true,
            // Chunk failures carry transport causes and are retryable in static mode
            DownloadError::Chunk { .. } => true,
            // HTTP client errors (4xx) are NOT retryable - the resource doesn't exist
            DownloadError::HttpStatus { .. } => false,
            // All other errors are not retryable
            _ => false,
        }
    }

    /// Get HTTP status code if this is an HTTP error
    pub fn status_code(&self) -> Option<u16> {
        match self {
            DownloadError::HttpStatus { status_code, .. } => Some(*status_code),
            DownloadError::ServerError { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    /// Get the error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            DownloadError::Network(_) => "network",
            DownloadError::Io(_) => "io",
            DownloadError::InvalidUrl(_) => "url",
            DownloadError::Json(_) => "json",
            DownloadError::Config { .. } => "config",
            DownloadError::Probe { .. } => "probe",
            DownloadError::Download { .. } => "download",
            DownloadError::Chunk { .. } => "chunk",
            DownloadError::Timeout { .. } => "timeout",
            DownloadError::HttpStatus { .. } => "http_status",
            DownloadError::ServerError { .. } => "server_error",
            DownloadError::Cancelled => "cancelled",
            DownloadError::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for qstream operations
pub type Result<T> = std::result::Result<T, DownloadError>;
