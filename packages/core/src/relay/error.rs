//! Error types for the relay pipeline

use std::time::Duration;

use thiserror::Error;

/// Failures talking to an external source or delivery API.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("API error {code}: {message}")]
    ApiError { code: i64, message: String },

    #[error("Data format error: {message}")]
    FormatError { message: String },

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Media IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    pub fn format(message: impl Into<String>) -> Self {
        Self::FormatError { message: message.into() }
    }

    /// Faults that no retry on another entity can fix.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

/// Request URLs carry the bot token or the VK access token, so they never
/// reach the message.
impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let err = err.without_url();
        if err.is_decode() {
            Self::FormatError { message: err.to_string() }
        } else {
            Self::NetworkError { message: err.to_string() }
        }
    }
}

/// Failure that aborts a whole source for the current cycle.
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("Source unavailable: {0}")]
    Transport(#[from] TransportError),
}

/// Dedup store faults.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Per-recipient delivery failure.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Delivery transport failed: {0}")]
    Transport(#[from] TransportError),
}

/// Recipient directory faults.
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Recipient directory error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors the dispatcher surfaces to the orchestration loop.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Cannot resolve recipients: {0}")]
    Directory(#[from] DirectoryError),
}

/// Faults that end an orchestration cycle early; the loop backs off.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Retention sweep failed: {0}")]
    Sweep(#[from] StoreError),
}

/// Rule file faults. Always recoverable: callers fall back to the last good
/// snapshot or to permissive rules.
#[derive(Error, Debug)]
pub enum RuleError {
    #[error("Cannot read rule file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Malformed rule file {path}: {source}")]
    Malformed {
        path: String,
        source: serde_json::Error,
    },
}
