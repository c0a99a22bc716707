//! HTTP clients for the external APIs the relay talks to.

pub mod hh;
pub mod media;
pub mod telegram;
pub mod vk;

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;

use crate::relay::error::TransportError;

/// Default per-request timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared client builder so every service applies the same timeout.
pub fn http_client(timeout: Duration) -> Result<Client, TransportError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("order-relay/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|err| TransportError::network(format!("cannot build HTTP client: {}", err)))
}

/// Convert a Unix timestamp, falling back to now for out-of-range values.
pub fn unix_to_utc(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now)
}
