//! Media download into a local directory.
//!
//! Files are named after the dedup key so a retried item overwrites its own
//! earlier partial download instead of leaving orphans behind.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;

use crate::relay::error::TransportError;
use crate::relay::types::{DedupKey, MediaRef};
use crate::services::http_client;
use crate::sources::MediaStore;

pub const DEFAULT_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct FileMediaStore {
    dir: PathBuf,
    http: Client,
    attempts: u32,
    retry_delay: Duration,
}

impl FileMediaStore {
    pub fn new(dir: impl Into<PathBuf>, timeout: Duration) -> Result<Self, TransportError> {
        Ok(Self {
            dir: dir.into(),
            http: http_client(timeout)?,
            attempts: DEFAULT_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    pub fn with_retry(mut self, attempts: u32, retry_delay: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    /// Local path for `key`, e.g. `media/vk_-123_77.jpg`.
    pub fn path_for(&self, key: &DedupKey, extension: &str) -> PathBuf {
        let sanitize = |part: &str| -> String {
            part.chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
                .collect()
        };
        self.dir.join(format!(
            "{}_{}_{}.{}",
            key.source,
            sanitize(&key.entity_id),
            sanitize(&key.item_id),
            sanitize(extension)
        ))
    }

    async fn download_once(&self, url: &str, path: &Path) -> Result<(), TransportError> {
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(TransportError::ApiError {
                code: i64::from(response.status().as_u16()),
                message: format!("media download returned HTTP {}", response.status()),
            });
        }
        let bytes = response.bytes().await?;
        tokio::fs::write(path, &bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl MediaStore for FileMediaStore {
    async fn fetch(&self, key: &DedupKey, media: &MediaRef) -> Result<PathBuf, TransportError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key, &media.extension);

        let mut delay = self.retry_delay;
        let mut attempt = 1;
        loop {
            match self.download_once(&media.url, &path).await {
                Ok(()) => {
                    tracing::debug!(key = %key, path = %path.display(), "media saved");
                    return Ok(path);
                }
                Err(err) if attempt < self.attempts => {
                    let jitter_ms = {
                        let max = (delay.as_millis() as u64) / 4;
                        rand::thread_rng().gen_range(0..=max)
                    };
                    tracing::warn!(
                        key = %key,
                        "media download attempt {}/{} failed: {}",
                        attempt,
                        self.attempts,
                        err
                    );
                    tokio::time::sleep(delay + Duration::from_millis(jitter_ms)).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn discard(&self, path: &Path) -> Result<(), TransportError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
