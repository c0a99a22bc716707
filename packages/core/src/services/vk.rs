//! VK API client for public group walls.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::relay::error::TransportError;
use crate::relay::types::{MediaRef, RawItem};
use crate::services::{http_client, unix_to_utc};
use crate::sources::WallFeed;

pub const DEFAULT_API_URL: &str = "https://api.vk.com/method";
pub const API_VERSION: &str = "5.131";

/// VK error codes with a specific meaning for the relay.
const ERROR_AUTH_FAILED: i64 = 5;
const ERROR_TOO_MANY_REQUESTS: i64 = 6;
const ERROR_INVALID_PARAM: i64 = 100;

#[derive(Debug, Deserialize)]
struct VkEnvelope<T> {
    response: Option<T>,
    error: Option<VkError>,
}

#[derive(Debug, Deserialize)]
struct VkError {
    error_code: i64,
    error_msg: String,
}

#[derive(Debug, Deserialize)]
struct Group {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct WallPage {
    items: Vec<WallPost>,
}

#[derive(Debug, Deserialize)]
struct WallPost {
    id: i64,
    date: i64,
    #[serde(default)]
    text: String,
    #[serde(default)]
    is_pinned: Option<i64>,
    #[serde(default)]
    attachments: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
struct Attachment {
    #[serde(rename = "type")]
    kind: String,
    photo: Option<Photo>,
}

#[derive(Debug, Deserialize)]
struct Photo {
    sizes: Vec<PhotoSize>,
}

#[derive(Debug, Deserialize)]
struct PhotoSize {
    url: String,
    width: u64,
    height: u64,
}

impl WallPost {
    fn largest_photo(&self) -> Option<&PhotoSize> {
        self.attachments
            .iter()
            .filter(|a| a.kind == "photo")
            .filter_map(|a| a.photo.as_ref())
            .flat_map(|p| p.sizes.iter())
            .max_by_key(|s| s.width * s.height)
    }

    fn into_raw_item(self) -> RawItem {
        let media = self.largest_photo().map(|size| MediaRef {
            url: size.url.clone(),
            extension: "jpg".to_string(),
        });
        let text = Some(self.text).filter(|t| !t.trim().is_empty());
        RawItem {
            item_id: self.id.to_string(),
            text,
            media,
            posted_at: unix_to_utc(self.date),
        }
    }
}

#[derive(Clone)]
pub struct VkClient {
    base_url: String,
    access_token: String,
    http: Client,
}

impl VkClient {
    pub fn new(access_token: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        Ok(Self {
            base_url: DEFAULT_API_URL.to_string(),
            access_token: access_token.into(),
            http: http_client(timeout)?,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<T, TransportError> {
        let url = format!("{}/{}", self.base_url, method);
        let response = self
            .http
            .get(&url)
            .query(params)
            .query(&[("access_token", self.access_token.as_str()), ("v", API_VERSION)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransportError::network(format!(
                "VK returned HTTP {}",
                response.status()
            )));
        }

        let envelope: VkEnvelope<T> = response.json().await?;
        if let Some(err) = envelope.error {
            return Err(match err.error_code {
                ERROR_AUTH_FAILED => TransportError::Unauthorized { message: err.error_msg },
                ERROR_TOO_MANY_REQUESTS => TransportError::RateLimited {
                    retry_after: Duration::from_secs(1),
                },
                code => TransportError::ApiError {
                    code,
                    message: err.error_msg,
                },
            });
        }
        envelope
            .response
            .ok_or_else(|| TransportError::format(format!("{} returned neither response nor error", method)))
    }
}

#[async_trait]
impl WallFeed for VkClient {
    async fn resolve_owner(&self, group: &str) -> Result<Option<i64>, TransportError> {
        let result = self
            .call::<Vec<Group>>("groups.getById", &[("group_id", group.to_string())])
            .await;
        match result {
            Ok(groups) => Ok(groups.first().map(|g| -g.id)),
            Err(TransportError::ApiError { code: ERROR_INVALID_PARAM, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn recent_posts(&self, owner_id: i64, count: usize) -> Result<Vec<RawItem>, TransportError> {
        // One extra post so a pinned post does not hide the newest one.
        let page: WallPage = self
            .call(
                "wall.get",
                &[
                    ("owner_id", owner_id.to_string()),
                    ("count", (count + 1).to_string()),
                ],
            )
            .await?;

        Ok(page
            .items
            .into_iter()
            .filter(|post| post.is_pinned != Some(1))
            .take(count)
            .map(WallPost::into_raw_item)
            .collect())
    }
}
