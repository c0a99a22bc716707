//! Telegram Bot API client.
//!
//! [`TelegramBotClient`] sends messages and media to subscribers and is the
//! production [`DeliveryChannel`]. [`BotChannelFeed`] reads channel posts the
//! bot receives as a channel member and implements [`ChannelFeed`].

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;

use crate::relay::dispatcher::DeliveryChannel;
use crate::relay::error::{DeliveryError, TransportError};
use crate::relay::types::{MediaRef, RawItem};
use crate::services::{http_client, unix_to_utc};
use crate::sources::ChannelFeed;

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Bot API limit for message text, in characters.
pub const MAX_TEXT_CHARS: usize = 4096;
/// Bot API limit for media captions, in characters.
pub const MAX_CAPTION_CHARS: usize = 1024;

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<i64>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

impl<T> ApiResponse<T> {
    fn into_result(self) -> Result<T, TransportError> {
        if self.ok {
            return self
                .result
                .ok_or_else(|| TransportError::format("Bot API returned ok without result"));
        }
        let message = self.description.unwrap_or_else(|| "unknown Bot API error".into());
        match self.error_code {
            Some(401) => Err(TransportError::Unauthorized { message }),
            Some(429) => Err(TransportError::RateLimited {
                retry_after: Duration::from_secs(
                    self.parameters.and_then(|p| p.retry_after).unwrap_or(1),
                ),
            }),
            code => Err(TransportError::ApiError {
                code: code.unwrap_or_default(),
                message,
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub channel_post: Option<ChannelMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelMessage {
    pub message_id: i64,
    pub chat: Chat,
    pub date: i64,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub photo: Option<Vec<PhotoSize>>,
    pub video: Option<FileRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileRef {
    pub file_id: String,
}

#[derive(Debug, Deserialize)]
struct TelegramFile {
    file_path: Option<String>,
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Bot API method and multipart field used to upload `path`.
fn upload_method(path: &Path) -> (&'static str, &'static str) {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" | "png" | "webp" => ("sendPhoto", "photo"),
        "mp4" | "mov" | "m4v" => ("sendVideo", "video"),
        _ => ("sendDocument", "document"),
    }
}

#[derive(Clone)]
pub struct TelegramBotClient {
    base_url: String,
    token: String,
    http: Client,
}

impl TelegramBotClient {
    pub fn new(token: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        Ok(Self {
            base_url: DEFAULT_API_URL.to_string(),
            token: token.into(),
            http: http_client(timeout)?,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    /// Public download URL for a `file_path` returned by `getFile`.
    pub fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.base_url, self.token, file_path)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, TransportError> {
        let response = request.send().await?;
        let status = response.status();
        let body: ApiResponse<T> = response.json().await.map_err(|err| {
            TransportError::format(format!(
                "Bot API returned HTTP {} with unreadable body: {}",
                status,
                err.without_url()
            ))
        })?;
        body.into_result()
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TransportError> {
        let request = self.http.post(self.method_url("sendMessage")).json(&json!({
            "chat_id": chat_id,
            "text": truncate_chars(text, MAX_TEXT_CHARS),
        }));
        self.call::<serde_json::Value>(request).await.map(|_| ())
    }

    /// Upload `path` with `caption`, choosing photo, video or document by
    /// extension.
    pub async fn send_media(&self, chat_id: i64, caption: &str, path: &Path) -> Result<(), TransportError> {
        let (method, field) = upload_method(path);
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();

        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", truncate_chars(caption, MAX_CAPTION_CHARS).to_string())
            .part(field, Part::bytes(bytes).file_name(file_name));

        let request = self.http.post(self.method_url(method)).multipart(form);
        self.call::<serde_json::Value>(request).await.map(|_| ())
    }

    /// Pending updates starting at `offset`, channel posts only.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, TransportError> {
        let request = self.http.post(self.method_url("getUpdates")).json(&json!({
            "offset": offset,
            "timeout": 0,
            "allowed_updates": ["channel_post"],
        }));
        self.call(request).await
    }

    /// Resolve a `file_id` to a download URL.
    pub async fn file_download_url(&self, file_id: &str) -> Result<String, TransportError> {
        let request = self
            .http
            .post(self.method_url("getFile"))
            .json(&json!({ "file_id": file_id }));
        let file: TelegramFile = self.call(request).await?;
        let file_path = file
            .file_path
            .ok_or_else(|| TransportError::format("getFile returned no file_path"))?;
        Ok(self.file_url(&file_path))
    }
}

#[async_trait]
impl DeliveryChannel for TelegramBotClient {
    async fn deliver(
        &self,
        recipient_id: i64,
        text: &str,
        media: Option<&Path>,
    ) -> Result<(), DeliveryError> {
        match media {
            Some(path) => self.send_media(recipient_id, text, path).await?,
            None => self.send_message(recipient_id, text).await?,
        }
        Ok(())
    }
}

/// Channel feed built from the bot's update stream.
///
/// Each lookup drains pending updates and keeps only the newest post per
/// chat. Posts are indexed by chat id and, when the channel has one, by
/// `@username`.
pub struct BotChannelFeed {
    client: TelegramBotClient,
    state: Mutex<FeedState>,
}

#[derive(Default)]
struct FeedState {
    offset: i64,
    latest: HashMap<String, ChannelMessage>,
}

impl BotChannelFeed {
    pub fn new(client: TelegramBotClient) -> Self {
        Self {
            client,
            state: Mutex::new(FeedState::default()),
        }
    }

    async fn refresh(&self, state: &mut FeedState) -> Result<(), TransportError> {
        let updates = self.client.get_updates(state.offset).await?;
        for update in updates {
            state.offset = state.offset.max(update.update_id + 1);
            let Some(post) = update.channel_post else {
                continue;
            };
            let mut keys = vec![post.chat.id.to_string()];
            if let Some(username) = &post.chat.username {
                keys.push(format!("@{}", username));
            }
            for key in keys {
                let newer = state
                    .latest
                    .get(&key)
                    .map_or(true, |known| known.message_id < post.message_id);
                if newer {
                    state.latest.insert(key, post.clone());
                }
            }
        }
        Ok(())
    }

    async fn to_raw_item(&self, post: ChannelMessage) -> RawItem {
        let file_id = post
            .photo
            .as_ref()
            .and_then(|sizes| sizes.iter().max_by_key(|s| u64::from(s.width) * u64::from(s.height)))
            .map(|s| (s.file_id.clone(), "jpg"))
            .or_else(|| post.video.as_ref().map(|v| (v.file_id.clone(), "mp4")));

        let media = match file_id {
            Some((file_id, extension)) => match self.client.file_download_url(&file_id).await {
                Ok(url) => Some(MediaRef {
                    url,
                    extension: extension.to_string(),
                }),
                Err(err) => {
                    tracing::warn!(entity = post.chat.id, item = post.message_id, "cannot resolve media: {}", err);
                    None
                }
            },
            None => None,
        };

        RawItem {
            item_id: post.message_id.to_string(),
            text: post.text.or(post.caption).filter(|t| !t.trim().is_empty()),
            media,
            posted_at: unix_to_utc(post.date),
        }
    }
}

#[async_trait]
impl ChannelFeed for BotChannelFeed {
    async fn latest_post(&self, channel_id: &str) -> Result<Option<RawItem>, TransportError> {
        let post = {
            let mut state = self.state.lock().await;
            self.refresh(&mut state).await?;
            state.latest.get(channel_id).cloned()
        };
        match post {
            Some(post) => Ok(Some(self.to_raw_item(post).await)),
            None => Ok(None),
        }
    }
}
