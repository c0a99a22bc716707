//! Telegram channel collector: one latest post per configured channel.

use std::sync::Arc;

use async_trait::async_trait;

use crate::relay::error::{CollectorError, TransportError};
use crate::relay::types::{Candidate, DedupKey, RawItem, SourceKind};
use crate::sources::{CandidateBatch, CollectContext, MediaStore, SourceCollector};

/// Read access to channel posts.
#[async_trait]
pub trait ChannelFeed: Send + Sync {
    /// Most recent post of `channel_id`, if any is known.
    async fn latest_post(&self, channel_id: &str) -> Result<Option<RawItem>, TransportError>;
}

pub struct TelegramCollector {
    feed: Arc<dyn ChannelFeed>,
    media: Arc<dyn MediaStore>,
}

impl TelegramCollector {
    pub fn new(feed: Arc<dyn ChannelFeed>, media: Arc<dyn MediaStore>) -> Self {
        Self { feed, media }
    }
}

#[async_trait]
impl SourceCollector for TelegramCollector {
    fn source(&self) -> SourceKind {
        SourceKind::Telegram
    }

    async fn collect(&self, ctx: &CollectContext<'_>) -> Result<Vec<Candidate>, CollectorError> {
        let mut batch = CandidateBatch::default();

        for entity in ctx.pollable_entities(SourceKind::Telegram).await {
            let channel = entity.entity_id.as_str();
            let post = match self.feed.latest_post(channel).await {
                Ok(Some(post)) => post,
                Ok(None) => {
                    tracing::debug!(source = "telegram", entity = channel, "no posts yet");
                    continue;
                }
                Err(err) if err.is_fatal() => return Err(err.into()),
                Err(err) => {
                    tracing::warn!(source = "telegram", entity = channel, "fetch failed, skipping channel: {}", err);
                    continue;
                }
            };

            let key = DedupKey::new(SourceKind::Telegram, channel, post.item_id.clone());
            if batch.contains(&key) {
                continue;
            }
            if let Some(candidate) = ctx
                .admit(key, &entity.rule, post, Some(self.media.as_ref()))
                .await
            {
                tracing::info!(source = "telegram", entity = channel, item = %candidate.item_id, "new candidate");
                batch.push(candidate);
            }
        }

        Ok(batch.into_vec())
    }
}
