//! VK group wall collector.
//!
//! Groups are configured by short name; the numeric owner id returned by the
//! API is what goes into the dedup key, so renaming a group does not cause
//! redelivery. Resolved ids are cached for the life of the collector.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::relay::error::{CollectorError, TransportError};
use crate::relay::types::{Candidate, DedupKey, RawItem, SourceKind};
use crate::sources::{CandidateBatch, CollectContext, MediaStore, SourceCollector};

/// Default number of wall posts read per group and cycle.
pub const DEFAULT_POSTS_PER_ENTITY: usize = 1;

/// Read access to group walls.
#[async_trait]
pub trait WallFeed: Send + Sync {
    /// Numeric owner id (negative for groups) of `group`, `None` if unknown.
    async fn resolve_owner(&self, group: &str) -> Result<Option<i64>, TransportError>;

    /// Newest `count` posts of the wall, newest first.
    async fn recent_posts(&self, owner_id: i64, count: usize) -> Result<Vec<RawItem>, TransportError>;
}

pub struct GroupNetworkCollector {
    feed: Arc<dyn WallFeed>,
    media: Arc<dyn MediaStore>,
    posts_per_entity: usize,
    owners: Mutex<HashMap<String, i64>>,
}

impl GroupNetworkCollector {
    pub fn new(feed: Arc<dyn WallFeed>, media: Arc<dyn MediaStore>) -> Self {
        Self {
            feed,
            media,
            posts_per_entity: DEFAULT_POSTS_PER_ENTITY,
            owners: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_posts_per_entity(mut self, posts_per_entity: usize) -> Self {
        self.posts_per_entity = posts_per_entity.max(1);
        self
    }

    async fn owner_id(&self, group: &str) -> Result<Option<i64>, TransportError> {
        if let Some(id) = self.owners.lock().await.get(group) {
            return Ok(Some(*id));
        }
        let resolved = self.feed.resolve_owner(group.trim_start_matches('-')).await?;
        if let Some(id) = resolved {
            self.owners.lock().await.insert(group.to_string(), id);
        }
        Ok(resolved)
    }
}

#[async_trait]
impl SourceCollector for GroupNetworkCollector {
    fn source(&self) -> SourceKind {
        SourceKind::Vk
    }

    async fn collect(&self, ctx: &CollectContext<'_>) -> Result<Vec<Candidate>, CollectorError> {
        let mut batch = CandidateBatch::default();

        for entity in ctx.pollable_entities(SourceKind::Vk).await {
            let group = entity.entity_id.as_str();
            let owner_id = match self.owner_id(group).await {
                Ok(Some(id)) => id,
                Ok(None) => {
                    tracing::warn!(source = "vk", entity = group, "group not found, skipping");
                    continue;
                }
                Err(err) if err.is_fatal() => return Err(err.into()),
                Err(err) => {
                    tracing::warn!(source = "vk", entity = group, "cannot resolve group: {}", err);
                    continue;
                }
            };

            let posts = match self.feed.recent_posts(owner_id, self.posts_per_entity).await {
                Ok(posts) => posts,
                Err(err) if err.is_fatal() => return Err(err.into()),
                Err(err) => {
                    tracing::warn!(source = "vk", entity = group, "wall fetch failed, skipping group: {}", err);
                    continue;
                }
            };

            for post in posts.into_iter().take(self.posts_per_entity) {
                let key = DedupKey::new(SourceKind::Vk, owner_id.to_string(), post.item_id.clone());
                if batch.contains(&key) {
                    continue;
                }
                if let Some(candidate) = ctx
                    .admit(key, &entity.rule, post, Some(self.media.as_ref()))
                    .await
                {
                    tracing::info!(source = "vk", entity = group, item = %candidate.item_id, "new candidate");
                    batch.push(candidate);
                }
            }
        }

        Ok(batch.into_vec())
    }
}
