//! Source collectors
//!
//! A collector turns one external source into a batch of new candidates:
//! entity list from the rule provider, grace and keyword checks, a dedup
//! pre-check, then media download for whatever was admitted. Transports sit
//! behind the traits declared next to each collector so the pipeline never
//! depends on a concrete HTTP client.

pub mod group_network;
pub mod job_board;
pub mod telegram;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::relay::dedup::DedupStore;
use crate::relay::error::{CollectorError, TransportError};
use crate::relay::filter::{should_keep, FilterRule};
use crate::relay::rules::{EntityRule, RuleProvider};
use crate::relay::types::{Candidate, DedupKey, MediaRef, RawItem, SourceKind};

pub use group_network::{GroupNetworkCollector, WallFeed};
pub use job_board::{JobBoardCollector, JobBoardSettings, Salary, Vacancy, VacancyBoard};
pub use telegram::{ChannelFeed, TelegramCollector};

/// Default time a newly added entity stays muted.
pub const DEFAULT_GRACE_PERIOD_SECONDS: i64 = 240;

/// One external origin of candidates.
#[async_trait]
pub trait SourceCollector: Send + Sync {
    fn source(&self) -> SourceKind;

    /// Collect this cycle's new candidates. Per-entity faults are logged and
    /// skipped; an `Err` means the whole source is unusable this cycle.
    async fn collect(&self, ctx: &CollectContext<'_>) -> Result<Vec<Candidate>, CollectorError>;
}

/// Local storage for downloaded media.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Download `media` for the item identified by `key`.
    async fn fetch(&self, key: &DedupKey, media: &MediaRef) -> Result<PathBuf, TransportError>;

    /// Delete a stored file. A file that is already gone is not an error.
    async fn discard(&self, path: &Path) -> Result<(), TransportError>;
}

/// Everything a collector needs from the rest of the pipeline for one cycle.
pub struct CollectContext<'a> {
    pub rules: &'a dyn RuleProvider,
    pub dedup: &'a dyn DedupStore,
    pub grace: Duration,
    pub now: DateTime<Utc>,
}

impl<'a> CollectContext<'a> {
    pub fn new(rules: &'a dyn RuleProvider, dedup: &'a dyn DedupStore, grace: Duration) -> Self {
        Self {
            rules,
            dedup,
            grace,
            now: Utc::now(),
        }
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Active entities of `source` whose grace window has elapsed.
    pub async fn pollable_entities(&self, source: SourceKind) -> Vec<EntityRule> {
        self.rules
            .source_settings(source)
            .await
            .entities
            .into_iter()
            .filter(|entity| self.is_pollable(source, &entity.entity_id, &entity.rule))
            .collect()
    }

    pub fn is_pollable(&self, source: SourceKind, entity_id: &str, rule: &FilterRule) -> bool {
        if !rule.active {
            tracing::debug!(source = %source, entity = entity_id, "entity inactive, skipping");
            return false;
        }
        if rule.in_grace_period(self.now, self.grace) {
            tracing::info!(source = %source, entity = entity_id, "entity added recently, skipping until grace period ends");
            return false;
        }
        true
    }

    /// `true` only when the store positively says `key` is unseen. A store
    /// fault skips the item for this cycle.
    pub async fn is_new(&self, key: &DedupKey) -> bool {
        match self.dedup.has(key).await {
            Ok(seen) => !seen,
            Err(err) => {
                tracing::warn!(key = %key, "dedup lookup failed, skipping item: {}", err);
                false
            }
        }
    }

    /// Run the keyword filter and dedup check on `item`; on success download
    /// its media and build the candidate.
    pub async fn admit(
        &self,
        key: DedupKey,
        rule: &FilterRule,
        item: RawItem,
        media: Option<&dyn MediaStore>,
    ) -> Option<Candidate> {
        if !should_keep(item.text.as_deref(), rule) {
            tracing::debug!(key = %key, "filtered out");
            return None;
        }
        if !self.is_new(&key).await {
            tracing::debug!(key = %key, "already delivered");
            return None;
        }

        let media_path = match (item.media.as_ref(), media) {
            (Some(media_ref), Some(store)) => match store.fetch(&key, media_ref).await {
                Ok(path) => Some(path),
                Err(err) => {
                    tracing::warn!(key = %key, "media download failed, keeping text only: {}", err);
                    None
                }
            },
            _ => None,
        };

        Some(Candidate {
            source: key.source,
            entity_id: key.entity_id,
            item_id: key.item_id,
            text: item.text.unwrap_or_default(),
            media_path,
            produced_at: item.posted_at,
        })
    }
}

/// Candidates of one collect call, unique by dedup key, in feed order.
#[derive(Debug, Default)]
pub struct CandidateBatch {
    seen: HashSet<DedupKey>,
    items: Vec<Candidate>,
}

impl CandidateBatch {
    pub fn contains(&self, key: &DedupKey) -> bool {
        self.seen.contains(key)
    }

    /// Returns `false` when a candidate with the same key is already queued.
    pub fn push(&mut self, candidate: Candidate) -> bool {
        if !self.seen.insert(candidate.key()) {
            return false;
        }
        self.items.push(candidate);
        true
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_vec(self) -> Vec<Candidate> {
        self.items
    }
}


#[cfg(test)]
mod tests {
    use super::fakes::*;
    use super::*;
    use crate::relay::dispatcher::fakes::FailingStore;
    use crate::relay::rules::{RuleSet, SourceSettings};
    use crate::relay::types::DeliveryMeta;
    use crate::store::MemoryDedupStore;

    fn make_meta() -> DeliveryMeta {
        DeliveryMeta {
            text: String::new(),
            media_path: None,
            produced_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn pollable_entities_skip_inactive_and_grace() {
        let now = Utc::now();
        let rules = RuleSet::default().with_source(
            SourceKind::Telegram,
            SourceSettings::enabled(vec![
                EntityRule::new("a", FilterRule::permissive()),
                EntityRule::new("b", FilterRule { active: false, ..FilterRule::permissive() }),
                EntityRule::new("c", FilterRule::permissive().registered(now - Duration::seconds(60))),
                EntityRule::new("d", FilterRule::permissive().registered(now - Duration::seconds(600))),
            ]),
        );
        let dedup = MemoryDedupStore::new();
        let ctx = CollectContext::new(&rules, &dedup, Duration::seconds(240)).at(now);

        let ids: Vec<String> = ctx
            .pollable_entities(SourceKind::Telegram)
            .await
            .into_iter()
            .map(|e| e.entity_id)
            .collect();
        assert_eq!(ids, vec!["a".to_string(), "d".to_string()]);
    }

    #[tokio::test]
    async fn admit_downloads_media_only_for_kept_items() {
        let rules = RuleSet::default();
        let dedup = MemoryDedupStore::new();
        let ctx = CollectContext::new(&rules, &dedup, Duration::seconds(240));
        let media = RecordingMedia::default();
        let rule = FilterRule::permissive().with_include(["video"]);

        let mut kept = make_item("1", "video editing gig");
        kept.media = Some(MediaRef { url: "https://cdn/1.jpg".into(), extension: "jpg".into() });
        let mut dropped = make_item("2", "selling shoes");
        dropped.media = Some(MediaRef { url: "https://cdn/2.jpg".into(), extension: "jpg".into() });

        let key = DedupKey::new(SourceKind::Vk, "-1", "1");
        let candidate = ctx.admit(key, &rule, kept, Some(&media as &dyn MediaStore)).await.unwrap();
        assert_eq!(candidate.media_path, Some(PathBuf::from("media/1.jpg")));

        let key = DedupKey::new(SourceKind::Vk, "-1", "2");
        assert!(ctx.admit(key, &rule, dropped, Some(&media as &dyn MediaStore)).await.is_none());

        assert_eq!(*media.fetched.lock().unwrap(), vec!["https://cdn/1.jpg".to_string()]);
    }

    #[tokio::test]
    async fn admit_skips_known_items() {
        let rules = RuleSet::default();
        let dedup = MemoryDedupStore::new();
        let key = DedupKey::new(SourceKind::Telegram, "-1", "5");
        dedup.record(&key, &make_meta()).await.unwrap();
        let ctx = CollectContext::new(&rules, &dedup, Duration::seconds(240));

        let admitted = ctx
            .admit(key, &FilterRule::permissive(), make_item("5", "anything"), None)
            .await;
        assert!(admitted.is_none());
    }

    #[tokio::test]
    async fn lookup_fault_skips_item() {
        let rules = RuleSet::default();
        let dedup = FailingStore { fail_has: true, ..Default::default() };
        let ctx = CollectContext::new(&rules, &dedup, Duration::seconds(240));
        let media = RecordingMedia::default();

        let mut item = make_item("8", "video editor needed");
        item.media = Some(MediaRef { url: "https://cdn/8.jpg".into(), extension: "jpg".into() });

        let admitted = ctx
            .admit(DedupKey::new(SourceKind::Vk, "-1", "8"), &FilterRule::permissive(), item, Some(&media as &dyn MediaStore))
            .await;
        assert!(admitted.is_none());
        assert!(media.fetched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_media_download_keeps_text() {
        let rules = RuleSet::default();
        let dedup = MemoryDedupStore::new();
        let ctx = CollectContext::new(&rules, &dedup, Duration::seconds(240));
        let media = RecordingMedia { fail: true, ..Default::default() };

        let mut item = make_item("1", "text");
        item.media = Some(MediaRef { url: "https://cdn/1.jpg".into(), extension: "jpg".into() });

        let candidate = ctx
            .admit(DedupKey::new(SourceKind::Telegram, "-1", "1"), &FilterRule::permissive(), item, Some(&media as &dyn MediaStore))
            .await
            .unwrap();
        assert_eq!(candidate.text, "text");
        assert!(candidate.media_path.is_none());
    }

    #[test]
    fn batch_drops_duplicate_keys() {
        let make = |item_id: &str| Candidate {
            source: SourceKind::Vk,
            entity_id: "-1".into(),
            item_id: item_id.into(),
            text: "t".into(),
            media_path: None,
            produced_at: Utc::now(),
        };
        let mut batch = CandidateBatch::default();
        assert!(batch.push(make("1")));
        assert!(!batch.push(make("1")));
        assert!(batch.push(make("2")));
        assert_eq!(batch.len(), 2);
    }
}
