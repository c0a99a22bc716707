//! In-memory dedup store.
//!
//! `MemoryDedupStore` keeps delivery records in a `HashMap` keyed by the
//! storage form of the dedup key. Nothing survives a restart; it backs tests
//! and ephemeral runs.
//!
//! The map sits behind a Tokio `RwLock` so the store can be shared between
//! the orchestration loop and the Axum handlers as `Arc<dyn DedupStore>`.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::relay::dedup::DedupStore;
use crate::relay::error::StoreError;
use crate::relay::types::{DedupKey, DeliveryMeta, DeliveryRecord, DeliveryStats, SweepOutcome};

/// Non-durable [`DedupStore`].
#[derive(Debug, Default)]
pub struct MemoryDedupStore {
    records: RwLock<HashMap<String, DeliveryRecord>>,
}

impl MemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert with an explicit delivery time. Same idempotence as `record`.
    pub async fn record_at(
        &self,
        key: &DedupKey,
        meta: &DeliveryMeta,
        delivered_at: DateTime<Utc>,
    ) -> bool {
        let mut records = self.records.write().await;
        let storage_key = key.to_string();
        if records.contains_key(&storage_key) {
            return false;
        }
        records.insert(
            storage_key,
            DeliveryRecord {
                key: key.clone(),
                meta: meta.clone(),
                delivered_at,
            },
        );
        true
    }

    /// Number of records currently held.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// `true` when nothing was delivered yet.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn has(&self, key: &DedupKey) -> Result<bool, StoreError> {
        Ok(self.records.read().await.contains_key(&key.to_string()))
    }

    async fn record(&self, key: &DedupKey, meta: &DeliveryMeta) -> Result<bool, StoreError> {
        Ok(self.record_at(key, meta, Utc::now()).await)
    }

    async fn sweep(&self, max_age_days: u32) -> Result<SweepOutcome, StoreError> {
        let cutoff = Utc::now() - Duration::days(i64::from(max_age_days));
        let mut records = self.records.write().await;
        let mut outcome = SweepOutcome::default();

        records.retain(|_, record| {
            if record.delivered_at < cutoff {
                outcome.removed += 1;
                if let Some(path) = &record.meta.media_path {
                    outcome.media_paths.push(path.clone());
                }
                false
            } else {
                true
            }
        });

        Ok(outcome)
    }

    async fn stats(&self) -> Result<DeliveryStats, StoreError> {
        let since = Utc::now() - Duration::hours(24);
        let records = self.records.read().await;
        let mut by_source = BTreeMap::new();
        let mut last_24h = 0;

        for record in records.values() {
            *by_source.entry(record.key.source.to_string()).or_insert(0) += 1;
            if record.delivered_at >= since {
                last_24h += 1;
            }
        }

        Ok(DeliveryStats {
            total: records.len() as u64,
            last_24h,
            by_source,
        })
    }
}
