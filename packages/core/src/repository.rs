//! SQLite persistence for delivery records and the subscriber view.
//!
//! [`DeliveryRepository`] is the production [`DedupStore`]: the dispatcher
//! calls [`DedupStore::record`] after a successful fan-out and the
//! orchestration loop calls [`DedupStore::sweep`] once per cycle to keep the
//! table bounded. [`SubscriberDirectory`] reads the `subscribers` table the
//! account front-end maintains.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (see
//! [`format_timestamp`]) so range predicates compare correctly as text.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::relay::dedup::DedupStore;
use crate::relay::error::{DirectoryError, StoreError};
use crate::relay::recipients::RecipientDirectory;
use crate::relay::types::{
    format_timestamp, DedupKey, DeliveryMeta, DeliveryStats, Recipient, SourceKind, SweepOutcome,
};

/// Durable dedup store over the `deliveries` table.
#[derive(Clone)]
pub struct DeliveryRepository {
    pool: SqlitePool,
}

impl DeliveryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a delivery record with an explicit delivery time.
    /// Returns `true` if a new row was written, `false` if the key exists.
    pub async fn record_at(
        &self,
        key: &DedupKey,
        meta: &DeliveryMeta,
        delivered_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let media_path = meta
            .media_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned());

        let result = sqlx::query(
            "INSERT OR IGNORE INTO deliveries
             (dedup_key, source, entity_id, item_id, text, media_path, produced_at, delivered_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(key.to_string())
        .bind(key.source.as_str())
        .bind(&key.entity_id)
        .bind(&key.item_id)
        .bind(&meta.text)
        .bind(media_path)
        .bind(format_timestamp(meta.produced_at))
        .bind(format_timestamp(delivered_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Delete records delivered before `cutoff` and collect their media paths.
    pub async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<SweepOutcome, StoreError> {
        let cutoff_str = format_timestamp(cutoff);
        let mut tx = self.pool.begin().await?;

        let media_paths: Vec<PathBuf> = sqlx::query(
            "SELECT media_path FROM deliveries
             WHERE delivered_at < ? AND media_path IS NOT NULL",
        )
        .bind(&cutoff_str)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .filter_map(|row| row.try_get::<String, _>("media_path").ok())
        .map(PathBuf::from)
        .collect();

        let result = sqlx::query("DELETE FROM deliveries WHERE delivered_at < ?")
            .bind(&cutoff_str)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(SweepOutcome {
            removed: result.rows_affected(),
            media_paths,
        })
    }
}

#[async_trait]
impl DedupStore for DeliveryRepository {
    async fn has(&self, key: &DedupKey) -> Result<bool, StoreError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM deliveries WHERE dedup_key = ?")
            .bind(key.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn record(&self, key: &DedupKey, meta: &DeliveryMeta) -> Result<bool, StoreError> {
        self.record_at(key, meta, Utc::now()).await
    }

    async fn sweep(&self, max_age_days: u32) -> Result<SweepOutcome, StoreError> {
        self.prune_older_than(Utc::now() - Duration::days(i64::from(max_age_days)))
            .await
    }

    async fn stats(&self) -> Result<DeliveryStats, StoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM deliveries")
            .fetch_one(&self.pool)
            .await?;

        let since = format_timestamp(Utc::now() - Duration::hours(24));
        let last_24h: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM deliveries WHERE delivered_at >= ?")
            .bind(&since)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query("SELECT source, COUNT(*) AS n FROM deliveries GROUP BY source")
            .fetch_all(&self.pool)
            .await?;

        let by_source: BTreeMap<String, u64> = rows
            .into_iter()
            .filter_map(|row| {
                let source: String = row.try_get("source").ok()?;
                let n: i64 = row.try_get("n").ok()?;
                Some((source, n as u64))
            })
            .collect();

        Ok(DeliveryStats {
            total: total as u64,
            last_24h: last_24h as u64,
            by_source,
        })
    }
}

/// Reader over the `subscribers` table.
#[derive(Clone)]
pub struct SubscriberDirectory {
    pool: SqlitePool,
}

impl SubscriberDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Accepts RFC 3339 and SQLite's `datetime()` output (assumed UTC).
fn parse_subscription_end(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[async_trait]
impl RecipientDirectory for SubscriberDirectory {
    async fn list_eligible_recipients(&self) -> Result<Vec<Recipient>, DirectoryError> {
        let rows = sqlx::query(
            "SELECT user_id, subscription_end, orders_enabled,
                    opt_in_telegram, opt_in_vk, opt_in_hh
             FROM subscribers
             WHERE subscription_active = 1
             ORDER BY user_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let now = Utc::now();
        let recipients = rows
            .into_iter()
            .filter_map(|row| {
                let id: i64 = row.try_get("user_id").ok()?;
                let end: Option<String> = row.try_get("subscription_end").ok()?;

                if let Some(raw) = end {
                    match parse_subscription_end(&raw) {
                        Some(end) if end > now => {}
                        Some(_) => return None,
                        None => {
                            tracing::warn!(recipient = id, "unreadable subscription_end {:?}, skipping", raw);
                            return None;
                        }
                    }
                }

                let flag = |column: &str| row.try_get::<i64, _>(column).map(|v| v != 0).unwrap_or(false);
                let opt_in: HashMap<SourceKind, bool> = [
                    (SourceKind::Telegram, flag("opt_in_telegram")),
                    (SourceKind::Vk, flag("opt_in_vk")),
                    (SourceKind::Hh, flag("opt_in_hh")),
                ]
                .into_iter()
                .collect();

                Some(Recipient {
                    id,
                    orders_enabled: flag("orders_enabled"),
                    opt_in,
                })
            })
            .collect();

        Ok(recipients)
    }
}
