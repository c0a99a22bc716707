//! Dedup store interface.
//!
//! Provides the durable "already delivered" set the collectors consult and
//! the dispatcher commits to.

use async_trait::async_trait;

use crate::relay::error::StoreError;
use crate::relay::types::{DedupKey, DeliveryMeta, DeliveryStats, SweepOutcome};

/// Durable set of delivered item keys.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// True when `key` was already delivered.
    async fn has(&self, key: &DedupKey) -> Result<bool, StoreError>;

    /// Record a delivered key. Returns `true` only when a new row was written;
    /// an existing key is a no-op.
    async fn record(&self, key: &DedupKey, meta: &DeliveryMeta) -> Result<bool, StoreError>;

    /// Delete records delivered more than `max_age_days` ago. The caller
    /// unlinks the returned media files.
    async fn sweep(&self, max_age_days: u32) -> Result<SweepOutcome, StoreError>;

    /// Counters computed at call time.
    async fn stats(&self) -> Result<DeliveryStats, StoreError>;
}
