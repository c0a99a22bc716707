//! Core data types shared by collectors, the dispatcher and the stores.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Separator used in the persisted dedup key. Part of the storage contract.
pub const KEY_DELIMITER: char = ':';

/// External origin of candidate items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Telegram,
    Vk,
    Hh,
}

impl SourceKind {
    /// Fixed order in which the orchestration loop visits sources.
    pub const ALL: [SourceKind; 3] = [SourceKind::Telegram, SourceKind::Vk, SourceKind::Hh];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Telegram => "telegram",
            SourceKind::Vk => "vk",
            SourceKind::Hh => "hh",
        }
    }

    /// Header line prepended to every delivered message.
    pub fn headline(&self) -> &'static str {
        match self {
            SourceKind::Telegram => "📢 New order from Telegram",
            SourceKind::Vk => "💬 New order from VK",
            SourceKind::Hh => "💼 New vacancy on HH.ru",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "telegram" => Ok(SourceKind::Telegram),
            "vk" => Ok(SourceKind::Vk),
            "hh" => Ok(SourceKind::Hh),
            other => Err(format!("unknown source: {}", other)),
        }
    }
}

/// Global uniqueness key for delivery: `source:entity_id:item_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub source: SourceKind,
    pub entity_id: String,
    pub item_id: String,
}

impl DedupKey {
    pub fn new(source: SourceKind, entity_id: impl Into<String>, item_id: impl Into<String>) -> Self {
        Self {
            source,
            entity_id: entity_id.into(),
            item_id: item_id.into(),
        }
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}{}",
            self.source, KEY_DELIMITER, self.entity_id, KEY_DELIMITER, self.item_id
        )
    }
}

impl FromStr for DedupKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, KEY_DELIMITER);
        let source = parts.next().ok_or("empty dedup key")?.parse::<SourceKind>()?;
        let entity_id = parts.next().ok_or_else(|| format!("dedup key missing entity: {}", s))?;
        let item_id = parts.next().ok_or_else(|| format!("dedup key missing item: {}", s))?;
        Ok(DedupKey::new(source, entity_id, item_id))
    }
}

/// Downloadable media attached to a raw item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub url: String,
    /// File extension without the dot, e.g. `jpg`.
    pub extension: String,
}

/// An item as fetched from an external source, before normalization.
#[derive(Debug, Clone)]
pub struct RawItem {
    pub item_id: String,
    pub text: Option<String>,
    pub media: Option<MediaRef>,
    pub posted_at: DateTime<Utc>,
}

/// A filtered, not-yet-delivered item ready for fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub source: SourceKind,
    pub entity_id: String,
    pub item_id: String,
    pub text: String,
    pub media_path: Option<PathBuf>,
    pub produced_at: DateTime<Utc>,
}

impl Candidate {
    pub fn key(&self) -> DedupKey {
        DedupKey::new(self.source, self.entity_id.clone(), self.item_id.clone())
    }

    pub fn meta(&self) -> DeliveryMeta {
        DeliveryMeta {
            text: self.text.clone(),
            media_path: self.media_path.clone(),
            produced_at: self.produced_at,
        }
    }
}

/// Denormalized audit data stored alongside a delivered key.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryMeta {
    pub text: String,
    pub media_path: Option<PathBuf>,
    pub produced_at: DateTime<Utc>,
}

/// Durable row describing one delivered item.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRecord {
    pub key: DedupKey,
    pub meta: DeliveryMeta,
    pub delivered_at: DateTime<Utc>,
}

/// Result of a retention sweep. Media files are unlinked by the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepOutcome {
    pub removed: u64,
    pub media_paths: Vec<PathBuf>,
}

/// Aggregate counters over the delivery history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryStats {
    pub total: u64,
    pub last_24h: u64,
    pub by_source: BTreeMap<String, u64>,
}

/// Subscriber view consumed by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct Recipient {
    pub id: i64,
    pub orders_enabled: bool,
    pub opt_in: HashMap<SourceKind, bool>,
}

impl Recipient {
    /// True when the recipient wants items from `source` at all.
    pub fn accepts(&self, source: SourceKind) -> bool {
        self.orders_enabled && self.opt_in.get(&source).copied().unwrap_or(false)
    }
}

/// Fixed-width RFC 3339 form used for every persisted timestamp, so that
/// string comparison in SQL matches chronological order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}
