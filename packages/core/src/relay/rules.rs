//! Rule provider backed by a JSON file.
//!
//! The file is owned by the configuration front-end and re-read on every
//! lookup so edits take effect on the next cycle without a restart. A
//! missing or malformed file never fails a cycle: the last snapshot that
//! parsed is served instead, and an entity without rules is permissive.
//!
//! ```json
//! {
//!   "sources": {
//!     "telegram": {
//!       "enabled": true,
//!       "entities": [
//!         { "id": "-1001234567890", "include": ["монтаж"], "exclude": [],
//!           "active": true, "added_at": "2024-05-01T10:00:00Z" }
//!       ]
//!     },
//!     "hh": { "enabled": true, "entities": [{ "id": "hh", "exclude": ["стажер"] }] }
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::relay::error::RuleError;
use crate::relay::filter::FilterRule;
use crate::relay::types::SourceKind;

/// Keyword rules for one entity (channel id, group name or board id).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EntityRule {
    #[serde(rename = "id")]
    pub entity_id: String,
    #[serde(flatten)]
    pub rule: FilterRule,
}

impl EntityRule {
    pub fn new(entity_id: impl Into<String>, rule: FilterRule) -> Self {
        Self {
            entity_id: entity_id.into(),
            rule,
        }
    }
}

/// One source section of the rule file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SourceSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub entities: Vec<EntityRule>,
}

impl SourceSettings {
    pub fn enabled(entities: Vec<EntityRule>) -> Self {
        Self {
            enabled: true,
            entities,
        }
    }

    pub fn rule_for(&self, entity_id: &str) -> Option<&FilterRule> {
        self.entities
            .iter()
            .find(|e| e.entity_id == entity_id)
            .map(|e| &e.rule)
    }
}

/// Parsed rule file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub sources: HashMap<SourceKind, SourceSettings>,
}

impl RuleSet {
    pub fn with_source(mut self, source: SourceKind, settings: SourceSettings) -> Self {
        self.sources.insert(source, settings);
        self
    }

    pub fn settings(&self, source: SourceKind) -> SourceSettings {
        self.sources.get(&source).cloned().unwrap_or_default()
    }
}

/// Read access to per-source and per-entity rules.
#[async_trait]
pub trait RuleProvider: Send + Sync {
    /// Whether `source` runs at all and which entities it covers.
    async fn source_settings(&self, source: SourceKind) -> SourceSettings;

    /// Rules for one entity. Unknown entities get a permissive rule.
    async fn rule_for(&self, source: SourceKind, entity_id: &str) -> FilterRule {
        self.source_settings(source)
            .await
            .rule_for(entity_id)
            .cloned()
            .unwrap_or_else(|| {
                tracing::debug!(source = %source, entity = entity_id, "no rules for entity, keeping everything");
                FilterRule::permissive()
            })
    }
}

/// A fixed rule set. Used by `--once` runs with inline rules and by tests.
#[async_trait]
impl RuleProvider for RuleSet {
    async fn source_settings(&self, source: SourceKind) -> SourceSettings {
        self.settings(source)
    }
}

/// File-backed [`RuleProvider`] that keeps the last good snapshot.
pub struct RuleBook {
    path: PathBuf,
    last_good: RwLock<Option<RuleSet>>,
}

impl RuleBook {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_good: RwLock::new(None),
        }
    }

    /// Parse the rule file without touching the cached snapshot.
    pub async fn load(&self) -> Result<RuleSet, RuleError> {
        let display = self.path.display().to_string();
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| RuleError::Read {
                path: display.clone(),
                source,
            })?;

        serde_json::from_str(&raw).map_err(|source| RuleError::Malformed {
            path: display,
            source,
        })
    }

    /// Current rules: a fresh read when it succeeds, otherwise the last good
    /// snapshot, otherwise an empty set.
    pub async fn snapshot(&self) -> RuleSet {
        match self.load().await {
            Ok(rules) => {
                *self.last_good.write().await = Some(rules.clone());
                rules
            }
            Err(err) => {
                let cached = self.last_good.read().await.clone();
                match cached {
                    Some(rules) => {
                        tracing::warn!("{}; using last good rules", err);
                        rules
                    }
                    None => {
                        tracing::warn!("{}; no rules loaded yet, all sources disabled", err);
                        RuleSet::default()
                    }
                }
            }
        }
    }
}

#[async_trait]
impl RuleProvider for RuleBook {
    async fn source_settings(&self, source: SourceKind) -> SourceSettings {
        self.snapshot().await.settings(source)
    }
}
