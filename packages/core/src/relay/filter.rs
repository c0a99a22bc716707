//! Keyword filter applied to every raw item before it can become a candidate.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Per-entity keyword rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRule {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    /// When the entity was onboarded. Items are ignored until the grace
    /// window has elapsed since this moment.
    #[serde(default, rename = "added_at", alias = "registered_at")]
    pub registered_at: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

impl Default for FilterRule {
    fn default() -> Self {
        Self::permissive()
    }
}

impl FilterRule {
    /// Exclude-only rule with no keywords: keeps every non-empty text.
    pub fn permissive() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            active: true,
            registered_at: None,
        }
    }

    pub fn with_include<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = words.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_exclude<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = words.into_iter().map(Into::into).collect();
        self
    }

    pub fn registered(mut self, at: DateTime<Utc>) -> Self {
        self.registered_at = Some(at);
        self
    }

    /// True while the entity is younger than `grace`.
    pub fn in_grace_period(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        match self.registered_at {
            Some(registered_at) => now - registered_at < grace,
            None => false,
        }
    }
}

/// Decide whether `text` passes `rule`.
///
/// Case-insensitive substring matching. Empty text is rejected, any exclude
/// keyword rejects, and a non-empty include list requires at least one hit.
pub fn should_keep(text: Option<&str>, rule: &FilterRule) -> bool {
    let text = match text {
        Some(t) if !t.trim().is_empty() => t.to_lowercase(),
        _ => return false,
    };

    let contains = |word: &String| {
        let word = word.trim();
        !word.is_empty() && text.contains(&word.to_lowercase())
    };

    if let Some(word) = rule.exclude.iter().find(|w| contains(w)) {
        tracing::debug!(keyword = %word, "rejected by exclude keyword");
        return false;
    }

    let includes: Vec<&String> = rule.include.iter().filter(|w| !w.trim().is_empty()).collect();
    if includes.is_empty() {
        return true;
    }

    match includes.into_iter().find(|w| contains(w)) {
        Some(word) => {
            tracing::debug!(keyword = %word, "matched include keyword");
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_rejected() {
        assert!(!should_keep(Some(""), &FilterRule::permissive()));
        assert!(!should_keep(None, &FilterRule::permissive()));
        assert!(!should_keep(Some("   \n"), &FilterRule::permissive()));
    }

    #[test]
    fn exclude_keyword_rejects() {
        let rule = FilterRule::permissive().with_exclude(["shoes"]);
        assert!(!should_keep(Some("buy shoes"), &rule));
    }

    #[test]
    fn include_keyword_keeps() {
        let rule = FilterRule::permissive().with_include(["video"]);
        assert!(should_keep(Some("need a video editor"), &rule));
    }

    #[test]
    fn missing_include_keyword_rejects() {
        let rule = FilterRule::permissive().with_include(["video"]);
        assert!(!should_keep(Some("random text"), &rule));
    }

    #[test]
    fn no_keywords_keeps_anything() {
        assert!(should_keep(Some("anything"), &FilterRule::permissive()));
    }

    #[test]
    fn matching_ignores_case() {
        let rule = FilterRule::permissive().with_include(["Монтаж"]);
        assert!(should_keep(Some("Ищу специалиста по МОНТАЖУ"), &rule));
    }

    #[test]
    fn exclude_wins_over_include() {
        let rule = FilterRule::permissive()
            .with_include(["video"])
            .with_exclude(["free"]);
        assert!(!should_keep(Some("free video editing"), &rule));
    }

    #[test]
    fn blank_keywords_are_ignored() {
        let rule = FilterRule::permissive().with_include([""]).with_exclude(["  "]);
        assert!(should_keep(Some("plain text"), &rule));
    }

    #[test]
    fn grace_period_covers_recent_registration() {
        let now = Utc::now();
        let rule = FilterRule::permissive().registered(now - Duration::seconds(30));
        assert!(rule.in_grace_period(now, Duration::seconds(240)));
        assert!(!rule.in_grace_period(now, Duration::seconds(10)));
        assert!(!FilterRule::permissive().in_grace_period(now, Duration::seconds(240)));
    }
}
