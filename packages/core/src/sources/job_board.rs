//! HH.ru job board collector.
//!
//! Walks search result pages newest first. Each unseen vacancy costs one
//! detail request, so the walk stops early: after `max_new` candidates, or
//! once `stale_run` already-delivered vacancies were seen back to back
//! (everything further down the listing is older still).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::relay::error::{CollectorError, TransportError};
use crate::relay::filter::should_keep;
use crate::relay::types::{Candidate, DedupKey, SourceKind};
use crate::sources::{CandidateBatch, CollectContext, SourceCollector};

/// Entity id of the job board in dedup keys and the rule file.
pub const BOARD_ID: &str = "hh";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Salary {
    pub from: Option<i64>,
    pub to: Option<i64>,
    pub currency: Option<String>,
}

impl Salary {
    /// Human readable range, e.g. `from 80000 to 120000 RUB`.
    pub fn display(salary: Option<&Salary>) -> String {
        let Some(salary) = salary else {
            return "Salary not specified".to_string();
        };
        let currency = match salary.currency.as_deref() {
            None | Some("RUR") => "RUB",
            Some(other) => other,
        };
        match (salary.from, salary.to) {
            (Some(from), Some(to)) => format!("from {} to {} {}", from, to, currency),
            (Some(from), None) => format!("from {} {}", from, currency),
            (None, Some(to)) => format!("up to {} {}", to, currency),
            (None, None) => "Salary not specified".to_string(),
        }
    }
}

/// Vacancy details as returned by the board.
#[derive(Debug, Clone, PartialEq)]
pub struct Vacancy {
    pub id: String,
    pub title: String,
    pub salary: Option<Salary>,
    pub employer: Option<String>,
    /// Raw HTML description.
    pub description: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
}

impl Vacancy {
    /// Text that is filtered and delivered for this vacancy.
    pub fn normalized_text(&self) -> String {
        format!(
            "🔹 {}\n💰 {}\n🏢 {}\n\n📝 {}\n\n🔗 {}",
            self.title,
            Salary::display(self.salary.as_ref()),
            self.employer.as_deref().unwrap_or("Company not specified"),
            clean_html(&self.description),
            self.url,
        )
    }
}

/// Strip tags from a vacancy description, keeping paragraph and list breaks
/// and turning `<strong>` into `*`.
pub fn clean_html(html: &str) -> String {
    let mut text = html.to_string();
    for tag in ["</p>", "<br />", "<br/>", "<br>", "</li>", "</ul>"] {
        text = text.replace(tag, "\n");
    }
    text = text.replace("<strong>", "*").replace("</strong>", "*");

    // a `<` without a closing `>` is plain text
    let mut stripped = String::with_capacity(text.len());
    let mut rest = text.as_str();
    while let Some(open) = rest.find('<') {
        stripped.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('>') {
            Some(close) if close > 0 => rest = &after[close + 1..],
            _ => {
                stripped.push('<');
                rest = after;
            }
        }
    }
    stripped.push_str(rest);

    let lines: Vec<&str> = stripped.lines().map(str::trim).collect();
    let mut out = String::with_capacity(stripped.len());
    let mut blank_run = false;
    for line in lines {
        if line.is_empty() {
            blank_run = true;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run { "\n\n" } else { "\n" });
        }
        out.push_str(line);
        blank_run = false;
    }
    out
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Search and detail access to the job board.
#[async_trait]
pub trait VacancyBoard: Send + Sync {
    /// Vacancy ids on result page `page` (0-based), newest first.
    async fn search_page(&self, page: u32, per_page: u32) -> Result<Vec<String>, TransportError>;

    async fn vacancy(&self, id: &str) -> Result<Vacancy, TransportError>;
}

/// Walk limits and pacing.
#[derive(Debug, Clone)]
pub struct JobBoardSettings {
    pub per_page: u32,
    pub max_pages: u32,
    pub max_new: usize,
    pub stale_run: usize,
    pub request_delay: Duration,
    pub page_delay: Duration,
}

impl Default for JobBoardSettings {
    fn default() -> Self {
        Self {
            per_page: 5,
            max_pages: 2,
            max_new: 5,
            stale_run: 3,
            request_delay: Duration::from_secs(1),
            page_delay: Duration::from_secs(2),
        }
    }
}

pub struct JobBoardCollector {
    board: Arc<dyn VacancyBoard>,
    settings: JobBoardSettings,
}

impl JobBoardCollector {
    pub fn new(board: Arc<dyn VacancyBoard>, settings: JobBoardSettings) -> Self {
        Self { board, settings }
    }
}

#[async_trait]
impl SourceCollector for JobBoardCollector {
    fn source(&self) -> SourceKind {
        SourceKind::Hh
    }

    async fn collect(&self, ctx: &CollectContext<'_>) -> Result<Vec<Candidate>, CollectorError> {
        let rule = ctx.rules.rule_for(SourceKind::Hh, BOARD_ID).await;
        if !ctx.is_pollable(SourceKind::Hh, BOARD_ID, &rule) {
            return Ok(Vec::new());
        }

        let mut batch = CandidateBatch::default();
        let mut stale = 0usize;
        let mut detail_requests = 0usize;

        'pages: for page in 0..self.settings.max_pages {
            if page > 0 {
                tokio::time::sleep(self.settings.page_delay).await;
            }

            let ids = match self.board.search_page(page, self.settings.per_page).await {
                Ok(ids) => ids,
                Err(err) if page == 0 => return Err(err.into()),
                Err(err) => {
                    tracing::warn!(source = "hh", page, "search page failed, stopping walk: {}", err);
                    break;
                }
            };
            if ids.is_empty() {
                tracing::debug!(source = "hh", page, "no more vacancies");
                break;
            }

            for id in ids {
                let key = DedupKey::new(SourceKind::Hh, BOARD_ID, id.as_str());
                if batch.contains(&key) {
                    continue;
                }

                match ctx.dedup.has(&key).await {
                    Ok(true) => {
                        stale += 1;
                        if stale >= self.settings.stale_run {
                            tracing::info!(source = "hh", "{} known vacancies in a row, stopping walk", stale);
                            break 'pages;
                        }
                        continue;
                    }
                    Ok(false) => stale = 0,
                    Err(err) => {
                        tracing::warn!(key = %key, "dedup lookup failed, skipping vacancy: {}", err);
                        continue;
                    }
                }

                if detail_requests > 0 {
                    tokio::time::sleep(self.settings.request_delay).await;
                }
                detail_requests += 1;

                let vacancy = match self.board.vacancy(&id).await {
                    Ok(vacancy) => vacancy,
                    Err(err) => {
                        tracing::warn!(source = "hh", item = %id, "vacancy fetch failed: {}", err);
                        continue;
                    }
                };

                let text = vacancy.normalized_text();
                if !should_keep(Some(&text), &rule) {
                    tracing::debug!(key = %key, "filtered out");
                    continue;
                }

                tracing::info!(source = "hh", item = %id, title = %vacancy.title, "new candidate");
                batch.push(Candidate {
                    source: SourceKind::Hh,
                    entity_id: BOARD_ID.to_string(),
                    item_id: id,
                    text,
                    media_path: None,
                    produced_at: vacancy.published_at,
                });

                if batch.len() >= self.settings.max_new {
                    tracing::info!(source = "hh", "reached {} new vacancies", batch.len());
                    break 'pages;
                }
            }
        }

        Ok(batch.into_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::relay::dedup::DedupStore;
    use crate::relay::dispatcher::fakes::FailingStore;
    use crate::relay::filter::FilterRule;
    use crate::relay::rules::{EntityRule, RuleSet, SourceSettings};
    use crate::relay::types::DeliveryMeta;
    use crate::store::MemoryDedupStore;

    struct FakeBoard {
        pages: Vec<Vec<String>>,
        fail_page: Option<u32>,
        detail_calls: Mutex<Vec<String>>,
    }

    impl FakeBoard {
        fn new(pages: &[&[&str]]) -> Self {
            Self {
                pages: pages
                    .iter()
                    .map(|p| p.iter().map(|id| id.to_string()).collect())
                    .collect(),
                fail_page: None,
                detail_calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl VacancyBoard for FakeBoard {
        async fn search_page(&self, page: u32, _per_page: u32) -> Result<Vec<String>, TransportError> {
            if self.fail_page == Some(page) {
                return Err(TransportError::ApiError { code: 503, message: "unavailable".into() });
            }
            Ok(self.pages.get(page as usize).cloned().unwrap_or_default())
        }

        async fn vacancy(&self, id: &str) -> Result<Vacancy, TransportError> {
            self.detail_calls.lock().unwrap().push(id.to_string());
            Ok(Vacancy {
                id: id.to_string(),
                title: format!("Video editor {}", id),
                salary: Some(Salary { from: Some(80000), to: None, currency: Some("RUR".into()) }),
                employer: Some("Studio".into()),
                description: "<p>Edit <strong>reels</strong></p>".into(),
                url: format!("https://hh.ru/vacancy/{}", id),
                published_at: Utc::now(),
            })
        }
    }

    fn instant_settings() -> JobBoardSettings {
        JobBoardSettings {
            request_delay: Duration::ZERO,
            page_delay: Duration::ZERO,
            ..JobBoardSettings::default()
        }
    }

    fn enabled_rules(rule: FilterRule) -> RuleSet {
        RuleSet::default().with_source(
            SourceKind::Hh,
            SourceSettings::enabled(vec![EntityRule::new(BOARD_ID, rule)]),
        )
    }

    async fn mark_delivered(dedup: &MemoryDedupStore, ids: &[&str]) {
        for id in ids {
            let meta = DeliveryMeta { text: String::new(), media_path: None, produced_at: Utc::now() };
            dedup.record(&DedupKey::new(SourceKind::Hh, BOARD_ID, *id), &meta).await.unwrap();
        }
    }

    // ---- text ----

    #[test]
    fn salary_formats() {
        let rub = |from, to| Salary { from, to, currency: Some("RUR".into()) };
        assert_eq!(Salary::display(Some(&rub(Some(1), Some(2)))), "from 1 to 2 RUB");
        assert_eq!(Salary::display(Some(&rub(Some(1), None))), "from 1 RUB");
        assert_eq!(Salary::display(Some(&rub(None, Some(2)))), "up to 2 RUB");
        assert_eq!(Salary::display(Some(&rub(None, None))), "Salary not specified");
        assert_eq!(Salary::display(None), "Salary not specified");
        let usd = Salary { from: Some(500), to: None, currency: Some("USD".into()) };
        assert_eq!(Salary::display(Some(&usd)), "from 500 USD");
    }

    #[test]
    fn clean_html_keeps_structure() {
        let html = "<p>We need:</p><ul><li>Premiere</li><li><strong>After Effects</strong></li></ul><p></p><p>Tom &amp; Jerry</p>";
        assert_eq!(clean_html(html), "We need:\nPremiere\n*After Effects*\n\nTom & Jerry");
        assert_eq!(clean_html(""), "");
    }

    #[test]
    fn clean_html_keeps_unclosed_angle_bracket() {
        assert_eq!(clean_html("<p>budget < 50k, start asap</p>"), "budget < 50k, start asap");
        assert_eq!(clean_html("3 < 5 <em>really</em>"), "3 really");
    }

    #[test]
    fn normalized_text_lists_all_fields() {
        let vacancy = Vacancy {
            id: "1".into(),
            title: "Editor".into(),
            salary: None,
            employer: None,
            description: "<p>Cut videos</p>".into(),
            url: "https://hh.ru/vacancy/1".into(),
            published_at: Utc::now(),
        };
        assert_eq!(
            vacancy.normalized_text(),
            "🔹 Editor\n💰 Salary not specified\n🏢 Company not specified\n\n📝 Cut videos\n\n🔗 https://hh.ru/vacancy/1"
        );
    }

    // ---- walk ----

    #[tokio::test]
    async fn stops_after_max_new_candidates() {
        let board = Arc::new(FakeBoard::new(&[&["1", "2", "3", "4", "5"], &["6", "7", "8", "9", "10"]]));
        let collector = JobBoardCollector::new(board.clone(), instant_settings());
        let rules = enabled_rules(FilterRule::permissive());
        let dedup = MemoryDedupStore::new();
        let ctx = CollectContext::new(&rules, &dedup, chrono::Duration::seconds(240));

        let candidates = collector.collect(&ctx).await.unwrap();
        assert_eq!(candidates.len(), 5);
        assert_eq!(board.detail_calls.lock().unwrap().len(), 5);
        assert_eq!(candidates[0].key().to_string(), "hh:hh:1");
    }

    #[tokio::test]
    async fn stops_after_stale_run() {
        let board = Arc::new(FakeBoard::new(&[&["1", "2", "3", "4", "5"], &["6"]]));
        let collector = JobBoardCollector::new(board.clone(), instant_settings());
        let rules = enabled_rules(FilterRule::permissive());
        let dedup = MemoryDedupStore::new();
        mark_delivered(&dedup, &["2", "3", "4"]).await;
        let ctx = CollectContext::new(&rules, &dedup, chrono::Duration::seconds(240));

        let candidates = collector.collect(&ctx).await.unwrap();
        let ids: Vec<&str> = candidates.iter().map(|c| c.item_id.as_str()).collect();
        assert_eq!(ids, vec!["1"]);
        assert_eq!(*board.detail_calls.lock().unwrap(), vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn fresh_vacancy_resets_stale_run() {
        let board = Arc::new(FakeBoard::new(&[&["1", "2", "3", "4", "5"]]));
        let collector = JobBoardCollector::new(board, instant_settings());
        let rules = enabled_rules(FilterRule::permissive());
        let dedup = MemoryDedupStore::new();
        mark_delivered(&dedup, &["1", "2", "4"]).await;
        let ctx = CollectContext::new(&rules, &dedup, chrono::Duration::seconds(240));

        let ids: Vec<String> = collector
            .collect(&ctx)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.item_id)
            .collect();
        assert_eq!(ids, vec!["3".to_string(), "5".to_string()]);
    }

    #[tokio::test]
    async fn filter_applies_to_normalized_text() {
        let board = Arc::new(FakeBoard::new(&[&["1"]]));
        let collector = JobBoardCollector::new(board, instant_settings());
        let dedup = MemoryDedupStore::new();

        let keep = enabled_rules(FilterRule::permissive().with_include(["reels"]));
        let ctx = CollectContext::new(&keep, &dedup, chrono::Duration::seconds(240));
        assert_eq!(collector.collect(&ctx).await.unwrap().len(), 1);

        let drop = enabled_rules(FilterRule::permissive().with_exclude(["studio"]));
        let ctx = CollectContext::new(&drop, &dedup, chrono::Duration::seconds(240));
        assert!(collector.collect(&ctx).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lookup_fault_skips_vacancy() {
        let board = Arc::new(FakeBoard::new(&[&["1", "2"]]));
        let collector = JobBoardCollector::new(board.clone(), instant_settings());
        let rules = enabled_rules(FilterRule::permissive());
        let dedup = FailingStore { fail_has: true, ..Default::default() };
        let ctx = CollectContext::new(&rules, &dedup, chrono::Duration::seconds(240));

        assert!(collector.collect(&ctx).await.unwrap().is_empty());
        assert!(board.detail_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn board_in_grace_period_is_not_searched() {
        let now = Utc::now();
        let board = Arc::new(FakeBoard::new(&[&["1"]]));
        let collector = JobBoardCollector::new(board.clone(), instant_settings());
        let rules = enabled_rules(FilterRule::permissive().registered(now - chrono::Duration::seconds(100)));
        let dedup = MemoryDedupStore::new();

        let ctx = CollectContext::new(&rules, &dedup, chrono::Duration::seconds(240)).at(now);
        assert!(collector.collect(&ctx).await.unwrap().is_empty());
        assert!(board.detail_calls.lock().unwrap().is_empty());

        let ctx = CollectContext::new(&rules, &dedup, chrono::Duration::seconds(240))
            .at(now + chrono::Duration::seconds(200));
        assert_eq!(collector.collect(&ctx).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn first_page_failure_aborts_source() {
        let mut board = FakeBoard::new(&[&["1"]]);
        board.fail_page = Some(0);
        let collector = JobBoardCollector::new(Arc::new(board), instant_settings());
        let rules = enabled_rules(FilterRule::permissive());
        let dedup = MemoryDedupStore::new();
        let ctx = CollectContext::new(&rules, &dedup, chrono::Duration::seconds(240));

        assert!(collector.collect(&ctx).await.is_err());
    }

    #[tokio::test]
    async fn later_page_failure_keeps_collected_items() {
        let mut board = FakeBoard::new(&[&["1", "2"], &["3"]]);
        board.fail_page = Some(1);
        let collector = JobBoardCollector::new(Arc::new(board), instant_settings());
        let rules = enabled_rules(FilterRule::permissive());
        let dedup = MemoryDedupStore::new();
        let ctx = CollectContext::new(&rules, &dedup, chrono::Duration::seconds(240));

        assert_eq!(collector.collect(&ctx).await.unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn requests_are_paced() {
        let board = Arc::new(FakeBoard::new(&[&["1", "2"], &["3"]]));
        let collector = JobBoardCollector::new(board, JobBoardSettings::default());
        let rules = enabled_rules(FilterRule::permissive());
        let dedup = MemoryDedupStore::new();
        let ctx = CollectContext::new(&rules, &dedup, chrono::Duration::seconds(240));

        let started = tokio::time::Instant::now();
        collector.collect(&ctx).await.unwrap();
        // two detail pauses plus one page pause
        assert!(started.elapsed() >= Duration::from_secs(4));
    }
}
