//! HH.ru vacancies API client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::relay::error::TransportError;
use crate::services::http_client;
use crate::sources::{Salary, Vacancy, VacancyBoard};

pub const DEFAULT_API_URL: &str = "https://api.hh.ru";

/// Search parameters that stay fixed between requests.
#[derive(Debug, Clone)]
pub struct VacancyQuery {
    pub text: String,
    pub area: String,
    /// Only vacancies published within this many days.
    pub period_days: u32,
}

impl Default for VacancyQuery {
    fn default() -> Self {
        Self {
            text: "видеомонтажер".to_string(),
            area: "1".to_string(),
            period_days: 1,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: String,
}

#[derive(Debug, Deserialize)]
struct VacancyDetail {
    id: String,
    name: Option<String>,
    salary: Option<Salary>,
    employer: Option<Employer>,
    description: Option<String>,
    alternate_url: Option<String>,
    published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Employer {
    name: Option<String>,
}

/// HH timestamps look like `2024-05-01T10:00:00+0300`.
fn parse_published_at(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

impl From<VacancyDetail> for Vacancy {
    fn from(detail: VacancyDetail) -> Self {
        let published_at = detail
            .published_at
            .as_deref()
            .and_then(parse_published_at)
            .unwrap_or_else(Utc::now);
        let url = detail
            .alternate_url
            .unwrap_or_else(|| format!("https://hh.ru/vacancy/{}", detail.id));

        Vacancy {
            id: detail.id,
            title: detail.name.unwrap_or_else(|| "Untitled vacancy".to_string()),
            salary: detail.salary,
            employer: detail.employer.and_then(|e| e.name),
            description: detail.description.unwrap_or_default(),
            url,
            published_at,
        }
    }
}

#[derive(Clone)]
pub struct HhClient {
    base_url: String,
    query: VacancyQuery,
    http: Client,
}

impl HhClient {
    pub fn new(query: VacancyQuery, timeout: Duration) -> Result<Self, TransportError> {
        Ok(Self {
            base_url: DEFAULT_API_URL.to_string(),
            query,
            http: http_client(timeout)?,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, TransportError> {
        let response = request
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(response.json::<T>().await?),
            StatusCode::TOO_MANY_REQUESTS => Err(TransportError::RateLimited {
                retry_after: Duration::from_secs(1),
            }),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(TransportError::Unauthorized {
                message: format!("HH returned HTTP {}", response.status()),
            }),
            status => Err(TransportError::ApiError {
                code: i64::from(status.as_u16()),
                message: format!("HH returned HTTP {}", status),
            }),
        }
    }
}

#[async_trait]
impl VacancyBoard for HhClient {
    async fn search_page(&self, page: u32, per_page: u32) -> Result<Vec<String>, TransportError> {
        let request = self.http.get(format!("{}/vacancies", self.base_url)).query(&[
            ("text", self.query.text.clone()),
            ("area", self.query.area.clone()),
            ("order_by", "publication_time".to_string()),
            ("period", self.query.period_days.to_string()),
            ("per_page", per_page.to_string()),
            ("page", page.to_string()),
        ]);
        let page: SearchPage = self.get_json(request).await?;
        Ok(page.items.into_iter().map(|item| item.id).collect())
    }

    async fn vacancy(&self, id: &str) -> Result<Vacancy, TransportError> {
        let request = self.http.get(format!("{}/vacancies/{}", self.base_url, id));
        let detail: VacancyDetail = self.get_json(request).await?;
        Ok(detail.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use wiremock::{
        matchers::{method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    async fn make_client() -> (HhClient, MockServer) {
        let server = MockServer::start().await;
        let client = HhClient::new(VacancyQuery::default(), Duration::from_secs(5))
            .unwrap()
            .with_base_url(server.uri());
        (client, server)
    }

    #[test]
    fn published_at_accepts_offset_without_colon() {
        let ts = parse_published_at("2024-05-01T10:00:00+0300").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 5, 1, 7, 0, 0).unwrap());
        assert!(parse_published_at("yesterday").is_none());
    }

    #[tokio::test]
    async fn search_page_sends_query_and_returns_ids() {
        let (client, server) = make_client().await;
        Mock::given(method("GET"))
            .and(path("/vacancies"))
            .and(query_param("text", "видеомонтажер"))
            .and(query_param("order_by", "publication_time"))
            .and(query_param("per_page", "5"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{ "id": "101", "name": "A" }, { "id": "102", "name": "B" }],
                "found": 2, "pages": 1, "page": 1
            })))
            .mount(&server)
            .await;

        let ids = client.search_page(1, 5).await.unwrap();
        assert_eq!(ids, vec!["101".to_string(), "102".to_string()]);
    }

    #[tokio::test]
    async fn vacancy_detail_is_mapped() {
        let (client, server) = make_client().await;
        Mock::given(method("GET"))
            .and(path("/vacancies/101"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "101",
                "name": "Видеомонтажер",
                "salary": { "from": 80000, "to": 120000, "currency": "RUR", "gross": false },
                "employer": { "id": "1", "name": "Studio" },
                "description": "<p>Монтаж роликов</p>",
                "alternate_url": "https://hh.ru/vacancy/101",
                "published_at": "2024-05-01T10:00:00+0300"
            })))
            .mount(&server)
            .await;

        let vacancy = client.vacancy("101").await.unwrap();
        assert_eq!(vacancy.title, "Видеомонтажер");
        assert_eq!(vacancy.employer.as_deref(), Some("Studio"));
        assert_eq!(Salary::display(vacancy.salary.as_ref()), "from 80000 to 120000 RUB");
        assert_eq!(vacancy.url, "https://hh.ru/vacancy/101");
    }

    #[tokio::test]
    async fn server_error_is_reported_with_status() {
        let (client, server) = make_client().await;
        Mock::given(method("GET"))
            .and(path("/vacancies"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        match client.search_page(0, 5).await {
            Err(TransportError::ApiError { code, .. }) => assert_eq!(code, 503),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
