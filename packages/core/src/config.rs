use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::cli::Cli;
use crate::scheduler::LoopSettings;
use crate::services::hh::VacancyQuery;

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub rules_path: PathBuf,
    pub media_dir: PathBuf,
    pub cycle_interval_seconds: u64,
    pub error_backoff_seconds: u64,
    pub grace_period_seconds: i64,
    pub retention_days: u32,
    pub send_delay_ms: u64,
    pub fetch_timeout_seconds: u64,
    pub api_bind: String,
    pub hh_search_text: String,
    pub hh_area: String,
    pub telegram_bot_token: String,
    pub vk_service_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let telegram_bot_token = lookup("TELEGRAM_BOT_TOKEN")
            .filter(|v| !v.trim().is_empty())
            .ok_or("TELEGRAM_BOT_TOKEN is required")?;

        let query = VacancyQuery::default();

        Ok(Self {
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| "sqlite://order-relay.db".into()),
            rules_path: lookup("RULES_PATH").unwrap_or_else(|| "rules.json".into()).into(),
            media_dir: lookup("MEDIA_DIR").unwrap_or_else(|| "media".into()).into(),
            cycle_interval_seconds: parse_or(&lookup, "CYCLE_INTERVAL_SECONDS", 120)?,
            error_backoff_seconds: parse_or(&lookup, "ERROR_BACKOFF_SECONDS", 60)?,
            grace_period_seconds: parse_or(&lookup, "GRACE_PERIOD_SECONDS", 240)?,
            retention_days: parse_or(&lookup, "RETENTION_DAYS", 30)?,
            send_delay_ms: parse_or(&lookup, "SEND_DELAY_MS", 500)?,
            fetch_timeout_seconds: parse_or(&lookup, "FETCH_TIMEOUT_SECONDS", 30)?,
            api_bind: lookup("API_BIND").unwrap_or_else(|| "127.0.0.1:8080".into()),
            hh_search_text: lookup("HH_SEARCH_TEXT").unwrap_or(query.text),
            hh_area: lookup("HH_AREA").unwrap_or(query.area),
            telegram_bot_token,
            vk_service_token: lookup("VK_SERVICE_TOKEN").filter(|v| !v.trim().is_empty()),
        })
    }

    /// Command-line flags win over the environment.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(url) = &cli.database_url {
            self.database_url = url.clone();
        }
        if let Some(path) = &cli.rules {
            self.rules_path = path.clone();
        }
        if let Some(seconds) = cli.cycle_interval {
            self.cycle_interval_seconds = seconds;
        }
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            cycle_interval: Duration::from_secs(self.cycle_interval_seconds),
            error_backoff: Duration::from_secs(self.error_backoff_seconds),
            grace: chrono::Duration::seconds(self.grace_period_seconds),
            retention_days: self.retention_days,
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }

    pub fn send_delay(&self) -> Duration {
        Duration::from_millis(self.send_delay_ms)
    }

    pub fn vacancy_query(&self) -> VacancyQuery {
        VacancyQuery {
            text: self.hh_search_text.clone(),
            area: self.hh_area.clone(),
            ..VacancyQuery::default()
        }
    }
}

// Tokens stay out of the startup log line.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &self.database_url)
            .field("rules_path", &self.rules_path)
            .field("media_dir", &self.media_dir)
            .field("cycle_interval_seconds", &self.cycle_interval_seconds)
            .field("error_backoff_seconds", &self.error_backoff_seconds)
            .field("grace_period_seconds", &self.grace_period_seconds)
            .field("retention_days", &self.retention_days)
            .field("send_delay_ms", &self.send_delay_ms)
            .field("fetch_timeout_seconds", &self.fetch_timeout_seconds)
            .field("api_bind", &self.api_bind)
            .field("hh_search_text", &self.hh_search_text)
            .field("hh_area", &self.hh_area)
            .field("vk_enabled", &self.vk_service_token.is_some())
            .finish_non_exhaustive()
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, String>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| format!("{} must be a valid number", key)),
        None => Ok(default),
    }
}
