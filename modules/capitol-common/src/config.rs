use std::env;
use std::fmt;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

/// Bulk-data collections that can be expanded from URL templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    BillStatus,
    RollCall,
    BillText,
    PublicLaw,
    CongressionalRecord,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::BillStatus,
        Collection::RollCall,
        Collection::BillText,
        Collection::PublicLaw,
        Collection::CongressionalRecord,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::BillStatus => "billstatus",
            Collection::RollCall => "rollcall",
            Collection::BillText => "billtext",
            Collection::PublicLaw => "plaw",
            Collection::CongressionalRecord => "crec",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "billstatus" | "bill-status" => Ok(Collection::BillStatus),
            "rollcall" | "roll-call" | "votes" => Ok(Collection::RollCall),
            "billtext" | "bill-text" | "bills" => Ok(Collection::BillText),
            "plaw" | "public-law" => Ok(Collection::PublicLaw),
            "crec" | "congressional-record" => Ok(Collection::CongressionalRecord),
            other => anyhow::bail!("unknown collection: {other}"),
        }
    }
}

/// Pipeline configuration. Built once at startup and handed to each component.
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_url: Option<String>,
    pub db_max_connections: u32,

    // Discovery
    pub congresses: RangeInclusive<u32>,
    pub collections: Vec<Collection>,
    pub index_sources: Vec<String>,
    pub crawl_max_depth: usize,
    pub legislator_mirror: Option<String>,
    pub discovery_path: PathBuf,

    // Downloading
    pub output_dir: PathBuf,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub user_agent: String,

    // Retry ledger
    pub retry_ledger_path: PathBuf,
    pub retry_max_attempts: u32,

    // Run shape
    pub validate_urls: bool,
    pub ingest_after_download: bool,
    pub remove_archives: bool,
    pub metrics_enabled: bool,

    // Control service
    pub api_host: String,
    pub api_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: 4,
            congresses: 113..=118,
            collections: vec![Collection::BillStatus, Collection::RollCall],
            index_sources: Vec::new(),
            crawl_max_depth: 1,
            legislator_mirror: Some("https://unitedstates.github.io/congress-legislators".to_string()),
            discovery_path: PathBuf::from("data/discovery.json"),
            output_dir: PathBuf::from("data/downloads"),
            concurrency: 6,
            max_attempts: 3,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            user_agent: "capitol-ingest/0.1".to_string(),
            retry_ledger_path: PathBuf::from("data/retry_ledger.json"),
            retry_max_attempts: 5,
            validate_urls: false,
            ingest_after_download: true,
            remove_archives: false,
            metrics_enabled: true,
            api_host: "0.0.0.0".to_string(),
            api_port: 8090,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let d = Self::default();

        let start = parsed_env("CONGRESS_START")?.unwrap_or(*d.congresses.start());
        let end = parsed_env("CONGRESS_END")?.unwrap_or(*d.congresses.end());
        if start > end {
            anyhow::bail!("CONGRESS_START ({start}) is after CONGRESS_END ({end})");
        }

        let collections = match env::var("COLLECTIONS") {
            Ok(raw) => raw
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(Collection::from_str)
                .collect::<Result<Vec<_>>>()
                .context("Invalid COLLECTIONS")?,
            Err(_) => d.collections,
        };

        let concurrency: usize = parsed_env("DOWNLOAD_CONCURRENCY")?.unwrap_or(d.concurrency);

        Ok(Self {
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            db_max_connections: parsed_env("DB_MAX_CONNECTIONS")?.unwrap_or(d.db_max_connections),
            congresses: start..=end,
            collections,
            index_sources: list_env("INDEX_SOURCES"),
            crawl_max_depth: parsed_env("CRAWL_MAX_DEPTH")?.unwrap_or(d.crawl_max_depth),
            legislator_mirror: match env::var("LEGISLATOR_MIRROR_URL") {
                Ok(s) if s.is_empty() => None,
                Ok(s) => Some(s),
                Err(_) => d.legislator_mirror,
            },
            discovery_path: env::var("DISCOVERY_PATH").map(PathBuf::from).unwrap_or(d.discovery_path),
            output_dir: env::var("INGEST_OUTPUT_DIR").map(PathBuf::from).unwrap_or(d.output_dir),
            concurrency: concurrency.max(1),
            max_attempts: parsed_env::<u32>("DOWNLOAD_MAX_ATTEMPTS")?.unwrap_or(d.max_attempts).max(1),
            connect_timeout: parsed_env("HTTP_CONNECT_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(d.connect_timeout),
            read_timeout: parsed_env("HTTP_READ_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(d.read_timeout),
            backoff_base: parsed_env("BACKOFF_BASE_MS")?
                .map(Duration::from_millis)
                .unwrap_or(d.backoff_base),
            backoff_cap: parsed_env("BACKOFF_CAP_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(d.backoff_cap),
            user_agent: env::var("USER_AGENT").unwrap_or(d.user_agent),
            retry_ledger_path: env::var("RETRY_LEDGER_PATH").map(PathBuf::from).unwrap_or(d.retry_ledger_path),
            retry_max_attempts: parsed_env("RETRY_MAX_ATTEMPTS")?.unwrap_or(d.retry_max_attempts),
            validate_urls: bool_env("VALIDATE_URLS")?.unwrap_or(d.validate_urls),
            ingest_after_download: bool_env("INGEST_AFTER_DOWNLOAD")?.unwrap_or(d.ingest_after_download),
            remove_archives: bool_env("REMOVE_ARCHIVES")?.unwrap_or(d.remove_archives),
            metrics_enabled: bool_env("METRICS_ENABLED")?.unwrap_or(d.metrics_enabled),
            api_host: env::var("API_HOST").unwrap_or(d.api_host),
            api_port: parsed_env("API_PORT")?.unwrap_or(d.api_port),
        })
    }

    /// Log the effective configuration with credentials masked.
    pub fn log_redacted(&self) {
        let db = self.database_url.as_deref().map(redact_url);
        info!(
            database = db.as_deref().unwrap_or("(disabled)"),
            congresses = %format!("{}..={}", self.congresses.start(), self.congresses.end()),
            collections = ?self.collections.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
            index_sources = self.index_sources.len(),
            output_dir = %self.output_dir.display(),
            concurrency = self.concurrency,
            max_attempts = self.max_attempts,
            retry_max_attempts = self.retry_max_attempts,
            validate_urls = self.validate_urls,
            "Loaded config"
        );
    }
}

fn parsed_env<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        _ => Ok(None),
    }
}

fn bool_env(key: &str) -> Result<Option<bool>> {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "" => Ok(None),
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            other => anyhow::bail!("{key} must be a boolean, got: {other}"),
        },
        Err(_) => Ok(None),
    }
}

fn list_env(key: &str) -> Vec<String> {
    env::var(key)
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut u) if u.password().is_some() => {
            let _ = u.set_password(Some("***"));
            u.to_string()
        }
        Ok(u) => u.to_string(),
        Err(_) => "(unparseable)".to_string(),
    }
}
