//! Discovery: build the candidate URL set for a run.
//!
//! Three kinds of source feed the set: URL templates expanded over the
//! configured congresses, crawled index listings, and the legislator roster
//! mirror. Templated Senate vote menus are not downloaded themselves; each is
//! read for the per-vote documents it lists. A source that fails contributes zero URLs; discovery as a whole
//! always returns a (possibly partial) result.

mod crawl;
mod links;
mod menu;
pub mod templates;

use std::collections::{BTreeMap, HashSet};
use std::ops::RangeInclusive;
use std::path::Path;

use capitol_common::persist::{quarantine, read_json, write_json_atomic};
use capitol_common::{Collection, Config, PersistError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::http::build_client;
use crawl::IndexCrawler;

pub use templates::expand_templates;

pub const TEMPLATE_SOURCE: &str = "template-expansion";
pub const VOTE_MENU_SOURCE: &str = "vote-menus";

/// Candidate URLs keyed by source name, plus the deduplicated work list.
///
/// Serialized flat: each source name maps to its URL array next to
/// `aggregate_urls` and `generated_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub generated_at: DateTime<Utc>,
    pub aggregate_urls: Vec<String>,
    #[serde(flatten)]
    pub sources: BTreeMap<String, Vec<String>>,
}

impl DiscoveryResult {
    /// Merge per-source lists into a result whose aggregate has no duplicates.
    /// Aggregate order follows source-name order, then each source's own order.
    pub fn from_sources(sources: BTreeMap<String, Vec<String>>) -> Self {
        let aggregate_urls = {
            let mut seen = HashSet::new();
            sources
                .values()
                .flatten()
                .filter(|u| seen.insert(u.as_str()))
                .cloned()
                .collect()
        };

        Self {
            generated_at: Utc::now(),
            aggregate_urls,
            sources,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)?;
        Ok(())
    }

    /// Read a previous discovery pass. Missing → `None`; corrupt → moved aside, `None`.
    pub fn load(path: &Path) -> Option<Self> {
        match read_json::<Self>(path) {
            Ok(result) => result,
            Err(PersistError::Corrupt { source, .. }) => {
                warn!(path = %path.display(), error = %source, "Discovery file corrupt, ignoring");
                if let Err(e) = quarantine(path) {
                    warn!(path = %path.display(), error = %e, "Failed to move corrupt discovery file aside");
                }
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Discovery file unreadable");
                None
            }
        }
    }
}

pub struct Discovery {
    congresses: RangeInclusive<u32>,
    collections: Vec<Collection>,
    index_sources: Vec<String>,
    legislator_mirror: Option<String>,
    crawler: IndexCrawler,
}

impl Discovery {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self::with_client(config, build_client(config)?))
    }

    pub(crate) fn with_client(config: &Config, client: reqwest::Client) -> Self {
        Self {
            congresses: config.congresses.clone(),
            collections: config.collections.clone(),
            index_sources: config.index_sources.clone(),
            legislator_mirror: config.legislator_mirror.clone(),
            crawler: IndexCrawler::new(client, config.crawl_max_depth),
        }
    }

    /// Crawl one index listing for file links. Empty on any failure.
    pub async fn crawl_index(&self, base_url: &str) -> Vec<String> {
        self.crawler.crawl_index(base_url).await
    }

    /// Per-vote roll-call documents listed by one Senate vote menu. Empty on
    /// any failure.
    pub async fn expand_vote_menu(&self, menu_url: &str) -> Vec<String> {
        self.crawler.expand_vote_menu(menu_url).await
    }

    /// Source-specific discovery for a named mirror. Unknown names yield nothing.
    pub async fn discover_mirror(&self, source_name: &str) -> Vec<String> {
        match (source_name, &self.legislator_mirror) {
            ("legislators", Some(base)) => self.crawler.discover_mirror(base).await,
            _ => {
                warn!(source = source_name, "No discovery configured for mirror");
                Vec::new()
            }
        }
    }

    /// Run every sub-discoverer and merge.
    pub async fn build(&self) -> DiscoveryResult {
        info!(
            congresses = %format!("{}..={}", self.congresses.start(), self.congresses.end()),
            collections = self.collections.len(),
            index_sources = self.index_sources.len(),
            "Discovery starting"
        );

        let (menus, templated): (Vec<String>, Vec<String>) =
            expand_templates(self.congresses.clone(), &self.collections)
                .into_iter()
                .partition(|u| menu::is_vote_menu(u));

        let mut sources = BTreeMap::new();
        sources.insert(TEMPLATE_SOURCE.to_string(), templated);

        if !menus.is_empty() {
            let mut votes = Vec::new();
            for menu_url in &menus {
                votes.extend(self.expand_vote_menu(menu_url).await);
            }
            sources.insert(VOTE_MENU_SOURCE.to_string(), votes);
        }

        for base in &self.index_sources {
            let urls = self.crawl_index(base).await;
            sources
                .entry(format!("index-crawl:{base}"))
                .or_insert_with(Vec::new)
                .extend(urls);
        }

        if self.legislator_mirror.is_some() {
            let urls = self.discover_mirror("legislators").await;
            sources.insert("mirror:legislators".to_string(), urls);
        }

        let result = DiscoveryResult::from_sources(sources);
        for (name, urls) in &result.sources {
            info!(source = name.as_str(), urls = urls.len(), "Discovered");
        }
        info!(aggregate = result.aggregate_urls.len(), "Discovery complete");
        result
    }
}
