use std::collections::{HashSet, VecDeque};

use anyhow::{Context, Result};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::{debug, info, warn};

use super::links::{extract_hrefs, extract_sitemap_locs, is_directory_link, is_file_link, same_host};
use super::menu::vote_document_urls;

/// Roster files published by the legislator mirror.
pub(crate) const ROSTER_FILES: [&str; 2] = ["legislators-current.json", "legislators-historical.json"];

/// Links found on one listing page, split by what to do with them.
#[derive(Debug, Default)]
struct Listing {
    files: Vec<String>,
    folders: Vec<String>,
}

/// Walks remote directory listings (JSON, sitemap or HTML) for file links.
pub(crate) struct IndexCrawler {
    client: reqwest::Client,
    max_depth: usize,
}

impl IndexCrawler {
    pub(crate) fn new(client: reqwest::Client, max_depth: usize) -> Self {
        Self { client, max_depth }
    }

    /// File URLs reachable from `base_url` within `max_depth` listing hops.
    /// Never fails: an unreachable or malformed index contributes nothing.
    pub(crate) async fn crawl_index(&self, base_url: &str) -> Vec<String> {
        let mut seen_pages = HashSet::new();
        let mut seen_files = HashSet::new();
        let mut files = Vec::new();
        let mut queue = VecDeque::from([(base_url.to_string(), 0usize)]);

        while let Some((page, depth)) = queue.pop_front() {
            if !seen_pages.insert(page.clone()) {
                continue;
            }

            let listing = match self.fetch_listing(&page).await {
                Ok(l) => l,
                Err(e) => {
                    warn!(url = page.as_str(), error = %e, "Index listing unavailable");
                    continue;
                }
            };
            debug!(
                url = page.as_str(),
                files = listing.files.len(),
                folders = listing.folders.len(),
                "Listing parsed"
            );

            for file in listing.files {
                if same_host(base_url, &file) && seen_files.insert(file.clone()) {
                    files.push(file);
                }
            }
            if depth < self.max_depth {
                for folder in listing.folders {
                    if same_host(base_url, &folder) && !seen_pages.contains(&folder) {
                        queue.push_back((folder, depth + 1));
                    }
                }
            }
        }

        info!(base_url, files = files.len(), "Index crawl complete");
        files
    }

    /// Roster files offered by a legislator mirror. Uses the mirror's own
    /// listing when it has one, otherwise the well-known roster file names.
    pub(crate) async fn discover_mirror(&self, base_url: &str) -> Vec<String> {
        let base = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };

        let listed: Vec<String> = match self.fetch_listing(&base).await {
            Ok(listing) => listing
                .files
                .into_iter()
                .filter(|f| ROSTER_FILES.iter().any(|name| f.ends_with(name)))
                .collect(),
            Err(e) => {
                debug!(url = base.as_str(), error = %e, "Mirror has no listing, using known roster names");
                Vec::new()
            }
        };

        if !listed.is_empty() {
            return listed;
        }
        ROSTER_FILES.iter().map(|name| format!("{base}{name}")).collect()
    }

    /// Per-vote document URLs listed by a Senate vote menu. Empty on any failure.
    pub(crate) async fn expand_vote_menu(&self, menu_url: &str) -> Vec<String> {
        let body = match self.fetch_text(menu_url).await {
            Ok(body) => body,
            Err(e) => {
                warn!(url = menu_url, error = %e, "Vote menu unavailable");
                return Vec::new();
            }
        };
        let votes = vote_document_urls(menu_url, &body);
        debug!(url = menu_url, votes = votes.len(), "Vote menu expanded");
        votes
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        let resp = self.client.get(url).send().await.context("Request failed")?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("HTTP {status}");
        }
        resp.text().await.context("Failed to read body")
    }

    async fn fetch_listing(&self, url: &str) -> Result<Listing> {
        let resp = self
            .client
            .get(url)
            .header(ACCEPT, "application/json, application/xml;q=0.9, text/html;q=0.8")
            .send()
            .await
            .context("Index request failed")?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("HTTP {status}");
        }
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let body = resp.text().await.context("Failed to read index body")?;

        Ok(parse_listing(&body, &content_type, url))
    }
}

/// Parse a listing page in whichever shape it came in.
fn parse_listing(body: &str, content_type: &str, page_url: &str) -> Listing {
    let trimmed = body.trim_start();

    if content_type.contains("json") || trimmed.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
            return parse_json_listing(&value, page_url);
        }
    }

    let xmlish = content_type.contains("xml") || trimmed.starts_with("<?xml");
    let links = if xmlish && (body.contains("urlset") || body.contains("sitemapindex")) {
        extract_sitemap_locs(body, page_url)
    } else {
        extract_hrefs(body, page_url)
    };

    let mut listing = Listing::default();
    for link in links {
        if is_file_link(&link) && !is_nested_sitemap(&link, body) {
            listing.files.push(link);
        } else if is_directory_link(&link) || is_nested_sitemap(&link, body) {
            listing.folders.push(link);
        }
    }
    listing
}

fn is_nested_sitemap(link: &str, body: &str) -> bool {
    body.contains("sitemapindex") && link.to_ascii_lowercase().contains("sitemap")
}

/// govinfo-style JSON: `{"files": [{"link": "...", "folder": true|false}, ...]}`.
fn parse_json_listing(value: &serde_json::Value, page_url: &str) -> Listing {
    let base = url::Url::parse(page_url).ok();
    let mut listing = Listing::default();

    let Some(entries) = value.get("files").and_then(|f| f.as_array()) else {
        return listing;
    };

    for entry in entries {
        let Some(raw) = entry.get("link").and_then(|l| l.as_str()) else {
            continue;
        };
        let Some(link) = super::links::resolve_href(raw, base.as_ref()) else {
            continue;
        };
        let is_folder = entry.get("folder").and_then(|f| f.as_bool()).unwrap_or(false);
        if is_folder {
            listing.folders.push(link);
        } else if is_file_link(&link) {
            listing.files.push(link);
        }
    }
    listing
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_listing_splits_files_and_folders() {
        let body = r#"{"files": [
            {"link": "https://www.govinfo.gov/bulkdata/BILLSTATUS/117/hr/BILLSTATUS-117-hr.zip", "folder": false},
            {"link": "https://www.govinfo.gov/bulkdata/json/BILLSTATUS/117/s", "folder": true},
            {"justFileName": "no-link"}
        ]}"#;
        let listing = parse_listing(body, "application/json", "https://www.govinfo.gov/bulkdata/json/BILLSTATUS/117");
        assert_eq!(listing.files.len(), 1);
        assert_eq!(listing.folders, vec!["https://www.govinfo.gov/bulkdata/json/BILLSTATUS/117/s"]);
    }

    #[test]
    fn html_listing_keeps_files_and_subdirectories() {
        let body = r#"<html><a href="roll001.xml">1</a><a href="2024/">2024</a><a href="about.html">about</a></html>"#;
        let listing = parse_listing(body, "text/html", "https://clerk.example.gov/evs/");
        assert_eq!(listing.files, vec!["https://clerk.example.gov/evs/roll001.xml"]);
        assert_eq!(listing.folders, vec!["https://clerk.example.gov/evs/2024/"]);
    }

    #[test]
    fn malformed_json_falls_back_to_nothing() {
        let listing = parse_listing("{\"files\": [", "application/json", "https://x.gov/");
        assert!(listing.files.is_empty());
        assert!(listing.folders.is_empty());
    }

    #[test]
    fn sitemap_index_entries_are_followed_as_folders() {
        let body = r#"<?xml version="1.0"?><sitemapindex>
            <sitemap><loc>https://x.gov/sitemap-bills.xml</loc></sitemap>
        </sitemapindex>"#;
        let listing = parse_listing(body, "application/xml", "https://x.gov/sitemap.xml");
        assert!(listing.files.is_empty());
        assert_eq!(listing.folders, vec!["https://x.gov/sitemap-bills.xml"]);
    }
}
