use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

/// Matches `href` attributes. Covers `<a href>`, `<link href>`, `<area href>`.
static HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"href\s*=\s*["']([^"']+)["']"#).expect("valid regex"));

/// Sitemap `<loc>` entries, with or without a namespace prefix.
static LOC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(?:[A-Za-z0-9_]+:)?loc>\s*([^<\s]+)\s*</(?:[A-Za-z0-9_]+:)?loc>").expect("valid regex")
});

/// File extensions that count as downloadable bulk-data artifacts.
const FILE_EXTENSIONS: [&str; 7] = [".zip", ".xml", ".json", ".gz", ".tgz", ".tar", ".bz2"];

/// Resolve a raw href against a base URL, returning an absolute URL with fragment stripped.
pub(crate) fn resolve_href(raw: &str, base: Option<&url::Url>) -> Option<String> {
    let mut parsed = if raw.starts_with("http://") || raw.starts_with("https://") {
        url::Url::parse(raw).ok()?
    } else {
        base?.join(raw).ok()?
    };
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return None;
    }
    parsed.set_fragment(None);
    Some(parsed.to_string())
}

/// All `href` targets in an HTML listing, resolved and deduplicated.
pub(crate) fn extract_hrefs(html: &str, base_url: &str) -> Vec<String> {
    collect(HREF_RE.captures_iter(html).map(|c| c[1].to_string()), base_url)
}

/// All `<loc>` entries in an XML sitemap or sitemap index.
pub(crate) fn extract_sitemap_locs(xml: &str, base_url: &str) -> Vec<String> {
    collect(LOC_RE.captures_iter(xml).map(|c| c[1].to_string()), base_url)
}

fn collect(raw: impl Iterator<Item = String>, base_url: &str) -> Vec<String> {
    let base = url::Url::parse(base_url).ok();
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for r in raw {
        let unescaped = r.replace("&amp;", "&");
        if let Some(resolved) = resolve_href(&unescaped, base.as_ref()) {
            if seen.insert(resolved.clone()) {
                links.push(resolved);
            }
        }
    }
    links
}

/// Whether a URL points at a bulk-data file rather than a page or directory.
pub(crate) fn is_file_link(link: &str) -> bool {
    let Ok(u) = url::Url::parse(link) else {
        return false;
    };
    let path = u.path().to_ascii_lowercase();
    FILE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Whether a URL looks like a sub-listing worth descending into.
pub(crate) fn is_directory_link(link: &str) -> bool {
    url::Url::parse(link)
        .map(|u| u.path().ends_with('/') && u.query().is_none())
        .unwrap_or(false)
}

pub(crate) fn same_host(a: &str, b: &str) -> bool {
    match (url::Url::parse(a), url::Url::parse(b)) {
        (Ok(a), Ok(b)) => a.host_str() == b.host_str(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_hrefs_resolve_against_listing() {
        let html = r#"<a href="BILLSTATUS-117hr1.xml">x</a> <a href="../116/">up</a>"#;
        let links = extract_hrefs(html, "https://data.gov/bulk/117/");
        assert_eq!(
            links,
            vec!["https://data.gov/bulk/117/BILLSTATUS-117hr1.xml", "https://data.gov/bulk/116/"]
        );
    }

    #[test]
    fn fragments_and_duplicates_are_dropped() {
        let html = r#"<a href="/a.zip#top">1</a><a href='/a.zip'>2</a>"#;
        let links = extract_hrefs(html, "https://data.gov/");
        assert_eq!(links, vec!["https://data.gov/a.zip"]);
    }

    #[test]
    fn non_http_schemes_are_ignored() {
        let html = r#"<a href="mailto:clerk@house.gov">m</a><a href="javascript:void(0)">j</a>"#;
        assert!(extract_hrefs(html, "https://data.gov/").is_empty());
    }

    #[test]
    fn image_src_is_not_extracted() {
        let html = r#"<img src="https://data.gov/logo.png">"#;
        assert!(extract_hrefs(html, "https://data.gov/").is_empty());
    }

    #[test]
    fn sitemap_locs_with_namespace_prefix() {
        let xml = r#"<?xml version="1.0"?>
            <sm:urlset xmlns:sm="http://www.sitemaps.org/schemas/sitemap/0.9">
              <sm:url><sm:loc>https://data.gov/a.xml</sm:loc></sm:url>
              <sm:url><sm:loc> https://data.gov/b.zip </sm:loc></sm:url>
            </sm:urlset>"#;
        let locs = extract_sitemap_locs(xml, "https://data.gov/sitemap.xml");
        assert_eq!(locs, vec!["https://data.gov/a.xml", "https://data.gov/b.zip"]);
    }

    #[test]
    fn file_and_directory_classification() {
        assert!(is_file_link("https://data.gov/x/BILLS-117hr1ih.XML"));
        assert!(is_file_link("https://data.gov/x/a.tar.gz"));
        assert!(!is_file_link("https://data.gov/x/"));
        assert!(is_directory_link("https://data.gov/x/"));
        assert!(!is_directory_link("https://data.gov/x/?sort=asc"));
        assert!(same_host("https://data.gov/a", "https://data.gov/b/c"));
        assert!(!same_host("https://data.gov/a", "https://mirror.org/a"));
    }
}
