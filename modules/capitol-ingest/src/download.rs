//! Download manager: bounded-concurrency, resumable fetching of bulk files.
//!
//! Bytes stream into `<dest>.part`; the file is renamed to `dest` only once the
//! advertised length has arrived. A sidecar `<dest>.part.json` remembers the
//! ETag / Last-Modified seen when the partial was started, and resumes send
//! them back as `If-Range` so a file that changed upstream is re-fetched from
//! zero instead of being stitched onto stale bytes.

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use capitol_common::persist::{read_json, write_json_atomic};
use capitol_common::{Config, DownloadResult};
use futures::stream::{self, StreamExt};
use reqwest::header::{
    HeaderMap, HeaderName, ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, ETAG, IF_RANGE, LAST_MODIFIED, RANGE,
};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::http::build_client;
use crate::ledger::RetryLedger;
use crate::metrics::MetricsSink;

/// Log a progress line every this many bytes of one transfer.
const PROGRESS_EVERY: u64 = 8 * 1024 * 1024;

/// What a HEAD request says about a remote file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeadInfo {
    pub content_length: Option<u64>,
    pub supports_ranges: bool,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl HeadInfo {
    /// Validator usable in `If-Range`. Weak ETags are not allowed there.
    fn if_range_validator(&self) -> Option<&str> {
        match &self.etag {
            Some(tag) if !tag.starts_with("W/") => Some(tag.as_str()),
            _ => self.last_modified.as_deref(),
        }
    }
}

/// Sidecar stored next to a partial download.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PartialMeta {
    url: String,
    etag: Option<String>,
    last_modified: Option<String>,
    expected_length: Option<u64>,
}

impl PartialMeta {
    /// True when the remote validators no longer match what the partial was built from.
    fn is_stale_against(&self, head: &HeadInfo) -> bool {
        let etag_changed = matches!((&self.etag, &head.etag), (Some(a), Some(b)) if a != b);
        let modified_changed =
            matches!((&self.last_modified, &head.last_modified), (Some(a), Some(b)) if a != b);
        let length_changed =
            matches!((self.expected_length, head.content_length), (Some(a), Some(b)) if a != b);
        etag_changed || modified_changed || length_changed
    }
}

/// Why one attempt failed, and whether another attempt could help.
#[derive(Debug, thiserror::Error)]
enum FetchFailure {
    #[error("{0}")]
    Transient(String),
    #[error("{0}")]
    Permanent(String),
}

fn classify_status(status: StatusCode) -> FetchFailure {
    let msg = format!("HTTP {status}");
    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS {
        FetchFailure::Transient(msg)
    } else {
        FetchFailure::Permanent(msg)
    }
}

fn classify_request_error(e: &reqwest::Error) -> FetchFailure {
    if e.is_builder() {
        FetchFailure::Permanent(format!("invalid request: {e}"))
    } else {
        FetchFailure::Transient(e.to_string())
    }
}

pub struct Downloader {
    client: reqwest::Client,
    output_dir: PathBuf,
    concurrency: usize,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_cap: Duration,
    ledger: Arc<RetryLedger>,
    metrics: Arc<dyn MetricsSink>,
}

impl Downloader {
    pub fn new(config: &Config, ledger: Arc<RetryLedger>, metrics: Arc<dyn MetricsSink>) -> Result<Self> {
        Ok(Self::with_client(config, build_client(config)?, ledger, metrics))
    }

    pub(crate) fn with_client(
        config: &Config,
        client: reqwest::Client,
        ledger: Arc<RetryLedger>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            client,
            output_dir: config.output_dir.clone(),
            concurrency: config.concurrency.max(1),
            max_attempts: config.max_attempts.max(1),
            backoff_base: config.backoff_base,
            backoff_cap: config.backoff_cap,
            ledger,
            metrics,
        }
    }

    /// `<outdir>/<host>/<url path>`, or `None` when the URL has no usable host.
    /// The whole path is kept so same-named files in different remote
    /// directories never share a destination. A trailing slash maps to `index`.
    pub fn destination_for(&self, url: &str) -> Option<PathBuf> {
        let parsed = url::Url::parse(url).ok()?;
        let host = parsed.host_str()?;
        let mut dest = self.output_dir.join(host);

        let segments: Vec<&str> = parsed.path_segments().map(|s| s.collect()).unwrap_or_default();
        let (dirs, last) = match segments.split_last() {
            Some((last, dirs)) => (dirs, *last),
            None => (&[][..], ""),
        };
        for dir in dirs.iter().filter(|d| is_plain_segment(d)) {
            dest.push(dir);
        }
        dest.push(if is_plain_segment(last) { last } else { "index" });
        Some(dest)
    }

    /// Ask the server for size and resume capability.
    pub async fn head_info(&self, url: &str) -> Result<HeadInfo> {
        let resp = self.client.head(url).send().await?.error_for_status()?;
        let headers = resp.headers();

        Ok(HeadInfo {
            content_length: header_str(headers, CONTENT_LENGTH).and_then(|v| v.parse().ok()),
            supports_ranges: header_str(headers, ACCEPT_RANGES)
                .is_some_and(|v| v.to_ascii_lowercase().contains("bytes")),
            etag: header_str(headers, ETAG).map(str::to_string),
            last_modified: header_str(headers, LAST_MODIFIED).map(str::to_string),
        })
    }

    /// Fetch `url` into `dest`, retrying transient failures with backoff.
    /// Final failures are recorded in the retry ledger; success clears it.
    pub async fn download_one(&self, url: &str, dest: &Path) -> DownloadResult {
        let mut transferred = 0u64;
        let mut last_error = String::new();

        for attempt in 0..self.max_attempts {
            match self.attempt(url, dest, &mut transferred).await {
                Ok(()) => {
                    if let Err(e) = self.ledger.remove(url).await {
                        warn!(url, error = %e, "Failed to clear retry ledger entry");
                    }
                    self.metrics.record_download(true);
                    info!(url, bytes = transferred, dest = %dest.display(), "Downloaded");
                    return DownloadResult::ok(url, dest.to_path_buf(), transferred);
                }
                Err(FetchFailure::Permanent(msg)) => {
                    last_error = msg;
                    break;
                }
                Err(FetchFailure::Transient(msg)) => {
                    last_error = msg;
                    if attempt + 1 < self.max_attempts {
                        let delay = self.backoff(attempt);
                        warn!(
                            url,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = last_error.as_str(),
                            "Transient download failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        self.fail(url, dest.to_path_buf(), transferred, last_error).await
    }

    /// Download every URL over a bounded worker pool. Input is deduplicated
    /// first, so no two workers ever touch the same URL. When `cancel` is set,
    /// URLs not yet started are skipped; transfers in flight run to completion.
    pub async fn download_all(&self, urls: &[String], cancel: &AtomicBool) -> Vec<DownloadResult> {
        let mut seen = HashSet::new();
        let unique: Vec<String> = urls.iter().filter(|u| seen.insert(u.as_str())).cloned().collect();
        info!(urls = unique.len(), concurrency = self.concurrency, "Downloads starting");

        let results: Vec<DownloadResult> = stream::iter(unique)
            .map(|url: String| async move {
                if cancel.load(Ordering::Relaxed) {
                    return None;
                }
                let url = url.as_str();
                let result = match self.destination_for(url) {
                    Some(dest) => self.download_one(url, &dest).await,
                    None => {
                        self.fail(url, PathBuf::new(), 0, "malformed URL".to_string())
                            .await
                    }
                };
                Some(result)
            })
            .buffer_unordered(self.concurrency)
            .filter_map(|r| async move { r })
            .collect()
            .await;

        let ok = results.iter().filter(|r| r.success).count();
        info!(
            attempted = results.len(),
            succeeded = ok,
            failed = results.len() - ok,
            cancelled = cancel.load(Ordering::Relaxed),
            "Downloads finished"
        );
        results
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.backoff_cap)
    }

    async fn fail(&self, url: &str, dest: PathBuf, transferred: u64, error: String) -> DownloadResult {
        let attempts = match self.ledger.add(url, &error).await {
            Ok(n) => Some(n),
            Err(e) => {
                warn!(url, error = %e, "Failed to record failure in retry ledger");
                None
            }
        };
        self.metrics.record_download(false);
        warn!(url, error = error.as_str(), ledger_attempts = ?attempts, "Download failed");
        DownloadResult::failed(url, dest, transferred, error)
    }

    /// One transfer attempt. `transferred` accumulates bytes written to disk.
    async fn attempt(&self, url: &str, dest: &Path, transferred: &mut u64) -> std::result::Result<(), FetchFailure> {
        let part = with_suffix(dest, ".part");
        let meta_path = with_suffix(dest, ".part.json");

        let head = match self.head_info(url).await {
            Ok(h) => h,
            Err(e) => {
                debug!(url, error = %e, "HEAD unavailable, fetching without size hints");
                HeadInfo::default()
            }
        };

        if let Ok(existing) = tokio::fs::metadata(dest).await {
            if head.content_length.map_or(true, |len| len == existing.len()) {
                debug!(url, dest = %dest.display(), "Already downloaded");
                return Ok(());
            }
            debug!(url, "Local copy differs from remote size, re-fetching");
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FetchFailure::Permanent(format!("cannot create {}: {e}", parent.display())))?;
        }

        let mut offset = tokio::fs::metadata(&part).await.map(|m| m.len()).unwrap_or(0);
        if offset > 0 {
            let meta: Option<PartialMeta> = read_json(&meta_path).ok().flatten();
            let stale = meta.as_ref().map_or(true, |m| m.url != url || m.is_stale_against(&head));
            let too_long = head.content_length.is_some_and(|len| offset > len);
            if !head.supports_ranges || stale || too_long {
                debug!(url, offset, stale, "Discarding partial download");
                offset = 0;
            } else if head.content_length == Some(offset) {
                return finalize(&part, dest, &meta_path).await;
            }
        }

        if offset == 0 {
            let meta = PartialMeta {
                url: url.to_string(),
                etag: head.etag.clone(),
                last_modified: head.last_modified.clone(),
                expected_length: head.content_length,
            };
            write_json_atomic(&meta_path, &meta)
                .map_err(|e| FetchFailure::Permanent(format!("cannot write resume metadata: {e}")))?;
        }

        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
            if let Some(validator) = head.if_range_validator() {
                request = request.header(IF_RANGE, validator);
            }
        }
        let resp = request.send().await.map_err(|e| classify_request_error(&e))?;
        let status = resp.status();

        let (start, expected_total) = match status {
            StatusCode::PARTIAL_CONTENT => {
                let range = resp
                    .headers()
                    .get(CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_content_range);
                match range {
                    Some((range_start, total)) if range_start == offset => (offset, total.or(head.content_length)),
                    _ => {
                        let _ = tokio::fs::remove_file(&part).await;
                        return Err(FetchFailure::Transient("server returned an unexpected range".into()));
                    }
                }
            }
            s if s.is_success() => {
                if offset > 0 {
                    debug!(url, "Server sent the full body, restarting from zero");
                }
                (0, resp.content_length())
            }
            StatusCode::RANGE_NOT_SATISFIABLE if offset > 0 => {
                if head.content_length == Some(offset) {
                    return finalize(&part, dest, &meta_path).await;
                }
                let _ = tokio::fs::remove_file(&part).await;
                return Err(FetchFailure::Transient("range not satisfiable, partial discarded".into()));
            }
            s => return Err(classify_status(s)),
        };

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(start > 0)
            .truncate(start == 0)
            .open(&part)
            .await
            .map_err(|e| FetchFailure::Permanent(format!("cannot open {}: {e}", part.display())))?;

        if start > 0 {
            info!(url, offset = start, "Resuming download");
        }

        let mut written = start;
        let mut next_progress = start + PROGRESS_EVERY;
        let mut body = resp.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    let _ = file.flush().await;
                    return Err(FetchFailure::Transient(format!("body interrupted at {written} bytes: {e}")));
                }
            };
            file.write_all(&chunk)
                .await
                .map_err(|e| FetchFailure::Permanent(format!("write to {} failed: {e}", part.display())))?;
            let n = chunk.len() as u64;
            written += n;
            *transferred += n;
            self.metrics.record_bytes(n);
            if written >= next_progress {
                debug!(url, bytes = written, total = ?expected_total, "Download progress");
                next_progress = written + PROGRESS_EVERY;
            }
        }

        file.flush()
            .await
            .map_err(|e| FetchFailure::Permanent(format!("flush of {} failed: {e}", part.display())))?;
        file.sync_all()
            .await
            .map_err(|e| FetchFailure::Permanent(format!("sync of {} failed: {e}", part.display())))?;
        drop(file);

        if let Some(total) = expected_total {
            if written != total {
                return Err(FetchFailure::Transient(format!("short body: {written} of {total} bytes")));
            }
        }

        finalize(&part, dest, &meta_path).await
    }
}

async fn finalize(part: &Path, dest: &Path, meta_path: &Path) -> std::result::Result<(), FetchFailure> {
    tokio::fs::rename(part, dest)
        .await
        .map_err(|e| FetchFailure::Permanent(format!("cannot move {} into place: {e}", part.display())))?;
    let _ = tokio::fs::remove_file(meta_path).await;
    Ok(())
}

/// A path segment that can be used as-is for a file or directory name.
fn is_plain_segment(segment: &str) -> bool {
    !segment.is_empty() && segment != "." && segment != ".." && !segment.contains(['/', '\\'])
}

fn header_str(headers: &HeaderMap, name: HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// `bytes START-END/TOTAL` → `(START, Some(TOTAL))`; `TOTAL` may be `*`.
fn parse_content_range(value: &str) -> Option<(u64, Option<u64>)> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;
    let (start, _end) = range.split_once('-')?;
    let start = start.trim().parse().ok()?;
    let total = total.trim().parse().ok();
    Some((start, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NoopMetrics;

    fn downloader(dir: &Path) -> Downloader {
        let config = Config {
            output_dir: dir.join("out"),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            ..Config::default()
        };
        let ledger = Arc::new(RetryLedger::open(dir.join("ledger.json")).unwrap());
        Downloader::with_client(&config, reqwest::Client::new(), ledger, Arc::new(NoopMetrics))
    }

    #[test]
    fn destinations_keep_host_and_path() {
        let dir = tempfile::tempdir().unwrap();
        let d = downloader(dir.path());

        assert_eq!(
            d.destination_for("https://www.govinfo.gov/bulkdata/BILLSTATUS/117/hr/BILLSTATUS-117-hr.zip"),
            Some(dir.path().join("out/www.govinfo.gov/bulkdata/BILLSTATUS/117/hr/BILLSTATUS-117-hr.zip"))
        );
        assert_eq!(
            d.destination_for("https://example.gov/listing/"),
            Some(dir.path().join("out/example.gov/listing/index"))
        );
        assert_eq!(d.destination_for("https://example.gov"), Some(dir.path().join("out/example.gov/index")));
        assert_eq!(d.destination_for("not a url"), None);
    }

    #[test]
    fn same_file_name_in_different_directories_gets_distinct_destinations() {
        let dir = tempfile::tempdir().unwrap();
        let d = downloader(dir.path());

        let y2023 = d.destination_for("https://clerk.house.gov/evs/2023/roll001.xml").unwrap();
        let y2024 = d.destination_for("https://clerk.house.gov/evs/2024/roll001.xml").unwrap();
        assert_ne!(y2023, y2024);
        assert_eq!(y2024, dir.path().join("out/clerk.house.gov/evs/2024/roll001.xml"));
    }

    #[test]
    fn dot_segments_never_escape_the_host_directory() {
        let dir = tempfile::tempdir().unwrap();
        let d = downloader(dir.path());

        let dest = d.destination_for("https://example.gov/a/%2E%2E/%2E%2E/b.xml").unwrap();
        assert!(dest.starts_with(dir.path().join("out/example.gov")));
        assert!(dest.components().all(|c| c != std::path::Component::ParentDir));
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let dir = tempfile::tempdir().unwrap();
        let d = downloader(dir.path());
        assert_eq!(d.backoff(0), Duration::from_secs(1));
        assert_eq!(d.backoff(1), Duration::from_secs(2));
        assert_eq!(d.backoff(4), Duration::from_secs(16));
        assert_eq!(d.backoff(5), Duration::from_secs(30));
        assert_eq!(d.backoff(40), Duration::from_secs(30));
    }

    #[test]
    fn status_classification() {
        assert!(matches!(classify_status(StatusCode::SERVICE_UNAVAILABLE), FetchFailure::Transient(_)));
        assert!(matches!(classify_status(StatusCode::TOO_MANY_REQUESTS), FetchFailure::Transient(_)));
        assert!(matches!(classify_status(StatusCode::REQUEST_TIMEOUT), FetchFailure::Transient(_)));
        assert!(matches!(classify_status(StatusCode::NOT_FOUND), FetchFailure::Permanent(_)));
        assert!(matches!(classify_status(StatusCode::GONE), FetchFailure::Permanent(_)));
    }

    #[test]
    fn content_range_parsing() {
        assert_eq!(parse_content_range("bytes 100-199/200"), Some((100, Some(200))));
        assert_eq!(parse_content_range("bytes 5-9/*"), Some((5, None)));
        assert_eq!(parse_content_range("items 1-2/3"), None);
    }

    #[test]
    fn weak_etags_fall_back_to_last_modified_for_if_range() {
        let head = HeadInfo {
            etag: Some("W/\"abc\"".into()),
            last_modified: Some("Tue, 01 Oct 2024 00:00:00 GMT".into()),
            ..HeadInfo::default()
        };
        assert_eq!(head.if_range_validator(), Some("Tue, 01 Oct 2024 00:00:00 GMT"));

        let strong = HeadInfo {
            etag: Some("\"abc\"".into()),
            ..HeadInfo::default()
        };
        assert_eq!(strong.if_range_validator(), Some("\"abc\""));
    }

    #[test]
    fn partial_goes_stale_when_validators_change() {
        let meta = PartialMeta {
            url: "u".into(),
            etag: Some("\"v1\"".into()),
            last_modified: None,
            expected_length: Some(10),
        };
        let same = HeadInfo {
            etag: Some("\"v1\"".into()),
            content_length: Some(10),
            ..HeadInfo::default()
        };
        let changed = HeadInfo {
            etag: Some("\"v2\"".into()),
            content_length: Some(10),
            ..HeadInfo::default()
        };
        assert!(!meta.is_stale_against(&same));
        assert!(meta.is_stale_against(&changed));
        assert!(!meta.is_stale_against(&HeadInfo::default()));
    }
}
