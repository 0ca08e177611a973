//! One ingestion run, stage by stage:
//! discover → validate → retry merge → download → extract → parse → upsert.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use capitol_common::{Config, DownloadResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::discovery::{Discovery, DiscoveryResult};
use crate::download::Downloader;
use crate::error::IngestError;
use crate::extract::{detect_path, extract};
use crate::http::build_client;
use crate::ledger::RetryLedger;
use crate::metrics::MetricsSink;
use crate::parse::{parse_file, DocumentKind, Parsed};
use crate::store::{BatchOutcome, Database};
use crate::validate::Validator;

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Starting,
    Discovering,
    Validating,
    Retrying,
    Downloading,
    Extracting,
    Parsing,
    Ingesting,
    Finished,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Discovering => "discovering",
            Self::Validating => "validating",
            Self::Retrying => "retrying",
            Self::Downloading => "downloading",
            Self::Extracting => "extracting",
            Self::Parsing => "parsing",
            Self::Ingesting => "ingesting",
            Self::Finished => "finished",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunMode {
    /// Fresh discovery plus any ledger URLs still eligible for retry.
    Full,
    /// Ledger URLs only. `force` includes URLs past the attempt limit.
    Retry { force: bool },
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => f.write_str("full"),
            Self::Retry { force: false } => f.write_str("retry"),
            Self::Retry { force: true } => f.write_str("retry (forced)"),
        }
    }
}

/// Shared handles a running pipeline reports through and listens to.
#[derive(Debug, Clone)]
pub struct RunContext {
    cancel: Arc<AtomicBool>,
    phase: Arc<watch::Sender<Phase>>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Phase::Starting);
        Self {
            cancel: Arc::new(AtomicBool::new(false)),
            phase: Arc::new(tx),
        }
    }

    /// Ask the run to stop before its next URL or stage.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    fn enter(&self, phase: Phase) {
        info!(%phase, "Pipeline phase");
        self.phase.send_replace(phase);
    }
}

/// Stats from one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub discovered_at: Option<DateTime<Utc>>,
    pub urls_discovered: usize,
    pub urls_from_ledger: usize,
    pub urls_skipped_exhausted: usize,
    pub downloads_ok: usize,
    pub downloads_failed: usize,
    pub bytes_transferred: u64,
    pub archives_extracted: usize,
    pub extractions_failed: usize,
    pub bills_parsed: usize,
    pub votes_parsed: usize,
    pub legislators_parsed: usize,
    pub documents_skipped: usize,
    pub upserts: BatchOutcome,
    pub cancelled: bool,
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n=== Ingest Run Complete ===")?;
        writeln!(f, "URLs discovered:    {}", self.urls_discovered)?;
        writeln!(f, "URLs from ledger:   {}", self.urls_from_ledger)?;
        writeln!(f, "Exhausted, skipped: {}", self.urls_skipped_exhausted)?;
        writeln!(f, "Downloads ok:       {}", self.downloads_ok)?;
        writeln!(f, "Downloads failed:   {}", self.downloads_failed)?;
        writeln!(f, "Bytes transferred:  {}", self.bytes_transferred)?;
        writeln!(f, "Archives extracted: {}", self.archives_extracted)?;
        writeln!(f, "Extractions failed: {}", self.extractions_failed)?;
        writeln!(
            f,
            "Parsed:             {} bills, {} votes, {} legislators ({} skipped)",
            self.bills_parsed, self.votes_parsed, self.legislators_parsed, self.documents_skipped
        )?;
        writeln!(
            f,
            "Upserts:            {} ok, {} failed, {} without key",
            self.upserts.upserted, self.upserts.failed, self.upserts.skipped
        )?;
        if self.cancelled {
            writeln!(f, "Run was cancelled before completion")?;
        }
        Ok(())
    }
}

/// Parsed files waiting for upsert. Parsing runs at most this far ahead.
const PARSE_QUEUE: usize = 16;

/// One file's parse result, on its way to the database.
#[derive(Debug)]
struct ParsedFile {
    path: PathBuf,
    parsed: Parsed,
}

pub struct Pipeline {
    config: Config,
    discovery: Discovery,
    validator: Validator,
    downloader: Downloader,
    ledger: Arc<RetryLedger>,
    metrics: Arc<dyn MetricsSink>,
    database: Option<Arc<Database>>,
}

impl Pipeline {
    /// Build every stage from one config. Opens (or recovers) the retry ledger.
    pub fn new(config: Config, metrics: Arc<dyn MetricsSink>) -> crate::error::Result<Self> {
        let client = build_client(&config)?;
        let ledger = Arc::new(RetryLedger::open(config.retry_ledger_path.clone())?);

        Ok(Self {
            discovery: Discovery::with_client(&config, client.clone()),
            validator: Validator::with_client(client.clone(), config.concurrency),
            downloader: Downloader::with_client(&config, client, ledger.clone(), metrics.clone()),
            ledger,
            metrics,
            database: None,
            config,
        })
    }

    /// Enable the parse + upsert stages against `database`.
    pub fn with_database(mut self, database: Arc<Database>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<RetryLedger> {
        &self.ledger
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsSink> {
        &self.metrics
    }

    pub fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    /// Run discovery and write the result to the discovery file.
    pub async fn discover(&self) -> DiscoveryResult {
        let result = self.discovery.build().await;
        if let Err(e) = result.save(&self.config.discovery_path) {
            warn!(path = %self.config.discovery_path.display(), error = %e, "Failed to write discovery file");
        }
        result
    }

    /// Execute one run. Per-item failures are absorbed into the stats; only
    /// losing the database mid-ingest is returned as an error, after the
    /// download and extract results of this run are already on disk.
    pub async fn run(&self, mode: RunMode, ctx: &RunContext) -> anyhow::Result<RunStats> {
        info!(%mode, "Ingest run starting");
        let mut stats = RunStats::default();

        let urls = self.collect_urls(mode, ctx, &mut stats).await;
        if ctx.is_cancelled() {
            return Ok(self.finish(ctx, stats, true));
        }

        ctx.enter(Phase::Downloading);
        let results = self.downloader.download_all(&urls, &ctx.cancel).await;
        for r in &results {
            if r.success {
                stats.downloads_ok += 1;
            } else {
                stats.downloads_failed += 1;
            }
            stats.bytes_transferred += r.bytes_transferred;
        }
        if ctx.is_cancelled() {
            return Ok(self.finish(ctx, stats, true));
        }

        ctx.enter(Phase::Extracting);
        let files = self.extract_all(&results, &mut stats).await;
        if ctx.is_cancelled() {
            return Ok(self.finish(ctx, stats, true));
        }

        let Some(database) = self.database.as_ref().filter(|_| self.config.ingest_after_download) else {
            info!(files = files.len(), "Ingest stage disabled, stopping after extraction");
            return Ok(self.finish(ctx, stats, false));
        };

        ctx.enter(Phase::Parsing);
        let cancelled = match self.parse_and_ingest(database, files, ctx, &mut stats).await {
            Ok(cancelled) => cancelled,
            Err(e) => {
                warn!(error = %e, "Ingest stage aborted; downloads and extractions from this run stand");
                info!("{stats}");
                return Err(e).context("Ingest stage aborted");
            }
        };

        Ok(self.finish(ctx, stats, cancelled))
    }

    async fn collect_urls(&self, mode: RunMode, ctx: &RunContext, stats: &mut RunStats) -> Vec<String> {
        let max = self.config.retry_max_attempts;

        match mode {
            RunMode::Full => {
                ctx.enter(Phase::Discovering);
                let discovery = self.discover().await;
                stats.discovered_at = Some(discovery.generated_at);
                stats.urls_discovered = discovery.aggregate_urls.len();
                let mut urls = discovery.aggregate_urls;

                if self.config.validate_urls && !ctx.is_cancelled() {
                    ctx.enter(Phase::Validating);
                    urls = self.validator.filter(&urls).await;
                }

                ctx.enter(Phase::Retrying);
                let eligible = self.ledger.list_eligible(max).await;
                let eligible_set: HashSet<&str> = eligible.iter().map(String::as_str).collect();
                let exhausted: HashSet<String> = self
                    .ledger
                    .list_all()
                    .await
                    .into_iter()
                    .filter(|u| !eligible_set.contains(u.as_str()))
                    .collect();

                let before = urls.len();
                urls.retain(|u| !exhausted.contains(u));
                stats.urls_skipped_exhausted = before - urls.len();

                let mut seen: HashSet<String> = urls.iter().cloned().collect();
                for url in eligible {
                    if seen.insert(url.clone()) {
                        stats.urls_from_ledger += 1;
                        urls.push(url);
                    }
                }
                urls
            }
            RunMode::Retry { force } => {
                ctx.enter(Phase::Retrying);
                let urls = if force {
                    self.ledger.list_all().await
                } else {
                    self.ledger.list_eligible(max).await
                };
                stats.urls_from_ledger = urls.len();
                info!(urls = urls.len(), force, "Retrying ledger URLs");
                urls
            }
        }
    }

    /// Unpack downloaded archives; returns every file the parse stage should see.
    async fn extract_all(&self, results: &[DownloadResult], stats: &mut RunStats) -> Vec<PathBuf> {
        let mut files = Vec::new();

        for r in results.iter().filter(|r| r.success) {
            let path = r.destination_path.clone();
            if detect_path(&path).is_none() {
                files.push(path);
                continue;
            }

            let remove = self.config.remove_archives;
            let extracted = tokio::task::spawn_blocking(move || extract(&path, remove)).await;
            match extracted {
                Ok(result) if result.ok => {
                    stats.archives_extracted += 1;
                    self.metrics.record_extraction(true);
                    files.extend(files_under(&result.destination_dir));
                }
                Ok(_) => {
                    stats.extractions_failed += 1;
                    self.metrics.record_extraction(false);
                }
                Err(e) => {
                    warn!(file = %r.destination_path.display(), error = %e, "Extraction task failed");
                    stats.extractions_failed += 1;
                    self.metrics.record_extraction(false);
                }
            }
        }

        files
    }

    /// Upsert each file's records as soon as the parser hands them over, so no
    /// more than `PARSE_QUEUE` parsed files are ever held at once. Returns
    /// whether the run was cancelled part way.
    async fn parse_and_ingest(
        &self,
        database: &Database,
        files: Vec<PathBuf>,
        ctx: &RunContext,
        stats: &mut RunStats,
    ) -> Result<bool, IngestError> {
        let metrics = self.metrics.as_ref();
        let (mut parsed, parser) = spawn_parser(files, self.metrics.clone(), PARSE_QUEUE);
        let mut ingesting = false;

        while let Some(ParsedFile { path, parsed: doc }) = parsed.recv().await {
            if ctx.is_cancelled() {
                return Ok(true);
            }
            if !ingesting && !matches!(doc, Parsed::Empty(_) | Parsed::Unrecognized) {
                ctx.enter(Phase::Ingesting);
                ingesting = true;
            }

            let outcome = match doc {
                Parsed::Bill(bill) => {
                    stats.bills_parsed += 1;
                    database.ingest_bills(std::slice::from_ref(&bill), metrics).await?
                }
                Parsed::Vote(vote) => {
                    stats.votes_parsed += 1;
                    database.ingest_votes(std::slice::from_ref(&vote), metrics).await?
                }
                Parsed::Legislators(legislators) => {
                    stats.legislators_parsed += legislators.len();
                    database.ingest_legislators(&legislators, metrics).await?
                }
                Parsed::Empty(_) | Parsed::Unrecognized => {
                    debug!(file = %path.display(), "No records in file");
                    stats.documents_skipped += 1;
                    continue;
                }
            };
            stats.upserts.merge(outcome);
        }

        if let Err(e) = parser.await {
            warn!(error = %e, "Parse task failed");
        }
        info!(
            bills = stats.bills_parsed,
            votes = stats.votes_parsed,
            legislators = stats.legislators_parsed,
            skipped = stats.documents_skipped,
            upserted = stats.upserts.upserted,
            "Parse and ingest complete"
        );
        Ok(false)
    }

    fn finish(&self, ctx: &RunContext, mut stats: RunStats, cancelled: bool) -> RunStats {
        stats.cancelled = cancelled;
        ctx.enter(Phase::Finished);
        if cancelled {
            warn!("Ingest run cancelled");
        }
        info!("{stats}");
        stats
    }
}

/// Parse `files` on a blocking thread, handing each result over as soon as it
/// is read. The parser stops early once the receiver is dropped.
fn spawn_parser(
    files: Vec<PathBuf>,
    metrics: Arc<dyn MetricsSink>,
    capacity: usize,
) -> (mpsc::Receiver<ParsedFile>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let handle = tokio::task::spawn_blocking(move || {
        for path in files {
            let parsed = parse_file(&path);
            match &parsed {
                Parsed::Bill(_) => metrics.record_parse("bill", true),
                Parsed::Vote(_) => metrics.record_parse("vote", true),
                Parsed::Legislators(_) => metrics.record_parse("legislator", true),
                Parsed::Empty(kind) => {
                    info!(file = %path.display(), kind = kind.as_str(), "Nothing reliable to parse, skipping");
                    metrics.record_parse(metric_kind(*kind), false);
                }
                Parsed::Unrecognized => {}
            }
            if tx.blocking_send(ParsedFile { path, parsed }).is_err() {
                break;
            }
        }
    });
    (rx, handle)
}

fn metric_kind(kind: DocumentKind) -> &'static str {
    match kind {
        DocumentKind::BillStatus => "bill",
        DocumentKind::RollCall => "vote",
        DocumentKind::Legislators | DocumentKind::Unknown => "legislator",
    }
}

fn files_under(dir: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}
