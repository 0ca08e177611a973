//! Retry ledger: durable record of URLs whose download failed.
//!
//! One record per URL. `attempts` only grows until the record is removed on a
//! successful download. A mutation is applied to a copy of the records and the
//! copy is written atomically off the runtime; the in-memory state only changes
//! once the write has landed. The lock is held across the write, so concurrent
//! failures cannot interleave. `len` reads a counter and never waits on it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use capitol_common::persist::{quarantine, read_json, write_json_atomic};
use capitol_common::PersistError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryRecord {
    pub url: String,
    pub attempts: u32,
    pub first_failed: DateTime<Utc>,
    pub last_attempted: DateTime<Utc>,
    pub last_error: String,
}

/// On-disk shape: `{"failures": [...]}`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    failures: Vec<RetryRecord>,
}

pub struct RetryLedger {
    path: PathBuf,
    records: Mutex<HashMap<String, RetryRecord>>,
    count: AtomicUsize,
}

impl RetryLedger {
    /// Load the ledger at `path`. A missing file is an empty ledger; a corrupt
    /// one is moved aside and replaced by an empty ledger.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = match read_json::<LedgerFile>(&path) {
            Ok(Some(file)) => file,
            Ok(None) => LedgerFile::default(),
            Err(PersistError::Corrupt { source, .. }) => {
                let moved = quarantine(&path)?;
                warn!(
                    path = %path.display(),
                    moved_to = %moved.display(),
                    error = %source,
                    "Retry ledger was corrupt, starting empty"
                );
                LedgerFile::default()
            }
            Err(e) => return Err(e.into()),
        };

        let records: HashMap<String, RetryRecord> = file
            .failures
            .into_iter()
            .map(|r| (r.url.clone(), r))
            .collect();
        info!(path = %path.display(), entries = records.len(), "Retry ledger loaded");

        Ok(Self {
            path,
            count: AtomicUsize::new(records.len()),
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a failure. Creates the record with `attempts = 1` or bumps an
    /// existing one. Returns the new attempt count.
    pub async fn add(&self, url: &str, error: &str) -> Result<u32> {
        let mut records = self.records.lock().await;
        let mut next = records.clone();
        let now = Utc::now();
        let record = next
            .entry(url.to_string())
            .and_modify(|r| {
                r.attempts += 1;
                r.last_attempted = now;
                r.last_error = error.to_string();
            })
            .or_insert_with(|| RetryRecord {
                url: url.to_string(),
                attempts: 1,
                first_failed: now,
                last_attempted: now,
                last_error: error.to_string(),
            });
        let attempts = record.attempts;
        self.persist(&next).await?;
        self.count.store(next.len(), Ordering::Release);
        *records = next;
        Ok(attempts)
    }

    /// Drop the record for `url`. Returns whether one existed.
    pub async fn remove(&self, url: &str) -> Result<bool> {
        let mut records = self.records.lock().await;
        if !records.contains_key(url) {
            return Ok(false);
        }
        let mut next = records.clone();
        next.remove(url);
        self.persist(&next).await?;
        self.count.store(next.len(), Ordering::Release);
        *records = next;
        Ok(true)
    }

    /// URLs with `attempts < max_attempts`, oldest failure first.
    pub async fn list_eligible(&self, max_attempts: u32) -> Vec<String> {
        let records = self.records.lock().await;
        sorted(records.values().filter(|r| r.attempts < max_attempts))
    }

    /// Every URL in the ledger regardless of attempts. Used for forced retries.
    pub async fn list_all(&self) -> Vec<String> {
        let records = self.records.lock().await;
        sorted(records.values())
    }

    pub async fn get(&self, url: &str) -> Option<RetryRecord> {
        self.records.lock().await.get(url).cloned()
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn persist(&self, records: &HashMap<String, RetryRecord>) -> Result<()> {
        let mut failures: Vec<RetryRecord> = records.values().cloned().collect();
        failures.sort_by(|a, b| a.first_failed.cmp(&b.first_failed).then_with(|| a.url.cmp(&b.url)));
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_json_atomic(&path, &LedgerFile { failures }))
            .await
            .map_err(anyhow::Error::from)??;
        Ok(())
    }
}

fn sorted<'a>(records: impl Iterator<Item = &'a RetryRecord>) -> Vec<String> {
    let mut v: Vec<&RetryRecord> = records.collect();
    v.sort_by(|a, b| a.first_failed.cmp(&b.first_failed).then_with(|| a.url.cmp(&b.url)));
    v.into_iter().map(|r| r.url.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_in(dir: &tempfile::TempDir) -> RetryLedger {
        RetryLedger::open(dir.path().join("ledger.json")).unwrap()
    }

    #[tokio::test]
    async fn first_failure_creates_single_record() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);

        let attempts = ledger.add("https://a.gov/x.zip", "HTTP 503").await.unwrap();

        assert_eq!(attempts, 1);
        assert_eq!(ledger.len(), 1);
        let rec = ledger.get("https://a.gov/x.zip").await.unwrap();
        assert_eq!(rec.attempts, 1);
        assert_eq!(rec.last_error, "HTTP 503");
        assert_eq!(rec.first_failed, rec.last_attempted);
    }

    #[tokio::test]
    async fn repeat_failure_increments_without_duplicating() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);

        ledger.add("https://a.gov/x.zip", "timeout").await.unwrap();
        let first = ledger.get("https://a.gov/x.zip").await.unwrap();
        ledger.add("https://a.gov/x.zip", "HTTP 502").await.unwrap();

        assert_eq!(ledger.len(), 1);
        let rec = ledger.get("https://a.gov/x.zip").await.unwrap();
        assert_eq!(rec.attempts, 2);
        assert_eq!(rec.last_error, "HTTP 502");
        assert_eq!(rec.first_failed, first.first_failed);
    }

    #[tokio::test]
    async fn remove_clears_record_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let ledger = RetryLedger::open(&path).unwrap();
        ledger.add("https://a.gov/x.zip", "boom").await.unwrap();

        assert!(ledger.remove("https://a.gov/x.zip").await.unwrap());
        assert!(!ledger.remove("https://a.gov/x.zip").await.unwrap());

        let reopened = RetryLedger::open(&path).unwrap();
        assert!(reopened.is_empty());
    }

    #[tokio::test]
    async fn eligible_excludes_exhausted_and_orders_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);

        ledger.add("https://a.gov/old", "e").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        ledger.add("https://a.gov/exhausted", "e").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        ledger.add("https://a.gov/new", "e").await.unwrap();
        for _ in 0..4 {
            ledger.add("https://a.gov/exhausted", "e").await.unwrap();
        }

        let eligible = ledger.list_eligible(5).await;
        assert_eq!(eligible, vec!["https://a.gov/old", "https://a.gov/new"]);

        let all = ledger.list_all().await;
        assert_eq!(all, vec!["https://a.gov/old", "https://a.gov/exhausted", "https://a.gov/new"]);
    }

    #[tokio::test]
    async fn survives_reopen_with_wire_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        {
            let ledger = RetryLedger::open(&path).unwrap();
            ledger.add("https://a.gov/x.zip", "HTTP 500").await.unwrap();
            ledger.add("https://a.gov/x.zip", "HTTP 500").await.unwrap();
        }

        let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        let entry = &raw["failures"][0];
        assert_eq!(entry["url"], "https://a.gov/x.zip");
        assert_eq!(entry["attempts"], 2);
        assert!(entry["first_failed"].is_string());
        assert!(entry["last_attempted"].is_string());
        assert_eq!(entry["last_error"], "HTTP 500");

        let reopened = RetryLedger::open(&path).unwrap();
        assert_eq!(reopened.get("https://a.gov/x.zip").await.unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn corrupt_file_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, b"{\"failures\": [oops").unwrap();

        let ledger = RetryLedger::open(&path).unwrap();

        assert!(ledger.is_empty());
        let quarantined = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().contains(".corrupt-"));
        assert!(quarantined);
    }

    #[tokio::test]
    async fn len_does_not_wait_for_a_write_in_progress() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);
        ledger.add("https://a.gov/x.zip", "e").await.unwrap();

        let _held = ledger.records.lock().await;
        let len = tokio::time::timeout(std::time::Duration::from_millis(100), async { ledger.len() })
            .await
            .unwrap();
        assert_eq!(len, 1);
        assert!(!ledger.is_empty());
    }

    #[tokio::test]
    async fn failed_write_leaves_records_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("state");
        let path = sub.join("ledger.json");
        let ledger = RetryLedger::open(&path).unwrap();
        ledger.add("https://a.gov/kept.zip", "HTTP 503").await.unwrap();

        // A plain file where the ledger's directory should be makes every write fail.
        std::fs::remove_dir_all(&sub).unwrap();
        std::fs::write(&sub, b"not a directory").unwrap();

        assert!(ledger.add("https://a.gov/new.zip", "timeout").await.is_err());
        assert!(ledger.add("https://a.gov/kept.zip", "timeout").await.is_err());
        assert!(ledger.remove("https://a.gov/kept.zip").await.is_err());

        assert_eq!(ledger.len(), 1);
        assert!(ledger.get("https://a.gov/new.zip").await.is_none());
        let kept = ledger.get("https://a.gov/kept.zip").await.unwrap();
        assert_eq!(kept.attempts, 1);
        assert_eq!(kept.last_error, "HTTP 503");
        assert_eq!(ledger.list_all().await, vec!["https://a.gov/kept.zip"]);
    }
}
