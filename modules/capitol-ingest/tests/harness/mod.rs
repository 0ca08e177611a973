//! Test harness for integration tests.
//!
//! Stands up local axum servers in place of the remote bulk-data hosts, and
//! builds a `Config` whose every path lives inside a temp directory.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use capitol_common::Config;

/// Serve `router` on an ephemeral local port. Returns `http://127.0.0.1:<port>`.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// Config that touches nothing outside `dir` and no real network hosts.
pub fn test_config(dir: &Path) -> Config {
    Config {
        congresses: 118..=118,
        collections: Vec::new(),
        index_sources: Vec::new(),
        legislator_mirror: None,
        discovery_path: dir.join("discovery.json"),
        output_dir: dir.join("downloads"),
        retry_ledger_path: dir.join("retry_ledger.json"),
        concurrency: 3,
        max_attempts: 1,
        retry_max_attempts: 3,
        connect_timeout: Duration::from_secs(2),
        read_timeout: Duration::from_secs(5),
        backoff_base: Duration::from_millis(5),
        backoff_cap: Duration::from_millis(20),
        ..Config::default()
    }
}

/// Tracks how many requests a handler is serving at once.
#[derive(Debug, Default)]
pub struct InFlight {
    current: AtomicUsize,
    max: AtomicUsize,
    total: AtomicUsize,
}

impl InFlight {
    pub fn enter(self: &Arc<Self>) -> InFlightGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(self.clone())
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

pub struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Deterministic non-repeating payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 251) % 256) as u8).collect()
}
