//! Run counters and their optional Prometheus text rendering.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

/// Pluggable metrics backend. Chosen once at startup from config.
pub trait MetricsSink: Send + Sync {
    fn record_download(&self, success: bool);

    fn record_bytes(&self, bytes: u64);

    fn record_extraction(&self, success: bool);

    fn record_parse(&self, kind: &str, success: bool);

    fn record_upsert(&self, table: &str, success: bool);

    fn record_run(&self, success: bool);

    /// Prometheus text exposition, or `None` when metrics are disabled.
    fn render(&self) -> Option<String>;
}

/// Metrics disabled.
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_download(&self, _success: bool) {}

    fn record_bytes(&self, _bytes: u64) {}

    fn record_extraction(&self, _success: bool) {}

    fn record_parse(&self, _kind: &str, _success: bool) {}

    fn record_upsert(&self, _table: &str, _success: bool) {}

    fn record_run(&self, _success: bool) {}

    fn render(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Default)]
struct Outcome {
    ok: AtomicU64,
    failed: AtomicU64,
}

impl Outcome {
    fn record(&self, success: bool) {
        let c = if success { &self.ok } else { &self.failed };
        c.fetch_add(1, Ordering::Relaxed);
    }
}

/// In-process counters exposed in Prometheus text format.
#[derive(Debug, Default)]
pub struct PrometheusMetrics {
    downloads: Outcome,
    bytes: AtomicU64,
    extractions: Outcome,
    bills_parsed: Outcome,
    votes_parsed: Outcome,
    legislators_parsed: Outcome,
    bill_upserts: Outcome,
    vote_upserts: Outcome,
    legislator_upserts: Outcome,
    runs: Outcome,
}

impl PrometheusMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetricsSink for PrometheusMetrics {
    fn record_download(&self, success: bool) {
        self.downloads.record(success);
    }

    fn record_bytes(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_extraction(&self, success: bool) {
        self.extractions.record(success);
    }

    fn record_parse(&self, kind: &str, success: bool) {
        match kind {
            "bill" => self.bills_parsed.record(success),
            "vote" => self.votes_parsed.record(success),
            _ => self.legislators_parsed.record(success),
        }
    }

    fn record_upsert(&self, table: &str, success: bool) {
        match table {
            "bills" => self.bill_upserts.record(success),
            "votes" => self.vote_upserts.record(success),
            _ => self.legislator_upserts.record(success),
        }
    }

    fn record_run(&self, success: bool) {
        self.runs.record(success);
    }

    fn render(&self) -> Option<String> {
        let mut out = String::new();
        outcome(&mut out, "capitol_downloads_total", "Download attempts by outcome", &self.downloads);
        counter(
            &mut out,
            "capitol_download_bytes_total",
            "Bytes written to disk by downloads",
            self.bytes.load(Ordering::Relaxed),
        );
        outcome(&mut out, "capitol_extractions_total", "Archive extractions by outcome", &self.extractions);

        labelled(
            &mut out,
            "capitol_parsed_documents_total",
            "Parsed documents by kind and outcome",
            "kind",
            &[
                ("bill", &self.bills_parsed),
                ("vote", &self.votes_parsed),
                ("legislator", &self.legislators_parsed),
            ],
        );
        labelled(
            &mut out,
            "capitol_upserts_total",
            "Record upserts by table and outcome",
            "table",
            &[
                ("bills", &self.bill_upserts),
                ("votes", &self.vote_upserts),
                ("legislators", &self.legislator_upserts),
            ],
        );
        outcome(&mut out, "capitol_runs_total", "Pipeline runs by outcome", &self.runs);
        Some(out)
    }
}

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} counter");
    let _ = writeln!(out, "{name} {value}");
}

fn outcome(out: &mut String, name: &str, help: &str, o: &Outcome) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} counter");
    let _ = writeln!(out, "{name}{{outcome=\"ok\"}} {}", o.ok.load(Ordering::Relaxed));
    let _ = writeln!(out, "{name}{{outcome=\"failed\"}} {}", o.failed.load(Ordering::Relaxed));
}

fn labelled(out: &mut String, name: &str, help: &str, label: &str, series: &[(&str, &Outcome)]) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} counter");
    for (value, o) in series {
        let _ = writeln!(out, "{name}{{{label}=\"{value}\",outcome=\"ok\"}} {}", o.ok.load(Ordering::Relaxed));
        let _ = writeln!(out, "{name}{{{label}=\"{value}\",outcome=\"failed\"}} {}", o.failed.load(Ordering::Relaxed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_renders_nothing() {
        let m = NoopMetrics;
        m.record_download(true);
        assert!(m.render().is_none());
    }

    #[test]
    fn prometheus_renders_counters() {
        let m = PrometheusMetrics::new();
        m.record_download(true);
        m.record_download(true);
        m.record_download(false);
        m.record_bytes(2048);
        m.record_parse("vote", true);

        let text = m.render().unwrap();
        assert!(text.contains("capitol_downloads_total{outcome=\"ok\"} 2"));
        assert!(text.contains("capitol_downloads_total{outcome=\"failed\"} 1"));
        assert!(text.contains("capitol_download_bytes_total 2048"));
        assert!(text.contains("capitol_parsed_documents_total{kind=\"vote\",outcome=\"ok\"} 1"));
        assert!(text.contains("# TYPE capitol_runs_total counter"));
    }

    #[test]
    fn upserts_are_broken_down_by_table() {
        let m = PrometheusMetrics::new();
        m.record_upsert("bills", true);
        m.record_upsert("bills", true);
        m.record_upsert("votes", false);
        m.record_upsert("legislators", true);

        let text = m.render().unwrap();
        assert!(text.contains("capitol_upserts_total{table=\"bills\",outcome=\"ok\"} 2"));
        assert!(text.contains("capitol_upserts_total{table=\"votes\",outcome=\"failed\"} 1"));
        assert!(text.contains("capitol_upserts_total{table=\"legislators\",outcome=\"ok\"} 1"));
        assert!(text.contains("capitol_upserts_total{table=\"votes\",outcome=\"ok\"} 0"));
    }
}
