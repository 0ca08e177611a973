pub mod controller;
pub mod discovery;
pub mod download;
pub mod error;
pub mod extract;
mod http;
pub mod ledger;
pub mod metrics;
pub mod parse;
pub mod pipeline;
pub mod store;
pub mod validate;

pub use controller::{ControlState, Controller, RunSummary, StartError, StatusSnapshot};
pub use discovery::{Discovery, DiscoveryResult};
pub use download::{Downloader, HeadInfo};
pub use error::{IngestError, Result};
pub use extract::extract;
pub use ledger::{RetryLedger, RetryRecord};
pub use metrics::{MetricsSink, NoopMetrics, PrometheusMetrics};
pub use pipeline::{Phase, Pipeline, RunContext, RunMode, RunStats};
pub use store::Database;
pub use validate::Validator;
