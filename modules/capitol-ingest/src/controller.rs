//! Run controller: at most one pipeline run in flight, observable without
//! waiting on it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::discovery::DiscoveryResult;
use crate::pipeline::{Phase, Pipeline, RunContext, RunMode, RunStats};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ControlState {
    Idle,
    Running { phase: Phase },
    Failed { error: String },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StartError {
    #[error("a run is already in progress")]
    AlreadyRunning,
}

/// Outcome of the most recent finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stats: Option<RunStats>,
    pub error: Option<String>,
}

/// Point-in-time view for `/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    /// `idle`, `running`, `retrying` or `failed`.
    pub state: &'static str,
    pub phase: Option<Phase>,
    pub run_id: Option<Uuid>,
    pub error: Option<String>,
    pub last_discovery: Option<DateTime<Utc>>,
    pub retry_count: usize,
    pub last_run: Option<RunSummary>,
}

struct ActiveRun {
    run_id: Uuid,
    ctx: RunContext,
}

struct Inner {
    pipeline: Arc<Pipeline>,
    running: AtomicBool,
    failure: Mutex<Option<String>>,
    active: Mutex<Option<ActiveRun>>,
    last_run: Mutex<Option<RunSummary>>,
    last_discovery: Mutex<Option<DateTime<Utc>>>,
    idle: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

impl Controller {
    pub fn new(pipeline: Pipeline) -> Self {
        let last_discovery = DiscoveryResult::load(&pipeline.config().discovery_path).map(|d| d.generated_at);
        let (idle, _) = watch::channel(true);

        Self {
            inner: Arc::new(Inner {
                pipeline: Arc::new(pipeline),
                running: AtomicBool::new(false),
                failure: Mutex::new(None),
                active: Mutex::new(None),
                last_run: Mutex::new(None),
                last_discovery: Mutex::new(last_discovery),
                idle,
            }),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Launch a run in the background. Refused while another is in flight.
    pub fn try_start(&self, mode: RunMode) -> Result<Uuid, StartError> {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(StartError::AlreadyRunning);
        }

        let run_id = Uuid::new_v4();
        let ctx = RunContext::new();
        *lock(&self.inner.active) = Some(ActiveRun {
            run_id,
            ctx: ctx.clone(),
        });
        *lock(&self.inner.failure) = None;
        self.inner.idle.send_replace(false);

        info!(%run_id, %mode, "Run started");
        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.execute(run_id, mode, ctx).await;
        });

        Ok(run_id)
    }

    /// Signal the current run to stop. Returns false when nothing is running.
    pub fn cancel(&self) -> bool {
        match lock(&self.inner.active).as_ref() {
            Some(active) => {
                info!(run_id = %active.run_id, "Cancellation requested");
                active.ctx.cancel();
                true
            }
            None => false,
        }
    }

    pub fn state(&self) -> ControlState {
        if let Some(active) = lock(&self.inner.active).as_ref() {
            return ControlState::Running {
                phase: active.ctx.phase(),
            };
        }
        match lock(&self.inner.failure).clone() {
            Some(error) => ControlState::Failed { error },
            None => ControlState::Idle,
        }
    }

    /// Current state plus ledger size. Reads only in-memory state.
    pub async fn status(&self) -> StatusSnapshot {
        let state = self.state();
        let run_id = lock(&self.inner.active).as_ref().map(|a| a.run_id);
        let retry_count = self.inner.pipeline.ledger().len();

        let (label, phase, error) = match state {
            ControlState::Idle => ("idle", None, None),
            ControlState::Running { phase: Phase::Retrying } => ("retrying", Some(Phase::Retrying), None),
            ControlState::Running { phase } => ("running", Some(phase), None),
            ControlState::Failed { error } => ("failed", None, Some(error)),
        };

        StatusSnapshot {
            state: label,
            phase,
            run_id,
            error,
            last_discovery: *lock(&self.inner.last_discovery),
            retry_count,
            last_run: lock(&self.inner.last_run).clone(),
        }
    }

    /// Resolve once no run is in flight.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.idle.subscribe();
        let _ = rx.wait_for(|idle| *idle).await;
    }
}

impl Inner {
    async fn execute(self: Arc<Self>, run_id: Uuid, mode: RunMode, ctx: RunContext) {
        let started_at = Utc::now();
        let pipeline = self.pipeline.clone();
        let run_ctx = ctx.clone();

        // Run on its own task so a panic inside a stage surfaces as a join error.
        let joined = tokio::spawn(async move { pipeline.run(mode, &run_ctx).await }).await;

        let (stats, failure) = match joined {
            Ok(Ok(stats)) => (Some(stats), None),
            Ok(Err(e)) => (None, Some(format!("{e:#}"))),
            Err(e) => (None, Some(format!("run task failed: {e}"))),
        };

        match &failure {
            Some(err) => error!(%run_id, error = err.as_str(), "Run failed"),
            None => info!(%run_id, "Run finished"),
        }
        self.pipeline.metrics().record_run(failure.is_none());

        if let Some(at) = stats.as_ref().and_then(|s| s.discovered_at) {
            *lock(&self.last_discovery) = Some(at);
        }
        *lock(&self.last_run) = Some(RunSummary {
            run_id,
            mode,
            started_at,
            finished_at: Utc::now(),
            stats,
            error: failure.clone(),
        });
        *lock(&self.failure) = failure;
        *lock(&self.active) = None;

        if self
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(%run_id, "Run flag was already clear");
        }
        self.idle.send_replace(true);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
