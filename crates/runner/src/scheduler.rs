//! Cron-based scheduler daemon.
//!
//! Keeps an in-memory next-fire time per stage, polls on a fixed
//! interval, and dispatches a run when a stage comes due. Bookkeeping is
//! never persisted: a restart recomputes next fire times from the cron
//! expressions, so windows missed while the daemon was down are skipped,
//! not replayed.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use quantpipe_core::config::PipelineConfig;
use quantpipe_core::error::PipelineError;
use quantpipe_core::stage::Stage;

use crate::coordinator::{self, RunOptions};

/// Poll interval for the scheduler loop.
const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// In-memory scheduler bookkeeping: the next fire time per stage.
#[derive(Debug)]
pub struct SchedulerState {
    next_runs: Vec<(Stage, Option<DateTime<Utc>>)>,
}

impl SchedulerState {
    /// Compute initial fire times from the configured schedules.
    pub fn new(config: &PipelineConfig, now: DateTime<Utc>) -> Result<Self, PipelineError> {
        let mut next_runs = Vec::with_capacity(Stage::ALL.len());
        for stage in Stage::ALL {
            let next = config.stages.get(stage).schedule().next_after(now)?;
            next_runs.push((stage, next));
        }
        Ok(Self { next_runs })
    }

    /// Stages due at `now`, in pipeline order.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<Stage> {
        self.next_runs
            .iter()
            .filter(|(_, next)| matches!(next, Some(t) if *t <= now))
            .map(|(stage, _)| *stage)
            .collect()
    }

    /// Advance a stage's next fire time strictly past `now`.
    pub fn advance(
        &mut self,
        config: &PipelineConfig,
        stage: Stage,
        now: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        let next = config.stages.get(stage).schedule().next_after(now)?;
        if let Some(entry) = self.next_runs.iter_mut().find(|(s, _)| *s == stage) {
            entry.1 = next;
        }
        Ok(())
    }

    pub fn next_for(&self, stage: Stage) -> Option<DateTime<Utc>> {
        self.next_runs
            .iter()
            .find(|(s, _)| *s == stage)
            .and_then(|(_, next)| *next)
    }
}

/// Run the scheduler loop until SIGINT/SIGTERM.
///
/// Fired runs are awaited before the stage's bookkeeping advances, so
/// two runs of the same stage never overlap.
pub async fn run_scheduler(config: &PipelineConfig) -> Result<(), PipelineError> {
    let mut state = SchedulerState::new(config, Utc::now())?;

    info!(poll_secs = POLL_INTERVAL.as_secs(), "scheduler started");
    for stage in Stage::ALL {
        match state.next_for(stage) {
            Some(next) => info!(stage = %stage, next_run_at = %next, "schedule registered"),
            None => warn!(stage = %stage, "schedule never fires"),
        }
    }

    loop {
        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = shutdown_signal() => {
                info!("shutdown signal received — scheduler stopping");
                return Ok(());
            }
        }

        let now = Utc::now();
        for stage in state.due(now) {
            info!(stage = %stage, trigger = "scheduled", "schedule fired");
            // A failed run is already logged by the coordinator; there is
            // no automatic retry — the next window (or a manual dispatch)
            // is the recovery path.
            if let Err(e) = coordinator::run_stage(config, stage, RunOptions::scheduled()).await {
                error!(stage = %stage, error = %e, "scheduled run could not start");
            }
            state.advance(config, stage, Utc::now())?;
        }
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for ctrl_c");
    }
}

// ── Tests ────────────────────────────────────────────────────────────
