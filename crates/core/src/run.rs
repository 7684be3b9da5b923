//! Run tracking — one triggered execution of a stage.
//!
//! A run moves Pending → Running → {Succeeded, Failed}. The coordinator
//! holds no state beyond the in-flight [`RunRecord`]; completed records
//! are appended to a JSONL log and that is the only persistent artifact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stage::Stage;

/// How a run was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Manually dispatched via the CLI, regardless of schedule.
    Manual,
    /// Triggered by the cron schedule.
    Scheduled,
}

/// Current status of a run (or of one source within it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Outcome of one source's script within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub source: String,
    pub status: RunStatus,
    /// Exit code of the script process, if it ran to completion.
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceOutcome {
    pub fn succeeded(source: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            source: source.into(),
            status: RunStatus::Succeeded,
            exit_code: Some(0),
            duration_ms,
            error: None,
        }
    }

    pub fn failed(
        source: impl Into<String>,
        exit_code: Option<i32>,
        duration_ms: u64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            status: RunStatus::Failed,
            exit_code,
            duration_ms,
            error: Some(error.into()),
        }
    }
}

/// One triggered execution of a stage.
///
/// Serialized as a single JSONL line on completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub stage: Stage,
    pub trigger: TriggerKind,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub sources: Vec<SourceOutcome>,
    /// Run-level failure (install or credential resolution), as opposed
    /// to a per-source script failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunRecord {
    /// Create a new Pending run.
    pub fn new(stage: Stage, trigger: TriggerKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            stage,
            trigger,
            status: RunStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: 0,
            sources: Vec::new(),
            error: None,
        }
    }

    /// Transition Pending → Running.
    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Utc::now();
    }

    /// Abort with a run-level error before any source executed.
    pub fn abort(&mut self, error: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.error = Some(error.into());
        self.complete();
    }

    /// Finalize from the collected source outcomes: Succeeded only if
    /// every attempted source succeeded and no run-level error occurred.
    pub fn finish(&mut self, sources: Vec<SourceOutcome>) {
        self.sources = sources;
        self.status = if self.error.is_none()
            && self.sources.iter().all(|o| o.status == RunStatus::Succeeded)
        {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };
        self.complete();
    }

    fn complete(&mut self) {
        let now = Utc::now();
        self.duration_ms = now
            .signed_duration_since(self.started_at)
            .num_milliseconds()
            .max(0) as u64;
        self.completed_at = Some(now);
    }

    /// Number of sources that failed in this run.
    pub fn failed_sources(&self) -> usize {
        self.sources
            .iter()
            .filter(|o| o.status == RunStatus::Failed)
            .count()
    }
}

// ── Tests ────────────────────────────────────────────────────────────
