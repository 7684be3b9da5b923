//! JSONL run log persistence.
//!
//! `<data_dir>/runs.jsonl` is the coordinator's only persistent artifact.
//! Each line is a self-contained JSON object, so plain append is safe and
//! re-running a stage only ever adds a line.

use std::io::Write;
use std::path::Path;

use tracing::warn;

use quantpipe_core::error::PipelineError;
use quantpipe_core::run::RunRecord;

const LOG_FILE: &str = "runs.jsonl";

/// Append a completed run to `<data_dir>/runs.jsonl`.
///
/// Best-effort: logs warnings on failure, never panics — a run that
/// executed should not be reported as failed because its log line could
/// not be written.
pub fn append_run_log(data_dir: &Path, record: &RunRecord) {
    if let Err(e) = std::fs::create_dir_all(data_dir) {
        warn!(error = %e, dir = %data_dir.display(), "failed to create run log directory");
        return;
    }

    let json_line = match serde_json::to_string(record) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "failed to serialize run record");
            return;
        }
    };

    let log_path = data_dir.join(LOG_FILE);
    let mut file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, path = %log_path.display(), "failed to open run log");
            return;
        }
    };

    if let Err(e) = writeln!(file, "{}", json_line) {
        warn!(error = %e, "failed to write run log entry");
    }
}

/// Read the most recent `limit` runs from the log, oldest first.
///
/// A missing log file is an empty history, not an error. Unparseable
/// lines are skipped with a warning.
pub fn read_recent(data_dir: &Path, limit: usize) -> Result<Vec<RunRecord>, PipelineError> {
    let log_path = data_dir.join(LOG_FILE);
    let content = match std::fs::read_to_string(&log_path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(PipelineError::RunLog(format!("{}: {e}", log_path.display()))),
    };

    let mut records: Vec<RunRecord> = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(line = idx + 1, error = %e, "skipping malformed run log line"),
        }
    }

    let skip = records.len().saturating_sub(limit);
    Ok(records.split_off(skip))
}

// ── Tests ────────────────────────────────────────────────────────────
