//! Script execution for a single source.
//!
//! Each source/stage pair is a standalone executable taking no arguments
//! beyond its environment; exit status is the success signal. stdout and
//! stderr are streamed line-by-line into the log with the source name as
//! a structured field, and a tail of stderr is kept for the outcome.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use quantpipe_core::error::PipelineError;
use quantpipe_core::run::SourceOutcome;

/// Number of trailing stderr lines kept for failure reporting.
const STDERR_TAIL_LINES: usize = 20;

/// Everything needed to execute one source's script for one stage.
#[derive(Debug)]
pub struct ScriptInvocation {
    pub source: String,
    pub interpreter: String,
    /// Resolved script path (scripts root already joined).
    pub script: PathBuf,
    /// Exported to the child as `PYTHONPATH` so shared modules resolve.
    pub scripts_root: PathBuf,
    /// Stage env plus resolved secrets. Values are never logged.
    pub env: HashMap<String, String>,
    /// Env vars removed from the child (secrets belonging to other stages).
    pub env_remove: Vec<String>,
    pub timeout: Duration,
}

/// Execute the script and return its outcome.
///
/// Never returns an error: failures are captured in the outcome so that
/// sibling sources in the same run keep going.
pub async fn execute(invocation: ScriptInvocation) -> SourceOutcome {
    let start = Instant::now();
    let source = invocation.source.clone();

    if !invocation.script.is_file() {
        warn!(
            source = %source,
            script = %invocation.script.display(),
            "script not found"
        );
        return failure(
            &source,
            None,
            start,
            format!("script not found: {}", invocation.script.display()),
        );
    }

    // Log env var names only; values may be secrets.
    let mut env_keys: Vec<&str> = invocation.env.keys().map(String::as_str).collect();
    env_keys.sort_unstable();
    debug!(
        source = %source,
        script = %invocation.script.display(),
        timeout_secs = invocation.timeout.as_secs(),
        env_keys = %env_keys.join(","),
        "executing stage script"
    );

    let mut cmd = Command::new(&invocation.interpreter);
    cmd.arg(&invocation.script)
        .env("PYTHONPATH", &invocation.scripts_root)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for name in &invocation.env_remove {
        cmd.env_remove(name);
    }
    for (k, v) in &invocation.env {
        cmd.env(k, v);
    }

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            return failure(
                &source,
                None,
                start,
                format!("failed to spawn '{}': {e}", invocation.interpreter),
            );
        }
    };

    // Stream child output as it arrives; stderr keeps a bounded tail.
    let stdout_task = child.stdout.take().map(|out| {
        let source = source.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(out).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(source = %source, "{line}");
            }
        })
    });
    let stderr_task = child.stderr.take().map(|err| {
        let source = source.clone();
        tokio::spawn(async move {
            let mut tail: VecDeque<String> = VecDeque::new();
            let mut lines = BufReader::new(err).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(source = %source, "{line}");
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        })
    });

    let status = match tokio::time::timeout(invocation.timeout, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            return failure(&source, None, start, format!("wait error: {e}"));
        }
        Err(_) => {
            warn!(
                source = %source,
                timeout_secs = invocation.timeout.as_secs(),
                "script timed out — killing"
            );
            let _ = child.kill().await;
            return failure(
                &source,
                None,
                start,
                format!("timed out after {}s", invocation.timeout.as_secs()),
            );
        }
    };

    if let Some(task) = stdout_task {
        let _ = task.await;
    }
    let stderr_tail = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    let duration_ms = elapsed_ms(start);
    if status.success() {
        info!(source = %source, duration_ms = duration_ms, "script completed");
        SourceOutcome::succeeded(source, duration_ms)
    } else {
        let code = status.code();
        warn!(
            source = %source,
            exit_code = code.unwrap_or(-1),
            duration_ms = duration_ms,
            "script failed"
        );
        let detail = if stderr_tail.is_empty() {
            format!("exited with code {}", code.unwrap_or(-1))
        } else {
            format!("exited with code {}: {}", code.unwrap_or(-1), stderr_tail)
        };
        failure(&source, code, start, detail)
    }
}

/// Build a failed outcome through the [`PipelineError::ScriptExecution`]
/// taxonomy so run-log messages stay uniform.
fn failure(source: &str, exit_code: Option<i32>, start: Instant, detail: String) -> SourceOutcome {
    let err = PipelineError::ScriptExecution {
        script: source.to_string(),
        detail,
    };
    SourceOutcome::failed(source, exit_code, elapsed_ms(start), err.to_string())
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use quantpipe_core::run::RunStatus;
    use std::path::Path;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    fn invocation(script: PathBuf, root: PathBuf) -> ScriptInvocation {
        ScriptInvocation {
            source: "gcs".to_string(),
            interpreter: "sh".to_string(),
            script,
            scripts_root: root,
            env: HashMap::new(),
            env_remove: Vec::new(),
            timeout: Duration::from_secs(10),
        }
    }

    #[tokio::test]
    async fn test_successful_script() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "ok.sh", "echo hello\n");
        let outcome = execute(invocation(script, dir.path().to_path_buf())).await;
        assert_eq!(outcome.status, RunStatus::Succeeded);
        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_nonzero_exit_captured() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "fail.sh", "echo boom >&2\nexit 3\n");
        let outcome = execute(invocation(script, dir.path().to_path_buf())).await;
        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.exit_code, Some(3));
        let detail = outcome.error.unwrap();
        assert!(detail.contains("code 3"), "got: {detail}");
        assert!(detail.contains("boom"), "got: {detail}");
    }

    #[tokio::test]
    async fn test_missing_script_fails_without_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = execute(invocation(
            dir.path().join("absent.sh"),
            dir.path().to_path_buf(),
        ))
        .await;
        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.exit_code, None);
        assert!(outcome.error.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_env_and_module_path_injected() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "env.sh",
            "test \"$GCS_DEVELOPER_KEY\" = \"k1\" || exit 1\n\
             test \"$PYTHONPATH\" = \"$EXPECTED_ROOT\" || exit 2\n",
        );
        let mut inv = invocation(script, dir.path().to_path_buf());
        inv.env
            .insert("GCS_DEVELOPER_KEY".to_string(), "k1".to_string());
        inv.env.insert(
            "EXPECTED_ROOT".to_string(),
            dir.path().to_string_lossy().into_owned(),
        );
        let outcome = execute(inv).await;
        assert_eq!(outcome.status, RunStatus::Succeeded, "{:?}", outcome.error);
    }

    #[tokio::test]
    async fn test_env_remove_strips_foreign_secrets() {
        // SAFETY: test-only, nextest runs each test in its own process
        unsafe {
            std::env::set_var("QP_SCRIPT_TEST_FOREIGN", "leaked");
        }
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "noleak.sh",
            "test -z \"$QP_SCRIPT_TEST_FOREIGN\"\n",
        );
        let mut inv = invocation(script, dir.path().to_path_buf());
        inv.env_remove.push("QP_SCRIPT_TEST_FOREIGN".to_string());
        let outcome = execute(inv).await;
        unsafe {
            std::env::remove_var("QP_SCRIPT_TEST_FOREIGN");
        }
        assert_eq!(outcome.status, RunStatus::Succeeded, "{:?}", outcome.error);
    }

    #[tokio::test]
    async fn test_timeout_kills_script() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "slow.sh", "sleep 30\n");
        let mut inv = invocation(script, dir.path().to_path_buf());
        inv.timeout = Duration::from_millis(200);
        let outcome = execute(inv).await;
        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(outcome.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_bad_interpreter_fails() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "ok.sh", "echo hi\n");
        let mut inv = invocation(script, dir.path().to_path_buf());
        inv.interpreter = "quantpipe-no-such-interpreter".to_string();
        let outcome = execute(inv).await;
        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(outcome.error.unwrap().contains("failed to spawn"));
    }
}
