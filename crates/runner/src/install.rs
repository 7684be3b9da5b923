//! Dependency install step.
//!
//! Runs the configured install command (reading the locked dependency
//! manifest) once per run, before any source script executes. A failure
//! here is fatal to the run: no source is attempted.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

use quantpipe_core::config::InstallConfig;
use quantpipe_core::error::PipelineError;

/// Maximum stderr characters carried into the error message.
const STDERR_LIMIT: usize = 2000;

/// Run the install step. Returns `Ok(())` when the step is disabled.
pub async fn run_install(config: &InstallConfig) -> Result<(), PipelineError> {
    if !config.enabled {
        debug!("dependency install disabled — skipping");
        return Ok(());
    }

    info!(
        command = %config.command,
        args = %config.args.join(" "),
        "installing dependencies"
    );

    let child = Command::new(&config.command)
        .args(&config.args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            PipelineError::DependencyInstall(format!(
                "failed to spawn '{}': {e}",
                config.command
            ))
        })?;

    let timeout = Duration::from_secs(config.timeout_secs);
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(PipelineError::DependencyInstall(format!(
                "install execution error: {e}"
            )));
        }
        Err(_) => {
            return Err(PipelineError::DependencyInstall(format!(
                "timed out after {}s",
                config.timeout_secs
            )));
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail = match stderr.char_indices().nth_back(STDERR_LIMIT - 1) {
            Some((i, _)) => &stderr[i..],
            None => &stderr[..],
        };
        return Err(PipelineError::DependencyInstall(format!(
            "'{}' exited with code {}: {}",
            config.command,
            output.status.code().unwrap_or(-1),
            tail.trim()
        )));
    }

    info!("dependencies installed");
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────
