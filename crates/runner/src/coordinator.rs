//! Stage run coordination.
//!
//! One run = one stage against the enabled sources: install dependencies,
//! resolve stage credentials, then execute each source's script. A failure
//! in one source's script never aborts its siblings; install or credential
//! failures abort the run before any source executes.
//!
//! Stages are triggered independently — the coordinator never chains
//! fetch into process into report within one run.

use tracing::{debug, error, info, warn};

use quantpipe_core::config::PipelineConfig;
use quantpipe_core::error::PipelineError;
use quantpipe_core::run::{RunRecord, RunStatus, SourceOutcome, TriggerKind};
use quantpipe_core::stage::Stage;

use crate::credentials;
use crate::install;
use crate::run_log;
use crate::script::{self, ScriptInvocation};

/// How to dispatch a run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub trigger: TriggerKind,
    /// Restrict the run to these sources (empty = all enabled).
    pub sources: Vec<String>,
    /// Override the stage's configured parallel flag.
    pub parallel: Option<bool>,
}

impl RunOptions {
    pub fn manual() -> Self {
        Self {
            trigger: TriggerKind::Manual,
            sources: Vec::new(),
            parallel: None,
        }
    }

    pub fn scheduled() -> Self {
        Self {
            trigger: TriggerKind::Scheduled,
            sources: Vec::new(),
            parallel: None,
        }
    }
}

/// Execute one stage run and append it to the run log.
///
/// Returns `Err` only when the run could not start at all (bad source
/// filter). A run that started and failed comes back as `Ok` with
/// [`RunStatus::Failed`] — callers inspect the record.
pub async fn run_stage(
    config: &PipelineConfig,
    stage: Stage,
    options: RunOptions,
) -> Result<RunRecord, PipelineError> {
    let stage_cfg = config.stages.get(stage);
    let selected = select_sources(config, stage, &options.sources)?;

    let mut record = RunRecord::new(stage, options.trigger);
    info!(
        run_id = %record.id,
        stage = %stage,
        trigger = ?options.trigger,
        sources = selected.len(),
        "run started"
    );
    record.start();

    if selected.is_empty() {
        warn!(stage = %stage, "no enabled source has a script for this stage");
    }

    // Install step — fatal before any source executes.
    if let Err(e) = install::run_install(&config.install).await {
        error!(run_id = %record.id, stage = %stage, error = %e, "run aborted by install step");
        record.abort(e.to_string());
        run_log::append_run_log(&config.log.data_dir, &record);
        return Ok(record);
    }

    // Stage credentials — also fatal before any source executes.
    let secrets = match credentials::resolve_secrets(&stage_cfg.secrets) {
        Ok(s) => s,
        Err(e) => {
            error!(run_id = %record.id, stage = %stage, error = %e, "run aborted — credential missing");
            record.abort(e.to_string());
            run_log::append_run_log(&config.log.data_dir, &record);
            return Ok(record);
        }
    };

    // Secrets configured for other stages are stripped from the child
    // environment so fetch credentials never reach process/report scripts.
    let foreign_secrets = foreign_secret_names(config, stage);

    let invocations: Vec<ScriptInvocation> = selected
        .into_iter()
        .map(|(name, rel_path)| {
            let mut env = stage_cfg.env.clone();
            env.extend(secrets.clone());
            ScriptInvocation {
                source: name,
                interpreter: config.scripts.interpreter.clone(),
                script: config.script_path(&rel_path),
                scripts_root: config.scripts.root.clone(),
                env,
                env_remove: foreign_secrets.clone(),
                timeout: stage_cfg.script_timeout(),
            }
        })
        .collect();

    let parallel = options.parallel.unwrap_or(stage_cfg.parallel);
    let outcomes: Vec<SourceOutcome> = if parallel {
        futures::future::join_all(invocations.into_iter().map(script::execute)).await
    } else {
        let mut outcomes = Vec::with_capacity(invocations.len());
        for invocation in invocations {
            outcomes.push(script::execute(invocation).await);
        }
        outcomes
    };

    record.finish(outcomes);
    match record.status {
        RunStatus::Succeeded => info!(
            run_id = %record.id,
            stage = %stage,
            sources = record.sources.len(),
            duration_ms = record.duration_ms,
            "run succeeded"
        ),
        _ => error!(
            run_id = %record.id,
            stage = %stage,
            failed = record.failed_sources(),
            duration_ms = record.duration_ms,
            "run failed"
        ),
    }

    run_log::append_run_log(&config.log.data_dir, &record);
    Ok(record)
}

/// Pick the sources to run: enabled, with a script for this stage, in
/// config order. An explicit filter naming an unknown or disabled source
/// is a config error surfaced before anything executes.
fn select_sources(
    config: &PipelineConfig,
    stage: Stage,
    filter: &[String],
) -> Result<Vec<(String, String)>, PipelineError> {
    for name in filter {
        match config.sources.get(name) {
            None => {
                return Err(PipelineError::Config(format!("unknown source '{name}'")));
            }
            Some(source) if !source.enabled => {
                return Err(PipelineError::Config(format!("source '{name}' is disabled")));
            }
            Some(_) => {}
        }
    }

    let mut selected = Vec::new();
    for (name, source) in &config.sources {
        if !filter.is_empty() && !filter.iter().any(|f| f == name) {
            continue;
        }
        if !source.enabled {
            debug!(source = %name, stage = %stage, "source disabled — skipping");
            continue;
        }
        let Some(rel_path) = source.script_for(stage) else {
            debug!(source = %name, stage = %stage, "no script for stage — skipping");
            continue;
        };
        selected.push((name.clone(), rel_path.to_string()));
    }
    Ok(selected)
}

/// Secret names configured for stages other than `stage`.
fn foreign_secret_names(config: &PipelineConfig, stage: Stage) -> Vec<String> {
    let own = &config.stages.get(stage).secrets;
    let mut names: Vec<String> = Vec::new();
    for other in Stage::ALL {
        if other == stage {
            continue;
        }
        for name in &config.stages.get(other).secrets {
            if !own.contains(name) && !names.contains(name) {
                names.push(name.clone());
            }
        }
    }
    names
}

// ── Tests ────────────────────────────────────────────────────────────
