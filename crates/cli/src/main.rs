//! quantpipe — scheduled fetch → process → report pipeline orchestrator.
//!
//! Manual dispatch (`run`), scheduler daemon (`daemon`), config checks
//! (`validate`, `status`) and run history (`history`). Exit code is 1
//! when a dispatched run fails.

use clap::Parser;
use tracing::error;

use quantpipe_core::config::{self, PipelineConfig};
use quantpipe_core::run::{RunStatus, TriggerKind};
use quantpipe_core::stage::Stage;
use quantpipe_runner::coordinator::RunOptions;
use quantpipe_runner::{run_log, run_scheduler, run_stage};

mod cli;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    config::load_dotenv();
    let cli = Cli::parse();
    let config = PipelineConfig::from_file(&cli.config)?;

    match cli.command {
        Command::Run {
            stage,
            sources,
            parallel,
        } => {
            let options = RunOptions {
                trigger: TriggerKind::Manual,
                sources,
                parallel: parallel.then_some(true),
            };
            let record = run_stage(&config, stage, options).await?;
            if record.status == RunStatus::Failed {
                error!(run_id = %record.id, "run failed — see log output above");
                std::process::exit(1);
            }
        }
        Command::Daemon => {
            config.log_summary();
            run_scheduler(&config).await?;
        }
        Command::Validate => {
            config.log_summary();
            let enabled = config.sources.values().filter(|s| s.enabled).count();
            println!(
                "configuration OK: {} sources ({} enabled)",
                config.sources.len(),
                enabled
            );
        }
        Command::Status { at } => print_status(&config, at)?,
        Command::History { limit } => print_history(&config, limit)?,
    }

    Ok(())
}

/// Print per-stage schedules with their next fire times, then the
/// source toggle list. With `at`, also report whether each stage's
/// schedule would fire at that instant.
fn print_status(
    config: &PipelineConfig,
    at: Option<chrono::DateTime<chrono::Utc>>,
) -> anyhow::Result<()> {
    let now = chrono::Utc::now();
    for stage in Stage::ALL {
        let stage_cfg = config.stages.get(stage);
        println!(
            "{:<8} cron=\"{}\" tz={}",
            stage.to_string(),
            stage_cfg.cron,
            stage_cfg.timezone
        );
        if let Some(at) = at {
            let fires = stage_cfg.schedule().matches(at)?;
            println!(
                "         at {}: {}",
                at.format("%Y-%m-%d %H:%M UTC"),
                if fires { "fires" } else { "no fire" }
            );
        }
        let compiled = stage_cfg.schedule().compiled()?;
        for fire in compiled.after(&now).take(3) {
            println!("         next: {}", fire.format("%Y-%m-%d %H:%M UTC"));
        }
    }
    println!();
    for (name, source) in &config.sources {
        let stages: Vec<&str> = Stage::ALL
            .iter()
            .filter(|s| source.script_for(**s).is_some())
            .map(|s| s.as_str())
            .collect();
        println!(
            "{} {:<16} [{}]",
            if source.enabled { "on " } else { "off" },
            name,
            stages.join(", ")
        );
    }
    Ok(())
}

/// Print the most recent runs from the run log, oldest first.
fn print_history(config: &PipelineConfig, limit: usize) -> anyhow::Result<()> {
    let records = run_log::read_recent(&config.log.data_dir, limit)?;
    if records.is_empty() {
        println!("no runs recorded in {}", config.log.data_dir.display());
        return Ok(());
    }
    for record in records {
        let status = match record.status {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Running => "running",
            RunStatus::Pending => "pending",
        };
        let trigger = match record.trigger {
            TriggerKind::Manual => "manual",
            TriggerKind::Scheduled => "scheduled",
        };
        println!(
            "{}  {:<8} {:<9} {:<9} {:>3} sources  {:>7}ms",
            record.started_at.format("%Y-%m-%d %H:%M:%S"),
            record.stage.to_string(),
            trigger,
            status,
            record.sources.len(),
            record.duration_ms
        );
    }
    Ok(())
}
