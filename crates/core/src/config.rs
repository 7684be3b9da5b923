//! Pipeline configuration loaded from `pipeline.toml`.
//!
//! The enabled/disabled source list is explicit configuration — records in
//! the config file — loaded at run start, never source-code edits. Parsed
//! with support for environment variable overrides.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::schedule::Schedule;
use crate::stage::Stage;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Default per-script timeout. No timeout policy was inherited from the
/// platform configuration, so this is the documented default.
pub const DEFAULT_SCRIPT_TIMEOUT_SECS: u64 = 3600;
/// Hard cap for per-script timeouts.
pub const MAX_SCRIPT_TIMEOUT_SECS: u64 = 86_400;
/// Default timeout for the dependency install step.
pub const DEFAULT_INSTALL_TIMEOUT_SECS: u64 = 600;

// ── Top-level config ─────────────────────────────────────────────────

/// Full orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Script collection location and interpreter.
    #[serde(default)]
    pub scripts: ScriptsConfig,

    /// Dependency install step, run before any source executes.
    #[serde(default)]
    pub install: InstallConfig,

    /// Run log location.
    #[serde(default)]
    pub log: LogConfig,

    /// Per-stage schedules and environment.
    pub stages: StagesConfig,

    /// Named sources in document order. Iteration order is config order.
    #[serde(default)]
    pub sources: IndexMap<String, SourceConfig>,
}

// ── Section configs ──────────────────────────────────────────────────

/// Where the per-source scripts live and how to run them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptsConfig {
    /// Root directory of the script collection. Exported to every script
    /// as `PYTHONPATH` so shared modules resolve.
    #[serde(default = "default_scripts_root")]
    pub root: PathBuf,

    /// Interpreter used to run stage scripts.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
}

fn default_scripts_root() -> PathBuf {
    PathBuf::from("scripts")
}

fn default_interpreter() -> String {
    "python".to_string()
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            root: default_scripts_root(),
            interpreter: default_interpreter(),
        }
    }
}

/// The reproducible-environment install step. Reads the locked dependency
/// manifest; a failure here aborts the run before any source executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_install_command")]
    pub command: String,

    #[serde(default = "default_install_args")]
    pub args: Vec<String>,

    #[serde(default = "default_install_timeout")]
    pub timeout_secs: u64,
}

fn default_install_command() -> String {
    "pipenv".to_string()
}

fn default_install_args() -> Vec<String> {
    vec!["sync".to_string(), "--dev".to_string()]
}

fn default_install_timeout() -> u64 {
    DEFAULT_INSTALL_TIMEOUT_SECS
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: default_install_command(),
            args: default_install_args(),
            timeout_secs: default_install_timeout(),
        }
    }
}

/// Run log location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Directory holding `runs.jsonl`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// One block per pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagesConfig {
    pub fetch: StageConfig,
    pub process: StageConfig,
    pub report: StageConfig,
}

impl StagesConfig {
    pub fn get(&self, stage: Stage) -> &StageConfig {
        match stage {
            Stage::Fetch => &self.fetch,
            Stage::Process => &self.process,
            Stage::Report => &self.report,
        }
    }
}

/// Schedule and execution environment for one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// 5-field cron expression controlling when this stage auto-triggers.
    pub cron: String,

    /// IANA timezone name.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Names of secrets resolved from the environment at run start and
    /// injected into this stage's scripts. Values are never logged.
    #[serde(default)]
    pub secrets: Vec<String>,

    /// Static environment variables for this stage's scripts.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Per-script timeout in seconds (capped at [`MAX_SCRIPT_TIMEOUT_SECS`]).
    #[serde(default = "default_script_timeout")]
    pub timeout_secs: u64,

    /// Run this stage's sources concurrently instead of sequentially.
    #[serde(default)]
    pub parallel: bool,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_script_timeout() -> u64 {
    DEFAULT_SCRIPT_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

impl StageConfig {
    pub fn schedule(&self) -> Schedule {
        Schedule {
            cron: self.cron.clone(),
            timezone: self.timezone.clone(),
        }
    }

    /// Effective per-script timeout, capped.
    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.min(MAX_SCRIPT_TIMEOUT_SECS))
    }
}

/// One named upstream source with its per-stage script references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Script path per stage, relative to the scripts root. A stage with
    /// no entry is skipped for this source without error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
}

impl SourceConfig {
    pub fn script_for(&self, stage: Stage) -> Option<&str> {
        match stage {
            Stage::Fetch => self.fetch.as_deref(),
            Stage::Process => self.process.as_deref(),
            Stage::Report => self.report.as_deref(),
        }
    }

    pub fn has_any_script(&self) -> bool {
        Stage::ALL.iter().any(|s| self.script_for(*s).is_some())
    }
}

// ── Loading & Validation ─────────────────────────────────────────────

impl PipelineConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, PipelineError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Apply environment variable overrides.
    ///
    /// Convention: `QUANTPIPE_SECTION_KEY` overrides `section.key`.
    /// - `QUANTPIPE_SCRIPTS_ROOT` → `scripts.root`
    /// - `QUANTPIPE_SCRIPTS_INTERPRETER` → `scripts.interpreter`
    /// - `QUANTPIPE_LOG_DATA_DIR` → `log.data_dir`
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("QUANTPIPE_SCRIPTS_ROOT") {
            self.scripts.root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("QUANTPIPE_SCRIPTS_INTERPRETER") {
            self.scripts.interpreter = v;
        }
        if let Ok(v) = std::env::var("QUANTPIPE_LOG_DATA_DIR") {
            self.log.data_dir = PathBuf::from(v);
        }
    }

    /// Validate the config: cron shapes, source records, secret names.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.validate_stage_schedules()?;
        self.validate_sources()?;
        self.validate_secrets()?;
        if self.scripts.interpreter.trim().is_empty() {
            return Err(PipelineError::Config(
                "scripts.interpreter must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_stage_schedules(&self) -> Result<(), PipelineError> {
        for stage in Stage::ALL {
            self.stages.get(stage).schedule().compiled().map_err(|e| {
                PipelineError::Config(format!("stage '{stage}': {e}"))
            })?;
        }
        Ok(())
    }

    fn validate_sources(&self) -> Result<(), PipelineError> {
        if self.sources.is_empty() {
            return Err(PipelineError::Config(
                "at least one [sources.<name>] record is required".to_string(),
            ));
        }
        for (name, source) in &self.sources {
            if !source.has_any_script() {
                return Err(PipelineError::Config(format!(
                    "source '{name}' declares no script for any stage"
                )));
            }
        }
        Ok(())
    }

    fn validate_secrets(&self) -> Result<(), PipelineError> {
        for stage in Stage::ALL {
            for name in &self.stages.get(stage).secrets {
                if name.trim().is_empty() {
                    return Err(PipelineError::Config(format!(
                        "stage '{stage}' lists an empty secret name"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Resolve a stage script path under the scripts root.
    pub fn script_path(&self, relative: &str) -> PathBuf {
        self.scripts.root.join(relative)
    }

    /// Print a summary for startup logs. Secret names only, never values.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!(
            "  scripts:  root={}, interpreter={}",
            self.scripts.root.display(),
            self.scripts.interpreter
        );
        tracing::info!(
            "  install:  enabled={}, command={} {}",
            self.install.enabled,
            self.install.command,
            self.install.args.join(" ")
        );
        tracing::info!("  log:      data_dir={}", self.log.data_dir.display());
        for stage in Stage::ALL {
            let sc = self.stages.get(stage);
            tracing::info!(
                "  {}: cron=\"{}\", secrets=[{}], parallel={}",
                stage,
                sc.cron,
                sc.secrets.join(", "),
                sc.parallel
            );
        }
        let enabled = self.sources.iter().filter(|(_, s)| s.enabled).count();
        tracing::info!(
            "  sources:  {} configured, {} enabled",
            self.sources.len(),
            enabled
        );
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[stages.fetch]
cron = "0 1,5,9,13,17,21,23 1-20 2,5,8,11 *"

[stages.process]
cron = "0 2 * * *"

[stages.report]
cron = "0 3 * * *"

[sources.gcs]
fetch = "1-fetch/gcs_fetch.py"
"#;

    #[test]
    fn parse_minimal_toml() {
        let cfg = PipelineConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(cfg.scripts.root, PathBuf::from("scripts"));
        assert_eq!(cfg.scripts.interpreter, "python");
        assert!(cfg.install.enabled);
        assert_eq!(cfg.install.command, "pipenv");
        assert_eq!(cfg.log.data_dir, PathBuf::from("data"));
        assert_eq!(cfg.sources.len(), 1);
        assert!(cfg.sources["gcs"].enabled);
    }

    #[test]
    fn parse_full_toml() {
        let toml_str = r#"
[scripts]
root = "pipeline/scripts"
interpreter = "python3"

[install]
command = "pip"
args = ["install", "-r", "requirements.txt"]
timeout_secs = 120

[log]
data_dir = "var/quantpipe"

[stages.fetch]
cron = "0 1,5,9,13,17,21,23 1-20 2,5,8,11 *"
secrets = ["GCS_DEVELOPER_KEY", "GCS_CX"]
timeout_secs = 7200

[stages.process]
cron = "0 2 * * *"
parallel = true

[stages.report]
cron = "0 3 * * *"

[stages.report.env]
MPLBACKEND = "Agg"

[sources.gcs]
fetch = "1-fetch/gcs_fetch.py"
process = "2-process/gcs_process.py"
report = "3-report/gcs_reports.py"

[sources.flickr]
enabled = false
fetch = "1-fetch/flickr_fetch.py"
"#;
        let cfg = PipelineConfig::from_toml(toml_str).unwrap();
        assert_eq!(cfg.scripts.interpreter, "python3");
        assert_eq!(cfg.install.command, "pip");
        assert_eq!(cfg.install.timeout_secs, 120);
        assert_eq!(
            cfg.stages.fetch.secrets,
            vec!["GCS_DEVELOPER_KEY", "GCS_CX"]
        );
        assert_eq!(cfg.stages.fetch.timeout_secs, 7200);
        assert!(cfg.stages.process.parallel);
        assert!(!cfg.stages.report.parallel);
        assert_eq!(cfg.stages.report.env["MPLBACKEND"], "Agg");
        assert!(!cfg.sources["flickr"].enabled);
        assert_eq!(
            cfg.sources["gcs"].script_for(Stage::Report).unwrap(),
            "3-report/gcs_reports.py"
        );
        assert!(cfg.sources["flickr"].script_for(Stage::Report).is_none());
    }

    #[test]
    fn sources_keep_document_order() {
        let toml_str = r#"
[stages.fetch]
cron = "0 1 * * *"
[stages.process]
cron = "0 2 * * *"
[stages.report]
cron = "0 3 * * *"

[sources.wikipedia]
fetch = "1-fetch/wikipedia_fetch.py"
[sources.gcs]
fetch = "1-fetch/gcs_fetch.py"
[sources.flickr]
fetch = "1-fetch/flickr_fetch.py"
"#;
        let cfg = PipelineConfig::from_toml(toml_str).unwrap();
        let names: Vec<&str> = cfg.sources.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["wikipedia", "gcs", "flickr"]);
    }

    #[test]
    fn reject_invalid_stage_cron() {
        let toml_str = r#"
[stages.fetch]
cron = "every quarter"
[stages.process]
cron = "0 2 * * *"
[stages.report]
cron = "0 3 * * *"
[sources.gcs]
fetch = "1-fetch/gcs_fetch.py"
"#;
        let err = PipelineConfig::from_toml(toml_str).unwrap_err();
        assert!(err.to_string().contains("fetch"), "got: {err}");
    }

    #[test]
    fn reject_empty_source_list() {
        let toml_str = r#"
[stages.fetch]
cron = "0 1 * * *"
[stages.process]
cron = "0 2 * * *"
[stages.report]
cron = "0 3 * * *"
"#;
        let err = PipelineConfig::from_toml(toml_str).unwrap_err();
        assert!(err.to_string().contains("at least one"), "got: {err}");
    }

    #[test]
    fn reject_source_without_scripts() {
        let toml_str = r#"
[stages.fetch]
cron = "0 1 * * *"
[stages.process]
cron = "0 2 * * *"
[stages.report]
cron = "0 3 * * *"
[sources.ghost]
enabled = true
"#;
        let err = PipelineConfig::from_toml(toml_str).unwrap_err();
        assert!(err.to_string().contains("ghost"), "got: {err}");
    }

    #[test]
    fn reject_empty_secret_name() {
        let toml_str = r#"
[stages.fetch]
cron = "0 1 * * *"
secrets = [""]
[stages.process]
cron = "0 2 * * *"
[stages.report]
cron = "0 3 * * *"
[sources.gcs]
fetch = "1-fetch/gcs_fetch.py"
"#;
        let err = PipelineConfig::from_toml(toml_str).unwrap_err();
        assert!(err.to_string().contains("secret"), "got: {err}");
    }

    #[test]
    fn env_override_scripts_root() {
        // SAFETY: test-only, nextest runs each test in its own process
        unsafe {
            std::env::set_var("QUANTPIPE_SCRIPTS_ROOT", "/srv/pipeline/scripts");
        }
        let cfg = PipelineConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(cfg.scripts.root, PathBuf::from("/srv/pipeline/scripts"));
        unsafe {
            std::env::remove_var("QUANTPIPE_SCRIPTS_ROOT");
        }
    }

    #[test]
    fn script_timeout_is_capped() {
        let sc = StageConfig {
            cron: "0 1 * * *".into(),
            timezone: "UTC".into(),
            secrets: Vec::new(),
            env: HashMap::new(),
            timeout_secs: 999_999_999,
            parallel: false,
        };
        assert_eq!(
            sc.script_timeout(),
            Duration::from_secs(MAX_SCRIPT_TIMEOUT_SECS)
        );
    }

    #[test]
    fn script_path_joins_root() {
        let cfg = PipelineConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(
            cfg.script_path("1-fetch/gcs_fetch.py"),
            PathBuf::from("scripts/1-fetch/gcs_fetch.py")
        );
    }

    #[test]
    fn from_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        let cfg = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(cfg.sources.len(), 1);
    }

    #[test]
    fn from_file_missing_is_io_error() {
        let err = PipelineConfig::from_file("no/such/pipeline.toml").unwrap_err();
        assert!(matches!(err, PipelineError::ConfigIo(_)));
    }
}
