use thiserror::Error;

/// Errors that can occur while loading configuration or executing a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    #[error("dependency install failed: {0}")]
    DependencyInstall(String),

    #[error("missing credential: {0}")]
    CredentialMissing(String),

    #[error("script execution failed for source '{script}': {detail}")]
    ScriptExecution { script: String, detail: String },

    #[error("run log error: {0}")]
    RunLog(String),
}
