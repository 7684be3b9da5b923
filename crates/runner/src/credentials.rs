//! Stage credential resolution.
//!
//! Secrets are named per stage in config and resolved from the process
//! environment at run start (call `load_dotenv()` first). Resolved values
//! go into child process environments only — they are never logged and
//! never written to the run log.

use std::collections::HashMap;

use tracing::debug;

use quantpipe_core::error::PipelineError;

/// Resolve the named secrets from the process environment.
///
/// Empty values count as missing. The first missing name aborts with
/// [`PipelineError::CredentialMissing`].
pub fn resolve_secrets(names: &[String]) -> Result<HashMap<String, String>, PipelineError> {
    let mut resolved = HashMap::with_capacity(names.len());
    for name in names {
        match std::env::var(name) {
            Ok(value) if !value.is_empty() => {
                debug!(secret = %name, "credential resolved");
                resolved.insert(name.clone(), value);
            }
            _ => return Err(PipelineError::CredentialMissing(name.clone())),
        }
    }
    Ok(resolved)
}

// ── Tests ────────────────────────────────────────────────────────────
