//! Pipeline stage definitions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One phase of the pipeline.
///
/// Stages are strictly ordered: Fetch before Process before Report.
/// The derived `Ord` follows declaration order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Process,
    Report,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 3] = [Stage::Fetch, Stage::Process, Stage::Report];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Process => "process",
            Stage::Report => "report",
        }
    }

    /// Conventional script directory for this stage under the scripts root.
    pub fn script_dir(&self) -> &'static str {
        match self {
            Stage::Fetch => "1-fetch",
            Stage::Process => "2-process",
            Stage::Report => "3-report",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fetch" => Ok(Stage::Fetch),
            "process" => Ok(Stage::Process),
            "report" => Ok(Stage::Report),
            other => Err(format!(
                "unknown stage '{other}', expected one of: fetch, process, report"
            )),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
