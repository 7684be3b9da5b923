//! Recurring time specifications (cron) — parsing, validation, matching.
//!
//! Schedules are written as standard 5-field cron expressions
//! (minute hour day-of-month month day-of-week). The `cron` crate wants a
//! seconds field, so 5-field expressions are auto-prefixed with `0 `.
//! Evaluation is in UTC; the timezone label is carried for display.

use std::str::FromStr;

use chrono::{DateTime, Timelike, Utc};
use cron::Schedule as CronSchedule;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// A recurring time specification bound to one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    /// Cron expression (e.g. `"0 1,5,9,13,17,21,23 1-20 2,5,8,11 *"`).
    pub cron: String,
    /// IANA timezone name.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Schedule {
    pub fn new(cron: impl Into<String>) -> Self {
        Self {
            cron: cron.into(),
            timezone: default_timezone(),
        }
    }

    /// Compile the cron expression, validating field shape first for
    /// friendlier messages than the `cron` crate's parser produces.
    pub fn compiled(&self) -> Result<CronSchedule, PipelineError> {
        validate_cron(&self.cron).map_err(PipelineError::InvalidCron)?;
        parse_cron(&self.cron)
            .map_err(|e| PipelineError::InvalidCron(format!("'{}': {e}", self.cron)))
    }

    /// Whether the schedule fires at the given instant.
    ///
    /// Cron resolution is one minute, so `at` is truncated to the minute
    /// before the check.
    pub fn matches(&self, at: DateTime<Utc>) -> Result<bool, PipelineError> {
        let schedule = self.compiled()?;
        let minute = at
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(at);
        Ok(schedule.includes(minute))
    }

    /// Next fire time strictly after `now`, or `None` if the expression
    /// never fires again.
    pub fn next_after(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, PipelineError> {
        Ok(self.compiled()?.after(&now).next())
    }
}

/// Parse a cron expression, auto-prepending "0 " for 5-field expressions.
///
/// The `cron` crate requires 6 fields (sec min hr dom mon dow), but users
/// typically write 5-field cron (min hr dom mon dow). We detect and adapt.
fn parse_cron(expr: &str) -> Result<CronSchedule, cron::error::Error> {
    let parts: Vec<&str> = expr.split_whitespace().collect();
    if parts.len() == 5 {
        // Standard 5-field cron — prepend seconds field
        let six_field = format!("0 {}", expr);
        CronSchedule::from_str(&six_field)
    } else {
        CronSchedule::from_str(expr)
    }
}

// ── Field-shape validation ───────────────────────────────────────────

/// Validate a 5- or 6-field cron expression.
/// Accepts standard tokens: *, numbers, ranges (1-5), lists (1,3,5), steps (*/5).
pub fn validate_cron(expr: &str) -> Result<(), String> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 && fields.len() != 6 {
        return Err(format!(
            "cron expression must have 5 fields (minute hour day month weekday) \
             or 6 (with a leading seconds field), got {}",
            fields.len()
        ));
    }
    let field_names: &[&str] = if fields.len() == 6 {
        &["second", "minute", "hour", "day-of-month", "month", "day-of-week"]
    } else {
        &["minute", "hour", "day-of-month", "month", "day-of-week"]
    };
    for (i, field) in fields.iter().enumerate() {
        if !is_valid_cron_field(field) {
            return Err(format!(
                "invalid cron field '{}' at position {} ({})",
                field, i, field_names[i]
            ));
        }
    }
    Ok(())
}

/// Check if a single cron field token is syntactically valid.
/// Supports: `*`, `*/N`, `N`, `N-M`, `N-M/S`, comma-separated lists of the above.
fn is_valid_cron_field(field: &str) -> bool {
    if field.is_empty() {
        return false;
    }
    for part in field.split(',') {
        if !is_valid_cron_atom(part) {
            return false;
        }
    }
    true
}

fn is_valid_cron_atom(atom: &str) -> bool {
    if atom.is_empty() {
        return false;
    }
    let (range_part, step_part) = match atom.split_once('/') {
        Some((r, s)) => (r, Some(s)),
        None => (atom, None),
    };
    if let Some(step) = step_part {
        if step.is_empty() || !step.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
    }
    if range_part == "*" {
        return true;
    }
    if let Some((lo, hi)) = range_part.split_once('-') {
        is_cron_value(lo) && is_cron_value(hi)
    } else {
        is_cron_value(range_part)
    }
}

fn is_cron_value(v: &str) -> bool {
    if v.is_empty() {
        return false;
    }
    if v.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    // Named day/month (3-letter: MON, TUE, JAN, FEB, etc.)
    v.len() == 3 && v.chars().all(|c| c.is_ascii_alphabetic())
}

// ── Tests ────────────────────────────────────────────────────────────
