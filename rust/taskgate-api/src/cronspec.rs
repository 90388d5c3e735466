//! Cron recurrence rules.
//!
//! Callers submit standard 5-field cron expressions
//! (`min hour day-of-month month day-of-week`); any other field count is
//! rejected. The `cron` crate wants a leading seconds field, so a zero is
//! prepended before parsing.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};

/// A recurring schedule rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronSpec {
    /// 5-field cron expression.
    pub cron_str: String,
    /// How many times to run; absent means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<u32>,
    /// Result retention override, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_ttl: Option<u64>,
    /// Queued time-to-live override, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

/// Cron validation failures.
#[derive(Debug, thiserror::Error)]
pub enum CronSpecError {
    /// Wrong number of whitespace-separated fields.
    #[error("expected 5 fields (min hour day-of-month month day-of-week), got {0}")]
    FieldCount(usize),
    /// A field failed to parse.
    #[error(transparent)]
    Parse(#[from] cron::error::Error),
}

impl CronSpec {
    /// Parse and validate the expression, returning the parsed schedule.
    /// Exactly 5 fields are accepted.
    pub fn parse(&self) -> Result<Schedule, CronSpecError> {
        let trimmed = self.cron_str.trim();
        let fields = trimmed.split_whitespace().count();
        if fields != 5 {
            return Err(CronSpecError::FieldCount(fields));
        }
        Ok(Schedule::from_str(&format!("0 {trimmed}"))?)
    }

    /// The next materialization time after `after`, if the rule has one.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.parse().ok()?.after(&after).next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(expr: &str) -> CronSpec {
        CronSpec {
            cron_str: expr.to_string(),
            repeat: None,
            result_ttl: None,
            ttl: None,
        }
    }

    #[test]
    fn parses_standard_five_field_expression() {
        assert!(spec("0 12 * * *").parse().is_ok());
        assert!(spec("*/5 * * * *").parse().is_ok());
    }

    #[test]
    fn rejects_garbage() {
        assert!(spec("invalid cron expression").parse().is_err());
        assert!(spec("* * *").parse().is_err());
        assert!(matches!(
            spec("61 * * * *").parse().unwrap_err(),
            CronSpecError::Parse(_)
        ));
    }

    #[test]
    fn rejects_six_and_seven_field_expressions() {
        assert!(matches!(
            spec("0 12 * * * *").parse().unwrap_err(),
            CronSpecError::FieldCount(6)
        ));
        assert!(matches!(
            spec("0 0 12 * * * 2026").parse().unwrap_err(),
            CronSpecError::FieldCount(7)
        ));
    }

    #[test]
    fn next_after_moves_forward() {
        let s = spec("0 12 * * *");
        let now = Utc::now();
        let next = s.next_after(now).unwrap();
        assert!(next > now);
    }
}
