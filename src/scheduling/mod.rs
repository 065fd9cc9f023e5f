//! Schedule arithmetic for interval and cron jobs
//!
//! Computes the next and previous expected occurrences of a job's schedule
//! relative to a reference time. Cron expressions are validated here once,
//! at job creation/update time; evaluation assumes a validated spec.

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use std::str::FromStr;

use crate::errors::{AppError, AppResult};
use crate::models::ScheduleSpec;

/// Windows scanned backwards when looking for a prior cron occurrence, in
/// seconds. The `cron` crate only iterates forward, so the search starts a
/// window before the reference and keeps the last match not after it.
const LOOKBACK_WINDOW_SECS: [i64; 5] = [
    2 * 60,
    2 * 3600,
    36 * 3600,
    40 * 86400,
    1500 * 86400,
];

/// Validate a schedule spec, surfacing malformed input as a validation error.
pub fn validate(spec: &ScheduleSpec) -> AppResult<()> {
    match spec {
        ScheduleSpec::Interval { seconds } => {
            if *seconds <= 0 {
                return Err(AppError::validation(format!(
                    "interval must be positive, got {seconds}s"
                )));
            }
            Ok(())
        }
        ScheduleSpec::Cron { expression } => parse_cron(expression).map(|_| ()),
    }
}

/// Next expected occurrence strictly after `reference`.
///
/// For interval jobs this is purely additive from the reference time; for
/// cron jobs it is the next matching instant of the expression.
pub fn next_occurrence(spec: &ScheduleSpec, reference: DateTime<Utc>) -> AppResult<DateTime<Utc>> {
    match spec {
        ScheduleSpec::Interval { seconds } => Ok(reference + Duration::seconds(*seconds)),
        ScheduleSpec::Cron { expression } => {
            let schedule = parse_cron(expression)?;
            schedule.after(&reference).next().ok_or_else(|| {
                AppError::internal(format!("cron '{expression}' has no upcoming occurrence"))
            })
        }
    }
}

/// Most recent occurrence at or before `reference`.
///
/// Only cron jobs have a previous-occurrence concept; interval jobs yield
/// `None`. `None` is also returned for a cron schedule with no reachable
/// prior match (e.g. a far-future one-shot spec).
pub fn previous_occurrence(
    spec: &ScheduleSpec,
    reference: DateTime<Utc>,
) -> AppResult<Option<DateTime<Utc>>> {
    match spec {
        ScheduleSpec::Interval { .. } => Ok(None),
        ScheduleSpec::Cron { expression } => {
            let schedule = parse_cron(expression)?;
            if schedule.includes(reference) {
                return Ok(Some(reference));
            }
            for window in LOOKBACK_WINDOW_SECS {
                let mut previous = None;
                for occurrence in schedule.after(&(reference - Duration::seconds(window))) {
                    if occurrence > reference {
                        break;
                    }
                    previous = Some(occurrence);
                }
                if previous.is_some() {
                    return Ok(previous);
                }
            }
            Ok(None)
        }
    }
}

/// Parse a 5- or 6-field cron expression.
///
/// The `cron` crate expects a seconds field; plain 5-field expressions are
/// normalized by prepending `0` so they fire on the minute.
fn parse_cron(expression: &str) -> AppResult<Schedule> {
    let field_count = expression.split_whitespace().count();
    if !(5..=6).contains(&field_count) {
        return Err(AppError::validation(format!(
            "cron expression '{expression}' must have 5 or 6 fields, got {field_count}"
        )));
    }

    let normalized = if field_count == 5 {
        format!("0 {}", expression.trim())
    } else {
        expression.trim().to_string()
    };

    Schedule::from_str(&normalized)
        .map_err(|e| AppError::validation(format!("invalid cron expression '{expression}': {e}")))
}
