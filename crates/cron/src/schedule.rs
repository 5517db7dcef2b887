//! Next-run computation for all schedule kinds.

use {
    chrono::{DateTime, Local, TimeZone, Utc},
    cron::Schedule,
};

use crate::{Error, Result, types::CronSchedule};

/// Parse a cron expression.
///
/// The `cron` crate wants 6 or 7 fields (sec min hour dom month dow [year]).
/// Users typically provide the classic 5 fields, which are padded with a
/// leading `0` for seconds and a trailing `*` for year.
pub fn parse_cron_expr(expr: &str) -> Result<Schedule> {
    let expr = expr.trim();
    expr.parse::<Schedule>().or_else(|original| {
        if expr.split_whitespace().count() == 5 {
            format!("0 {expr} *")
                .parse::<Schedule>()
                .map_err(|e| Error::cron_parse(expr, e))
        } else {
            Err(Error::cron_parse(expr, original))
        }
    })
}

pub fn parse_timezone(name: &str) -> Result<chrono_tz::Tz> {
    name.parse()
        .map_err(|_| Error::unknown_timezone(name.to_string()))
}

/// Reject schedules that can never produce a run.
pub fn validate_schedule(schedule: &CronSchedule) -> Result<()> {
    match schedule {
        CronSchedule::At { at_ms } => {
            if *at_ms == 0 {
                return Err(Error::invalid_schedule("at_ms must be > 0"));
            }
        },
        CronSchedule::Every { every_ms } => {
            if *every_ms == 0 {
                return Err(Error::invalid_schedule("every_ms must be > 0"));
            }
        },
        CronSchedule::Cron { expr, tz } => {
            parse_cron_expr(expr)?;
            if let Some(tz) = tz {
                parse_timezone(tz)?;
            }
        },
    }
    Ok(())
}

/// Compute the next run time (epoch millis) for a schedule.
///
/// `anchor_ms` is the baseline for interval schedules: the last run, or the
/// creation time for a job that never ran. Ticks that fell in the past are
/// skipped, so the result is always strictly after `now_ms`.
///
/// Returns `None` if the schedule has no future runs (e.g. a past one-shot).
pub fn compute_next_run(schedule: &CronSchedule, anchor_ms: u64, now_ms: u64) -> Result<Option<u64>> {
    match schedule {
        CronSchedule::At { at_ms } => {
            if *at_ms > now_ms {
                Ok(Some(*at_ms))
            } else {
                Ok(None)
            }
        },
        CronSchedule::Every { every_ms } => {
            if *every_ms == 0 {
                return Err(Error::invalid_schedule("every_ms must be > 0"));
            }
            let first = anchor_ms.saturating_add(*every_ms);
            if first > now_ms {
                return Ok(Some(first));
            }
            let intervals = (now_ms - anchor_ms) / every_ms;
            Ok(Some(anchor_ms + (intervals + 1) * every_ms))
        },
        CronSchedule::Cron { expr, tz } => {
            let schedule = parse_cron_expr(expr)?;
            let now_dt = DateTime::from_timestamp_millis(now_ms as i64)
                .ok_or_else(|| Error::invalid_schedule(format!("timestamp out of range: {now_ms}")))?;

            let next = match tz {
                Some(tz_name) => {
                    let tz = parse_timezone(tz_name)?;
                    next_after(&schedule, &now_dt.with_timezone(&tz))
                },
                None => next_after(&schedule, &now_dt.with_timezone(&Local)),
            };
            Ok(next)
        },
    }
}

fn next_after<Z: TimeZone>(schedule: &Schedule, after: &DateTime<Z>) -> Option<u64> {
    schedule
        .after(after)
        .next()
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis() as u64)
}
